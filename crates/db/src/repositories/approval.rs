use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Row, Sqlite};

use attest_core::domain::approval::{
    Approval, ApprovalFilter, ApprovalId, ApprovalStatus, ApprovalType, DecisionUpdate,
};
use attest_core::domain::{format_timestamp, parse_timestamp};
use attest_core::repository::{ApprovalRepository, RepositoryError};

use super::{decode, storage};
use crate::DbPool;

const APPROVAL_COLUMNS: &str = "id, type, amount, requester, approver, description, justification,
     status, created_at, updated_at, response_at, response_by";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<Approval, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let type_str: String = row.try_get("type").map_err(decode)?;
    let amount_str: Option<String> = row.try_get("amount").map_err(decode)?;
    let requester: String = row.try_get("requester").map_err(decode)?;
    let approver: String = row.try_get("approver").map_err(decode)?;
    let description: String = row.try_get("description").map_err(decode)?;
    let justification: String = row.try_get("justification").map_err(decode)?;
    let status_str: String = row.try_get("status").map_err(decode)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode)?;
    let updated_at_str: String = row.try_get("updated_at").map_err(decode)?;
    let response_at_str: Option<String> = row.try_get("response_at").map_err(decode)?;
    let response_by: Option<String> = row.try_get("response_by").map_err(decode)?;

    let amount = amount_str
        .map(|raw| Decimal::from_str(&raw).map_err(|error| decode(format!("amount `{raw}`: {error}"))))
        .transpose()?;

    let approval = Approval {
        id: ApprovalId(id),
        approval_type: ApprovalType::from_str(&type_str).map_err(decode)?,
        amount,
        requester,
        approver,
        description,
        justification,
        status: ApprovalStatus::from_str(&status_str).map_err(decode)?,
        created_at: parse_timestamp(&created_at_str).map_err(decode)?,
        updated_at: parse_timestamp(&updated_at_str).map_err(decode)?,
        response_at: response_at_str.as_deref().map(parse_timestamp).transpose().map_err(decode)?,
        response_by,
    };
    approval.validate().map_err(decode)?;
    Ok(approval)
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn list(&self, filter: &ApprovalFilter) -> Result<Vec<Approval>, RepositoryError> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {APPROVAL_COLUMNS} FROM approvals WHERE 1=1"));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(requester) = &filter.requester {
            builder.push(" AND requester = ").push_bind(requester.clone());
        }
        if let Some(approver) = &filter.approver {
            builder.push(" AND approver = ").push_bind(approver.clone());
        }
        builder.push(" ORDER BY created_at DESC, rowid DESC");

        let rows = builder.build().fetch_all(&self.pool).await.map_err(storage)?;
        rows.iter().map(row_to_approval).collect()
    }

    async fn insert_if_absent(&self, approval: &Approval) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO approvals (id, type, amount, requester, approver, description,
                                    justification, status, created_at, updated_at,
                                    response_at, response_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(approval.id.as_str())
        .bind(approval.approval_type.as_str())
        .bind(approval.amount.map(|amount| amount.to_string()))
        .bind(&approval.requester)
        .bind(&approval.approver)
        .bind(&approval.description)
        .bind(&approval.justification)
        .bind(approval.status.as_str())
        .bind(format_timestamp(&approval.created_at))
        .bind(format_timestamp(&approval.updated_at))
        .bind(approval.response_at.as_ref().map(format_timestamp))
        .bind(&approval.response_by)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn compare_and_set_decision(
        &self,
        id: &ApprovalId,
        expected: ApprovalStatus,
        update: &DecisionUpdate,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approvals
             SET status = ?, justification = ?, response_by = ?, response_at = ?, updated_at = ?
             WHERE id = ? AND status = ?",
        )
        .bind(update.status.as_str())
        .bind(&update.justification)
        .bind(&update.response_by)
        .bind(format_timestamp(&update.response_at))
        .bind(format_timestamp(&update.response_at))
        .bind(id.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: &ApprovalId) -> Result<Option<Approval>, RepositoryError> {
        let row = sqlx::query(&format!(
            "DELETE FROM approvals WHERE id = ? RETURNING {APPROVAL_COLUMNS}"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(row_to_approval).transpose()
    }
}
