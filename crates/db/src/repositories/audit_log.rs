use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};

use attest_core::domain::approval::ApprovalId;
use attest_core::domain::audit::{
    AuditAction, AuditLogEntry, AuditLogId, AuditMetadata, AuditQuery, Period, SortOrder,
};
use attest_core::domain::{format_timestamp, parse_timestamp};
use attest_core::repository::{
    AuditLogRepository, RepositoryError, ScannedAuditRow, UnreadableAuditRow,
};

use super::{decode, storage};
use crate::DbPool;

/// Append-only store. Update and delete are refused by schema triggers.
pub struct SqlAuditLogRepository {
    pool: DbPool,
}

impl SqlAuditLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, query: &AuditQuery) -> Result<Vec<SqliteRow>, RepositoryError> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, approval_id, approver, action, timestamp, comment, metadata, seal
             FROM audit_logs WHERE 1=1",
        );
        if let Some(start) = &query.start {
            builder.push(" AND timestamp >= ").push_bind(format_timestamp(start));
        }
        if let Some(end) = &query.end {
            builder.push(" AND timestamp <= ").push_bind(format_timestamp(end));
        }
        if let Some(approver) = &query.approver {
            builder.push(" AND approver = ").push_bind(approver.clone());
        }
        if let Some(action) = query.action {
            builder.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(approval_id) = &query.approval_id {
            builder.push(" AND approval_id = ").push_bind(approval_id.0.clone());
        }
        builder.push(match query.order {
            SortOrder::Ascending => " ORDER BY timestamp ASC, rowid ASC",
            SortOrder::Descending => " ORDER BY timestamp DESC, rowid DESC",
        });

        builder.build().fetch_all(&self.pool).await.map_err(storage)
    }
}

/// Keeps the row id when the rest of the row fails to decode or validate.
fn scan_row(row: &SqliteRow) -> Result<ScannedAuditRow, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    Ok(row_to_entry(row)
        .map_err(|error| UnreadableAuditRow { id: AuditLogId(id), reason: error.to_string() }))
}

fn row_to_entry(row: &SqliteRow) -> Result<AuditLogEntry, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let approval_id: String = row.try_get("approval_id").map_err(decode)?;
    let approver: String = row.try_get("approver").map_err(decode)?;
    let action_str: String = row.try_get("action").map_err(decode)?;
    let timestamp_str: String = row.try_get("timestamp").map_err(decode)?;
    let comment: String = row.try_get("comment").map_err(decode)?;
    let metadata_json: String = row.try_get("metadata").map_err(decode)?;
    let seal: String = row.try_get("seal").map_err(decode)?;

    let metadata: AuditMetadata = serde_json::from_str(&metadata_json)
        .map_err(|error| decode(format!("audit entry {id} metadata: {error}")))?;

    let entry = AuditLogEntry {
        id: AuditLogId(id),
        approval_id: ApprovalId(approval_id),
        approver,
        action: AuditAction::from_str(&action_str).map_err(decode)?,
        timestamp: parse_timestamp(&timestamp_str).map_err(decode)?,
        comment,
        metadata,
        seal,
    };
    entry.validate().map_err(decode)?;
    Ok(entry)
}

#[async_trait::async_trait]
impl AuditLogRepository for SqlAuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&entry.metadata).map_err(decode)?;

        sqlx::query(
            "INSERT INTO audit_logs (id, approval_id, approver, action, timestamp, comment,
                                     metadata, seal)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(entry.approval_id.as_str())
        .bind(&entry.approver)
        .bind(entry.action.as_str())
        .bind(format_timestamp(&entry.timestamp))
        .bind(&entry.comment)
        .bind(metadata)
        .bind(&entry.seal)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        self.fetch(query).await?.iter().map(row_to_entry).collect()
    }

    async fn scan(&self, query: &AuditQuery) -> Result<Vec<ScannedAuditRow>, RepositoryError> {
        self.fetch(query).await?.iter().map(scan_row).collect()
    }

    async fn time_bounds(&self) -> Result<Option<Period>, RepositoryError> {
        let row = sqlx::query(
            "SELECT MIN(timestamp) AS earliest, MAX(timestamp) AS latest FROM audit_logs",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        let earliest: Option<String> = row.try_get("earliest").map_err(decode)?;
        let latest: Option<String> = row.try_get("latest").map_err(decode)?;
        match (earliest, latest) {
            (Some(earliest), Some(latest)) => Ok(Some(Period::new(
                parse_timestamp(&earliest).map_err(decode)?,
                parse_timestamp(&latest).map_err(decode)?,
            ))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;

    use attest_core::domain::approval::{ApprovalId, ApprovalType, NewApproval};
    use attest_core::domain::audit::{AuditAction, AuditLogEntry, AuditMetadata, AuditQuery, Period};
    use attest_core::domain::timestamp_now;
    use attest_core::domain::audit::AuditLogId;
    use attest_core::repository::{AuditLogRepository, RepositoryError, UnreadableAuditRow};

    use super::SqlAuditLogRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, hour, 0, 0).unwrap()
    }

    fn entry(approval: &str, approver: &str, action: AuditAction, when: DateTime<Utc>) -> AuditLogEntry {
        let mut entry =
            AuditLogEntry::new(ApprovalId(approval.to_string()), approver, action, "ok", AuditMetadata::None);
        entry.timestamp = when;
        entry.seal = "ab".repeat(32);
        entry
    }

    #[tokio::test]
    async fn appended_entries_round_trip_with_metadata_and_seal() {
        let repo = SqlAuditLogRepository::new(setup().await);
        let snapshot = NewApproval {
            approval_type: ApprovalType::Purchase,
            amount: Some(Decimal::new(10050, 2)),
            requester: "a@x".to_string(),
            approver: "b@x".to_string(),
            description: "Laptop".to_string(),
        }
        .into_approval(timestamp_now())
        .expect("valid approval");
        let mut deletion = AuditLogEntry::new(
            snapshot.id.clone(),
            "admin@x",
            AuditAction::Deleted,
            "cleanup",
            AuditMetadata::Deletion { snapshot: Box::new(snapshot.clone()) },
        );
        deletion.seal = "cd".repeat(32);

        repo.append(&deletion).await.expect("append");
        let stored = repo.query(&AuditQuery::for_approval(snapshot.id.clone())).await.expect("query");

        assert_eq!(stored, vec![deletion]);
        assert_eq!(stored[0].snapshot(), Some(&snapshot));
    }

    #[tokio::test]
    async fn query_honors_inclusive_range_filters_and_order() {
        let repo = SqlAuditLogRepository::new(setup().await);
        let first = entry("apr-1", "b@x", AuditAction::Approved, at(10, 0));
        let second = entry("apr-2", "c@x", AuditAction::Rejected, at(11, 12));
        let third = entry("apr-3", "b@x", AuditAction::Approved, at(12, 0));
        for item in [&first, &second, &third] {
            repo.append(item).await.expect("append");
        }

        let window = AuditQuery::within(Period::new(at(10, 0), at(11, 12)));
        let newest_first = repo.query(&window).await.expect("query");
        assert_eq!(newest_first, vec![second.clone(), first.clone()]);

        let oldest_first = repo.query(&window.clone().ascending()).await.expect("query");
        assert_eq!(oldest_first, vec![first.clone(), second.clone()]);

        let by_approver =
            repo.query(&AuditQuery::default().with_approver("b@x")).await.expect("query");
        assert_eq!(by_approver, vec![third.clone(), first.clone()]);

        let rejected =
            repo.query(&AuditQuery::default().with_action(AuditAction::Rejected)).await.expect("query");
        assert_eq!(rejected, vec![second]);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let repo = SqlAuditLogRepository::new(setup().await);
        let when = at(15, 9);
        let first = entry("apr-1", "b@x", AuditAction::Approved, when);
        let second = entry("apr-1", "admin@x", AuditAction::Rejected, when);
        repo.append(&first).await.expect("append");
        repo.append(&second).await.expect("append");

        let ascending =
            repo.query(&AuditQuery::for_approval(first.approval_id.clone()).ascending()).await.expect("query");
        assert_eq!(ascending, vec![first.clone(), second.clone()]);
        let descending =
            repo.query(&AuditQuery::for_approval(first.approval_id.clone())).await.expect("query");
        assert_eq!(descending, vec![second, first]);
    }

    #[tokio::test]
    async fn time_bounds_span_every_entry() {
        let repo = SqlAuditLogRepository::new(setup().await);
        assert_eq!(repo.time_bounds().await.expect("bounds"), None);

        repo.append(&entry("apr-1", "b@x", AuditAction::Approved, at(20, 8))).await.expect("append");
        repo.append(&entry("apr-2", "b@x", AuditAction::Approved, at(3, 8))).await.expect("append");

        assert_eq!(
            repo.time_bounds().await.expect("bounds"),
            Some(Period::new(at(3, 8), at(20, 8)))
        );
    }

    #[tokio::test]
    async fn stored_rows_cannot_be_rewritten() {
        let pool = setup().await;
        let repo = SqlAuditLogRepository::new(pool.clone());
        let item = entry("apr-1", "b@x", AuditAction::Approved, at(10, 0));
        repo.append(&item).await.expect("append");

        let update = sqlx::query("UPDATE audit_logs SET comment = 'edited' WHERE id = ?")
            .bind(&item.id.0)
            .execute(&pool)
            .await;
        assert!(update.is_err());
        let delete = sqlx::query("DELETE FROM audit_logs").execute(&pool).await;
        assert!(delete.is_err());
    }

    #[tokio::test]
    async fn undecodable_metadata_is_a_decode_error() {
        let pool = setup().await;
        sqlx::query(
            "INSERT INTO audit_logs (id, approval_id, approver, action, timestamp, comment, metadata, seal)
             VALUES ('log-1', 'apr-1', 'b@x', 'restored', '2026-01-10T00:00:00.000Z', '',
                     '{\"kind\":\"restoration\",\"original_status\":\"archived\",\"restored_status\":\"pending\"}', '')",
        )
        .execute(&pool)
        .await
        .expect("raw insert");

        let repo = SqlAuditLogRepository::new(pool);
        let outcome = repo.query(&AuditQuery::default()).await;
        assert!(matches!(outcome, Err(RepositoryError::Decode(_))));
    }

    #[tokio::test]
    async fn metadata_that_contradicts_the_action_is_rejected_on_read() {
        let pool = setup().await;
        sqlx::query(
            "INSERT INTO audit_logs (id, approval_id, approver, action, timestamp, comment, metadata, seal)
             VALUES ('log-2', 'apr-1', 'b@x', 'deleted', '2026-01-10T00:00:00.000Z', '',
                     '{\"kind\":\"none\"}', '')",
        )
        .execute(&pool)
        .await
        .expect("raw insert");

        let repo = SqlAuditLogRepository::new(pool);
        assert!(matches!(repo.query(&AuditQuery::default()).await, Err(RepositoryError::Decode(_))));
    }

    #[tokio::test]
    async fn scan_reports_unreadable_rows_alongside_valid_ones() {
        let pool = setup().await;
        let repo = SqlAuditLogRepository::new(pool.clone());
        let valid = entry("apr-1", "b@x", AuditAction::Approved, at(9, 0));
        repo.append(&valid).await.expect("append");
        sqlx::query(
            "INSERT INTO audit_logs (id, approval_id, approver, action, timestamp, comment, metadata, seal)
             VALUES ('log-3', 'apr-1', 'b@x', 'deleted', '2026-01-10T00:00:00.000Z', '',
                     '{\"kind\":\"none\"}', '')",
        )
        .execute(&pool)
        .await
        .expect("raw insert");

        let scanned = repo.scan(&AuditQuery::default().ascending()).await.expect("scan");
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0], Ok(valid));
        match &scanned[1] {
            Err(UnreadableAuditRow { id, reason }) => {
                assert_eq!(id, &AuditLogId("log-3".to_string()));
                assert!(reason.contains("deleted"), "unexpected reason: {reason}");
            }
            other => panic!("expected an unreadable row, got {other:?}"),
        }
    }
}
