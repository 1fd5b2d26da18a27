//! Append-only audit trail over the approval lifecycle.
//!
//! Entries are sealed before they are stored. If the store refuses an append the entry is
//! parked in a deferred queue and retried later; the approval change that produced it
//! is never rolled back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::domain::approval::{Approval, ApprovalId, ApprovalType};
use crate::domain::audit::{AuditAction, AuditLogEntry, AuditLogId, AuditQuery, Period};
use crate::repository::{ApprovalRepository, AuditLogRepository, RepositoryError};

pub mod seal;

pub use seal::AuditSealer;

pub const DEFAULT_DEFERRED_LIMIT: usize = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    Recorded,
    Deferred,
    /// The store refused the entry and the deferred queue was already full.
    Dropped,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetrySummary {
    pub flushed: usize,
    pub remaining: usize,
}

/// An entry plus the request context a report needs to print it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditReportRow {
    pub entry: AuditLogEntry,
    pub approval_type: Option<ApprovalType>,
    pub requester: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub checked: usize,
    pub tampered: Vec<AuditLogId>,
}

impl VerificationReport {
    pub fn is_intact(&self) -> bool {
        self.tampered.is_empty()
    }
}

pub struct AuditTrail {
    entries: Arc<dyn AuditLogRepository>,
    approvals: Arc<dyn ApprovalRepository>,
    sealer: AuditSealer,
    deferred: Mutex<Vec<AuditLogEntry>>,
    deferred_limit: usize,
}

impl AuditTrail {
    pub fn new(
        entries: Arc<dyn AuditLogRepository>,
        approvals: Arc<dyn ApprovalRepository>,
        sealer: AuditSealer,
    ) -> Self {
        Self {
            entries,
            approvals,
            sealer,
            deferred: Mutex::new(Vec::new()),
            deferred_limit: DEFAULT_DEFERRED_LIMIT,
        }
    }

    /// Caps how many failed appends are held for retry.
    pub fn with_deferred_limit(mut self, limit: usize) -> Self {
        self.deferred_limit = limit.max(1);
        self
    }

    pub fn seal(&self, mut entry: AuditLogEntry) -> AuditLogEntry {
        entry.seal = self.sealer.seal(&entry);
        entry
    }

    /// Stores an already sealed entry.
    pub async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        self.entries.append(entry).await
    }

    /// Seals and stores `entry`, deferring it when the store is unavailable.
    pub async fn record(&self, entry: AuditLogEntry) -> AppendOutcome {
        let entry = self.seal(entry);
        match self.entries.append(&entry).await {
            Ok(()) => AppendOutcome::Recorded,
            Err(source) => {
                let mut deferred = self.lock_deferred();
                if deferred.len() >= self.deferred_limit {
                    error!(
                        event_name = "audit.deferred_overflow",
                        audit_id = %entry.id,
                        approval_id = %entry.approval_id,
                        action = %entry.action,
                        limit = self.deferred_limit,
                        error = %source,
                        "audit append failed and the deferred queue is full; entry dropped"
                    );
                    return AppendOutcome::Dropped;
                }
                error!(
                    event_name = "audit.append_deferred",
                    audit_id = %entry.id,
                    approval_id = %entry.approval_id,
                    action = %entry.action,
                    error = %source,
                    "audit append failed; entry deferred for retry"
                );
                deferred.push(entry);
                AppendOutcome::Deferred
            }
        }
    }

    pub fn deferred_count(&self) -> usize {
        self.lock_deferred().len()
    }

    /// Re-attempts every deferred append. Entries that fail again stay queued in order.
    pub async fn retry_deferred(&self) -> RetrySummary {
        let pending = std::mem::take(&mut *self.lock_deferred());
        if pending.is_empty() {
            return RetrySummary::default();
        }

        let mut flushed = 0;
        let mut still_failing = Vec::new();
        for entry in pending {
            match self.entries.append(&entry).await {
                Ok(()) => flushed += 1,
                Err(source) => {
                    warn!(
                        event_name = "audit.retry_failed",
                        audit_id = %entry.id,
                        error = %source,
                        "deferred audit append failed again"
                    );
                    still_failing.push(entry);
                }
            }
        }

        let remaining = {
            let mut deferred = self.lock_deferred();
            still_failing.append(&mut deferred);
            *deferred = still_failing;
            deferred.len()
        };

        info!(
            event_name = "audit.retry_flushed",
            flushed,
            remaining,
            "deferred audit entries retried"
        );
        RetrySummary { flushed, remaining }
    }

    /// Matching entries. Stored rows that no longer read back are logged and left out.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let scanned = self.entries.scan(query).await?;
        Ok(scanned
            .into_iter()
            .filter_map(|row| match row {
                Ok(entry) => Some(entry),
                Err(unreadable) => {
                    warn!(
                        event_name = "audit.entry_unreadable",
                        audit_id = %unreadable.id,
                        reason = %unreadable.reason,
                        "stored audit entry could not be read; skipped"
                    );
                    None
                }
            })
            .collect())
    }

    /// Every entry for one approval, oldest first.
    pub async fn history(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        self.query(&AuditQuery::for_approval(approval_id.clone()).ascending()).await
    }

    /// Newest deletion snapshot recorded for `approval_id`.
    pub async fn deletion_snapshot(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Option<Approval>, RepositoryError> {
        let deletions = self
            .query(&AuditQuery::for_approval(approval_id.clone()).with_action(AuditAction::Deleted))
            .await?;
        Ok(deletions.iter().find_map(|entry| entry.snapshot().cloned()))
    }

    /// Narrows an empty window to the stretch of it that overlaps stored data.
    ///
    /// The result never reaches outside `requested`; when nothing overlaps the request
    /// comes back unchanged.
    pub async fn adjust_period_to_include_data(
        &self,
        requested: Period,
    ) -> Result<Period, RepositoryError> {
        if !self.entries.scan(&AuditQuery::within(requested)).await?.is_empty() {
            return Ok(requested);
        }

        let Some(bounds) = self.entries.time_bounds().await? else {
            return Ok(requested);
        };
        Ok(bounds.intersection(&requested).unwrap_or(requested))
    }

    /// Entries in export order with the request type and requester attached.
    pub async fn report_rows(
        &self,
        query: &AuditQuery,
    ) -> Result<Vec<AuditReportRow>, RepositoryError> {
        let entries = self.query(query).await?;
        let mut context: HashMap<String, Option<(ApprovalType, String)>> = HashMap::new();
        let mut rows = Vec::with_capacity(entries.len());

        for entry in entries {
            let resolved = match entry.snapshot() {
                Some(snapshot) => {
                    Some((snapshot.approval_type, snapshot.requester.clone()))
                }
                None => match context.get(&entry.approval_id.0) {
                    Some(cached) => cached.clone(),
                    None => {
                        let looked_up = self.request_context(&entry.approval_id).await?;
                        context.insert(entry.approval_id.0.clone(), looked_up.clone());
                        looked_up
                    }
                },
            };

            let (approval_type, requester) = match resolved {
                Some((approval_type, requester)) => (Some(approval_type), Some(requester)),
                None => (None, None),
            };
            rows.push(AuditReportRow { entry, approval_type, requester });
        }

        Ok(rows)
    }

    /// Recomputes seals over every row matching `query`. Rows that can no longer be read
    /// back as valid entries count as tampered.
    pub async fn verify(&self, query: &AuditQuery) -> Result<VerificationReport, RepositoryError> {
        let scanned = self.entries.scan(query).await?;
        let checked = scanned.len();
        let tampered: Vec<AuditLogId> = scanned
            .into_iter()
            .filter_map(|row| match row {
                Ok(entry) if self.sealer.verify(&entry) => None,
                Ok(entry) => Some(entry.id),
                Err(unreadable) => Some(unreadable.id),
            })
            .collect();

        if !tampered.is_empty() {
            warn!(
                event_name = "audit.verify_mismatch",
                tampered = tampered.len(),
                checked,
                "audit entries failed seal verification"
            );
        }
        Ok(VerificationReport { checked, tampered })
    }

    async fn request_context(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Option<(ApprovalType, String)>, RepositoryError> {
        if let Some(live) = self.approvals.find_by_id(approval_id).await? {
            return Ok(Some((live.approval_type, live.requester)));
        }
        Ok(self
            .deletion_snapshot(approval_id)
            .await?
            .map(|snapshot| (snapshot.approval_type, snapshot.requester)))
    }

    fn lock_deferred(&self) -> std::sync::MutexGuard<'_, Vec<AuditLogEntry>> {
        match self.deferred.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
