use std::sync::Arc;

use attest_core::approvals::ApprovalRegistry;
use attest_core::audit::{AuditSealer, AuditTrail};
use attest_core::config::{AppConfig, ConfigError};
use attest_core::export::ExportEngine;
use attest_db::{connect_with_settings, migrations, DbPool, SqlApprovalRepository, SqlAuditLogRepository};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<ApprovalRegistry>,
    pub exporter: ExportEngine,
}

impl Application {
    pub fn trail(&self) -> &Arc<AuditTrail> {
        self.registry.trail()
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let approvals = Arc::new(SqlApprovalRepository::new(db_pool.clone()));
    let entries = Arc::new(SqlAuditLogRepository::new(db_pool.clone()));
    let sealer = AuditSealer::new(config.audit.signing_key.clone());
    let trail = Arc::new(
        AuditTrail::new(entries, approvals.clone(), sealer)
            .with_deferred_limit(config.audit.max_deferred_entries),
    );
    let registry = Arc::new(ApprovalRegistry::new(approvals, trail));
    let exporter = ExportEngine::new(config.export.report_title.clone());

    Ok(Application { config, db_pool, registry, exporter })
}
