mod api;
mod bootstrap;
mod health;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use attest_core::audit::AuditTrail;
use attest_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;

fn init_logging(config: &AppConfig) {
    use attest_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging must be up before bootstrap emits its first event.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        Arc::clone(app.trail()),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retry_task = spawn_audit_retry(
        Arc::clone(app.trail()),
        Duration::from_secs(app.config.audit.retry_interval_secs),
        shutdown_rx.clone(),
    );

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let routes = api::router(Arc::clone(&app.registry), app.exporter.clone());
    let mut server_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        axum::serve(listener, routes)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stopping| *stopping).await;
            })
            .await
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "attest-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = app.config.server.graceful_shutdown_secs,
        "attest-server stopping"
    );

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(error))) => {
            tracing::error!(
                event_name = "system.server.error",
                correlation_id = "shutdown",
                error = %error,
                "api server terminated with an error"
            );
        }
        Ok(Err(error)) => {
            tracing::error!(
                event_name = "system.server.error",
                correlation_id = "shutdown",
                error = %error,
                "api server task failed"
            );
        }
        Err(_) => {
            tracing::warn!(
                event_name = "system.server.shutdown_timeout",
                correlation_id = "shutdown",
                "in-flight requests did not finish within the grace period"
            );
        }
    }
    let _ = retry_task.await;

    // Last chance for entries parked during an outage.
    let summary = app.trail().retry_deferred().await;
    if summary.remaining > 0 {
        tracing::error!(
            event_name = "system.server.audit_entries_lost",
            correlation_id = "shutdown",
            remaining = summary.remaining,
            "deferred audit entries could not be written before exit"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

fn spawn_audit_retry(
    trail: Arc<AuditTrail>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if trail.deferred_count() > 0 {
                        trail.retry_deferred().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use attest_core::audit::{AuditSealer, AuditTrail};
    use attest_core::domain::approval::ApprovalId;
    use attest_core::domain::audit::{AuditAction, AuditLogEntry, AuditMetadata};
    use attest_core::repository::{InMemoryApprovalRepository, InMemoryAuditLogRepository};
    use tokio::sync::watch;

    use super::spawn_audit_retry;

    #[tokio::test]
    async fn retry_task_flushes_deferred_entries_and_stops_on_shutdown() {
        let entries = Arc::new(InMemoryAuditLogRepository::default());
        let trail = Arc::new(AuditTrail::new(
            entries.clone(),
            Arc::new(InMemoryApprovalRepository::default()),
            AuditSealer::new("retry-test-signing-key".to_string().into()),
        ));

        entries.fail_appends(true);
        trail
            .record(AuditLogEntry::new(
                ApprovalId("apr-1".to_string()),
                "b@x",
                AuditAction::Approved,
                "ok",
                AuditMetadata::None,
            ))
            .await;
        assert_eq!(trail.deferred_count(), 1);
        entries.fail_appends(false);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = spawn_audit_retry(Arc::clone(&trail), Duration::from_millis(10), shutdown_rx);

        for _ in 0..100 {
            if trail.deferred_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(trail.deferred_count(), 0);
        assert_eq!(entries.len().await, 1);

        shutdown_tx.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("retry task should stop")
            .expect("retry task should not panic");
    }
}
