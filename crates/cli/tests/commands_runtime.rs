use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use attest_cli::commands::{config, export, migrate, verify};
use attest_core::audit::{AuditSealer, AuditTrail};
use attest_core::domain::approval::ApprovalId;
use attest_core::domain::audit::{AuditAction, AuditLogEntry, AuditMetadata};
use attest_db::{migrations, SqlApprovalRepository, SqlAuditLogRepository};
use chrono::{Duration, Utc};
use serde_json::Value;
use tempfile::TempDir;

const SIGNING_KEY: &str = "cli-test-signing-key-0001";
const MEMORY_DATABASE: &[(&str, &str)] =
    &[("ATTEST_DATABASE_URL", "sqlite::memory:"), ("ATTEST_AUDIT_SIGNING_KEY", SIGNING_KEY)];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(MEMORY_DATABASE, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_signing_key() {
    with_env(&[("ATTEST_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("required"));
    });
}

#[test]
fn config_reports_sources_and_redacts_signing_key() {
    with_env(MEMORY_DATABASE, || {
        let result = config::run();
        assert_eq!(result.exit_code, 0, "expected config to load: {}", result.output);

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("sqlite::memory:"));
        assert!(message.contains("ATTEST_DATABASE_URL"));
        assert!(message.contains("<redacted"));
        assert!(!message.contains(SIGNING_KEY), "signing key must not be printed");
    });
}

#[test]
fn export_writes_csv_report_for_recorded_entries() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = file_database(dir.path());
    seed_entries(&database_url, SIGNING_KEY, &["reviewer@example.com"]);

    let output = dir.path().join("report.csv");
    let (start, end) = window_around_today();
    with_env(&file_env(&database_url), || {
        let result = export::run(export::ExportArgs {
            start: start.clone(),
            end: end.clone(),
            format: "csv".to_string(),
            output: Some(output.clone()),
        });
        assert_eq!(result.exit_code, 0, "expected export to succeed: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "export");
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("wrote 1 csv"));
    });

    let bytes = fs::read(&output).expect("report file should exist");
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"), "csv report should carry a UTF-8 BOM");
    let text = String::from_utf8_lossy(&bytes);
    assert_eq!(text.lines().count(), 2, "header plus one row");
    assert!(text.contains("reviewer@example.com"));
}

#[test]
fn export_writes_pdf_report() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = file_database(dir.path());
    seed_entries(&database_url, SIGNING_KEY, &["a@example.com", "b@example.com"]);

    let output = dir.path().join("report.pdf");
    let (start, end) = window_around_today();
    with_env(&file_env(&database_url), || {
        let result = export::run(export::ExportArgs {
            start: start.clone(),
            end: end.clone(),
            format: "PDF".to_string(),
            output: Some(output.clone()),
        });
        assert_eq!(result.exit_code, 0, "expected export to succeed: {}", result.output);
    });

    let bytes = fs::read(&output).expect("report file should exist");
    assert!(bytes.starts_with(b"%PDF-"));
}

#[test]
fn export_rejects_unknown_format_before_touching_storage() {
    with_env(&[], || {
        let result = export::run(export::ExportArgs {
            start: "2026-01-01".to_string(),
            end: "2026-01-31".to_string(),
            format: "xlsx".to_string(),
            output: None,
        });
        assert_eq!(result.exit_code, 6);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "invalid_request");
        assert!(payload["message"].as_str().unwrap_or_default().contains("xlsx"));
    });
}

#[test]
fn export_rejects_inverted_period() {
    with_env(MEMORY_DATABASE, || {
        let result = export::run(export::ExportArgs {
            start: "2026-02-01".to_string(),
            end: "2026-01-01".to_string(),
            format: "csv".to_string(),
            output: None,
        });
        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_request");
    });
}

#[test]
fn verify_passes_on_untouched_trail() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = file_database(dir.path());
    seed_entries(&database_url, SIGNING_KEY, &["a@example.com", "b@example.com"]);

    with_env(&file_env(&database_url), || {
        let result = verify::run(None, None);
        assert_eq!(result.exit_code, 0, "expected intact trail: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.starts_with("2 audit entries"), "unexpected message: {message}");
    });
}

#[test]
fn verify_flags_entries_sealed_with_another_key() {
    let dir = TempDir::new().expect("tempdir");
    let database_url = file_database(dir.path());
    seed_entries(&database_url, SIGNING_KEY, &["a@example.com"]);
    seed_entries(&database_url, "some-other-signing-key", &["forged@example.com"]);

    with_env(&file_env(&database_url), || {
        let result = verify::run(None, None);
        assert_eq!(result.exit_code, 9);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "tampered");
        assert!(payload["message"].as_str().unwrap_or_default().starts_with("1 of 2"));
    });
}

#[test]
fn verify_rejects_malformed_bound() {
    with_env(&[], || {
        let result = verify::run(Some("yesterday".to_string()), None);
        assert_eq!(result.exit_code, 6);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_request");
    });
}

fn file_database(dir: &Path) -> String {
    format!("sqlite://{}", dir.join("attest.db").display())
}

fn file_env(database_url: &str) -> [(&str, &str); 2] {
    [("ATTEST_DATABASE_URL", database_url), ("ATTEST_AUDIT_SIGNING_KEY", SIGNING_KEY)]
}

fn window_around_today() -> (String, String) {
    let today = Utc::now().date_naive();
    ((today - Duration::days(1)).to_string(), (today + Duration::days(1)).to_string())
}

fn seed_entries(database_url: &str, signing_key: &str, approvers: &[&str]) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("seed runtime");
    runtime.block_on(async {
        let pool = attest_db::connect(database_url).await.expect("connect seed database");
        migrations::run_pending(&pool).await.expect("migrate seed database");

        let trail = AuditTrail::new(
            Arc::new(SqlAuditLogRepository::new(pool.clone())),
            Arc::new(SqlApprovalRepository::new(pool.clone())),
            AuditSealer::new(signing_key.to_string().into()),
        );
        for approver in approvers {
            trail
                .record(AuditLogEntry::new(
                    ApprovalId::generate(),
                    *approver,
                    AuditAction::Approved,
                    "looks fine",
                    AuditMetadata::None,
                ))
                .await;
        }
        assert_eq!(trail.deferred_count(), 0, "seed entries should persist");
        pool.close().await;
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid json")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "ATTEST_DATABASE_URL",
        "ATTEST_DATABASE_MAX_CONNECTIONS",
        "ATTEST_DATABASE_TIMEOUT_SECS",
        "ATTEST_SERVER_BIND_ADDRESS",
        "ATTEST_SERVER_PORT",
        "ATTEST_SERVER_HEALTH_CHECK_PORT",
        "ATTEST_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "ATTEST_AUDIT_SIGNING_KEY",
        "ATTEST_AUDIT_RETRY_INTERVAL_SECS",
        "ATTEST_AUDIT_MAX_DEFERRED_ENTRIES",
        "ATTEST_EXPORT_REPORT_TITLE",
        "ATTEST_LOGGING_LEVEL",
        "ATTEST_LOGGING_FORMAT",
        "ATTEST_LOG_LEVEL",
        "ATTEST_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
