use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use attest_core::config::AppConfig;
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::{load_config, CommandResult};

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for Field { key_path, value, env_keys } in effective_values(&config) {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(key_path: &'static str, value: String, env_keys: &'static [&'static str]) -> Field {
    Field { key_path, value, env_keys }
}

fn effective_values(config: &AppConfig) -> Vec<Field> {
    vec![
        field("database.url", config.database.url.clone(), &["ATTEST_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["ATTEST_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["ATTEST_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["ATTEST_SERVER_BIND_ADDRESS"],
        ),
        field("server.port", config.server.port.to_string(), &["ATTEST_SERVER_PORT"]),
        field(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["ATTEST_SERVER_HEALTH_CHECK_PORT"],
        ),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["ATTEST_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "audit.signing_key",
            redact_secret(config.audit.signing_key.expose_secret()),
            &["ATTEST_AUDIT_SIGNING_KEY"],
        ),
        field(
            "audit.retry_interval_secs",
            config.audit.retry_interval_secs.to_string(),
            &["ATTEST_AUDIT_RETRY_INTERVAL_SECS"],
        ),
        field(
            "audit.max_deferred_entries",
            config.audit.max_deferred_entries.to_string(),
            &["ATTEST_AUDIT_MAX_DEFERRED_ENTRIES"],
        ),
        field(
            "export.report_title",
            config.export.report_title.clone(),
            &["ATTEST_EXPORT_REPORT_TITLE"],
        ),
        field(
            "logging.level",
            config.logging.level.clone(),
            &["ATTEST_LOGGING_LEVEL", "ATTEST_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["ATTEST_LOGGING_FORMAT", "ATTEST_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("attest.toml"), PathBuf::from("config/attest.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted, {} bytes>", secret.len())
}
