use attest_core::domain::audit::AuditQuery;
use attest_core::export::{end_bound, start_bound, ExportError};

use crate::commands::{
    audit_trail, load_config, open_database, runtime, CommandResult, EXIT_INVALID_REQUEST,
    EXIT_STORAGE, EXIT_TAMPERED,
};

/// Ids listed in a failure message before the rest are summarized.
const LISTED_IDS: usize = 20;

pub fn run(start: Option<String>, end: Option<String>) -> CommandResult {
    let query = match scoped_query(start.as_deref(), end.as_deref()) {
        Ok(query) => query,
        Err(error) => {
            return CommandResult::failure(
                "verify",
                "invalid_request",
                error.to_string(),
                EXIT_INVALID_REQUEST,
            )
        }
    };

    let config = match load_config("verify") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("verify") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let report = audit_trail(&config, &pool)
            .verify(&query)
            .await
            .map_err(|error| ("storage", error.to_string(), EXIT_STORAGE));
        pool.close().await;
        report
    });

    let report = match result {
        Ok(report) => report,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("verify", error_class, message, exit_code)
        }
    };

    if report.is_intact() {
        return CommandResult::success(
            "verify",
            format!("{} audit entries checked; all seals match", report.checked),
        );
    }

    let mut listed: Vec<String> =
        report.tampered.iter().take(LISTED_IDS).map(ToString::to_string).collect();
    if report.tampered.len() > LISTED_IDS {
        listed.push(format!("and {} more", report.tampered.len() - LISTED_IDS));
    }
    CommandResult::failure(
        "verify",
        "tampered",
        format!(
            "{} of {} audit entries failed seal verification: {}",
            report.tampered.len(),
            report.checked,
            listed.join(", ")
        ),
        EXIT_TAMPERED,
    )
}

fn scoped_query(start: Option<&str>, end: Option<&str>) -> Result<AuditQuery, ExportError> {
    let mut query = AuditQuery::default().ascending();
    query.start = start.map(start_bound).transpose()?;
    query.end = end.map(end_bound).transpose()?;
    Ok(query)
}
