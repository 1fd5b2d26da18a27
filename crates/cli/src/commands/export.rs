use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use attest_core::export::{ExportEngine, ExportError, ExportFormat, ReportRequest};

use crate::commands::{
    audit_trail, load_config, open_database, runtime, CommandResult, Failure,
    EXIT_INVALID_REQUEST, EXIT_OUTPUT, EXIT_STORAGE,
};

#[derive(Debug, Clone)]
pub struct ExportArgs {
    pub start: String,
    pub end: String,
    pub format: String,
    pub output: Option<PathBuf>,
}

pub fn run(args: ExportArgs) -> CommandResult {
    let format = match ExportFormat::from_str(&args.format) {
        Ok(format) => format,
        Err(error) => {
            return CommandResult::failure(
                "export",
                "invalid_request",
                error.to_string(),
                EXIT_INVALID_REQUEST,
            )
        }
    };
    let request = ReportRequest::new(args.start, args.end, format);
    if let Err(error) = request.period() {
        return CommandResult::failure(
            "export",
            "invalid_request",
            error.to_string(),
            EXIT_INVALID_REQUEST,
        );
    }

    let config = match load_config("export") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("export") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let trail = audit_trail(&config, &pool);
        let exporter = ExportEngine::new(config.export.report_title.clone());
        let file = exporter.export(&trail, &request).await.map_err(export_failure);
        pool.close().await;
        file
    });

    let file = match result {
        Ok(file) => file,
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("export", error_class, message, exit_code)
        }
    };

    let destination = args.output.unwrap_or_else(|| PathBuf::from(&file.filename));
    if let Err(error) = fs::write(&destination, &file.bytes) {
        return CommandResult::failure(
            "export",
            "output_write",
            format!("could not write `{}`: {error}", destination.display()),
            EXIT_OUTPUT,
        );
    }

    CommandResult::success(
        "export",
        format!(
            "wrote {} {} audit entries ({} bytes) to {}",
            file.rows,
            request.format,
            file.bytes.len(),
            destination.display()
        ),
    )
}

fn export_failure(error: ExportError) -> Failure {
    match error {
        ExportError::InvalidDate(_)
        | ExportError::InvalidPeriod { .. }
        | ExportError::UnsupportedFormat(_) => {
            ("invalid_request", error.to_string(), EXIT_INVALID_REQUEST)
        }
        ExportError::Csv(_) | ExportError::Repository(_) => {
            ("storage", error.to_string(), EXIT_STORAGE)
        }
    }
}
