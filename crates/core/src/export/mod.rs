//! Audit log reports in CSV and PDF.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::info;

use crate::audit::{AuditReportRow, AuditTrail};
use crate::domain::audit::{AuditQuery, Period};
use crate::domain::timestamp_now;
use crate::errors::{ApplicationError, DomainError};
use crate::repository::RepositoryError;

mod csv;
mod pdf;

pub const COLUMNS: [&str; 8] =
    ["ID", "Type", "Requester", "Approver", "Action", "Comment", "Date", "Status"];

const MISSING: &str = "N/A";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExportError {
    #[error("invalid date `{0}`: expected YYYY-MM-DD or an RFC 3339 timestamp")]
    InvalidDate(String),
    #[error("start date `{start}` is after end date `{end}`")]
    InvalidPeriod { start: String, end: String },
    #[error("unsupported export format `{0}`")]
    UnsupportedFormat(String),
    #[error("csv encoding failed: {0}")]
    Csv(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ExportError> for ApplicationError {
    fn from(value: ExportError) -> Self {
        match value {
            ExportError::InvalidDate(_)
            | ExportError::InvalidPeriod { .. }
            | ExportError::UnsupportedFormat(_) => {
                Self::Domain(DomainError::InvariantViolation(value.to_string()))
            }
            ExportError::Csv(message) => Self::Internal(message),
            ExportError::Repository(error) => Self::Persistence(error.to_string()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportFormat {
    #[default]
    Csv,
    Pdf,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Pdf => "application/pdf",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "pdf" => Ok(Self::Pdf),
            _ => Err(ExportError::UnsupportedFormat(value.to_string())),
        }
    }
}

/// Report parameters as the caller typed them. The date strings are echoed into the filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportRequest {
    pub start_date: String,
    pub end_date: String,
    pub format: ExportFormat,
}

impl ReportRequest {
    pub fn new(
        start_date: impl Into<String>,
        end_date: impl Into<String>,
        format: ExportFormat,
    ) -> Self {
        Self { start_date: start_date.into(), end_date: end_date.into(), format }
    }

    /// Whole days are inclusive: a bare end date runs to 23:59:59.999.
    pub fn period(&self) -> Result<Period, ExportError> {
        let start = start_bound(&self.start_date)?;
        let end = end_bound(&self.end_date)?;
        if start > end {
            return Err(ExportError::InvalidPeriod {
                start: self.start_date.clone(),
                end: self.end_date.clone(),
            });
        }
        Ok(Period::new(start, end))
    }

    pub fn filename(&self) -> String {
        format!(
            "audit-logs-{}-to-{}.{}",
            self.start_date,
            self.end_date,
            self.format.extension()
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub rows: usize,
}

impl ReportFile {
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename={}", self.filename)
    }
}

/// Lower bound of a report window: an RFC 3339 instant, or midnight of a `YYYY-MM-DD` day.
pub fn start_bound(raw: &str) -> Result<DateTime<Utc>, ExportError> {
    parse_bound(raw, Bound::Start)
}

/// Upper bound of a report window: an RFC 3339 instant, or the last millisecond of a day.
pub fn end_bound(raw: &str) -> Result<DateTime<Utc>, ExportError> {
    parse_bound(raw, Bound::End)
}

#[derive(Clone, Copy)]
enum Bound {
    Start,
    End,
}

fn parse_bound(raw: &str, bound: Bound) -> Result<DateTime<Utc>, ExportError> {
    let trimmed = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(instant.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| ExportError::InvalidDate(raw.to_string()))?;
    let time = match bound {
        Bound::Start => date.and_hms_milli_opt(0, 0, 0, 0),
        Bound::End => date.and_hms_milli_opt(23, 59, 59, 999),
    };
    time.map(|naive| naive.and_utc()).ok_or_else(|| ExportError::InvalidDate(raw.to_string()))
}

/// The eight printable cells of a report row, shared by both renderers.
pub(crate) fn row_cells(row: &AuditReportRow) -> [String; 8] {
    let entry = &row.entry;
    [
        entry.approval_id.short().to_string(),
        row.approval_type.map_or_else(|| MISSING.to_string(), |kind| kind.as_str().to_string()),
        row.requester.clone().unwrap_or_else(|| MISSING.to_string()),
        entry.approver.clone(),
        entry.action.as_str().to_string(),
        entry.comment.clone(),
        entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        entry.action.as_str().to_string(),
    ]
}

#[derive(Clone, Debug)]
pub struct ExportEngine {
    title: String,
}

impl Default for ExportEngine {
    fn default() -> Self {
        Self::new("Audit Log Report")
    }
}

impl ExportEngine {
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into() }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn to_csv(&self, rows: &[AuditReportRow]) -> Result<Vec<u8>, ExportError> {
        csv::render(rows)
    }

    pub fn to_pdf(&self, rows: &[AuditReportRow], period: Option<Period>) -> Vec<u8> {
        let heading = pdf::PdfHeading { title: &self.title, period, generated_at: timestamp_now() };
        pdf::render(&heading, rows)
    }

    pub fn render(
        &self,
        rows: &[AuditReportRow],
        format: ExportFormat,
        period: Option<Period>,
    ) -> Result<Vec<u8>, ExportError> {
        match format {
            ExportFormat::Csv => self.to_csv(rows),
            ExportFormat::Pdf => Ok(self.to_pdf(rows, period)),
        }
    }

    /// Resolves the request window, falls back to the adjusted window when it is empty,
    /// and renders the rows oldest first.
    pub async fn export(
        &self,
        trail: &AuditTrail,
        request: &ReportRequest,
    ) -> Result<ReportFile, ExportError> {
        let requested = request.period()?;
        let mut period = requested;
        let mut rows = trail.report_rows(&AuditQuery::within(period).ascending()).await?;
        if rows.is_empty() {
            period = trail.adjust_period_to_include_data(requested).await?;
            if period != requested {
                rows = trail.report_rows(&AuditQuery::within(period).ascending()).await?;
            }
        }

        let bytes = self.render(&rows, request.format, Some(period))?;
        info!(
            event_name = "report.exported",
            format = %request.format,
            rows = rows.len(),
            bytes = bytes.len(),
            start = %request.start_date,
            end = %request.end_date,
            "audit log report rendered"
        );

        Ok(ReportFile {
            filename: request.filename(),
            content_type: request.format.content_type(),
            bytes,
            rows: rows.len(),
        })
    }
}
