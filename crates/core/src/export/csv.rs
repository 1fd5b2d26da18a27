use ::csv::{QuoteStyle, Terminator, WriterBuilder};

use super::{row_cells, ExportError, COLUMNS};
use crate::audit::AuditReportRow;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// BOM-prefixed UTF-8, every field quoted, one line per entry.
pub(crate) fn render(rows: &[AuditReportRow]) -> Result<Vec<u8>, ExportError> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(UTF8_BOM.to_vec());

    writer.write_record(COLUMNS).map_err(|error| ExportError::Csv(error.to_string()))?;
    for row in rows {
        let cells = row_cells(row).map(|cell| single_line(&cell));
        writer.write_record(&cells).map_err(|error| ExportError::Csv(error.to_string()))?;
    }

    writer.into_inner().map_err(|error| ExportError::Csv(error.to_string()))
}

/// Collapses each run of CR/LF into one space.
fn single_line(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    let mut in_break = false;
    for ch in value.chars() {
        if ch == '\r' || ch == '\n' {
            if !in_break {
                output.push(' ');
            }
            in_break = true;
        } else {
            output.push(ch);
            in_break = false;
        }
    }
    output
}
