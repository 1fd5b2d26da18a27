//! PDF 1.4 rendering of the audit table.
//!
//! Uses the built-in Helvetica faces so no font data is embedded. Text is restricted to
//! printable ASCII; anything else is replaced with `?`.

use chrono::{DateTime, Utc};
use pdf_writer::{Content, Finish, Name, Pdf, Rect, Ref, Str};

use super::{row_cells, COLUMNS};
use crate::audit::AuditReportRow;
use crate::domain::audit::Period;

// A4 landscape, in points.
const PAGE_WIDTH: f32 = 842.0;
const PAGE_HEIGHT: f32 = 595.0;
const MARGIN: f32 = 36.0;
const ROW_HEIGHT: f32 = 14.0;
const FONT_SIZE: f32 = 7.5;
const TITLE_SIZE: f32 = 14.0;
const INFO_SIZE: f32 = 9.0;
const CELL_PADDING: f32 = 3.0;
const HEADER_FILL: f32 = 0.88;
const COLUMN_WIDTHS: [f32; 8] = [56.0, 70.0, 112.0, 112.0, 56.0, 188.0, 100.0, 56.0];

const REGULAR: Name<'static> = Name(b"F1");
const BOLD: Name<'static> = Name(b"F2");

pub(crate) const NO_DATA_MESSAGE: &str = "No audit log entries found for the selected period.";

pub(crate) struct PdfHeading<'a> {
    pub title: &'a str,
    pub period: Option<Period>,
    pub generated_at: DateTime<Utc>,
}

pub(crate) fn render(heading: &PdfHeading<'_>, rows: &[AuditReportRow]) -> Vec<u8> {
    let mut pages = layout(heading, rows);
    let total = pages.len();
    for (index, page) in pages.iter_mut().enumerate() {
        let footer = format!("Page {} of {}", index + 1, total);
        text(page, REGULAR, FONT_SIZE, PAGE_WIDTH - MARGIN - 50.0, MARGIN - 18.0, &footer);
    }
    write_document(pages)
}

fn layout(heading: &PdfHeading<'_>, rows: &[AuditReportRow]) -> Vec<Content> {
    let mut pages = Vec::new();
    let mut page = Content::new();
    let mut y = PAGE_HEIGHT - MARGIN;

    y -= TITLE_SIZE;
    text(&mut page, BOLD, TITLE_SIZE, MARGIN, y, heading.title);
    y -= INFO_SIZE + 6.0;
    let generated = format!("Generated: {}", heading.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    text(&mut page, REGULAR, INFO_SIZE, MARGIN, y, &generated);
    if let Some(period) = heading.period {
        y -= INFO_SIZE + 3.0;
        let window = format!(
            "Period: {} to {}",
            period.start.format("%Y-%m-%d %H:%M:%S"),
            period.end.format("%Y-%m-%d %H:%M:%S")
        );
        text(&mut page, REGULAR, INFO_SIZE, MARGIN, y, &window);
    }
    y -= INFO_SIZE + 3.0;
    text(&mut page, REGULAR, INFO_SIZE, MARGIN, y, &format!("Entries: {}", rows.len()));
    y -= ROW_HEIGHT;

    if rows.is_empty() {
        y -= ROW_HEIGHT;
        text(&mut page, REGULAR, INFO_SIZE + 1.0, MARGIN, y, NO_DATA_MESSAGE);
        pages.push(page);
        return pages;
    }

    y = table_header(&mut page, y);
    for row in rows {
        if y - ROW_HEIGHT < MARGIN {
            pages.push(std::mem::replace(&mut page, Content::new()));
            y = table_header(&mut page, PAGE_HEIGHT - MARGIN);
        }
        let cells = row_cells(row);
        table_row(&mut page, y, REGULAR, cells.iter().map(String::as_str));
        y -= ROW_HEIGHT;
    }
    pages.push(page);
    pages
}

fn table_header(page: &mut Content, y: f32) -> f32 {
    let width: f32 = COLUMN_WIDTHS.iter().sum();
    page.set_fill_gray(HEADER_FILL);
    page.rect(MARGIN, y - ROW_HEIGHT, width, ROW_HEIGHT);
    page.fill_nonzero();
    page.set_fill_gray(0.0);
    table_row(page, y, BOLD, COLUMNS.iter().copied());
    y - ROW_HEIGHT
}

fn table_row<'a>(
    page: &mut Content,
    y: f32,
    font: Name<'_>,
    cells: impl Iterator<Item = &'a str>,
) {
    let baseline = y - ROW_HEIGHT + 4.0;
    let mut x = MARGIN;
    for (cell, width) in cells.zip(COLUMN_WIDTHS) {
        let fitted = fit(cell, width - 2.0 * CELL_PADDING);
        text(page, font, FONT_SIZE, x + CELL_PADDING, baseline, &fitted);
        x += width;
    }
}

fn text(page: &mut Content, font: Name<'_>, size: f32, x: f32, y: f32, value: &str) {
    let value = sanitize(value);
    page.begin_text();
    page.set_font(font, size);
    page.next_line(x, y);
    page.show(Str(value.as_bytes()));
    page.end_text();
}

/// Truncates with an ellipsis using an average Helvetica glyph width of half an em.
fn fit(value: &str, available: f32) -> String {
    let max_chars = (available / (FONT_SIZE * 0.5)).floor().max(4.0) as usize;
    let count = value.chars().count();
    if count <= max_chars {
        return value.to_string();
    }
    let mut truncated: String = value.chars().take(max_chars - 3).collect();
    truncated.push_str("...");
    truncated
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|ch| match ch {
            '\r' | '\n' | '\t' => ' ',
            ' '..='~' => ch,
            _ => '?',
        })
        .collect()
}

fn write_document(pages: Vec<Content>) -> Vec<u8> {
    let catalog_id = Ref::new(1);
    let tree_id = Ref::new(2);
    let regular_id = Ref::new(3);
    let bold_id = Ref::new(4);
    let page_ids: Vec<(Ref, Ref)> = (0..pages.len() as i32)
        .map(|index| (Ref::new(5 + index * 2), Ref::new(6 + index * 2)))
        .collect();

    let mut pdf = Pdf::new();
    pdf.set_version(1, 4);
    pdf.catalog(catalog_id).pages(tree_id);
    pdf.pages(tree_id)
        .kids(page_ids.iter().map(|(page_id, _)| *page_id))
        .count(page_ids.len() as i32);
    for (font_id, base_font) in [(regular_id, "Helvetica"), (bold_id, "Helvetica-Bold")] {
        pdf.type1_font(font_id)
            .base_font(Name(base_font.as_bytes()))
            .encoding_predefined(Name(b"WinAnsiEncoding"));
    }

    for (content, (page_id, contents_id)) in pages.into_iter().zip(page_ids) {
        let mut page = pdf.page(page_id);
        page.media_box(Rect::new(0.0, 0.0, PAGE_WIDTH, PAGE_HEIGHT));
        page.parent(tree_id);
        page.contents(contents_id);
        {
            let mut resources = page.resources();
            let mut fonts = resources.fonts();
            fonts.pair(REGULAR, regular_id);
            fonts.pair(BOLD, bold_id);
        }
        page.finish();
        pdf.stream(contents_id, &content.finish());
    }

    pdf.finish()
}
