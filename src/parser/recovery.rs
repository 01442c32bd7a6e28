//! Second-chance parsing of retained raw HTML.
//!
//! Shares no discovery logic with [`super::table::TableExtractor`]: the first
//! row of every table is the header and nothing else is inferred.

use scraper::{ElementRef, Html};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::table::{normalize_text, parse_selectors};
use crate::domain::{Record, ValidationError, YEAR_KEY};

/// Rows inspected when judging whether a scrape looks plausible.
pub const VALIDATION_SAMPLE: usize = 10;

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Rejects payloads that are empty or whose sampled rows mostly carry at most
/// one populated field besides `year`.
pub fn validate_records(records: &[Record]) -> Result<(), ValidationError> {
    if records.is_empty() {
        return Err(ValidationError::Empty);
    }

    let sample = &records[..records.len().min(VALIDATION_SAMPLE)];
    let sparse = sample
        .iter()
        .filter(|record| {
            record
                .iter()
                .filter(|(key, value)| key.as_str() != YEAR_KEY && is_populated(value))
                .count()
                <= 1
        })
        .count();

    if sparse * 2 > sample.len() {
        return Err(ValidationError::SparseRows {
            sampled: sample.len(),
            sparse,
        });
    }
    Ok(())
}

/// Year carried by the `ano` query parameter of `source_url`.
pub fn year_from_url(source_url: &str) -> Option<i64> {
    let url = Url::parse(source_url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "ano")
        .and_then(|(_, value)| value.trim().parse().ok())
}

fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .map(normalize_text)
        .collect()
}

/// Re-parses every table in `raw_html`, tagging rows with the URL's year.
pub fn recover(raw_html: &str, source_url: &str) -> Vec<Record> {
    let document = Html::parse_document(raw_html);
    let year = year_from_url(source_url);
    let mut records = Vec::new();

    for selector in parse_selectors(&["table"]) {
        for table in document.select(&selector) {
            let row_selectors = parse_selectors(&["tr"]);
            let rows: Vec<ElementRef<'_>> = row_selectors
                .iter()
                .flat_map(|s| table.select(s))
                .collect();

            let Some((header_row, data_rows)) = rows.split_first() else {
                continue;
            };
            let headers = row_cells(*header_row);
            // Navigation and banner tables carry a single label.
            if headers.iter().filter(|h| !h.is_empty()).count() < 2 {
                continue;
            }

            for row in data_rows {
                let cells = row_cells(*row);
                if cells.iter().all(String::is_empty) {
                    continue;
                }

                let mut record: Record = headers
                    .iter()
                    .zip(cells)
                    .filter(|(header, _)| !header.is_empty())
                    .map(|(header, text)| (header.clone(), Value::String(text)))
                    .collect();

                if let Some(year) = year
                    && !record.contains_key(YEAR_KEY)
                {
                    record.insert(YEAR_KEY.to_string(), Value::from(year));
                }
                records.push(record);
            }
        }
    }

    debug!(source_url, recovered = records.len(), "Recovery parse finished");
    records
}
