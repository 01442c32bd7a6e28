//! HTML table extraction.
//!
//! Locates tabular content with three discovery tiers: tables inside a known
//! content wrapper, any table in the document, then `div`-based grids. Every
//! row becomes a flat header-to-text [`Record`]; type coercion happens later.

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;

use crate::domain::Record;

/// Wrappers the portal (and common layouts) use around the data table.
pub const CONTENT_SELECTORS: &[&str] = &[
    "div.main-content",
    "div#main-content",
    "div.content",
    "div#conteudo",
    "main",
];

const GRID_SELECTORS: &[&str] = &["[role=table]", "div[class*=table]", "div[class*=grid]"];

/// Collapses runs of whitespace (including line breaks) to single spaces.
pub fn normalize_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn parse_selectors(css: &[&str]) -> Vec<Selector> {
    css.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

fn children_named<'a>(element: ElementRef<'a>, names: &[&str]) -> Vec<ElementRef<'a>> {
    element
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| names.contains(&child.value().name()))
        .collect()
}

fn has_class_fragment(element: ElementRef<'_>, fragment: &str) -> bool {
    element
        .value()
        .classes()
        .any(|class| class.to_lowercase().contains(fragment))
}

/// Builds unique column labels, falling back to `column_N` for blanks.
fn header_labels(cells: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    cells
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let base = if text.is_empty() {
                format!("column_{i}")
            } else {
                text.clone()
            };
            let mut label = base.clone();
            let mut suffix = 1;
            while !seen.insert(label.clone()) {
                label = format!("{base}_{suffix}");
                suffix += 1;
            }
            label
        })
        .collect()
}

fn build_record(headers: &[String], cells: Vec<String>) -> Option<Record> {
    if cells.iter().all(String::is_empty) {
        return None;
    }

    let mut record = Record::new();
    for (i, text) in cells.into_iter().enumerate() {
        let key = headers
            .get(i)
            .cloned()
            .unwrap_or_else(|| format!("column_{i}"));
        record.insert(key, Value::String(text));
    }
    Some(record)
}

#[derive(Debug, Clone)]
pub struct TableExtractor {
    content: Vec<Selector>,
    table: Vec<Selector>,
    grids: Vec<Selector>,
}

impl Default for TableExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl TableExtractor {
    pub fn new() -> Self {
        Self::with_content_selectors(CONTENT_SELECTORS)
    }

    /// Overrides the content-wrapper selectors; unparsable entries are ignored.
    pub fn with_content_selectors(css: &[&str]) -> Self {
        Self {
            content: parse_selectors(css),
            table: parse_selectors(&["table"]),
            grids: parse_selectors(GRID_SELECTORS),
        }
    }

    /// First element matching a content-wrapper selector.
    pub fn content_region<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        self.content
            .iter()
            .find_map(|selector| document.select(selector).next())
    }

    pub fn extract(&self, html: &str) -> Vec<Record> {
        let document = Html::parse_document(html);

        let mut tables: Vec<ElementRef<'_>> = Vec::new();
        if let Some(region) = self.content_region(&document) {
            for selector in &self.table {
                tables.extend(region.select(selector));
            }
        }
        if tables.is_empty() {
            for selector in &self.table {
                tables.extend(document.select(selector));
            }
        }

        let mut records: Vec<Record> = tables
            .into_iter()
            .flat_map(|table| self.extract_table(table))
            .collect();

        if records.is_empty() {
            for selector in &self.grids {
                for grid in document.select(selector) {
                    records.extend(self.extract_grid(grid));
                }
                if !records.is_empty() {
                    break;
                }
            }
        }

        records
    }

    fn table_rows<'a>(&self, table: ElementRef<'a>) -> Vec<ElementRef<'a>> {
        let mut rows = Vec::new();
        for child in table.children().filter_map(ElementRef::wrap) {
            match child.value().name() {
                "tr" => rows.push(child),
                "thead" | "tbody" | "tfoot" => rows.extend(children_named(child, &["tr"])),
                _ => {}
            }
        }
        rows
    }

    /// Header row: `thead`, then a row of `th`, then a row classed as header,
    /// then the first row.
    fn find_header<'a>(&self, table: ElementRef<'a>, rows: &[ElementRef<'a>]) -> Option<ElementRef<'a>> {
        let in_thead = table
            .children()
            .filter_map(ElementRef::wrap)
            .filter(|c| c.value().name() == "thead")
            .find_map(|thead| children_named(thead, &["tr"]).into_iter().next());

        in_thead
            .or_else(|| {
                rows.iter()
                    .copied()
                    .find(|row| !children_named(*row, &["th"]).is_empty())
            })
            .or_else(|| {
                rows.iter()
                    .copied()
                    .find(|row| has_class_fragment(*row, "head"))
            })
            .or_else(|| rows.first().copied().filter(|_| rows.len() > 1))
    }

    fn extract_table(&self, table: ElementRef<'_>) -> Vec<Record> {
        let rows = self.table_rows(table);
        if rows.is_empty() {
            return Vec::new();
        }

        let header = self.find_header(table, &rows);
        let headers = header
            .map(|row| {
                let cells: Vec<String> = children_named(row, &["th", "td"])
                    .into_iter()
                    .map(normalize_text)
                    .collect();
                header_labels(&cells)
            })
            .unwrap_or_default();

        rows.into_iter()
            .filter(|row| header.is_none_or(|h| h.id() != row.id()))
            .filter_map(|row| {
                let cells = children_named(row, &["td", "th"])
                    .into_iter()
                    .map(normalize_text)
                    .collect();
                build_record(&headers, cells)
            })
            .collect()
    }

    fn extract_grid(&self, grid: ElementRef<'_>) -> Vec<Record> {
        let rows: Vec<ElementRef<'_>> = grid
            .children()
            .filter_map(ElementRef::wrap)
            .flat_map(|child| {
                if child.value().attr("role") == Some("rowgroup") {
                    child.children().filter_map(ElementRef::wrap).collect()
                } else {
                    vec![child]
                }
            })
            .filter(|child| {
                child.value().attr("role") == Some("row") || has_class_fragment(*child, "row")
            })
            .collect();

        if rows.is_empty() {
            return Vec::new();
        }

        let cells_of = |row: ElementRef<'_>| -> Vec<String> {
            row.children()
                .filter_map(ElementRef::wrap)
                .map(normalize_text)
                .collect()
        };

        let header = rows
            .iter()
            .copied()
            .find(|row| {
                row.children()
                    .filter_map(ElementRef::wrap)
                    .any(|c| c.value().attr("role") == Some("columnheader"))
                    || has_class_fragment(*row, "head")
            })
            .or_else(|| rows.first().copied().filter(|_| rows.len() > 1));

        let headers = header
            .map(|row| header_labels(&cells_of(row)))
            .unwrap_or_default();

        rows.iter()
            .copied()
            .filter(|row| header.is_none_or(|h| h.id() != row.id()))
            .filter_map(|row| build_record(&headers, cells_of(row)))
            .collect()
    }
}
