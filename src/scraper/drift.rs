use parking_lot::Mutex;
use scraper::{Html, Selector};
use std::collections::HashMap;
use tracing::debug;

use crate::parser::TableExtractor;

/// Flags upstream layout changes by fingerprinting each page's content region.
///
/// Purely advisory: callers log the signal, extraction proceeds regardless.
#[derive(Debug, Default)]
pub struct SchemaDriftDetector {
    extractor: TableExtractor,
    last_hashes: Mutex<HashMap<String, String>>,
}

impl SchemaDriftDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// md5 over the content wrapper, else over all tables, else the whole page.
    pub fn fingerprint(&self, html: &str) -> String {
        let document = Html::parse_document(html);

        let scoped = match self.extractor.content_region(&document) {
            Some(region) => region.html(),
            None => match Selector::parse("table") {
                Ok(selector) => document
                    .select(&selector)
                    .map(|table| table.html())
                    .collect::<String>(),
                Err(_) => String::new(),
            },
        };
        let scoped = if scoped.is_empty() {
            document.root_element().html()
        } else {
            scoped
        };

        format!("{:x}", md5::compute(scoped.as_bytes()))
    }

    /// Records the page's fingerprint as the new baseline for `url` and
    /// reports whether it differs from the previous one.
    pub fn changed(&self, url: &str, html: &str) -> bool {
        let current = self.fingerprint(html);
        let previous = self.last_hashes.lock().insert(url.to_string(), current.clone());

        match previous {
            Some(previous) if previous != current => {
                debug!(url, "Content fingerprint changed");
                true
            }
            _ => false,
        }
    }

    pub fn tracked_urls(&self) -> usize {
        self.last_hashes.lock().len()
    }
}
