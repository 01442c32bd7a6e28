use chrono::Utc;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::drift::SchemaDriftDetector;
use crate::client::{FetchError, HttpFetcher};
use crate::domain::{Category, DataQuery, Record, ScrapedData, Taxonomy, TaxonomyError, YEAR_KEY};
use crate::parser::TableExtractor;

/// Below this many records the last page is kept for recovery.
pub const LOW_DATA_THRESHOLD: usize = 10;

#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub base_url: String,
    /// Attempts per year on top of the fetcher's own retries.
    pub year_retries: u32,
    pub year_backoff: Duration,
    /// Pause between consecutive year requests.
    pub request_pause: Duration,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: "http://vitibrasil.cnpuv.embrapa.br/index.php".to_string(),
            year_retries: 3,
            year_backoff: Duration::from_secs(1),
            request_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub category: Category,
    pub subcategory: Option<String>,
    pub start_year: i32,
    pub end_year: i32,
    pub region: Option<String>,
    pub product_type: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
}

impl ScrapeRequest {
    pub fn new(category: Category, start_year: i32, end_year: i32) -> Self {
        Self {
            category,
            subcategory: None,
            start_year,
            end_year,
            region: None,
            product_type: None,
            origin: None,
            destination: None,
        }
    }

    /// Upstream filter parameters, in the order the portal documents them.
    fn filter_params(&self) -> Vec<(&'static str, &str)> {
        [
            ("regiao", self.region.as_deref()),
            ("tipo", self.product_type.as_deref()),
            ("origem", self.origin.as_deref()),
            ("destino", self.destination.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect()
    }
}

impl From<&DataQuery> for ScrapeRequest {
    fn from(query: &DataQuery) -> Self {
        Self {
            category: query.category,
            subcategory: query.subcategory.clone(),
            start_year: query.start_year,
            end_year: query.end_year,
            region: query.region.clone(),
            product_type: query.product_type.clone(),
            origin: query.origin.clone(),
            destination: query.destination.clone(),
        }
    }
}

pub struct AdaptiveScraper {
    fetcher: HttpFetcher,
    extractor: TableExtractor,
    drift: SchemaDriftDetector,
    taxonomy: Arc<Taxonomy>,
    base_url: Url,
    config: ScraperConfig,
}

impl AdaptiveScraper {
    pub fn new(
        fetcher: HttpFetcher,
        taxonomy: Arc<Taxonomy>,
        config: ScraperConfig,
    ) -> Result<Self, FetchError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {e}", config.base_url)))?;

        Ok(Self {
            fetcher,
            extractor: TableExtractor::new(),
            drift: SchemaDriftDetector::new(),
            taxonomy,
            base_url,
            config,
        })
    }

    pub fn drift_detector(&self) -> &SchemaDriftDetector {
        &self.drift
    }

    /// Query URL for a request, without the year.
    pub fn source_url(&self, request: &ScrapeRequest) -> Result<Url, TaxonomyError> {
        let params = self
            .taxonomy
            .upstream_params(request.category, request.subcategory.as_deref())?;

        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params {
                pairs.append_pair(key, value);
            }
            for (key, value) in request.filter_params() {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Scrapes every year of the request's range.
    ///
    /// Years that keep failing are skipped; `metadata.years_found` lists the
    /// years that actually produced rows.
    pub async fn scrape_category(&self, request: &ScrapeRequest) -> Result<ScrapedData, TaxonomyError> {
        let source_url = self.source_url(request)?;
        let subcategory = request.subcategory.as_deref().unwrap_or("all");

        info!(
            category = %request.category,
            subcategory,
            start_year = request.start_year,
            end_year = request.end_year,
            "Scraping category"
        );

        let mut records: Vec<Record> = Vec::new();
        let mut years_found = BTreeSet::new();
        let mut last_page: Option<(i32, String)> = None;

        for year in request.start_year..=request.end_year {
            if year > request.start_year && !self.config.request_pause.is_zero() {
                tokio::time::sleep(self.config.request_pause).await;
            }

            let mut year_url = source_url.clone();
            year_url.query_pairs_mut().append_pair("ano", &year.to_string());

            let Some(html) = self.fetch_year(&year_url, request.category, year).await else {
                warn!(
                    category = %request.category,
                    subcategory,
                    year,
                    url = %year_url,
                    "No data for year after retries, skipping"
                );
                continue;
            };

            if self.drift.changed(year_url.as_str(), &html) {
                warn!(category = %request.category, year, url = %year_url, "Upstream layout changed");
            }

            let mut rows = self.extractor.extract(&html);
            for row in &mut rows {
                row.insert(YEAR_KEY.to_string(), Value::from(year));
            }
            if !rows.is_empty() {
                years_found.insert(year);
            }
            info!(category = %request.category, year, rows = rows.len(), "Year scraped");

            records.extend(rows);
            last_page = Some((year, html));
        }

        let raw_html = if records.len() < LOW_DATA_THRESHOLD {
            last_page.map(|(year, html)| BTreeMap::from([(year, html)]))
        } else {
            None
        };

        let mut metadata = Map::new();
        metadata.insert("category".into(), json!(request.category));
        metadata.insert("subcategory".into(), json!(request.subcategory));
        metadata.insert("start_year".into(), json!(request.start_year));
        metadata.insert("end_year".into(), json!(request.end_year));
        metadata.insert("record_count".into(), json!(records.len()));
        metadata.insert("years_found".into(), json!(years_found));
        metadata.insert(
            "filters".into(),
            json!({
                "region": request.region,
                "product_type": request.product_type,
                "origin": request.origin,
                "destination": request.destination,
            }),
        );

        Ok(ScrapedData {
            source_url: source_url.to_string(),
            timestamp: Utc::now(),
            records,
            metadata,
            raw_html,
        })
    }

    async fn fetch_year(&self, url: &Url, category: Category, year: i32) -> Option<String> {
        let attempts = self.config.year_retries.max(1);

        for attempt in 1..=attempts {
            match self.fetcher.fetch(url).await {
                Ok(html) => return Some(html),
                Err(e) => {
                    warn!(%category, year, attempt, url = %url, error = %e, "Year fetch failed");
                    if !e.is_transient() {
                        return None;
                    }
                    if attempt < attempts {
                        tokio::time::sleep(self.config.year_backoff.saturating_mul(attempt)).await;
                    }
                }
            }
        }
        None
    }
}
