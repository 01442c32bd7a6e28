//! The `get_data` orchestrator: cache, live scrape, recovery, then bundled
//! snapshots, followed by filtering, annotation and sanitization.

use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::filter::apply_filters;
use super::sanitize::{clean_unnecessary_headers, sanitize_for_json};
use crate::classify::SubcategoryClassifier;
use crate::client::{FetchError, FetcherConfig, HttpFetcher};
use crate::domain::{
    Category, DataQuery, DataResponse, DataSource, FallbackDataset, Record, ScrapedData, Taxonomy,
    TaxonomyError, ValidationError, record_year,
};
use crate::parser::{recover, validate_records};
use crate::reliability::{CacheConfig, CacheHit, FallbackLoader, ResilientCache};
use crate::scraper::{AdaptiveScraper, ScrapeRequest, ScraperConfig};

/// Message carried by a response when every tier came up empty.
pub const RETRIEVAL_FAILED: &str = "Data retrieval failed";

/// A query rejected before any tier is consulted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error("Start year {start} is after end year {end}")]
    InvertedRange { start: i32, end: i32 },
}

/// Why a live acquisition produced nothing cacheable.
#[derive(Error, Debug)]
enum AcquisitionError {
    #[error(transparent)]
    Taxonomy(#[from] TaxonomyError),
    #[error("Scraped payload rejected and recovery failed: {0}")]
    Invalid(ValidationError),
}

#[derive(Debug, Clone)]
pub struct DataServiceConfig {
    pub fetcher: FetcherConfig,
    pub scraper: ScraperConfig,
    pub cache: CacheConfig,
    pub fallback_dir: PathBuf,
}

impl Default for DataServiceConfig {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            scraper: ScraperConfig::default(),
            cache: CacheConfig::default(),
            fallback_dir: PathBuf::from("data/fallback"),
        }
    }
}

/// Cache key for a query: `{category}[_{sub}]_{start}_{end}` plus a
/// `_filters_` suffix carrying one tagged segment per filter that is set.
pub fn cache_key(query: &DataQuery) -> String {
    let mut key = query.category.to_string();
    if let Some(sub) = &query.subcategory {
        key.push('_');
        key.push_str(sub);
    }
    key.push_str(&format!("_{}_{}", query.start_year, query.end_year));

    if query.has_filters() {
        key.push_str("_filters_");
        let segments = [
            ('r', &query.region),
            ('p', &query.product_type),
            ('c', &query.channel),
            ('o', &query.origin),
            ('d', &query.destination),
        ];
        for (tag, value) in segments
            .into_iter()
            .filter_map(|(tag, value)| Some((tag, value.as_deref()?)))
        {
            key.push(tag);
            key.push_str(value);
        }
    }
    key
}

pub struct DataService {
    taxonomy: Arc<Taxonomy>,
    scraper: AdaptiveScraper,
    cache: ResilientCache<ScrapedData>,
    fallback: FallbackLoader,
    classifier: SubcategoryClassifier,
}

impl DataService {
    pub fn new(config: DataServiceConfig, taxonomy: Arc<Taxonomy>) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(config.fetcher)?;
        let scraper = AdaptiveScraper::new(fetcher, Arc::clone(&taxonomy), config.scraper)?;

        Ok(Self {
            scraper,
            cache: ResilientCache::new(config.cache),
            fallback: FallbackLoader::new(config.fallback_dir, Arc::clone(&taxonomy)),
            classifier: SubcategoryClassifier::new(Arc::clone(&taxonomy)),
            taxonomy,
        })
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn cache(&self) -> &ResilientCache<ScrapedData> {
        &self.cache
    }

    /// Retrieves, annotates and sanitizes data for a query.
    ///
    /// Only invalid queries escape; every acquisition failure is absorbed
    /// and, when all tiers are exhausted, reported through
    /// [`DataResponse::error`].
    pub async fn get_data(&self, query: &DataQuery) -> Result<DataResponse, QueryError> {
        if query.start_year > query.end_year {
            return Err(QueryError::InvertedRange {
                start: query.start_year,
                end: query.end_year,
            });
        }

        let mut query = query.clone();
        if query.subcategory.is_none()
            && let Some(product_type) = &query.product_type
            && let Some(mapped) = self.taxonomy.map_product_type(query.category, product_type)
        {
            debug!(category = %query.category, product_type = %product_type, subcategory = %mapped, "Mapped product type");
            query.subcategory = Some(mapped);
        }

        self.taxonomy
            .upstream_params(query.category, query.subcategory.as_deref())?;

        let key = cache_key(&query);
        let hit = self
            .cache
            .get_or_fetch(&key, || self.acquire(&query))
            .await;

        let (records, mut metadata, source, from_cache) = match hit {
            Some(hit) => {
                let stale = hit.is_stale();
                let (source, from_cache) = match &hit {
                    CacheHit::Fetched(_) => (DataSource::Online, false),
                    CacheHit::Fresh(_) | CacheHit::Historical(_) => (DataSource::Cache, true),
                };
                let scraped = hit.into_inner();
                let mut metadata = scraped.metadata;
                metadata.insert("source_url".into(), json!(scraped.source_url));
                metadata.insert("timestamp".into(), json!(scraped.timestamp));
                if stale {
                    metadata.insert("stale".into(), json!(true));
                }
                (scraped.records, metadata, source, from_cache)
            }
            None => match self.load_fallback(&query) {
                Some(dataset) => {
                    let metadata = match serde_json::to_value(&dataset.metadata) {
                        Ok(Value::Object(map)) => map,
                        _ => Map::new(),
                    };
                    (dataset.records, metadata, DataSource::FallbackFile, false)
                }
                None => {
                    warn!(
                        category = %query.category,
                        subcategory = query.subcategory.as_deref().unwrap_or("all"),
                        start_year = query.start_year,
                        end_year = query.end_year,
                        "All data tiers exhausted"
                    );
                    return Ok(DataResponse::failed(RETRIEVAL_FAILED));
                }
            },
        };

        let data = self.post_process(&query, records, &mut metadata)?;
        info!(
            category = %query.category,
            source = source.as_str(),
            records = data.len(),
            "Data served"
        );

        Ok(DataResponse {
            total_records: data.len(),
            data,
            metadata,
            from_cache,
            data_source: Some(source),
            error: None,
        })
    }

    /// Live scrape, validated, with recovery from retained pages when the
    /// structured extraction looks wrong.
    async fn acquire(&self, query: &DataQuery) -> Result<ScrapedData, AcquisitionError> {
        let request = ScrapeRequest::from(query);
        let mut scraped = self.scraper.scrape_category(&request).await?;

        if let Err(invalid) = validate_records(&scraped.records) {
            warn!(
                category = %query.category,
                subcategory = query.subcategory.as_deref().unwrap_or("all"),
                url = %scraped.source_url,
                error = %invalid,
                "Scraped payload rejected, attempting recovery"
            );

            let recovered = self.recover_from_raw(&scraped);
            validate_records(&recovered).map_err(|_| AcquisitionError::Invalid(invalid))?;

            info!(category = %query.category, records = recovered.len(), "Recovered records from raw HTML");
            scraped.metadata.insert("record_count".into(), json!(recovered.len()));
            scraped.metadata.insert("recovered".into(), json!(true));
            scraped.records = recovered;
        }

        Ok(scraped.without_raw_html())
    }

    fn recover_from_raw(&self, scraped: &ScrapedData) -> Vec<Record> {
        let Some(pages) = &scraped.raw_html else {
            return Vec::new();
        };

        let mut records = Vec::new();
        for (year, html) in pages {
            let url = match Url::parse(&scraped.source_url) {
                Ok(mut url) => {
                    url.query_pairs_mut().append_pair("ano", &year.to_string());
                    url.to_string()
                }
                Err(_) => scraped.source_url.clone(),
            };
            let rows = recover(html, &url);
            if rows.is_empty() {
                warn!(year, url = %url, "Recovery produced no rows");
            }
            records.extend(rows);
        }
        records
    }

    /// Subcategory snapshot first, then the category default. A snapshot
    /// with no rows in the requested range counts as a miss.
    fn load_fallback(&self, query: &DataQuery) -> Option<FallbackDataset> {
        let mut attempts = vec![query.subcategory.as_deref()];
        if query.subcategory.is_some() {
            attempts.push(None);
        }

        attempts.into_iter().find_map(|subcategory| {
            let dataset = match self.fallback.load(query.category, subcategory) {
                Ok(dataset) => dataset,
                Err(e) => {
                    warn!(
                        category = %query.category,
                        subcategory = subcategory.unwrap_or("default"),
                        error = %e,
                        "Fallback snapshot failed"
                    );
                    return None;
                }
            };

            let file = dataset.metadata.file.clone();
            let restricted = restrict_years(dataset, query.start_year, query.end_year);
            if restricted.is_none() {
                warn!(
                    category = %query.category,
                    file = %file,
                    start_year = query.start_year,
                    end_year = query.end_year,
                    "Snapshot has no rows in the requested range"
                );
            }
            restricted
        })
    }

    fn post_process(
        &self,
        query: &DataQuery,
        records: Vec<Record>,
        metadata: &mut Map<String, Value>,
    ) -> Result<Vec<Record>, TaxonomyError> {
        let records = apply_filters(records, query);
        let mut records = clean_unnecessary_headers(records);

        if let Some(detected) = self.classifier.detect_dominant(query.category, &records)? {
            metadata.insert("detected_subcategory".into(), json!(detected));
        }

        let channel = match query.category {
            Category::Comercializacao => query.channel.as_deref().and_then(|channel| {
                let resolved = self.taxonomy.resolve_subcategory(query.category, channel);
                if resolved.is_none() {
                    debug!(channel = %channel, "Channel matches no sales bucket");
                }
                resolved
            }),
            _ => None,
        };
        let forced = channel.as_deref().or(query.subcategory.as_deref());
        self.classifier
            .annotate(query.category, &mut records, forced)?;

        Ok(sanitize_for_json(records))
    }
}

/// Keeps records inside `[start, end]`; records without a year are kept.
/// `None` when nothing falls in range.
fn restrict_years(mut dataset: FallbackDataset, start: i32, end: i32) -> Option<FallbackDataset> {
    let range = i64::from(start)..=i64::from(end);
    dataset
        .records
        .retain(|record| record_year(record).is_none_or(|year| range.contains(&year)));

    if dataset.records.is_empty() {
        return None;
    }
    dataset.metadata.record_count = dataset.records.len();
    Some(dataset)
}
