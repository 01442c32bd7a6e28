use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::taxonomy::Category;

/// One row of source data: column label to scalar value.
///
/// Labels are whatever the upstream page (or snapshot file) used, so no key
/// is guaranteed except `year`, which the pipeline injects.
pub type Record = Map<String, Value>;

/// Key under which the pipeline stores the record's year.
pub const YEAR_KEY: &str = "year";

/// Key under which reshaped wide-format values are stored.
pub const VALUE_KEY: &str = "value";

/// Reads the `year` key as an integer, accepting numeric strings.
pub fn record_year(record: &Record) -> Option<i64> {
    match record.get(YEAR_KEY)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Result of one multi-year scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedData {
    pub source_url: String,
    pub timestamp: DateTime<Utc>,
    pub records: Vec<Record>,
    pub metadata: Map<String, Value>,
    /// Raw page per year, present only when the scrape came back thin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<BTreeMap<i32, String>>,
}

impl ScrapedData {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Drops the recovery material once it is no longer needed.
    #[must_use]
    pub fn without_raw_html(mut self) -> Self {
        self.raw_html = None;
        self
    }
}

/// Records loaded from a bundled snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackDataset {
    pub records: Vec<Record>,
    pub metadata: FallbackMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackMetadata {
    pub category: Category,
    pub subcategory: Option<String>,
    pub source: String,
    pub file: String,
    pub record_count: usize,
}

/// Tier that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Cache,
    Online,
    FallbackFile,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Cache => "cache",
            DataSource::Online => "online",
            DataSource::FallbackFile => "fallback_file",
        }
    }
}

/// Inbound request for `get_data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQuery {
    pub category: Category,
    pub start_year: i32,
    pub end_year: i32,
    pub region: Option<String>,
    pub product_type: Option<String>,
    pub subcategory: Option<String>,
    pub channel: Option<String>,
    pub origin: Option<String>,
    pub destination: Option<String>,
}

impl DataQuery {
    pub fn new(category: Category, start_year: i32, end_year: i32) -> Self {
        Self {
            category,
            start_year,
            end_year,
            region: None,
            product_type: None,
            subcategory: None,
            channel: None,
            origin: None,
            destination: None,
        }
    }

    #[must_use]
    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn has_filters(&self) -> bool {
        self.region.is_some()
            || self.product_type.is_some()
            || self.channel.is_some()
            || self.origin.is_some()
            || self.destination.is_some()
    }
}

/// Outbound payload of `get_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub data: Vec<Record>,
    pub metadata: Map<String, Value>,
    pub from_cache: bool,
    pub data_source: Option<DataSource>,
    pub total_records: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DataResponse {
    /// Response for total exhaustion of every tier.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            data: Vec::new(),
            metadata: Map::new(),
            from_cache: false,
            data_source: None,
            total_records: 0,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
