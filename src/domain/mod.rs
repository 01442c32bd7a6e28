//! Domain layer for vini-data.
//!
//! Contains the canonical types shared across all modules:
//! - `Record` / `ScrapedData` / `FallbackDataset`: data moving through the pipeline
//! - `DataQuery` / `DataResponse`: the `get_data` contract
//! - `Taxonomy` / `Category`: the fixed category/subcategory scheme

pub mod error;
pub mod record;
pub mod taxonomy;

pub use error::{TaxonomyError, ValidationError};
pub use record::{
    DataQuery, DataResponse, DataSource, FallbackDataset, FallbackMetadata, Record, ScrapedData,
    VALUE_KEY, YEAR_KEY, record_year,
};
pub use taxonomy::{Category, CategoryDef, FieldHint, HintMatch, SubcategoryDef, Taxonomy};
