pub mod data_service;
pub mod export;
pub mod filter;
pub mod sanitize;

pub use data_service::{DataService, DataServiceConfig, QueryError, RETRIEVAL_FAILED, cache_key};
pub use export::{ExportError, export_to_csv, export_to_parquet};
pub use filter::{apply_filters, filter_by_columns};
pub use sanitize::{clean_unnecessary_headers, finite_number, sanitize_for_json};
