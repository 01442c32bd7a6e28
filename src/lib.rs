#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::doc_markdown
)]

pub mod app;
pub mod classify;
pub mod client;
pub mod domain;
pub mod parser;
pub mod reliability;
pub mod scraper;
pub mod service;

// Re-export main types for easy access
pub use app::{App, Config};
pub use domain::{Category, DataQuery, DataResponse, DataSource, Record, Taxonomy};
pub use service::{DataService, DataServiceConfig};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
