pub mod adaptive;
pub mod drift;

pub use adaptive::{AdaptiveScraper, LOW_DATA_THRESHOLD, ScrapeRequest, ScraperConfig};
pub use drift::SchemaDriftDetector;
