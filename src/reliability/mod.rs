pub mod cache;
pub mod fallback;

pub use cache::{CacheConfig, CacheHit, ResilientCache};
pub use fallback::{FallbackError, FallbackLoader, convert_numeric_columns};
