pub mod http;
pub mod retry;

pub use http::{FetchError, FetcherConfig, HttpFetcher};
pub use retry::{RETRYABLE_STATUSES, RetryPolicy};
