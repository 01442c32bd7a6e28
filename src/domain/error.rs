use thiserror::Error;

/// Rejected taxonomy input. Fatal to a single request and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaxonomyError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown subcategory '{subcategory}' for category '{category}'")]
    UnknownSubcategory {
        category: String,
        subcategory: String,
    },

    #[error("Invalid taxonomy definition: {0}")]
    Invalid(String),
}

/// Scraped payload judged structurally implausible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Scrape returned no records")]
    Empty,

    #[error("{sparse} of {sampled} sampled rows carry at most one populated field")]
    SparseRows { sampled: usize, sparse: usize },
}
