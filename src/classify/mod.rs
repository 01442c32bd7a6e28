pub mod classifier;

pub use classifier::SubcategoryClassifier;
