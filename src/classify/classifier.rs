use serde_json::Value;
use std::sync::Arc;

use crate::domain::{Category, CategoryDef, Record, Taxonomy, TaxonomyError};

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.to_lowercase()),
        other => Some(other.to_string().to_lowercase()),
    }
}

/// Keyword-driven mapping of free-text product fields onto the taxonomy.
#[derive(Debug, Clone)]
pub struct SubcategoryClassifier {
    taxonomy: Arc<Taxonomy>,
}

impl SubcategoryClassifier {
    pub fn new(taxonomy: Arc<Taxonomy>) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Lowercased text of every populated candidate field, space separated.
    fn candidate_text(&self, record: &Record) -> String {
        self.taxonomy
            .text_fields
            .iter()
            .filter_map(|field| record.get(field).and_then(value_text))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First subcategory, in enumeration order, with a keyword in the record.
    fn keyword_match<'a>(&self, def: &'a CategoryDef, record: &Record) -> Option<&'a str> {
        let text = self.candidate_text(record);
        if text.is_empty() {
            return None;
        }
        def.subcategories
            .iter()
            .find(|sub| sub.keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|sub| sub.name.as_str())
    }

    fn hint_match<'a>(def: &'a CategoryDef, record: &Record) -> Option<&'a str> {
        def.field_hints
            .iter()
            .find(|hint| {
                hint.fields
                    .iter()
                    .find_map(|field| record.get(field).and_then(value_text))
                    .is_some_and(|text| hint.matches(&text))
            })
            .map(|hint| hint.subcategory.as_str())
    }

    /// Subcategory for one record.
    ///
    /// `forced` wins outright when it names a bucket of the category; an
    /// existing annotation is kept; otherwise keywords, then field hints,
    /// then the category's default bucket.
    pub fn classify(
        &self,
        category: Category,
        record: &Record,
        forced: Option<&str>,
    ) -> Result<String, TaxonomyError> {
        let def = self.taxonomy.category(category)?;

        if let Some(forced) = forced
            && def.subcategory(forced).is_ok()
        {
            return Ok(forced.to_string());
        }
        if let Some(Value::String(existing)) = record.get(&def.annotation_key)
            && !existing.is_empty()
        {
            return Ok(existing.clone());
        }

        let name = self
            .keyword_match(def, record)
            .or_else(|| Self::hint_match(def, record))
            .unwrap_or(def.default_subcategory.as_str());
        Ok(name.to_string())
    }

    /// Most frequent keyword match across `records`.
    ///
    /// `None` for fewer than two records or when nothing matched. Ties go to
    /// the bucket listed first in the taxonomy.
    pub fn detect_dominant(
        &self,
        category: Category,
        records: &[Record],
    ) -> Result<Option<String>, TaxonomyError> {
        let def = self.taxonomy.category(category)?;
        if records.len() < 2 {
            return Ok(None);
        }

        let mut counts = vec![0usize; def.subcategories.len()];
        for record in records {
            if let Some(name) = self.keyword_match(def, record)
                && let Some(index) = def.subcategories.iter().position(|s| s.name == name)
            {
                counts[index] += 1;
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for (index, &count) in counts.iter().enumerate() {
            if count > 0 && best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((index, count));
            }
        }

        Ok(best.map(|(index, _)| def.subcategories[index].name.clone()))
    }

    /// Writes the category's annotation key on every record.
    pub fn annotate(
        &self,
        category: Category,
        records: &mut [Record],
        forced: Option<&str>,
    ) -> Result<(), TaxonomyError> {
        let key = self.taxonomy.category(category)?.annotation_key.clone();
        for record in &mut *records {
            let name = self.classify(category, record, forced)?;
            record.insert(key.clone(), Value::String(name));
        }
        Ok(())
    }
}
