use serde_json::Value;

use crate::domain::{DataQuery, Record};

const REGION_COLUMNS: &[&str] = &["regiao", "estado", "uf", "municipio", "local"];
const PRODUCT_COLUMNS: &[&str] = &["produto", "tipo", "variedade", "uva", "vinho", "suco", "cultivar"];
const CHANNEL_COLUMNS: &[&str] = &["canal", "comercializacao", "venda", "varejo", "rede"];
const ORIGIN_COLUMNS: &[&str] = &["origem", "procedencia", "pais", "país", "fornecedor"];
const DESTINATION_COLUMNS: &[&str] = &["destino", "pais", "país", "mercado", "comprador"];

/// Keeps rows where any column whose name contains one of `column_keywords`
/// holds `needle` (case-insensitive). No matching column means no filtering.
pub fn filter_by_columns(records: Vec<Record>, column_keywords: &[&str], needle: &str) -> Vec<Record> {
    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            let lowered = key.to_lowercase();
            if column_keywords.iter().any(|kw| lowered.contains(kw)) && !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    if columns.is_empty() {
        return records;
    }

    let needle = needle.to_lowercase();
    records
        .into_iter()
        .filter(|record| {
            columns.iter().any(|column| match record.get(column) {
                Some(Value::String(s)) => s.to_lowercase().contains(&needle),
                _ => false,
            })
        })
        .collect()
}

/// Applies every filter set on the query, in a fixed order.
pub fn apply_filters(records: Vec<Record>, query: &DataQuery) -> Vec<Record> {
    let filters = [
        (REGION_COLUMNS, query.region.as_deref()),
        (PRODUCT_COLUMNS, query.product_type.as_deref()),
        (CHANNEL_COLUMNS, query.channel.as_deref()),
        (ORIGIN_COLUMNS, query.origin.as_deref()),
        (DESTINATION_COLUMNS, query.destination.as_deref()),
    ];

    filters
        .into_iter()
        .fold(records, |acc, (columns, value)| match value {
            Some(needle) if !acc.is_empty() => filter_by_columns(acc, columns, needle),
            _ => acc,
        })
}
