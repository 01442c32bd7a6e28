//! Bundled CSV snapshots used when live acquisition fails.
//!
//! Snapshot exports are inconsistent: delimiters vary between files, some
//! are latin-1, most are wide (one column per year). Loading normalizes all
//! of that into long-format records.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Category, FallbackDataset, FallbackMetadata, Record, Taxonomy, VALUE_KEY, YEAR_KEY};
use crate::parser::{is_sentinel, parse_locale_number};

/// Delimiters tried by auto-detection, in tie-break order.
const CANDIDATE_DELIMITERS: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Column names recognized as row identifiers in wide snapshots.
const IDENTIFIER_COLUMNS: &[&str] = &[
    "id", "control", "produto", "cultivar", "país", "pais", "países", "paises", "descrição",
    "descricao", "item", "nome",
];

const YEAR_RANGE: std::ops::RangeInclusive<i64> = 1900..=2100;

#[derive(Error, Debug)]
pub enum FallbackError {
    #[error("No fallback snapshot for {category} ({subcategory})")]
    Unavailable {
        category: Category,
        subcategory: String,
    },
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Header row plus raw cell text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextEncoding {
    Utf8,
    Latin1,
}

fn decode(bytes: &[u8], encoding: TextEncoding) -> Option<String> {
    match encoding {
        TextEncoding::Utf8 => {
            let text = std::str::from_utf8(bytes).ok()?;
            Some(text.trim_start_matches('\u{feff}').to_string())
        }
        TextEncoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
    }
}

/// Picks the candidate delimiter occurring most often in the header line.
fn sniff_delimiter(text: &str) -> Option<u8> {
    let header = text.lines().find(|line| !line.trim().is_empty())?;
    CANDIDATE_DELIMITERS
        .iter()
        .map(|&d| (d, header.bytes().filter(|&b| b == d).count()))
        .filter(|&(_, count)| count > 0)
        .fold(None, |best: Option<(u8, usize)>, (d, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((d, count)),
        })
        .map(|(d, _)| d)
}

fn read_table(text: &str, delimiter: u8) -> Result<RawTable, String> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.len() < 2 {
        return Err(format!(
            "expected at least two columns with delimiter {:?}, found {}",
            delimiter as char,
            headers.len()
        ));
    }

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| e.to_string())?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable { headers, rows })
}

/// Auto-detected delimiter, then `;`, then `;` over latin-1 text.
fn parse_snapshot(bytes: &[u8], path: &Path) -> Result<RawTable, FallbackError> {
    let mut failures = Vec::new();

    let attempts: [(TextEncoding, Option<u8>); 3] = [
        (TextEncoding::Utf8, None),
        (TextEncoding::Utf8, Some(b';')),
        (TextEncoding::Latin1, Some(b';')),
    ];

    for (encoding, delimiter) in attempts {
        let Some(text) = decode(bytes, encoding) else {
            failures.push(format!("{encoding:?}: not valid text"));
            continue;
        };
        let Some(delimiter) = delimiter.or_else(|| sniff_delimiter(&text)) else {
            failures.push(format!("{encoding:?}: no delimiter detected"));
            continue;
        };

        match read_table(&text, delimiter) {
            Ok(table) => {
                debug!(
                    path = %path.display(),
                    encoding = ?encoding,
                    delimiter = %(delimiter as char).escape_default(),
                    "Parsed snapshot"
                );
                return Ok(table);
            }
            Err(reason) => failures.push(format!("{encoding:?}: {reason}")),
        }
    }

    Err(FallbackError::Parse {
        path: path.to_path_buf(),
        reason: failures.join("; "),
    })
}

fn year_column(header: &str) -> Option<i64> {
    let header = header.trim();
    if header.len() != 4 || !header.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    header.parse().ok().filter(|year| YEAR_RANGE.contains(year))
}

fn cell_value(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.is_empty() || is_sentinel(trimmed) {
        Value::Null
    } else {
        Value::String(trimmed.to_string())
    }
}

/// Reshapes year columns into `(identifiers.., year, value)` records; tables
/// without year columns map row by row.
fn to_long_records(table: &RawTable) -> Vec<Record> {
    let year_columns: Vec<(usize, i64)> = table
        .headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| year_column(h).map(|year| (i, year)))
        .collect();

    if year_columns.is_empty() {
        return table
            .rows
            .iter()
            .map(|row| {
                table
                    .headers
                    .iter()
                    .zip(row.iter())
                    .map(|(h, cell)| (h.clone(), cell_value(cell)))
                    .collect()
            })
            .collect();
    }

    let non_year: Vec<usize> = (0..table.headers.len())
        .filter(|i| !year_columns.iter().any(|(yi, _)| yi == i))
        .collect();
    let recognized: Vec<usize> = non_year
        .iter()
        .copied()
        .filter(|&i| IDENTIFIER_COLUMNS.contains(&table.headers[i].trim().to_lowercase().as_str()))
        .collect();
    let id_columns = if recognized.is_empty() {
        non_year.into_iter().take(1).collect()
    } else {
        recognized
    };

    let mut records = Vec::with_capacity(table.rows.len() * year_columns.len());
    for row in &table.rows {
        for &(index, year) in &year_columns {
            let mut record = Record::new();
            for &id in &id_columns {
                let cell = row.get(id).map_or(Value::Null, |c| cell_value(c));
                record.insert(table.headers[id].clone(), cell);
            }
            record.insert(YEAR_KEY.to_string(), Value::from(year));
            let cell = row.get(index).map_or(Value::Null, |c| cell_value(c));
            record.insert(VALUE_KEY.to_string(), cell);
            records.push(record);
        }
    }
    records
}

/// Converts a column to numbers when more than half of its non-null values
/// parse; otherwise leaves it untouched.
pub fn convert_numeric_columns(records: &mut [Record]) {
    let mut columns: Vec<String> = Vec::new();
    for record in &*records {
        for key in record.keys() {
            if key != YEAR_KEY && !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    for column in columns {
        let mut non_null = 0usize;
        let mut convertible = 0usize;
        for record in &*records {
            match record.get(&column) {
                Some(Value::String(s)) => {
                    non_null += 1;
                    if parse_locale_number(s).is_some() {
                        convertible += 1;
                    }
                }
                Some(Value::Number(_)) => {
                    non_null += 1;
                    convertible += 1;
                }
                Some(Value::Null) | None => {}
                Some(_) => non_null += 1,
            }
        }

        if non_null == 0 || convertible * 2 <= non_null {
            continue;
        }

        for record in &mut *records {
            if let Some(Value::String(s)) = record.get(&column)
                && let Some(number) = parse_locale_number(s)
            {
                record.insert(column.clone(), Value::Number(number));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FallbackLoader {
    dir: PathBuf,
    taxonomy: Arc<Taxonomy>,
}

impl FallbackLoader {
    pub fn new(dir: impl Into<PathBuf>, taxonomy: Arc<Taxonomy>) -> Self {
        Self {
            dir: dir.into(),
            taxonomy,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot path for the subcategory if it has one on disk, else the
    /// category default. The flag tells whether the subcategory file won.
    fn resolve(&self, category: Category, subcategory: Option<&str>) -> Option<(PathBuf, bool)> {
        if let Some(name) = subcategory
            && let Some(file) = self.taxonomy.subcategory_file(category, name)
        {
            let path = self.dir.join(file);
            if path.is_file() {
                return Some((path, true));
            }
            debug!(path = %path.display(), "Subcategory snapshot missing, trying default");
        }

        let path = self.dir.join(self.taxonomy.default_file(category)?);
        path.is_file().then_some((path, false))
    }

    pub fn load(
        &self,
        category: Category,
        subcategory: Option<&str>,
    ) -> Result<FallbackDataset, FallbackError> {
        let Some((path, used_subcategory)) = self.resolve(category, subcategory) else {
            warn!(%category, subcategory = subcategory.unwrap_or("default"), "No fallback snapshot");
            return Err(FallbackError::Unavailable {
                category,
                subcategory: subcategory.unwrap_or("default").to_string(),
            });
        };

        let bytes = std::fs::read(&path).map_err(|source| FallbackError::Io {
            path: path.clone(),
            source,
        })?;
        let table = parse_snapshot(&bytes, &path)?;

        let mut records = to_long_records(&table);
        convert_numeric_columns(&mut records);

        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(
            %category,
            subcategory = subcategory.unwrap_or("default"),
            file = %file,
            records = records.len(),
            "Loaded fallback snapshot"
        );

        Ok(FallbackDataset {
            metadata: FallbackMetadata {
                category,
                subcategory: if used_subcategory {
                    subcategory.map(str::to_string)
                } else {
                    None
                },
                source: "fallback_file".to_string(),
                file,
                record_count: records.len(),
            },
            records,
        })
    }
}
