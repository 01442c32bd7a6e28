pub mod numeric;
pub mod recovery;
pub mod table;

pub use numeric::{NO_DATA_SENTINELS, coerce_numeric, is_sentinel, parse_locale_number};
pub use recovery::{recover, validate_records, year_from_url};
pub use table::{TableExtractor, normalize_text};
