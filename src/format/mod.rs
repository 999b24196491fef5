//! File formats for pattern files.
//!
//! Each format is a [`FormatCodec`] registered under a format id (`csv`, `xlsx`) in a
//! [`FormatRegistry`]. Patterns name their format by id; asking for an id nobody
//! registered fails fast with [`PatternError::UnknownFormat`].
//!
//! ## Example
//!
//! ```rust
//! use pattern_import_export::format::FormatRegistry;
//! use pattern_import_export::types::{Sheet, Value};
//!
//! # fn main() -> Result<(), pattern_import_export::PatternError> {
//! let formats = FormatRegistry::with_defaults();
//! let csv = formats.get("csv")?;
//! let sheet = Sheet::new(vec!["name".into()], vec![vec![Value::from("Wood Corner")]]);
//! let bytes = csv.encode(&sheet)?;
//! assert_eq!(csv.decode(&bytes)?.rows, sheet.rows);
//! # Ok(())
//! # }
//! ```

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{PatternError, PatternResult};
use crate::types::Sheet;

/// Encoder/decoder between file bytes and a [`Sheet`].
pub trait FormatCodec: Send + Sync {
    /// Extension of produced files, without the dot.
    fn extension(&self) -> &str;

    fn encode(&self, sheet: &Sheet) -> PatternResult<Vec<u8>>;

    /// Parse a file. The first row holds the headers; empty cells decode as `Null`.
    fn decode(&self, data: &[u8]) -> PatternResult<Sheet>;
}

/// Codecs by format id.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    codecs: BTreeMap<String, Arc<dyn FormatCodec>>,
}

impl fmt::Debug for FormatRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatRegistry")
            .field("formats", &self.codecs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FormatRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `csv`, plus `xlsx` when built with the `excel` feature.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("csv", Arc::new(csv::CsvCodec::default()));
        #[cfg(feature = "excel")]
        registry.register("xlsx", Arc::new(excel::ExcelCodec::default()));
        registry
    }

    /// Register (or replace) the codec of a format id.
    pub fn register(&mut self, format: impl Into<String>, codec: Arc<dyn FormatCodec>) {
        self.codecs.insert(format.into(), codec);
    }

    pub fn get(&self, format: &str) -> PatternResult<&dyn FormatCodec> {
        self.codecs
            .get(format)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| PatternError::UnknownFormat {
                format: format.to_string(),
            })
    }

    /// Registered format ids, sorted.
    pub fn formats(&self) -> impl Iterator<Item = &str> {
        self.codecs.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_formats_fail_fast() {
        let err = FormatRegistry::with_defaults().get("ods").err().unwrap();
        assert_eq!(err.to_string(), "The export with the format ods doesn't exist!");
    }

    #[test]
    fn defaults_register_csv() {
        let registry = FormatRegistry::with_defaults();
        assert_eq!(registry.get("csv").unwrap().extension(), "csv");
        #[cfg(feature = "excel")]
        assert_eq!(registry.formats().collect::<Vec<_>>(), ["csv", "xlsx"]);
    }
}
