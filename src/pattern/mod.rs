//! Patterns (export-field specifications) and the flat-path mapping engine.
//!
//! A [`Pattern`] lists the columns of a pattern file as `/`-delimited field paths.
//! The engine turns a pattern into:
//!
//! - a [`tree::DictTree`] describing which fields to serialize ([`tree`])
//! - the ordered list of flat headers such as `child_ids|2|name` ([`flatten::headers`])
//!
//! and maps records between the nested and the flat shape:
//!
//! - [`flatten::flatten`]: record tree → [`flatten::FlatRow`] (export)
//! - [`unflatten::Unflattener`]: flat rows → load batch (import)
//!
//! ## Example: headers and a flat row
//!
//! ```rust
//! use pattern_import_export::pattern::{flatten, ExportLine, Pattern, PatternRegistry};
//! use pattern_import_export::types::Value;
//!
//! # fn main() -> Result<(), pattern_import_export::PatternError> {
//! let registry = PatternRegistry::new().with(Pattern::new(
//!     "partners",
//!     "Partners",
//!     "res.partner",
//!     vec![
//!         ExportLine::new("name"),
//!         ExportLine::new("child_ids/name").occurrences(2),
//!     ],
//! ));
//! let headers = flatten::headers(&registry, "partners")?;
//! assert_eq!(headers, ["name", "child_ids|1|name", "child_ids|2|name"]);
//!
//! let record = serde_json::json!({"name": "A", "child_ids": [{"name": "B"}, {"name": "C"}]});
//! let row = flatten::flatten(&record, &headers);
//! assert_eq!(row.get("child_ids|2|name"), Some(&Value::Utf8("C".to_string())));
//! # Ok(())
//! # }
//! ```

pub mod flatten;
pub mod lookup;
pub mod path;
pub mod tree;
pub mod unflatten;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PatternError, PatternResult};

pub use flatten::{flatten, headers, FlatRow};
pub use lookup::{resolve_key, KeyMatch};
pub use path::{Segment, COLUMN_SEPARATOR, KEY_SUFFIX};
pub use tree::{DictNode, DictTree, DictTreeBuilder};
pub use unflatten::{ImportOptions, Unflattener};

/// Identifier of a pattern inside a [`PatternRegistry`].
pub type PatternId = String;

/// One column definition of a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportLine {
    /// `/`-delimited field path, e.g. `child_ids/name`.
    pub name: String,
    /// Pattern applied to the terminal (relational) field, for reuse across patterns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_pattern: Option<PatternId>,
    /// Number of occurrence slots when the first segment is a list-valued relation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrences: Option<usize>,
}

impl ExportLine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub_pattern: None,
            occurrences: None,
        }
    }

    pub fn sub_pattern(mut self, id: impl Into<PatternId>) -> Self {
        self.sub_pattern = Some(id.into());
        self
    }

    pub fn occurrences(mut self, count: usize) -> Self {
        self.occurrences = Some(count);
        self
    }

    /// Path segments of `name`; fails on an empty name or an empty segment.
    pub fn segments(&self) -> PatternResult<Vec<&str>> {
        if self.name.trim().is_empty() {
            return Err(PatternError::config("export line has an empty name"));
        }
        let segments: Vec<&str> = self.name.split(path::LINE_PATH_SEPARATOR).collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(PatternError::config(format!(
                "export line '{}' has an empty path segment",
                self.name
            )));
        }
        Ok(segments)
    }
}

/// A reusable column-to-field mapping for one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    /// Display name, also used for produced attachment names.
    pub name: String,
    /// Model the pattern exports and imports.
    pub model: String,
    /// Format id resolved in the [`crate::format::FormatRegistry`] (`csv`, `xlsx`).
    #[serde(default)]
    pub export_format: Option<String>,
    /// Ordered column definitions.
    pub lines: Vec<ExportLine>,
}

impl Pattern {
    pub fn new(
        id: impl Into<PatternId>,
        name: impl Into<String>,
        model: impl Into<String>,
        lines: Vec<ExportLine>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: model.into(),
            export_format: None,
            lines,
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.export_format = Some(format.into());
        self
    }
}

/// Patterns by id. Sub-pattern references are resolved through the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternRegistry {
    patterns: BTreeMap<PatternId, Pattern>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a pattern.
    pub fn insert(&mut self, pattern: Pattern) {
        self.patterns.insert(pattern.id.clone(), pattern);
    }

    pub fn with(mut self, pattern: Pattern) -> Self {
        self.insert(pattern);
        self
    }

    /// Returns a pattern by id, or a configuration error.
    pub fn get(&self, id: &str) -> PatternResult<&Pattern> {
        self.patterns
            .get(id)
            .ok_or_else(|| PatternError::config(format!("unknown pattern '{id}'")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.values()
    }

    /// Load a JSON array of patterns.
    pub fn from_json(input: &str) -> PatternResult<Self> {
        let patterns: Vec<Pattern> = serde_json::from_str(input)?;
        Ok(patterns.into_iter().fold(Self::new(), Self::with))
    }
}
