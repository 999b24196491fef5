//! Core data model types shared by the mapping engine, the codecs and the store.
//!
//! Records are described by a [`Schema`] (a list of typed [`Field`]s, some of them
//! relational); cells travel as [`Value`]s inside a [`Sheet`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostics::FIRST_DATA_LINE;

/// Internal (database) identifier of a record.
pub type RecordId = i64;

/// Logical data type for a model field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Reference to a single record of `comodel`.
    #[serde(rename = "many2one")]
    Many2One { comodel: String },
    /// Records of `comodel` pointing back through their `inverse` many2one.
    ///
    /// With `prune_unlisted`, children not mentioned by an import are removed
    /// (standard replacement). Without it the relation only ever grows or updates.
    #[serde(rename = "one2many")]
    One2Many {
        comodel: String,
        inverse: String,
        #[serde(default = "default_prune")]
        prune_unlisted: bool,
    },
    /// Unordered set of records of `comodel`.
    #[serde(rename = "many2many")]
    Many2Many { comodel: String },
}

fn default_prune() -> bool {
    true
}

impl DataType {
    /// Model name on the other side of a relation.
    pub fn comodel(&self) -> Option<&str> {
        match self {
            Self::Many2One { comodel }
            | Self::One2Many { comodel, .. }
            | Self::Many2Many { comodel } => Some(comodel),
            _ => None,
        }
    }

    pub fn is_relational(&self) -> bool {
        self.comodel().is_some()
    }

    /// True for relations exported as repeated occurrence slots.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::One2Many { .. } | Self::Many2Many { .. })
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field data type.
    #[serde(flatten)]
    pub data_type: DataType,
    /// Imports must not leave this field empty.
    #[serde(default)]
    pub required: bool,
}

impl Field {
    /// Create a new optional field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            required: false,
        }
    }

    /// Mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn many2one(name: impl Into<String>, comodel: impl Into<String>) -> Self {
        Self::new(
            name,
            DataType::Many2One {
                comodel: comodel.into(),
            },
        )
    }

    pub fn one2many(
        name: impl Into<String>,
        comodel: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            DataType::One2Many {
                comodel: comodel.into(),
                inverse: inverse.into(),
                prune_unlisted: true,
            },
        )
    }

    pub fn many2many(name: impl Into<String>, comodel: impl Into<String>) -> Self {
        Self::new(
            name,
            DataType::Many2Many {
                comodel: comodel.into(),
            },
        )
    }
}

/// Fields of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Model name (e.g. `res.partner`).
    pub model: String,
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(model: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            model: model.into(),
            fields,
        }
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns a field by name, if present.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// All model schemas known to an import or export run, keyed by model name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaRegistry {
    models: BTreeMap<String, Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a schema.
    pub fn insert(&mut self, schema: Schema) {
        self.models.insert(schema.model.clone(), schema);
    }

    pub fn with(mut self, schema: Schema) -> Self {
        self.insert(schema);
        self
    }

    pub fn get(&self, model: &str) -> Option<&Schema> {
        self.models.get(model)
    }

    /// Load a JSON array of schemas.
    pub fn from_json(input: &str) -> serde_json::Result<Self> {
        let schemas: Vec<Schema> = serde_json::from_str(input)?;
        Ok(schemas.into_iter().fold(Self::new(), Self::with))
    }
}

/// A single scalar cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a JSON scalar. Arrays and objects have no cell representation.
    pub fn from_json(v: &serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int64)
                .or_else(|| n.as_f64().map(Self::Float64)),
            serde_json::Value::String(s) => Some(Self::Utf8(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Int64(i) => serde_json::Value::from(*i),
            Self::Float64(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Utf8(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Integer view used for `.id` columns; accepts integral floats and numeric text.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int64(i) => Some(*i),
            Self::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Utf8(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Int64(i) => write!(f, "{i}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Utf8(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Utf8(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Utf8(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int64(i)
    }
}

/// A header row plus data rows, as exchanged with format codecs.
///
/// Rows are stored as `Vec<Vec<Value>>` in the same order as `headers`; rows may be
/// shorter than the header (missing trailing cells read as `Null`).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    /// Worksheet name for codecs that have one; the first sheet's name on decode.
    pub title: Option<String>,
    /// Column headers.
    pub headers: Vec<String>,
    /// Row-major value storage.
    pub rows: Vec<Vec<Value>>,
    /// Lines of the source file above the header row (blank rows a codec skipped).
    pub skipped_lines: usize,
}

impl Sheet {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            title: None,
            headers,
            rows,
            skipped_lines: 0,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Line of the first data row in the source file.
    pub fn first_data_line(&self) -> usize {
        FIRST_DATA_LINE + self.skipped_lines
    }

    /// Number of data rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the index of a column by header, if present.
    pub fn index_of(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }
}
