//! Persistence collaborators and the load-batch types exchanged with them.
//!
//! The engine never touches storage directly. Import goes through a [`BulkLoader`]
//! (plus [`RecordLookup`] for alternate-key resolution), export through a
//! [`RecordSerializer`] and, for domain-driven runs, a [`RecordSource`].
//! [`memory::MemoryStore`] implements all four over in-process tables.

pub mod memory;

use crate::diagnostics::LoadMessage;
use crate::error::PatternResult;
use crate::pattern::DictTree;
use crate::types::{RecordId, Value};

pub use memory::MemoryStore;

/// How an import row (or a relation target) names its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordRef {
    /// No identifier given: create a record.
    New,
    /// External identifier; the record is created under this name when missing.
    ExternalId(String),
    /// Internal identifier of an existing record.
    Id(RecordId),
}

/// Replacement semantics for a many2many field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum M2mCommand {
    /// Add the targets to the existing set.
    Link(Vec<RecordRef>),
    /// Make the targets the whole set.
    Replace(Vec<RecordRef>),
}

impl M2mCommand {
    pub fn targets(&self) -> &[RecordRef] {
        match self {
            Self::Link(targets) | Self::Replace(targets) => targets,
        }
    }
}

/// New content for one field of a [`LoadRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// Scalar value, converted to the field type by the loader.
    Set(Value),
    /// Many2one target.
    Link(RecordRef),
    /// One2many children, created or updated in order.
    Children {
        records: Vec<LoadRecord>,
        /// Remove existing children the import does not list.
        prune_unlisted: bool,
    },
    Many2Many(M2mCommand),
}

/// One record to create or update, with the spreadsheet line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRecord {
    pub row: usize,
    pub reference: RecordRef,
    /// Field updates in column order.
    pub values: Vec<(String, FieldUpdate)>,
}

impl LoadRecord {
    pub fn new(row: usize, reference: RecordRef) -> Self {
        Self {
            row,
            reference,
            values: Vec::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldUpdate> {
        self.values.iter().find(|(f, _)| f == field).map(|(_, u)| u)
    }

    /// Nested JSON rendering of the request, keyed like an exported record tree
    /// (`id` / `.id` for references, arrays for list relations).
    pub fn to_tree(&self) -> serde_json::Value {
        let mut object = reference_tree(&self.reference);
        for (field, update) in &self.values {
            let value = match update {
                FieldUpdate::Set(value) => value.to_json(),
                FieldUpdate::Link(target) => serde_json::Value::Object(reference_tree(target)),
                FieldUpdate::Children { records, .. } => {
                    records.iter().map(LoadRecord::to_tree).collect()
                }
                FieldUpdate::Many2Many(command) => command
                    .targets()
                    .iter()
                    .map(|t| serde_json::Value::Object(reference_tree(t)))
                    .collect(),
            };
            object.insert(field.clone(), value);
        }
        serde_json::Value::Object(object)
    }
}

fn reference_tree(reference: &RecordRef) -> serde_json::Map<String, serde_json::Value> {
    let mut object = serde_json::Map::new();
    match reference {
        RecordRef::New => {}
        RecordRef::ExternalId(xmlid) => {
            object.insert("id".to_string(), serde_json::Value::from(xmlid.as_str()));
        }
        RecordRef::Id(id) => {
            object.insert(".id".to_string(), serde_json::Value::from(*id));
        }
    }
    object
}

/// Nested records for one model, plus the row errors found while building them.
///
/// Rows listed in `messages` have no entry in `records`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBatch {
    pub model: String,
    pub records: Vec<LoadRecord>,
    pub messages: Vec<LoadMessage>,
}

impl LoadBatch {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

/// Context of one load call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadContext {
    pub pattern_id: String,
    /// Name of the imported file, when there is one.
    pub source: Option<String>,
}

/// Outcome of a bulk load: ids of the written top-level records plus per-row messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadResult {
    pub ids: Vec<RecordId>,
    pub messages: Vec<LoadMessage>,
}

/// Equality search used for alternate-key resolution.
pub trait RecordLookup {
    /// Ids of `model` records whose `field` equals `value`, ascending.
    fn search_eq(&self, model: &str, field: &str, value: &Value) -> PatternResult<Vec<RecordId>>;
}

/// Writes nested records.
///
/// Rows are independent: a failing row is reported as an error message on its line
/// and leaves no partial writes, the other rows are still written. `Err` is reserved
/// for failures of the whole call.
pub trait BulkLoader: RecordLookup {
    fn load(&mut self, context: &LoadContext, batch: &LoadBatch) -> PatternResult<LoadResult>;
}

/// Serializes a record into the nested JSON tree selected by a [`DictTree`].
///
/// `id` keys carry the external identifier (or `null`), `.id` keys the internal id;
/// list relations are arrays ordered by id.
pub trait RecordSerializer {
    fn to_tree(&self, model: &str, id: RecordId, tree: &DictTree)
    -> PatternResult<serde_json::Value>;
}

/// Domain search for export runs.
///
/// A domain is a JSON list of `[field, operator, value]` triples combined with AND;
/// `"[]"` selects every record.
pub trait RecordSource {
    fn search_domain(&self, model: &str, domain: &str) -> PatternResult<Vec<RecordId>>;
}
