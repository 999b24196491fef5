//! In-process record store implementing every persistence collaborator.
//!
//! Records are JSON objects keyed by id inside per-model tables. Many2one values are
//! stored as the target id, many2many values as an id array; one2many values are not
//! stored but derived from the inverse many2one of the children. External ids live in
//! a separate table, as `xmlid → (model, id)`.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::diagnostics::LoadMessage;
use crate::error::{PatternError, PatternResult};
use crate::pattern::path::{DATABASE_ID, EXTERNAL_ID};
use crate::pattern::{DictNode, DictTree};
use crate::types::{DataType, RecordId, Schema, SchemaRegistry, Value};

use super::{
    BulkLoader, FieldUpdate, LoadBatch, LoadContext, LoadRecord, LoadResult, M2mCommand,
    RecordLookup, RecordRef, RecordSerializer, RecordSource,
};

type Row = serde_json::Map<String, serde_json::Value>;

/// Record tables for the models of a [`SchemaRegistry`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    schemas: SchemaRegistry,
    tables: BTreeMap<String, BTreeMap<RecordId, Row>>,
    xmlids: BTreeMap<String, (String, RecordId)>,
    last_id: RecordId,
}

impl MemoryStore {
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self {
            schemas,
            ..Self::default()
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Insert a record from a JSON object, stored as given.
    pub fn create(&mut self, model: &str, values: serde_json::Value) -> PatternResult<RecordId> {
        self.schema(model)?;
        let serde_json::Value::Object(row) = values else {
            return Err(PatternError::config(format!(
                "values for a new '{model}' record must be a JSON object"
            )));
        };
        Ok(self.insert_row(model, row))
    }

    /// [`Self::create`] and register `xmlid` for the new record.
    pub fn create_with_xmlid(
        &mut self,
        model: &str,
        xmlid: &str,
        values: serde_json::Value,
    ) -> PatternResult<RecordId> {
        let id = self.create(model, values)?;
        self.xmlids
            .insert(xmlid.to_string(), (model.to_string(), id));
        Ok(id)
    }

    pub fn get(&self, model: &str, id: RecordId) -> Option<&Row> {
        self.tables.get(model).and_then(|table| table.get(&id))
    }

    /// Stored value of one field; `None` when the record or the value is missing.
    pub fn value(&self, model: &str, id: RecordId, field: &str) -> Option<&serde_json::Value> {
        self.get(model, id).and_then(|row| row.get(field))
    }

    /// Ids of all records of `model`, ascending.
    pub fn ids(&self, model: &str) -> Vec<RecordId> {
        self.tables
            .get(model)
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, model: &str) -> usize {
        self.tables.get(model).map_or(0, BTreeMap::len)
    }

    pub fn xmlid_of(&self, model: &str, id: RecordId) -> Option<&str> {
        self.xmlids
            .iter()
            .find(|(_, (m, i))| m == model && *i == id)
            .map(|(xmlid, _)| xmlid.as_str())
    }

    pub fn resolve_xmlid(&self, model: &str, xmlid: &str) -> Option<RecordId> {
        self.xmlids
            .get(xmlid)
            .filter(|(m, _)| m == model)
            .map(|(_, id)| *id)
    }

    /// Children of a one2many field, ascending by id.
    pub fn children(&self, model: &str, id: RecordId, field: &str) -> Vec<RecordId> {
        let Some(DataType::One2Many {
            comodel, inverse, ..
        }) = self.field_type(model, field)
        else {
            return Vec::new();
        };
        self.tables
            .get(comodel)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, row)| row.get(inverse).and_then(serde_json::Value::as_i64) == Some(id))
                    .map(|(child, _)| *child)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Targets of a many2many field, ascending by id.
    pub fn linked(&self, model: &str, id: RecordId, field: &str) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self
            .value(model, id, field)
            .and_then(serde_json::Value::as_array)
            .map(|items| items.iter().filter_map(serde_json::Value::as_i64).collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn schema(&self, model: &str) -> PatternResult<&Schema> {
        self.schemas
            .get(model)
            .ok_or_else(|| PatternError::config(format!("no schema registered for model '{model}'")))
    }

    fn field_type(&self, model: &str, field: &str) -> Option<&DataType> {
        self.schemas
            .get(model)
            .and_then(|schema| schema.field(field))
            .map(|f| &f.data_type)
    }

    fn insert_row(&mut self, model: &str, row: Row) -> RecordId {
        self.last_id += 1;
        let id = self.last_id;
        self.tables
            .entry(model.to_string())
            .or_default()
            .insert(id, row);
        id
    }

    /// [`Self::insert_row`] with an empty row, logged for rollback.
    fn insert_logged(&mut self, model: &str, log: &mut UndoLog) -> RecordId {
        let id = self.insert_row(model, Row::new());
        log.push(Undo::Inserted {
            model: model.to_string(),
            id,
        });
        id
    }

    fn set_logged(
        &mut self,
        model: &str,
        id: RecordId,
        field: &str,
        value: serde_json::Value,
        log: &mut UndoLog,
    ) {
        let previous = self.value(model, id, field).cloned();
        self.set(model, id, field, value);
        log.push(Undo::Field {
            model: model.to_string(),
            id,
            field: field.to_string(),
            previous,
        });
    }

    fn remove_logged(&mut self, model: &str, id: RecordId, log: &mut UndoLog) {
        let Some(row) = self.get(model, id).cloned() else {
            return;
        };
        let xmlids = self
            .xmlids
            .iter()
            .filter(|(_, (m, i))| m == model && *i == id)
            .map(|(xmlid, _)| xmlid.clone())
            .collect();
        self.remove(model, id);
        log.push(Undo::Removed {
            model: model.to_string(),
            id,
            row,
            xmlids,
        });
    }

    fn register_logged(&mut self, xmlid: &str, model: &str, id: RecordId, log: &mut UndoLog) {
        self.xmlids
            .insert(xmlid.to_string(), (model.to_string(), id));
        log.push(Undo::XmlId(xmlid.to_string()));
    }

    /// Revert every logged write, newest first.
    fn rollback(&mut self, log: UndoLog) {
        for undo in log.0.into_iter().rev() {
            match undo {
                Undo::Inserted { model, id } => {
                    if let Some(table) = self.tables.get_mut(&model) {
                        table.remove(&id);
                    }
                }
                Undo::Field {
                    model,
                    id,
                    field,
                    previous,
                } => {
                    if let Some(row) = self.tables.get_mut(&model).and_then(|t| t.get_mut(&id)) {
                        match previous {
                            Some(value) => row.insert(field, value),
                            None => row.remove(&field),
                        };
                    }
                }
                Undo::Removed {
                    model,
                    id,
                    row,
                    xmlids,
                } => {
                    for xmlid in xmlids {
                        self.xmlids.insert(xmlid, (model.clone(), id));
                    }
                    self.tables.entry(model).or_default().insert(id, row);
                }
                Undo::XmlId(xmlid) => {
                    self.xmlids.remove(&xmlid);
                }
            }
        }
    }

    fn exists(&self, model: &str, id: RecordId) -> bool {
        self.get(model, id).is_some()
    }

    fn remove(&mut self, model: &str, id: RecordId) {
        if let Some(table) = self.tables.get_mut(model) {
            table.remove(&id);
        }
        self.xmlids
            .retain(|_, (m, i)| !(m.as_str() == model && *i == id));
    }

    fn set(&mut self, model: &str, id: RecordId, field: &str, value: serde_json::Value) {
        if let Some(row) = self.tables.get_mut(model).and_then(|t| t.get_mut(&id)) {
            row.insert(field.to_string(), value);
        }
    }

    /// Write one record and its nested children, returning its id.
    fn apply(
        &mut self,
        model: &str,
        record: &LoadRecord,
        parent: Option<(&str, RecordId)>,
        log: &mut UndoLog,
    ) -> Result<RecordId, Rejection> {
        let schema = self
            .schemas
            .get(model)
            .cloned()
            .ok_or_else(|| Rejection::new("", format!("no schema registered for model '{model}'")))?;

        let id = match &record.reference {
            RecordRef::New => self.insert_logged(model, log),
            RecordRef::ExternalId(xmlid) => match self.xmlids.get(xmlid) {
                Some((owner, id)) if owner == model => *id,
                Some((owner, _)) => {
                    return Err(Rejection::new(
                        EXTERNAL_ID,
                        format!("external id '{xmlid}' belongs to a '{owner}' record"),
                    ));
                }
                None => {
                    let id = self.insert_logged(model, log);
                    self.register_logged(xmlid, model, id, log);
                    id
                }
            },
            RecordRef::Id(id) if self.exists(model, *id) => *id,
            RecordRef::Id(id) => {
                return Err(Rejection::new(
                    DATABASE_ID,
                    format!("record {model}({id}) does not exist"),
                ));
            }
        };

        if let Some((inverse, parent_id)) = parent {
            self.set_logged(model, id, inverse, serde_json::Value::from(parent_id), log);
        }

        for (name, update) in &record.values {
            let field = schema
                .field(name)
                .ok_or_else(|| Rejection::new(name, format!("model '{model}' has no field '{name}'")))?;
            match (&field.data_type, update) {
                (DataType::Many2One { comodel }, FieldUpdate::Link(target)) => {
                    let target = self.resolve(comodel, target, name)?;
                    self.set_logged(model, id, name, serde_json::Value::from(target), log);
                }
                (
                    DataType::One2Many {
                        comodel, inverse, ..
                    },
                    FieldUpdate::Children {
                        records,
                        prune_unlisted,
                    },
                ) => {
                    let mut kept = Vec::with_capacity(records.len());
                    for child in records {
                        kept.push(self.apply(comodel, child, Some((inverse.as_str(), id)), log)?);
                    }
                    if *prune_unlisted {
                        for stale in self.children(model, id, name) {
                            if !kept.contains(&stale) {
                                debug!(model = comodel.as_str(), id = stale, "removing unlisted child");
                                self.remove_logged(comodel, stale, log);
                            }
                        }
                    }
                }
                (DataType::Many2Many { comodel }, FieldUpdate::Many2Many(command)) => {
                    let mut targets = match command {
                        M2mCommand::Link(_) => self.linked(model, id, name),
                        M2mCommand::Replace(_) => Vec::new(),
                    };
                    for target in command.targets() {
                        let target = self.resolve(comodel, target, name)?;
                        if !targets.contains(&target) {
                            targets.push(target);
                        }
                    }
                    targets.sort_unstable();
                    self.set_logged(model, id, name, serde_json::Value::from(targets), log);
                }
                (data_type, FieldUpdate::Set(value)) if !data_type.is_relational() => {
                    let stored = coerce(data_type, value).map_err(|message| Rejection::new(name, message))?;
                    self.set_logged(model, id, name, stored, log);
                }
                _ => {
                    return Err(Rejection::new(
                        name,
                        format!("update does not match the type of field '{name}'"),
                    ));
                }
            }
        }

        for field in schema.fields.iter().filter(|f| f.required && !f.data_type.is_list()) {
            let missing = match self.value(model, id, &field.name) {
                None | Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            };
            if missing {
                return Err(Rejection::new(
                    &field.name,
                    format!("Missing required value for the field '{}'", field.name),
                ));
            }
        }

        Ok(id)
    }

    /// Id of an existing relation target.
    fn resolve(&self, model: &str, target: &RecordRef, field: &str) -> Result<RecordId, Rejection> {
        match target {
            RecordRef::Id(id) if self.exists(model, *id) => Ok(*id),
            RecordRef::Id(id) => Err(Rejection::new(
                field,
                format!("record {model}({id}) does not exist"),
            )),
            RecordRef::ExternalId(xmlid) => self.resolve_xmlid(model, xmlid).ok_or_else(|| {
                Rejection::new(
                    field,
                    format!("No matching record found for external id '{xmlid}' in field '{field}'"),
                )
            }),
            RecordRef::New => Err(Rejection::new(field, "relation target has no identifier")),
        }
    }

    fn serialize(&self, model: &str, id: RecordId, tree: &DictTree) -> PatternResult<serde_json::Value> {
        let schema = self.schema(model)?;
        let row = self.get(model, id).ok_or_else(|| PatternError::Load {
            message: format!("record {model}({id}) does not exist"),
        })?;

        let mut out = serde_json::Map::new();
        for (name, node) in tree.entries() {
            let value = match name {
                EXTERNAL_ID => self
                    .xmlid_of(model, id)
                    .map(serde_json::Value::from)
                    .unwrap_or(serde_json::Value::Null),
                DATABASE_ID => serde_json::Value::from(id),
                _ => {
                    let field = schema.field(name).ok_or_else(|| {
                        PatternError::config(format!("model '{model}' has no field '{name}'"))
                    })?;
                    match (&field.data_type, node) {
                        (DataType::One2Many { comodel, .. }, _) => {
                            self.serialize_many(comodel, self.children(model, id, name), node)?
                        }
                        (DataType::Many2Many { comodel }, _) => {
                            self.serialize_many(comodel, self.linked(model, id, name), node)?
                        }
                        (DataType::Many2One { comodel }, DictNode::SubTree(sub)) => {
                            match row.get(name).and_then(serde_json::Value::as_i64) {
                                Some(target) => self.serialize(comodel, target, sub)?,
                                None => serde_json::Value::Null,
                            }
                        }
                        _ => row.get(name).cloned().unwrap_or(serde_json::Value::Null),
                    }
                }
            };
            out.insert(name.to_string(), value);
        }
        Ok(serde_json::Value::Object(out))
    }

    fn serialize_many(
        &self,
        comodel: &str,
        ids: Vec<RecordId>,
        node: &DictNode,
    ) -> PatternResult<serde_json::Value> {
        match node {
            DictNode::Leaf => Ok(serde_json::Value::from(ids)),
            DictNode::SubTree(sub) => ids
                .into_iter()
                .map(|id| self.serialize(comodel, id, sub))
                .collect::<PatternResult<Vec<_>>>()
                .map(serde_json::Value::Array),
        }
    }
}

impl RecordLookup for MemoryStore {
    fn search_eq(&self, model: &str, field: &str, value: &Value) -> PatternResult<Vec<RecordId>> {
        self.schema(model)?;
        Ok(self
            .tables
            .get(model)
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, row)| row.get(field).is_some_and(|stored| loosely_equal(stored, value)))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl BulkLoader for MemoryStore {
    /// Each record is applied with an undo log; a rejected record (children
    /// included) is rolled back before the next one is written.
    fn load(&mut self, context: &LoadContext, batch: &LoadBatch) -> PatternResult<LoadResult> {
        if self.schemas.get(&batch.model).is_none() {
            return Err(PatternError::Load {
                message: format!("no schema registered for model '{}'", batch.model),
            });
        }

        let mut result = LoadResult::default();
        for record in &batch.records {
            let mut log = UndoLog::default();
            match self.apply(&batch.model, record, None, &mut log) {
                Ok(id) => result.ids.push(id),
                Err(rejection) => {
                    self.rollback(log);
                    warn!(row = record.row, field = rejection.field.as_str(), message = %rejection.message, "record rejected");
                    result
                        .messages
                        .push(LoadMessage::error(record.row, rejection.field, rejection.message));
                }
            }
        }

        info!(
            pattern = context.pattern_id.as_str(),
            model = batch.model.as_str(),
            loaded = result.ids.len(),
            rejected = result.messages.len(),
            "bulk load finished"
        );
        Ok(result)
    }
}

impl RecordSerializer for MemoryStore {
    fn to_tree(
        &self,
        model: &str,
        id: RecordId,
        tree: &DictTree,
    ) -> PatternResult<serde_json::Value> {
        self.serialize(model, id, tree)
    }
}

impl RecordSource for MemoryStore {
    fn search_domain(&self, model: &str, domain: &str) -> PatternResult<Vec<RecordId>> {
        self.schema(model)?;
        let clauses: Vec<(String, String, serde_json::Value)> = serde_json::from_str(domain)?;
        for (_, operator, _) in &clauses {
            if !matches!(operator.as_str(), "=" | "!=" | "in") {
                return Err(PatternError::config(format!(
                    "unsupported domain operator '{operator}'"
                )));
            }
        }

        Ok(self
            .ids(model)
            .into_iter()
            .filter(|id| {
                clauses
                    .iter()
                    .all(|(field, operator, wanted)| self.clause_holds(model, *id, field, operator, wanted))
            })
            .collect())
    }
}

impl MemoryStore {
    fn clause_holds(
        &self,
        model: &str,
        id: RecordId,
        field: &str,
        operator: &str,
        wanted: &serde_json::Value,
    ) -> bool {
        let stored = match field {
            DATABASE_ID => serde_json::Value::from(id),
            EXTERNAL_ID => self
                .xmlid_of(model, id)
                .map(serde_json::Value::from)
                .unwrap_or(serde_json::Value::Null),
            _ => self
                .value(model, id, field)
                .cloned()
                .unwrap_or(serde_json::Value::Null),
        };
        let equals = |wanted: &serde_json::Value| match Value::from_json(wanted) {
            Some(Value::Null) => stored.is_null(),
            Some(value) => loosely_equal(&stored, &value),
            None => false,
        };
        match operator {
            "=" => equals(wanted),
            "!=" => !equals(wanted),
            _ => wanted
                .as_array()
                .is_some_and(|items| items.iter().any(|item| equals(item))),
        }
    }
}

/// Writes of the record being applied, in order.
#[derive(Debug, Default)]
struct UndoLog(Vec<Undo>);

impl UndoLog {
    fn push(&mut self, undo: Undo) {
        self.0.push(undo);
    }
}

#[derive(Debug)]
enum Undo {
    Inserted {
        model: String,
        id: RecordId,
    },
    Field {
        model: String,
        id: RecordId,
        field: String,
        previous: Option<serde_json::Value>,
    },
    Removed {
        model: String,
        id: RecordId,
        row: Row,
        xmlids: Vec<String>,
    },
    XmlId(String),
}

/// A row-level load failure.
#[derive(Debug)]
struct Rejection {
    field: String,
    message: String,
}

impl Rejection {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Equality between a stored JSON scalar and a cell, tolerant of the cell type a
/// codec produced (`5` vs `5.0` vs `"5"`). Text is compared as written; stored
/// numbers also match cells holding the same number.
fn loosely_equal(stored: &serde_json::Value, value: &Value) -> bool {
    match Value::from_json(stored) {
        Some(Value::Null) | None => false,
        Some(stored) => {
            stored == *value
                || stored.to_string() == value.to_string()
                || matches!(stored, Value::Int64(_) | Value::Float64(_))
                    && number(&stored).is_some()
                    && number(&stored) == number(value)
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int64(i) => Some(*i as f64),
        Value::Float64(f) => Some(*f),
        Value::Utf8(s) => s.trim().parse().ok(),
        Value::Null | Value::Bool(_) => None,
    }
}

/// Convert a cell to the stored JSON form of a scalar field.
fn coerce(data_type: &DataType, value: &Value) -> Result<serde_json::Value, String> {
    let invalid = |kind: &str| format!("'{value}' is not a valid {kind}");
    match (data_type, value) {
        (_, Value::Null) => Ok(serde_json::Value::Null),
        (DataType::Utf8, _) => Ok(serde_json::Value::String(value.to_string())),
        (DataType::Int64, _) => value
            .as_i64()
            .map(serde_json::Value::from)
            .ok_or_else(|| invalid("integer")),
        (DataType::Float64, Value::Int64(i)) => Ok(serde_json::Value::from(*i as f64)),
        (DataType::Float64, Value::Float64(f)) => Ok(serde_json::Value::from(*f)),
        (DataType::Float64, Value::Utf8(s)) => s
            .trim()
            .parse::<f64>()
            .map(serde_json::Value::from)
            .map_err(|_| invalid("number")),
        (DataType::Bool, Value::Bool(b)) => Ok(serde_json::Value::Bool(*b)),
        (DataType::Bool, Value::Int64(i @ (0 | 1))) => Ok(serde_json::Value::Bool(*i == 1)),
        (DataType::Bool, Value::Utf8(s)) => parse_bool_str(s)
            .map(serde_json::Value::Bool)
            .ok_or_else(|| invalid("boolean (true/false/1/0/yes/no)")),
        _ => Err(invalid("value for this field")),
    }
}

fn parse_bool_str(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}
