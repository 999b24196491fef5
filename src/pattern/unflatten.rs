//! Import side of the engine: flat rows → nested [`LoadBatch`].
//!
//! Each row is re-nested by parsing its headers, then walked against the model
//! schemas: identifier columns pick the target record, relation columns become
//! [`FieldUpdate`]s. A row that cannot be mapped is reported as an error message on
//! its spreadsheet line and left out of the batch; the other rows are unaffected.
//!
//! A blank cell in a scalar column clears the field. Blank identifiers, blank
//! relations and blank occurrence slots are left out.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::diagnostics::{LoadMessage, ERRORS_HEADER, FIRST_DATA_LINE, WARNINGS_HEADER};
use crate::error::{PatternError, PatternResult};
use crate::store::{FieldUpdate, LoadBatch, LoadRecord, M2mCommand, RecordLookup, RecordRef};
use crate::types::{DataType, Field, SchemaRegistry, Value};

use super::flatten::FlatRow;
use super::lookup::resolve_key;
use super::path::{self, Segment, COLUMN_SEPARATOR, DATABASE_ID, EXTERNAL_ID, KEY_SUFFIX};
use super::Pattern;

/// Options for import runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Add imported many2many targets to the existing set instead of replacing it.
    pub update_many2many: bool,
}

/// Builds load batches from flat rows.
pub struct Unflattener<'a> {
    schemas: &'a SchemaRegistry,
    lookup: &'a dyn RecordLookup,
    options: &'a ImportOptions,
    first_line: usize,
}

impl<'a> Unflattener<'a> {
    pub fn new(
        schemas: &'a SchemaRegistry,
        lookup: &'a dyn RecordLookup,
        options: &'a ImportOptions,
    ) -> Self {
        Self {
            schemas,
            lookup,
            options,
            first_line: FIRST_DATA_LINE,
        }
    }

    /// Spreadsheet line of the first row, for sheets whose header is not on line 1.
    pub fn with_first_line(mut self, line: usize) -> Self {
        self.first_line = line;
        self
    }

    /// Nest every row for `pattern.model`.
    ///
    /// Fails only when the model has no schema or the lookup collaborator fails;
    /// row-level problems end up in [`LoadBatch::messages`]. Rows without any
    /// non-null cell are skipped silently. Line numbers count from
    /// [`FIRST_DATA_LINE`] unless [`Self::with_first_line`] says otherwise.
    pub fn unflatten(&self, rows: &[FlatRow], pattern: &Pattern) -> PatternResult<LoadBatch> {
        if self.schemas.get(&pattern.model).is_none() {
            return Err(PatternError::config(format!(
                "no schema registered for model '{}'",
                pattern.model
            )));
        }

        let mut batch = LoadBatch::new(&pattern.model);
        for (idx0, row) in rows.iter().enumerate() {
            let line = idx0 + self.first_line;
            match self.unflatten_row(line, row, &pattern.model) {
                Ok(Some(record)) => batch.records.push(record),
                Ok(None) => debug!(line, "skipping empty row"),
                Err(RowError::Row { field, message }) => {
                    warn!(line, field = field.as_str(), %message, "row rejected");
                    batch.messages.push(LoadMessage::error(line, field, message));
                }
                Err(RowError::Fatal(err)) => return Err(err),
            }
        }

        debug!(
            model = pattern.model.as_str(),
            records = batch.records.len(),
            rejected = batch.messages.len(),
            "unflattened rows"
        );
        Ok(batch)
    }

    fn unflatten_row(
        &self,
        line: usize,
        row: &FlatRow,
        model: &str,
    ) -> Result<Option<LoadRecord>, RowError> {
        let mut root = Object::default();
        for (header, value) in row.iter() {
            if header == ERRORS_HEADER || header == WARNINGS_HEADER {
                continue;
            }
            root.insert(header, &path::parse(header), value)?;
        }
        if root.is_blank() {
            return Ok(None);
        }
        self.build_record(line, model, &root, "").map(Some)
    }

    fn build_record(
        &self,
        line: usize,
        model: &str,
        object: &Object,
        prefix: &str,
    ) -> Result<LoadRecord, RowError> {
        let schema = self.schemas.get(model).ok_or_else(|| {
            RowError::row(prefix, format!("no schema registered for model '{model}'"))
        })?;

        let mut reference: Option<(RecordRef, String)> = None;
        let mut values = Vec::new();
        for (key, node) in &object.entries {
            let column = join(prefix, &key.header());
            if node.is_blank() && key.is_identifier() {
                continue;
            }
            if let Some(found) = self.identifier(model, key, node, &column)? {
                if let Some((_, first)) = &reference {
                    return Err(RowError::row(
                        &column,
                        format!("record is identified twice ('{first}' and '{column}')"),
                    ));
                }
                reference = Some((found, column));
                continue;
            }
            let field = schema.field(&key.name).ok_or_else(|| {
                RowError::row(&column, format!("model '{model}' has no field '{}'", key.name))
            })?;
            if node.is_blank() && field.data_type.is_relational() {
                continue;
            }
            values.push((key.name.clone(), self.field_update(line, field, node, &column)?));
        }

        Ok(LoadRecord {
            row: line,
            reference: reference.map(|(r, _)| r).unwrap_or(RecordRef::New),
            values,
        })
    }

    /// The record reference carried by an `id`, `.id` or `field#key` entry; `None`
    /// for ordinary fields.
    fn identifier(
        &self,
        model: &str,
        key: &Key,
        node: &Node,
        column: &str,
    ) -> Result<Option<RecordRef>, RowError> {
        if key.key_lookup {
            let value = node.cell(column)?;
            return self.lookup_key(model, &key.name, value, column).map(Some);
        }
        match key.name.as_str() {
            EXTERNAL_ID => {
                let value = node.cell(column)?;
                let xmlid = value.to_string();
                if xmlid.trim().is_empty() {
                    return Err(RowError::row(column, "external id is empty"));
                }
                Ok(Some(RecordRef::ExternalId(xmlid)))
            }
            DATABASE_ID => {
                let value = node.cell(column)?;
                value.as_i64().map(|id| Some(RecordRef::Id(id))).ok_or_else(|| {
                    RowError::row(column, format!("'{value}' is not a valid database id"))
                })
            }
            _ => Ok(None),
        }
    }

    fn field_update(
        &self,
        line: usize,
        field: &Field,
        node: &Node,
        column: &str,
    ) -> Result<FieldUpdate, RowError> {
        match &field.data_type {
            DataType::Many2One { comodel } => {
                let object = node.object(column)?;
                Ok(FieldUpdate::Link(self.single_reference(comodel, object, column)?))
            }
            DataType::One2Many {
                comodel,
                prune_unlisted,
                ..
            } => {
                let mut records = Vec::new();
                for (slot, object) in node.filled_slots(column)? {
                    let slot_column = join_slot(column, slot);
                    records.push(self.build_record(line, comodel, object, &slot_column)?);
                }
                Ok(FieldUpdate::Children {
                    records,
                    prune_unlisted: *prune_unlisted,
                })
            }
            DataType::Many2Many { comodel } => {
                let mut targets = Vec::new();
                for (slot, object) in node.filled_slots(column)? {
                    let slot_column = join_slot(column, slot);
                    targets.push(self.single_reference(comodel, object, &slot_column)?);
                }
                let command = if self.options.update_many2many {
                    M2mCommand::Link(targets)
                } else {
                    M2mCommand::Replace(targets)
                };
                Ok(FieldUpdate::Many2Many(command))
            }
            DataType::Int64 | DataType::Float64 | DataType::Bool | DataType::Utf8 => {
                Ok(FieldUpdate::Set(node.cell(column)?.clone()))
            }
        }
    }

    /// Resolve a relation target given by exactly one sub-field: an identifier, or
    /// any other field used as a lookup key on `comodel`.
    fn single_reference(
        &self,
        comodel: &str,
        object: &Object,
        column: &str,
    ) -> Result<RecordRef, RowError> {
        let filled: Vec<&(Key, Node)> = object
            .entries
            .iter()
            .filter(|(_, node)| !node.is_blank())
            .collect();
        let [entry] = filled.as_slice() else {
            let names: Vec<String> = filled.iter().map(|(k, _)| k.header()).collect();
            return Err(RowError::row(
                column,
                format!(
                    "a relation must be identified by a single sub-field, got {}",
                    names.join(", ")
                ),
            ));
        };
        let (key, node) = *entry;
        let sub_column = join(column, &key.header());
        if let Some(reference) = self.identifier(comodel, key, node, &sub_column)? {
            return Ok(reference);
        }
        let value = node.cell(&sub_column)?;
        self.lookup_key(comodel, &key.name, value, &sub_column)
    }

    fn lookup_key(
        &self,
        model: &str,
        field: &str,
        value: &Value,
        column: &str,
    ) -> Result<RecordRef, RowError> {
        resolve_key(self.lookup, model, field, value)?
            .into_id(model, field, value)
            .map(RecordRef::Id)
            .map_err(|err| RowError::row(column, err.to_string()))
    }
}

/// Why a row could not be nested. `Fatal` aborts the whole batch.
enum RowError {
    Row { field: String, message: String },
    Fatal(PatternError),
}

impl RowError {
    fn row(field: &str, message: impl Into<String>) -> Self {
        Self::Row {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<PatternError> for RowError {
    fn from(err: PatternError) -> Self {
        Self::Fatal(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Key {
    name: String,
    key_lookup: bool,
}

impl Key {
    fn header(&self) -> String {
        if self.key_lookup {
            format!("{}{KEY_SUFFIX}", self.name)
        } else {
            self.name.clone()
        }
    }

    fn is_identifier(&self) -> bool {
        self.key_lookup || self.name == EXTERNAL_ID || self.name == DATABASE_ID
    }
}

/// Row content re-nested by header path.
#[derive(Debug)]
enum Node {
    Cell(Value),
    Object(Object),
    /// Occurrence slots by 1-based position.
    Slots(BTreeMap<usize, Object>),
}

impl Node {
    /// True when every cell below this node is empty.
    fn is_blank(&self) -> bool {
        match self {
            Node::Cell(value) => value.is_null(),
            Node::Object(object) => object.is_blank(),
            Node::Slots(slots) => slots.values().all(Object::is_blank),
        }
    }

    fn cell(&self, column: &str) -> Result<&Value, RowError> {
        match self {
            Node::Cell(value) => Ok(value),
            _ => Err(RowError::row(column, "expected a single value, not sub-fields")),
        }
    }

    fn object(&self, column: &str) -> Result<&Object, RowError> {
        match self {
            Node::Object(object) => Ok(object),
            Node::Cell(_) => Err(RowError::row(
                column,
                format!("relation needs a sub-field such as '{column}{COLUMN_SEPARATOR}{EXTERNAL_ID}'"),
            )),
            Node::Slots(_) => Err(RowError::row(column, "single relation cannot have occurrences")),
        }
    }

    /// Non-blank occurrence slots in order. A plain object counts as a single slot.
    fn filled_slots(&self, column: &str) -> Result<Vec<(Option<usize>, &Object)>, RowError> {
        match self {
            Node::Slots(slots) => Ok(slots
                .iter()
                .filter(|(_, obj)| !obj.is_blank())
                .map(|(o, obj)| (Some(*o), obj))
                .collect()),
            Node::Object(object) => Ok(vec![(None, object)]),
            Node::Cell(_) => Err(RowError::row(
                column,
                format!("relation needs a sub-field such as '{column}{COLUMN_SEPARATOR}1{COLUMN_SEPARATOR}{EXTERNAL_ID}'"),
            )),
        }
    }
}

#[derive(Debug, Default)]
struct Object {
    entries: Vec<(Key, Node)>,
}

impl Object {
    fn is_blank(&self) -> bool {
        self.entries.iter().all(|(_, node)| node.is_blank())
    }

    fn insert(&mut self, header: &str, segments: &[Segment], value: &Value) -> Result<(), RowError> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };
        let key = Key {
            name: first.name.clone(),
            key_lookup: first.key_lookup,
        };
        let position = match self.entries.iter().position(|(k, _)| *k == key) {
            Some(position) => position,
            None => {
                let node = match (first.occurrence, rest.is_empty()) {
                    (Some(_), _) => Node::Slots(BTreeMap::new()),
                    (None, true) => Node::Cell(Value::Null),
                    (None, false) => Node::Object(Object::default()),
                };
                self.entries.push((key, node));
                self.entries.len() - 1
            }
        };

        let conflict = || RowError::row(header, "column conflicts with another column of the row");
        match (&mut self.entries[position].1, first.occurrence) {
            (Node::Slots(slots), Some(occurrence)) => {
                if occurrence == 0 {
                    return Err(RowError::row(header, "occurrences start at 1"));
                }
                if rest.is_empty() {
                    return Err(RowError::row(
                        header,
                        "occurrence column needs a sub-field",
                    ));
                }
                slots.entry(occurrence).or_default().insert(header, rest, value)
            }
            (Node::Object(object), None) if !rest.is_empty() => object.insert(header, rest, value),
            (Node::Cell(cell), None) if rest.is_empty() && cell.is_null() => {
                *cell = value.clone();
                Ok(())
            }
            _ => Err(conflict()),
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{COLUMN_SEPARATOR}{name}")
    }
}

fn join_slot(column: &str, slot: Option<usize>) -> String {
    match slot {
        Some(occurrence) => format!("{column}{COLUMN_SEPARATOR}{occurrence}"),
        None => column.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::ExportLine;
    use crate::types::{RecordId, Schema};

    struct NoMatches;

    impl RecordLookup for NoMatches {
        fn search_eq(&self, _: &str, _: &str, _: &Value) -> PatternResult<Vec<RecordId>> {
            Ok(Vec::new())
        }
    }

    fn schemas() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(Schema::new(
                "res.partner",
                vec![
                    Field::new("name", DataType::Utf8),
                    Field::many2one("country_id", "res.country"),
                    Field::one2many("child_ids", "res.partner", "parent_id"),
                    Field::many2one("parent_id", "res.partner"),
                    Field::many2many("category_id", "res.partner.category"),
                ],
            ))
            .with(Schema::new("res.country", vec![Field::new("code", DataType::Utf8)]))
            .with(Schema::new(
                "res.partner.category",
                vec![Field::new("name", DataType::Utf8)],
            ))
    }

    fn pattern() -> Pattern {
        Pattern::new("p", "Partners", "res.partner", vec![ExportLine::new("name")])
    }

    fn row(cells: &[(&str, Value)]) -> FlatRow {
        cells.iter().map(|(h, v)| (h.to_string(), v.clone())).collect()
    }

    #[test]
    fn nests_occurrences_and_drops_blank_slots() {
        let schemas = schemas();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options);
        let rows = [row(&[
            ("id", "p1".into()),
            ("name", "Parent".into()),
            ("child_ids|2|name", "Second".into()),
            ("child_ids|1|name", "First".into()),
            ("child_ids|3|name", Value::Null),
        ])];

        let batch = engine.unflatten(&rows, &pattern()).unwrap();
        assert!(batch.messages.is_empty());
        let record = &batch.records[0];
        assert_eq!(record.row, 2);
        assert_eq!(record.reference, RecordRef::ExternalId("p1".into()));

        let Some(FieldUpdate::Children { records, prune_unlisted }) = record.get("child_ids")
        else {
            panic!("expected children");
        };
        assert!(*prune_unlisted);
        let names: Vec<_> = records.iter().map(|r| r.get("name").cloned()).collect();
        assert_eq!(
            names,
            [
                Some(FieldUpdate::Set("First".into())),
                Some(FieldUpdate::Set("Second".into()))
            ]
        );
    }

    #[test]
    fn blank_scalars_clear_and_blank_references_are_left_out() {
        let schemas = schemas();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options);
        let rows = [
            row(&[
                ("id", "p1".into()),
                ("name", Value::Null),
                ("country_id|code", Value::Null),
                ("category_id|1|id", Value::Null),
                ("child_ids|1|name", Value::Null),
            ]),
            row(&[(".id", Value::Null), ("name", "New".into())]),
        ];

        let batch = engine.unflatten(&rows, &pattern()).unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.records[0].reference, RecordRef::ExternalId("p1".into()));
        assert_eq!(
            batch.records[0].values,
            [("name".to_string(), FieldUpdate::Set(Value::Null))]
        );
        assert_eq!(batch.records[1].reference, RecordRef::New);
    }

    #[test]
    fn relation_sub_fields_ignore_blank_siblings() {
        let schemas = schemas();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options);
        let rows = [row(&[
            ("name", "A".into()),
            ("parent_id|id", "p0".into()),
            ("parent_id|name", Value::Null),
        ])];

        let batch = engine.unflatten(&rows, &pattern()).unwrap();
        assert_eq!(
            batch.records[0].get("parent_id"),
            Some(&FieldUpdate::Link(RecordRef::ExternalId("p0".into())))
        );
    }

    #[test]
    fn first_line_shifts_reported_lines() {
        let schemas = schemas();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options).with_first_line(5);
        let rows = [
            row(&[("name", "ok".into())]),
            row(&[("name", "bad".into()), ("country_id|code", "ZZ".into())]),
        ];

        let batch = engine.unflatten(&rows, &pattern()).unwrap();
        assert_eq!(batch.records[0].row, 5);
        assert_eq!(batch.messages[0].row, 6);
    }

    #[test]
    fn many2many_mode_is_chosen_by_options() {
        let schemas = schemas();
        let rows = [row(&[("category_id|1|id", "cat_a".into())])];

        let replace = ImportOptions::default();
        let batch = Unflattener::new(&schemas, &NoMatches, &replace)
            .unflatten(&rows, &pattern())
            .unwrap();
        assert_eq!(
            batch.records[0].get("category_id"),
            Some(&FieldUpdate::Many2Many(M2mCommand::Replace(vec![
                RecordRef::ExternalId("cat_a".into())
            ])))
        );

        let link = ImportOptions {
            update_many2many: true,
        };
        let batch = Unflattener::new(&schemas, &NoMatches, &link)
            .unflatten(&rows, &pattern())
            .unwrap();
        assert!(matches!(
            batch.records[0].get("category_id"),
            Some(FieldUpdate::Many2Many(M2mCommand::Link(_)))
        ));
    }

    #[test]
    fn failed_lookup_rejects_only_that_row() {
        let schemas = schemas();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options);
        let rows = [
            row(&[("name", "ok".into())]),
            row(&[("name", "bad".into()), ("country_id|code", "ZZ".into())]),
        ];

        let batch = engine.unflatten(&rows, &pattern()).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].row, 3);
        assert_eq!(batch.messages[0].field, "country_id|code");
        assert!(batch.messages[0].message.starts_with("No record matched"));
    }

    #[test]
    fn malformed_rows_become_messages() {
        let schemas = schemas();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options);
        let rows = [
            row(&[("nickname", "x".into())]),
            row(&[(".id", "abc".into())]),
            row(&[("id", "a".into()), (".id", Value::Int64(3))]),
            row(&[("country_id", "FR".into())]),
            row(&[("category_id|1|id", "a".into()), ("category_id|1|name", "b".into())]),
        ];

        let batch = engine.unflatten(&rows, &pattern()).unwrap();
        assert!(batch.records.is_empty());
        let lines: Vec<usize> = batch.messages.iter().map(|m| m.row).collect();
        assert_eq!(lines, [2, 3, 4, 5, 6]);
    }

    #[test]
    fn annotation_columns_and_empty_rows_are_ignored() {
        let schemas = schemas();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options);
        let rows = [
            row(&[("name", "A".into()), (ERRORS_HEADER, "old failure".into())]),
            row(&[("name", Value::Null)]),
        ];

        let batch = engine.unflatten(&rows, &pattern()).unwrap();
        assert_eq!(batch.records.len(), 1);
        assert!(batch.messages.is_empty());
    }

    #[test]
    fn unknown_model_fails_the_batch() {
        let schemas = SchemaRegistry::new();
        let options = ImportOptions::default();
        let engine = Unflattener::new(&schemas, &NoMatches, &options);
        assert!(engine.unflatten(&[], &pattern()).is_err());
    }
}
