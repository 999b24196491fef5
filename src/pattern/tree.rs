//! Nested field specification built from a pattern's export lines.
//!
//! Export lines sharing a prefix (`child_ids/id`, `child_ids/name`) merge into one
//! subtree; a line with a sub-pattern embeds the sub-pattern's own tree at its
//! terminal field. The tree drives which fields the serializer emits.

use tracing::debug;

use crate::error::{PatternError, PatternResult};
use crate::types::SchemaRegistry;

use super::path::{DATABASE_ID, EXTERNAL_ID};
use super::{ExportLine, PatternId, PatternRegistry};

/// A tree node: a terminal field, or a relational field with its own fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictNode {
    Leaf,
    SubTree(DictTree),
}

/// Ordered mapping from field name to [`DictNode`]. Order is column order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictTree {
    entries: Vec<(String, DictNode)>,
}

impl DictTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&DictNode> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, node)| node)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &DictNode)> {
        self.entries.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the serializer parser: leaves are field names, subtrees are
    /// `[field, [...]]` pairs, e.g. `["name", ["child_ids", ["name"]]]`.
    pub fn to_parser(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.entries
                .iter()
                .map(|(name, node)| match node {
                    DictNode::Leaf => serde_json::Value::String(name.clone()),
                    DictNode::SubTree(sub) => serde_json::json!([name, sub.to_parser()]),
                })
                .collect(),
        )
    }

    fn position(&self, field: &str) -> Option<usize> {
        self.entries.iter().position(|(name, _)| name == field)
    }

    /// Insert `node` at `segments`, creating intermediate subtrees.
    fn insert_path(&mut self, segments: &[&str], node: DictNode, line: &str) -> PatternResult<()> {
        let Some((first, rest)) = segments.split_first() else {
            return Ok(());
        };

        if rest.is_empty() {
            return self.insert_terminal(first, node, line);
        }

        let idx = match self.position(first) {
            Some(idx) => idx,
            None => {
                self.entries
                    .push((first.to_string(), DictNode::SubTree(DictTree::new())));
                self.entries.len() - 1
            }
        };
        match &mut self.entries[idx].1 {
            DictNode::SubTree(sub) => sub.insert_path(rest, node, line),
            DictNode::Leaf => Err(PatternError::config(format!(
                "export line '{line}' extends '{first}', which another line exports as a terminal field"
            ))),
        }
    }

    fn insert_terminal(&mut self, field: &str, node: DictNode, line: &str) -> PatternResult<()> {
        let Some(idx) = self.position(field) else {
            self.entries.push((field.to_string(), node));
            return Ok(());
        };
        match (&mut self.entries[idx].1, node) {
            (DictNode::Leaf, DictNode::Leaf) => Ok(()),
            (DictNode::SubTree(existing), DictNode::SubTree(incoming)) => {
                existing.merge(incoming, line)
            }
            _ => Err(PatternError::config(format!(
                "export line '{line}' claims '{field}' both as a terminal field and as a relation"
            ))),
        }
    }

    fn merge(&mut self, other: DictTree, line: &str) -> PatternResult<()> {
        for (name, node) in other.entries {
            self.insert_terminal(&name, node, line)?;
        }
        Ok(())
    }
}

/// Builds [`DictTree`]s from patterns, recursing into sub-patterns.
///
/// With schemas attached, lines are also checked against the model fields:
/// intermediate segments must be relations, occurrence counts need a list-valued
/// relation, and sub-patterns need a relation to the sub-pattern's model.
#[derive(Debug, Clone, Copy)]
pub struct DictTreeBuilder<'a> {
    patterns: &'a PatternRegistry,
    schemas: Option<&'a SchemaRegistry>,
}

impl<'a> DictTreeBuilder<'a> {
    pub fn new(patterns: &'a PatternRegistry) -> Self {
        Self {
            patterns,
            schemas: None,
        }
    }

    pub fn with_schemas(mut self, schemas: &'a SchemaRegistry) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Build the tree of the pattern `id`.
    pub fn build(&self, id: &str) -> PatternResult<DictTree> {
        let mut visiting = Vec::new();
        self.build_pattern(id, &mut visiting)
    }

    fn build_pattern(&self, id: &str, visiting: &mut Vec<PatternId>) -> PatternResult<DictTree> {
        if visiting.iter().any(|v| v == id) {
            return Err(cycle_error(visiting, id));
        }
        let pattern = self.patterns.get(id)?;
        visiting.push(pattern.id.clone());

        let mut tree = DictTree::new();
        for line in &pattern.lines {
            let segments = line.segments()?;
            if let Some(schemas) = self.schemas {
                check_line(schemas, self.patterns, &pattern.model, line, &segments)?;
            }
            let node = match &line.sub_pattern {
                Some(sub) => DictNode::SubTree(self.build_pattern(sub, visiting)?),
                None => DictNode::Leaf,
            };
            tree.insert_path(&segments, node, &line.name)?;
        }

        visiting.pop();
        debug!(pattern = id, fields = tree.len(), "built dict tree");
        Ok(tree)
    }
}

pub(crate) fn cycle_error(visiting: &[PatternId], id: &str) -> PatternError {
    let mut chain: Vec<&str> = visiting.iter().map(String::as_str).collect();
    chain.push(id);
    PatternError::config(format!(
        "cyclic sub-pattern reference: {}",
        chain.join(" -> ")
    ))
}

fn check_line(
    schemas: &SchemaRegistry,
    patterns: &PatternRegistry,
    model: &str,
    line: &ExportLine,
    segments: &[&str],
) -> PatternResult<()> {
    let mut current = Some(model.to_string());
    for (pos, segment) in segments.iter().enumerate() {
        let is_terminal = pos + 1 == segments.len();
        if *segment == EXTERNAL_ID || *segment == DATABASE_ID {
            if !is_terminal || line.sub_pattern.is_some() {
                return Err(PatternError::config(format!(
                    "export line '{}': '{segment}' can only be a terminal field",
                    line.name
                )));
            }
            return Ok(());
        }

        // Unknown comodel schemas end the check; the serializer is the authority there.
        let Some(schema) = current.as_deref().and_then(|m| schemas.get(m)) else {
            return Ok(());
        };
        let field = schema.field(segment).ok_or_else(|| {
            PatternError::config(format!(
                "export line '{}': model '{}' has no field '{segment}'",
                line.name, schema.model
            ))
        })?;

        if pos == 0 && line.occurrences.is_some() && !field.data_type.is_list() {
            return Err(PatternError::config(format!(
                "export line '{}': occurrences need a list-valued relation, '{segment}' is not one",
                line.name
            )));
        }
        if field.data_type.is_list() && pos > 0 {
            return Err(PatternError::config(format!(
                "export line '{}': '{segment}' holds several records, only the first field of a line can have occurrences",
                line.name
            )));
        }
        if pos == 0 && line.occurrences.is_none() && field.data_type.is_list() {
            return Err(PatternError::config(format!(
                "export line '{}': '{segment}' holds several records and needs occurrences",
                line.name
            )));
        }
        if !is_terminal && !field.data_type.is_relational() {
            return Err(PatternError::config(format!(
                "export line '{}': '{segment}' is not a relation",
                line.name
            )));
        }
        if is_terminal {
            if let Some(sub) = &line.sub_pattern {
                let comodel = field.data_type.comodel().ok_or_else(|| {
                    PatternError::config(format!(
                        "export line '{}': sub-pattern '{sub}' needs a relational field, '{segment}' is not one",
                        line.name
                    ))
                })?;
                let sub_model = &patterns.get(sub)?.model;
                if sub_model != comodel {
                    return Err(PatternError::config(format!(
                        "export line '{}': sub-pattern '{sub}' exports '{sub_model}' but '{segment}' points to '{comodel}'",
                        line.name
                    )));
                }
            }
        }
        current = field.data_type.comodel().map(str::to_string);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use crate::types::{DataType, Field, Schema};

    fn registry(lines: Vec<ExportLine>) -> PatternRegistry {
        PatternRegistry::new().with(Pattern::new("p", "P", "res.partner", lines))
    }

    #[test]
    fn shared_prefixes_merge_into_one_subtree() {
        let reg = registry(vec![
            ExportLine::new("name"),
            ExportLine::new("child_ids/id"),
            ExportLine::new("child_ids/name"),
            ExportLine::new("parent_id/country_id/code"),
        ]);
        let tree = DictTreeBuilder::new(&reg).build("p").unwrap();

        assert_eq!(tree.len(), 3);
        let Some(DictNode::SubTree(children)) = tree.get("child_ids") else {
            panic!("child_ids should be a subtree");
        };
        assert_eq!(children.entries().map(|(n, _)| n).collect::<Vec<_>>(), ["id", "name"]);
        assert_eq!(
            tree.to_parser(),
            serde_json::json!([
                "name",
                ["child_ids", ["id", "name"]],
                ["parent_id", [["country_id", ["code"]]]]
            ])
        );
    }

    #[test]
    fn sub_pattern_tree_is_embedded_at_the_terminal_field() {
        let reg = registry(vec![
            ExportLine::new("id"),
            ExportLine::new("user_ids").sub_pattern("users").occurrences(3),
        ])
        .with(Pattern::new(
            "users",
            "Users",
            "res.users",
            vec![ExportLine::new("name"), ExportLine::new("company_ids/name")],
        ));

        let tree = DictTreeBuilder::new(&reg).build("p").unwrap();
        assert_eq!(
            tree.to_parser(),
            serde_json::json!(["id", ["user_ids", ["name", ["company_ids", ["name"]]]]])
        );
    }

    #[test]
    fn extending_a_terminal_is_a_configuration_error() {
        let reg = registry(vec![ExportLine::new("child_ids"), ExportLine::new("child_ids/name")]);
        let err = DictTreeBuilder::new(&reg).build("p").unwrap_err();
        assert!(err.to_string().contains("extends 'child_ids'"));

        let reg = registry(vec![ExportLine::new("child_ids/name"), ExportLine::new("child_ids")]);
        assert!(DictTreeBuilder::new(&reg).build("p").is_err());
    }

    #[test]
    fn empty_line_name_is_a_configuration_error() {
        let reg = registry(vec![ExportLine::new("")]);
        assert!(matches!(
            DictTreeBuilder::new(&reg).build("p"),
            Err(PatternError::Configuration { .. })
        ));
    }

    #[test]
    fn cyclic_sub_patterns_are_rejected() {
        let reg = PatternRegistry::new()
            .with(Pattern::new(
                "a",
                "A",
                "res.partner",
                vec![ExportLine::new("child_ids").sub_pattern("b")],
            ))
            .with(Pattern::new(
                "b",
                "B",
                "res.partner",
                vec![ExportLine::new("parent_id").sub_pattern("a")],
            ));
        let err = DictTreeBuilder::new(&reg).build("a").unwrap_err();
        assert!(err.to_string().contains("a -> b -> a"));
    }

    #[test]
    fn schema_check_requires_relations_for_sub_patterns() {
        let schemas = SchemaRegistry::new().with(Schema::new(
            "res.partner",
            vec![
                Field::new("name", DataType::Utf8),
                Field::one2many("child_ids", "res.partner", "parent_id"),
                Field::many2one("parent_id", "res.partner"),
            ],
        ));
        let reg = registry(vec![ExportLine::new("name").sub_pattern("p2")]).with(Pattern::new(
            "p2",
            "P2",
            "res.partner",
            vec![ExportLine::new("name")],
        ));
        let err = DictTreeBuilder::new(&reg)
            .with_schemas(&schemas)
            .build("p")
            .unwrap_err();
        assert!(err.to_string().contains("needs a relational field"));

        let reg = registry(vec![ExportLine::new("parent_id/name").occurrences(2)]);
        let err = DictTreeBuilder::new(&reg)
            .with_schemas(&schemas)
            .build("p")
            .unwrap_err();
        assert!(err.to_string().contains("list-valued relation"));

        let reg = registry(vec![ExportLine::new("child_ids/name").occurrences(2)]);
        assert!(DictTreeBuilder::new(&reg).with_schemas(&schemas).build("p").is_ok());
    }

    #[test]
    fn schema_check_requires_occurrences_for_list_relations() {
        let schemas = SchemaRegistry::new().with(Schema::new(
            "res.partner",
            vec![
                Field::new("name", DataType::Utf8),
                Field::one2many("child_ids", "res.partner", "parent_id"),
                Field::many2one("parent_id", "res.partner"),
                Field::many2many("category_id", "res.partner.category"),
            ],
        ));
        let build = |line: ExportLine| {
            DictTreeBuilder::new(&registry(vec![line]))
                .with_schemas(&schemas)
                .build("p")
        };

        let err = build(ExportLine::new("child_ids/name")).unwrap_err();
        assert!(matches!(err, PatternError::Configuration { .. }));
        assert!(err.to_string().contains("'child_ids' holds several records and needs occurrences"));

        let err = build(ExportLine::new("category_id")).unwrap_err();
        assert!(err.to_string().contains("needs occurrences"));

        let err = build(ExportLine::new("parent_id/child_ids/name")).unwrap_err();
        assert!(err.to_string().contains("only the first field of a line can have occurrences"));

        assert!(build(ExportLine::new("parent_id/name")).is_ok());
        assert!(build(ExportLine::new("category_id/id").occurrences(1)).is_ok());
    }
}
