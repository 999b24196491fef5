//! Export side of the engine: pattern → headers, record tree → [`FlatRow`].

use tracing::trace;

use crate::error::PatternResult;
use crate::types::Value;

use super::path::{self, Segment, COLUMN_SEPARATOR};
use super::tree::cycle_error;
use super::{ExportLine, PatternId, PatternRegistry};

/// Ordered mapping from flat header to cell value ("flatty" format).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    cells: Vec<(String, Value)>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cells: Vec::with_capacity(capacity),
        }
    }

    /// Set a cell, replacing the value of an existing header in place.
    pub fn insert(&mut self, header: impl Into<String>, value: Value) {
        let header = header.into();
        match self.cells.iter_mut().find(|(h, _)| *h == header) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((header, value)),
        }
    }

    pub fn get(&self, header: &str) -> Option<&Value> {
        self.cells.iter().find(|(h, _)| h == header).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(h, _)| h.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.cells.iter().map(|(h, v)| (h.as_str(), v))
    }

    /// Cell values in header order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.cells.iter().map(|(_, v)| v)
    }

    /// Pair a sheet row with its headers; missing trailing cells read as `Null`.
    pub fn from_sheet_row(headers: &[String], row: &[Value]) -> Self {
        headers
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.clone(), row.get(idx).cloned().unwrap_or(Value::Null)))
            .collect()
    }
}

impl FromIterator<(String, Value)> for FlatRow {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut row = FlatRow::new();
        for (header, value) in iter {
            row.insert(header, value);
        }
        row
    }
}

/// Expand a pattern into its concrete flat headers, in column order.
///
/// A line with `occurrences = n` yields one group of headers per slot (`field|1|...`
/// up to `field|n|...`); a sub-pattern line yields every header of the sub-pattern
/// under its own path.
pub fn headers(patterns: &PatternRegistry, id: &str) -> PatternResult<Vec<String>> {
    let mut visiting = Vec::new();
    pattern_headers(patterns, id, &mut visiting)
}

fn pattern_headers(
    patterns: &PatternRegistry,
    id: &str,
    visiting: &mut Vec<PatternId>,
) -> PatternResult<Vec<String>> {
    if visiting.iter().any(|v| v == id) {
        return Err(cycle_error(visiting, id));
    }
    let pattern = patterns.get(id)?;
    visiting.push(pattern.id.clone());

    let mut out = Vec::new();
    for line in &pattern.lines {
        out.extend(line_headers(patterns, line, visiting)?);
    }

    visiting.pop();
    Ok(out)
}

fn line_headers(
    patterns: &PatternRegistry,
    line: &ExportLine,
    visiting: &mut Vec<PatternId>,
) -> PatternResult<Vec<String>> {
    let segments = line.segments()?;
    let suffixes = match &line.sub_pattern {
        Some(sub) => pattern_headers(patterns, sub, visiting)?,
        None => vec![String::new()],
    };

    let Some((first, rest)) = segments.split_first() else {
        return Ok(Vec::new());
    };
    let heads: Vec<Segment> = match line.occurrences {
        Some(count) => (1..=count).map(|i| Segment::field(*first).at(i)).collect(),
        None => vec![Segment::field(*first)],
    };

    let mut out = Vec::with_capacity(heads.len() * suffixes.len());
    for head in heads {
        let mut path_segments = Vec::with_capacity(segments.len());
        path_segments.push(head);
        path_segments.extend(rest.iter().map(|s| Segment::field(*s)));
        let base = path::build(&path_segments);
        for suffix in &suffixes {
            if suffix.is_empty() {
                out.push(base.clone());
            } else {
                out.push(format!("{base}{COLUMN_SEPARATOR}{suffix}"));
            }
        }
    }
    Ok(out)
}

/// Flatten one serialized record into a [`FlatRow`] with exactly one cell per header.
///
/// Headers that cannot be walked in `record` (missing key, occurrence out of range,
/// stepping into a scalar, ending on a list or object) become `Null` cells.
pub fn flatten(record: &serde_json::Value, headers: &[String]) -> FlatRow {
    let mut row = FlatRow::with_capacity(headers.len());
    for header in headers {
        let value = walk(record, &path::parse(header)).unwrap_or_else(|| {
            trace!(header = header.as_str(), "mapping gap, exporting null");
            Value::Null
        });
        row.insert(header.clone(), value);
    }
    row
}

fn walk(record: &serde_json::Value, segments: &[Segment]) -> Option<Value> {
    let mut current = record;
    for segment in segments {
        current = current.as_object()?.get(&segment.name)?;
        if segment.occurrence.is_some() {
            current = current.as_array()?.get(segment.index()?)?;
        }
    }
    Value::from_json(current)
}
