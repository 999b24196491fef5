//! Aggregation of bulk-load messages into import diagnostics.
//!
//! The loader reports one [`LoadMessage`] per problem and row. [`summarize`] turns
//! them into counts plus a readable report, [`finalize`] turns a whole load result
//! into either a success text or a blocking [`PatternError::ImportFailed`], and
//! [`RowAnnotations`] / [`annotate`] write the messages back next to the rows that
//! caused them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PatternError, PatternResult};
use crate::store::LoadResult;
use crate::types::{Sheet, Value};

/// Header of the appended error column in annotated files.
pub const ERRORS_HEADER: &str = "Errors";

/// Header of the appended warning column in annotated files.
pub const WARNINGS_HEADER: &str = "Warnings";

/// Spreadsheet line of the first data row (line 1 holds the headers).
pub const FIRST_DATA_LINE: usize = 2;

/// Severity of a load message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    Error,
    Warning,
    Info,
    /// Any other kind a loader may emit; never counted.
    Other(String),
}

impl From<String> for MessageKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "error" => Self::Error,
            "warning" => Self::Warning,
            "info" => Self::Info,
            _ => Self::Other(kind),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
            Self::Info => f.write_str("info"),
            Self::Other(kind) => f.write_str(kind),
        }
    }
}

/// One message emitted while loading a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadMessage {
    /// Spreadsheet line of the row (see [`FIRST_DATA_LINE`]).
    pub row: usize,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Column or field path the message is about; may be empty.
    #[serde(default)]
    pub field: String,
    pub message: String,
}

impl LoadMessage {
    pub fn new(
        row: usize,
        kind: MessageKind,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            row,
            kind,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn error(row: usize, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(row, MessageKind::Error, field, message)
    }

    pub fn warning(row: usize, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(row, MessageKind::Warning, field, message)
    }
}

/// Counts and detail lines of one load call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub error_count: usize,
    pub warning_count: usize,
    /// One `Line <row>: <kind>, <text>` entry per message, in message order.
    pub details: Vec<String>,
}

impl Diagnostics {
    pub fn has_problem(&self) -> bool {
        self.error_count + self.warning_count > 0
    }

    /// Human-readable report; empty when there is no problem.
    pub fn report(&self) -> String {
        if !self.has_problem() {
            return String::new();
        }
        format!(
            "Several errors have been found, number of errors: {}, number of warnings: {}\nDetail:\n{}",
            self.error_count,
            self.warning_count,
            self.details.join("\n")
        )
    }
}

/// Count errors and warnings. Any other message kind aborts with
/// [`PatternError::MessageKind`].
pub fn summarize(messages: &[LoadMessage]) -> PatternResult<Diagnostics> {
    let mut diagnostics = Diagnostics::default();
    for message in messages {
        diagnostics.details.push(format!(
            "Line {}: {}, {}",
            message.row, message.kind, message.message
        ));
        match message.kind {
            MessageKind::Error => diagnostics.error_count += 1,
            MessageKind::Warning => diagnostics.warning_count += 1,
            MessageKind::Info | MessageKind::Other(_) => {
                return Err(PatternError::MessageKind {
                    kind: message.kind.to_string(),
                });
            }
        }
    }
    Ok(diagnostics)
}

/// Success text for a load result, or [`PatternError::ImportFailed`] carrying the
/// report as soon as any error or warning was emitted.
///
/// Rows loaded before a failing row may already be written; a failure here does not
/// mean nothing was imported.
pub fn finalize(result: &LoadResult) -> PatternResult<String> {
    let info = format!(
        "Number of records imported {}\ndetails {:?}",
        result.ids.len(),
        result.ids
    );
    let diagnostics = summarize(&result.messages)?;
    if diagnostics.has_problem() {
        return Err(PatternError::ImportFailed {
            report: diagnostics.report(),
        });
    }
    Ok(info)
}

/// Error and warning text per spreadsheet line; several messages of one line are
/// joined with a newline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowAnnotations {
    errors: BTreeMap<usize, String>,
    warnings: BTreeMap<usize, String>,
}

impl RowAnnotations {
    /// Group messages by line. Kinds other than error/warning are ignored here;
    /// [`summarize`] is where they are rejected.
    pub fn from_messages(messages: &[LoadMessage]) -> Self {
        let mut out = Self::default();
        for message in messages {
            let target = match message.kind {
                MessageKind::Error => &mut out.errors,
                MessageKind::Warning => &mut out.warnings,
                _ => continue,
            };
            target
                .entry(message.row)
                .and_modify(|text| {
                    text.push('\n');
                    text.push_str(&message.message);
                })
                .or_insert_with(|| message.message.clone());
        }
        out
    }

    pub fn errors_for(&self, row: usize) -> Option<&str> {
        self.errors.get(&row).map(String::as_str)
    }

    pub fn warnings_for(&self, row: usize) -> Option<&str> {
        self.warnings.get(&row).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Copy of `sheet` with trailing [`ERRORS_HEADER`] and [`WARNINGS_HEADER`] columns.
///
/// Annotation columns already present (a re-imported annotated file) are replaced.
/// Rows are matched to messages by line, counting from [`Sheet::first_data_line`].
pub fn annotate(sheet: &Sheet, annotations: &RowAnnotations) -> Sheet {
    let keep: Vec<usize> = sheet
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.as_str() != ERRORS_HEADER && h.as_str() != WARNINGS_HEADER)
        .map(|(idx, _)| idx)
        .collect();

    let mut headers: Vec<String> = keep.iter().map(|&idx| sheet.headers[idx].clone()).collect();
    headers.push(ERRORS_HEADER.to_string());
    headers.push(WARNINGS_HEADER.to_string());

    let rows = sheet
        .rows
        .iter()
        .enumerate()
        .map(|(idx0, row)| {
            let line = idx0 + sheet.first_data_line();
            let mut out: Vec<Value> = keep
                .iter()
                .map(|&idx| row.get(idx).cloned().unwrap_or(Value::Null))
                .collect();
            out.push(text_cell(annotations.errors_for(line)));
            out.push(text_cell(annotations.warnings_for(line)));
            out
        })
        .collect();

    Sheet {
        title: sheet.title.clone(),
        headers,
        rows,
        skipped_lines: 0,
    }
}

fn text_cell(text: Option<&str>) -> Value {
    text.map(Value::from).unwrap_or(Value::Null)
}
