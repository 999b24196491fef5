//! Export/import jobs driven by a pattern.
//!
//! A [`PatternJob`] ties the registries together and runs the whole pipeline:
//!
//! - export: pattern → [`DictTree`] → serializer → [`flatten`] → codec → [`Attachment`]
//! - import: codec → [`FlatRow`]s → [`Unflattener`] → [`BulkLoader`] → [`finalize`]
//!
//! A failed import is not an `Err`: it returns an [`ImportReport`] with
//! [`ImportStatus::Failed`], the diagnostics text, and the input file annotated with
//! `Errors`/`Warnings` columns. `Err` is kept for jobs that could not run at all.
//!
//! When [`JobOptions::observer`] is set, each call reports `on_success` or
//! `on_failure`, plus `on_alert` at or above [`JobOptions::alert_at_or_above`].
//!
//! ## Example
//!
//! ```rust
//! use pattern_import_export::format::FormatRegistry;
//! use pattern_import_export::job::{ImportStatus, PatternJob};
//! use pattern_import_export::pattern::{ExportLine, Pattern, PatternRegistry};
//! use pattern_import_export::store::MemoryStore;
//! use pattern_import_export::types::{DataType, Field, Schema, SchemaRegistry};
//!
//! # fn main() -> Result<(), pattern_import_export::PatternError> {
//! let schemas = SchemaRegistry::new().with(Schema::new(
//!     "res.partner",
//!     vec![Field::new("name", DataType::Utf8).required()],
//! ));
//! let patterns = PatternRegistry::new().with(
//!     Pattern::new("partners", "Partners", "res.partner", vec![
//!         ExportLine::new("id"),
//!         ExportLine::new("name"),
//!     ])
//!     .with_format("csv"),
//! );
//! let formats = FormatRegistry::with_defaults();
//! let mut store = MemoryStore::new(schemas.clone());
//!
//! let job = PatternJob::new(&patterns, &schemas, &formats);
//! let report = job.import("partners", b"id,name\np1,Wood Corner\n", &mut store)?;
//! assert_eq!(report.status, ImportStatus::Success);
//!
//! let export = job.export("partners", &report.ids, &store)?;
//! assert_eq!(export.name, "Partners.csv");
//! assert_eq!(export.data, b"id,name\np1,Wood Corner\n");
//! # Ok(())
//! # }
//! ```

pub mod observability;
pub mod sync;

use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::diagnostics::{annotate, finalize, summarize, Diagnostics, RowAnnotations};
use crate::error::{PatternError, PatternResult};
use crate::format::{FormatCodec, FormatRegistry};
use crate::pattern::{
    flatten, headers, DictTree, DictTreeBuilder, FlatRow, Pattern, PatternRegistry, Unflattener,
};
use crate::store::{BulkLoader, LoadContext, RecordSerializer, RecordSource};
use crate::types::{RecordId, SchemaRegistry, Sheet, Value};

use observability::{JobContext, JobKind, JobObserver, JobSeverity, JobStats};

pub use crate::pattern::ImportOptions;

/// Options for export runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Worksheet name for formats that have one; the codec default otherwise.
    pub sheet_name: Option<String>,
}

/// Options controlling job behavior.
///
/// Use [`Default`] for common cases.
#[derive(Clone)]
pub struct JobOptions {
    pub import: ImportOptions,
    pub export: ExportOptions,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn JobObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: JobSeverity,
}

impl fmt::Debug for JobOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOptions")
            .field("import", &self.import)
            .field("export", &self.export)
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .finish()
    }
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            import: ImportOptions::default(),
            export: ExportOptions::default(),
            observer: None,
            alert_at_or_above: JobSeverity::Critical,
        }
    }
}

/// A produced file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name, `<pattern name>.<extension>`.
    pub name: String,
    /// Format id the file was encoded with.
    pub format: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatus {
    Success,
    Failed,
}

/// Outcome of an import that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportReport {
    pub status: ImportStatus,
    /// Success text, or the diagnostics report of a failed import.
    pub info: String,
    /// Ids of the loaded top-level records. A failed import may still have some.
    pub ids: Vec<RecordId>,
    pub diagnostics: Diagnostics,
    /// The input file with `Errors`/`Warnings` columns, for failed imports.
    pub annotated: Option<Attachment>,
}

/// Runs exports and imports for the patterns of a registry.
#[derive(Debug)]
pub struct PatternJob<'a> {
    patterns: &'a PatternRegistry,
    schemas: &'a SchemaRegistry,
    formats: &'a FormatRegistry,
    options: JobOptions,
}

impl<'a> PatternJob<'a> {
    pub fn new(
        patterns: &'a PatternRegistry,
        schemas: &'a SchemaRegistry,
        formats: &'a FormatRegistry,
    ) -> Self {
        Self {
            patterns,
            schemas,
            formats,
            options: JobOptions::default(),
        }
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }

    /// Codec of a pattern's export format.
    pub fn codec_for(&self, pattern: &Pattern) -> PatternResult<&dyn FormatCodec> {
        let format = pattern
            .export_format
            .as_deref()
            .ok_or_else(|| PatternError::UnknownFormat {
                format: "none".to_string(),
            })?;
        self.formats.get(format)
    }

    /// Export the records `ids` of the pattern's model.
    pub fn export(
        &self,
        pattern_id: &str,
        ids: &[RecordId],
        serializer: &dyn RecordSerializer,
    ) -> PatternResult<Attachment> {
        let ctx = self.context(pattern_id, JobKind::Export);
        let result = self.run_export(pattern_id, ids, serializer);
        self.observe(&ctx, result.as_ref().map(|_| ids.len()));
        result
    }

    /// Export the records selected by `domain` (see [`RecordSource`]).
    pub fn export_domain<S>(&self, pattern_id: &str, domain: &str, store: &S) -> PatternResult<Attachment>
    where
        S: RecordSource + RecordSerializer,
    {
        let ids = self
            .patterns
            .get(pattern_id)
            .and_then(|pattern| store.search_domain(&pattern.model, domain));
        match ids {
            Ok(ids) => self.export(pattern_id, &ids, store),
            Err(err) => {
                self.observe(&self.context(pattern_id, JobKind::Export), Err(&err));
                Err(err)
            }
        }
    }

    /// An empty file with the pattern's headers, to be filled in for import.
    pub fn generate_template(&self, pattern_id: &str) -> PatternResult<Attachment> {
        let ctx = self.context(pattern_id, JobKind::Template);
        let result = self.run_export(pattern_id, &[], &NoRecords);
        self.observe(&ctx, result.as_ref().map(|_| 0));
        result
    }

    /// Import a file for `pattern_id` into `loader`.
    pub fn import<L: BulkLoader>(
        &self,
        pattern_id: &str,
        data: &[u8],
        loader: &mut L,
    ) -> PatternResult<ImportReport> {
        self.import_source(pattern_id, None, data, loader)
    }

    /// [`Self::import`] with the name of the imported file, passed to the loader.
    pub fn import_source<L: BulkLoader>(
        &self,
        pattern_id: &str,
        source: Option<&str>,
        data: &[u8],
        loader: &mut L,
    ) -> PatternResult<ImportReport> {
        let ctx = self.context(pattern_id, JobKind::Import);
        let result = self.run_import(pattern_id, source, data, loader);
        match &result {
            Ok(report) if report.status == ImportStatus::Success => {
                self.observe(&ctx, Ok(report.ids.len()));
            }
            Ok(report) => {
                let severity = if report.diagnostics.error_count > 0 {
                    JobSeverity::Error
                } else {
                    JobSeverity::Warning
                };
                let err = PatternError::ImportFailed {
                    report: report.info.clone(),
                };
                self.notify_failure(&ctx, severity, &err);
            }
            Err(err) => self.observe(&ctx, Err(err)),
        }
        result
    }

    fn run_export(
        &self,
        pattern_id: &str,
        ids: &[RecordId],
        serializer: &dyn RecordSerializer,
    ) -> PatternResult<Attachment> {
        let pattern = self.patterns.get(pattern_id)?;
        let codec = self.codec_for(pattern)?;
        let tree = DictTreeBuilder::new(self.patterns)
            .with_schemas(self.schemas)
            .build(pattern_id)?;
        let headers = headers(self.patterns, pattern_id)?;

        let mut rows: Vec<Vec<Value>> = Vec::with_capacity(ids.len());
        for &id in ids {
            let record = serializer.to_tree(&pattern.model, id, &tree)?;
            rows.push(flatten(&record, &headers).values().cloned().collect());
        }

        let mut sheet = Sheet::new(headers, rows);
        sheet.title = self.options.export.sheet_name.clone();
        let data = codec.encode(&sheet)?;
        info!(
            pattern = pattern_id,
            rows = ids.len(),
            bytes = data.len(),
            "exported pattern file"
        );
        Ok(self.attachment(pattern, codec, &pattern.name, data))
    }

    fn run_import<L: BulkLoader>(
        &self,
        pattern_id: &str,
        source: Option<&str>,
        data: &[u8],
        loader: &mut L,
    ) -> PatternResult<ImportReport> {
        let pattern = self.patterns.get(pattern_id)?;
        let codec = self.codec_for(pattern)?;
        let sheet = codec.decode(data)?;
        let rows: Vec<FlatRow> = sheet
            .rows
            .iter()
            .map(|row| FlatRow::from_sheet_row(&sheet.headers, row))
            .collect();

        let batch = Unflattener::new(self.schemas, &*loader, &self.options.import)
            .with_first_line(sheet.first_data_line())
            .unflatten(&rows, pattern)?;
        let context = LoadContext {
            pattern_id: pattern.id.clone(),
            source: source.map(str::to_string),
        };
        let mut result = loader.load(&context, &batch)?;

        let mut messages = batch.messages;
        messages.append(&mut result.messages);
        messages.sort_by_key(|m| m.row);
        result.messages = messages;

        info!(
            pattern = pattern_id,
            rows = rows.len(),
            loaded = result.ids.len(),
            messages = result.messages.len(),
            "imported pattern file"
        );

        match finalize(&result) {
            Ok(info) => Ok(ImportReport {
                status: ImportStatus::Success,
                info,
                ids: result.ids,
                diagnostics: Diagnostics::default(),
                annotated: None,
            }),
            Err(PatternError::ImportFailed { report }) => {
                let diagnostics = summarize(&result.messages)?;
                let annotated = annotate(&sheet, &RowAnnotations::from_messages(&result.messages));
                let name = format!("{}_errors", pattern.name);
                let annotated = self.attachment(pattern, codec, &name, codec.encode(&annotated)?);
                Ok(ImportReport {
                    status: ImportStatus::Failed,
                    info: report,
                    ids: result.ids,
                    diagnostics,
                    annotated: Some(annotated),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn attachment(&self, pattern: &Pattern, codec: &dyn FormatCodec, stem: &str, data: Vec<u8>) -> Attachment {
        Attachment {
            name: format!("{stem}.{}", codec.extension()),
            format: pattern.export_format.clone().unwrap_or_default(),
            data,
        }
    }

    fn context(&self, pattern_id: &str, kind: JobKind) -> JobContext {
        let format = self
            .patterns
            .get(pattern_id)
            .ok()
            .and_then(|p| p.export_format.clone())
            .unwrap_or_default();
        JobContext {
            pattern_id: pattern_id.to_string(),
            kind,
            format,
        }
    }

    fn observe(&self, ctx: &JobContext, outcome: Result<usize, &PatternError>) {
        match outcome {
            Ok(rows) => {
                if let Some(obs) = self.options.observer.as_ref() {
                    obs.on_success(ctx, JobStats { rows });
                }
            }
            Err(err) => self.notify_failure(ctx, severity_for_error(err), err),
        }
    }

    fn notify_failure(&self, ctx: &JobContext, severity: JobSeverity, err: &PatternError) {
        if let Some(obs) = self.options.observer.as_ref() {
            obs.on_failure(ctx, severity, err);
            if severity >= self.options.alert_at_or_above {
                obs.on_alert(ctx, severity, err);
            }
        }
    }
}

/// Serializer for header-only files; never called.
struct NoRecords;

impl RecordSerializer for NoRecords {
    fn to_tree(&self, model: &str, id: RecordId, _: &DictTree) -> PatternResult<serde_json::Value> {
        Err(PatternError::Load {
            message: format!("record {model}({id}) requested from an empty export"),
        })
    }
}

fn severity_for_error(e: &PatternError) -> JobSeverity {
    match e {
        PatternError::Io(_) | PatternError::Load { .. } => JobSeverity::Critical,
        PatternError::Csv(err) => match err.kind() {
            ::csv::ErrorKind::Io(_) => JobSeverity::Critical,
            _ => JobSeverity::Error,
        },
        PatternError::Json(_) => JobSeverity::Error,
        #[cfg(feature = "excel")]
        PatternError::Excel(_) | PatternError::XlsxWrite(_) => JobSeverity::Error,
        PatternError::Configuration { .. }
        | PatternError::Lookup { .. }
        | PatternError::MessageKind { .. }
        | PatternError::UnknownFormat { .. }
        | PatternError::ImportFailed { .. } => JobSeverity::Error,
    }
}
