use thiserror::Error;

/// Convenience result type for pattern operations.
pub type PatternResult<T> = Result<T, PatternError>;

/// Error type returned by the mapping engine, the format codecs and the job layer.
///
/// Mapping gaps during export (a header that cannot be walked in a record tree) are
/// not errors: they become `Null` cells.
#[derive(Debug, Error)]
pub enum PatternError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV codec error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (de)serialization error for patterns, schemas or domains.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "excel")]
    /// Workbook read error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    #[cfg(feature = "excel")]
    /// Workbook write error (feature-gated behind `excel`).
    #[error("xlsx write error: {0}")]
    XlsxWrite(#[from] rust_xlsxwriter::XlsxError),

    /// The field-path specification is malformed (empty name, prefix/terminal
    /// collision, unknown or cyclic sub-pattern, ...).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A key-based lookup did not resolve to exactly one record.
    #[error("{message} (model '{model}', {field} = {value})")]
    Lookup {
        model: String,
        field: String,
        value: String,
        message: String,
    },

    /// A load message carried a kind other than `error` or `warning`.
    #[error("Message type {kind} is not supported")]
    MessageKind { kind: String },

    /// No codec is registered for the requested export format.
    #[error("The export with the format {format} doesn't exist!")]
    UnknownFormat { format: String },

    /// The import finished with errors or warnings; `report` is the full
    /// human-readable diagnostics text.
    #[error("{report}")]
    ImportFailed { report: String },

    /// The persistence collaborator rejected a whole batch.
    #[error("load failed: {message}")]
    Load { message: String },
}

impl PatternError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
