//! `pattern-import-export` maps nested business records to flat spreadsheet rows and back,
//! driven by reusable column specifications called *patterns*.
//!
//! A [`pattern::Pattern`] lists `/`-delimited field paths (`name`, `country_id/code`,
//! `child_ids/name` with 3 occurrences). The engine expands it into flat headers
//! (`name`, `country_id|code`, `child_ids|1|name`, ...), exports records through those
//! headers, and on import rebuilds nested load requests from the flat cells, resolving
//! references by external id (`id`), internal id (`.id`) or alternate key (`ref#key`).
//!
//! The primary entrypoint is [`job::PatternJob`], which runs a whole export or import
//! against persistence collaborators ([`store`]) and a registered file format ([`format`]).
//!
//! ## Header grammar
//!
//! - `|` separates path parts: `parent_id|country_id|code`
//! - an all-digit part right after a field is its 1-based occurrence: `child_ids|2|name`
//! - `id` is the external identifier, `.id` the internal one: `user_ids|1|id`
//! - a `#key` suffix resolves the record by that field on import: `child_ids|1|ref#key`
//!
//! ## What an import reports
//!
//! Import never stops at the first bad row. Rows are loaded independently; errors and
//! warnings are counted and rendered as
//!
//! ```text
//! Several errors have been found, number of errors: 1, number of warnings: 0
//! Detail:
//! Line 3: error, No record matched (model 'res.country', code = ZZ)
//! ```
//!
//! and written back into the file as trailing `Errors` / `Warnings` columns
//! ([`diagnostics`]).
//!
//! ## Quick example: flatten a record
//!
//! ```rust
//! use pattern_import_export::pattern::{flatten, headers, ExportLine, Pattern, PatternRegistry};
//! use pattern_import_export::types::Value;
//!
//! # fn main() -> Result<(), pattern_import_export::PatternError> {
//! let patterns = PatternRegistry::new().with(Pattern::new(
//!     "partners",
//!     "Partners",
//!     "res.partner",
//!     vec![
//!         ExportLine::new("id"),
//!         ExportLine::new("country_id/code"),
//!         ExportLine::new("category_id/name").occurrences(2),
//!     ],
//! ));
//! let headers = headers(&patterns, "partners")?;
//! assert_eq!(
//!     headers,
//!     ["id", "country_id|code", "category_id|1|name", "category_id|2|name"]
//! );
//!
//! let record = serde_json::json!({
//!     "id": "base.res_partner_1",
//!     "country_id": {"code": "FR"},
//!     "category_id": [{"name": "Prospects"}]
//! });
//! let row = flatten(&record, &headers);
//! assert_eq!(row.get("country_id|code"), Some(&Value::from("FR")));
//! assert_eq!(row.get("category_id|2|name"), Some(&Value::Null));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`pattern`]: patterns, header codec, field trees, flatten/unflatten, key lookup
//! - [`diagnostics`]: load messages, import report, row annotations
//! - [`format`]: CSV and (feature `excel`) XLSX codecs behind a format registry
//! - [`store`]: persistence collaborator traits and an in-memory store
//! - [`job`]: export/import orchestration, observers, directory synchronization
//! - [`types`]: schemas, cell values, sheets
//! - [`error`]: error types used across the crate

pub mod diagnostics;
pub mod error;
pub mod format;
pub mod job;
pub mod pattern;
pub mod store;
pub mod types;

pub use error::{PatternError, PatternResult};
