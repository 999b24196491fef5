//! Directory synchronization: scheduled exports into, and imports from, a folder.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{PatternError, PatternResult};
use crate::pattern::PatternId;
use crate::store::{BulkLoader, RecordSerializer, RecordSource};

use super::{ImportReport, ImportStatus, PatternJob};

/// Domain selecting every record.
pub const DEFAULT_DOMAIN: &str = "[]";

/// Sub-directory receiving the annotated copies of failed import files.
pub const FAILED_DIR: &str = "failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Export,
    Import,
}

/// What happens to an import file once it was imported successfully.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AfterImport {
    #[default]
    Keep,
    Delete,
    /// Move into this directory.
    MoveTo(PathBuf),
}

/// A pattern bound to a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynchronizeTask {
    pub name: String,
    pub pattern_id: PatternId,
    pub direction: SyncDirection,
    pub directory: PathBuf,
    /// Export only: records to export, as a JSON domain.
    pub domain: String,
    /// Import only: file name glob inside `directory`; `*.<format>` when `None`.
    pub file_glob: Option<String>,
    /// Import only.
    pub after_import: AfterImport,
}

impl SynchronizeTask {
    fn new(
        name: impl Into<String>,
        pattern_id: impl Into<PatternId>,
        direction: SyncDirection,
        directory: impl AsRef<Path>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern_id: pattern_id.into(),
            direction,
            directory: directory.as_ref().to_path_buf(),
            domain: DEFAULT_DOMAIN.to_string(),
            file_glob: None,
            after_import: AfterImport::default(),
        }
    }

    pub fn export(
        name: impl Into<String>,
        pattern_id: impl Into<PatternId>,
        directory: impl AsRef<Path>,
    ) -> Self {
        Self::new(name, pattern_id, SyncDirection::Export, directory)
    }

    pub fn import(
        name: impl Into<String>,
        pattern_id: impl Into<PatternId>,
        directory: impl AsRef<Path>,
    ) -> Self {
        Self::new(name, pattern_id, SyncDirection::Import, directory)
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_file_glob(mut self, glob: impl Into<String>) -> Self {
        self.file_glob = Some(glob.into());
        self
    }

    pub fn with_after_import(mut self, after_import: AfterImport) -> Self {
        self.after_import = after_import;
        self
    }

    /// Export the records matching `domain` and write the file into `directory`.
    pub fn run_export<S>(&self, job: &PatternJob<'_>, store: &S) -> PatternResult<PathBuf>
    where
        S: RecordSource + RecordSerializer,
    {
        self.ensure_direction(SyncDirection::Export)?;
        let attachment = job.export_domain(&self.pattern_id, &self.domain, store)?;
        fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(&attachment.name);
        fs::write(&path, &attachment.data)?;
        info!(task = self.name.as_str(), path = %path.display(), "wrote export file");
        Ok(path)
    }

    /// Files in `directory` matching the task's glob, sorted by path.
    pub fn pending_files(&self, extension: &str) -> PatternResult<Vec<PathBuf>> {
        let directory = self
            .directory
            .to_str()
            .ok_or_else(|| PatternError::config("sync directory is not valid UTF-8"))?;
        let file_glob = self
            .file_glob
            .clone()
            .unwrap_or_else(|| format!("*.{extension}"));
        let full = format!("{}/{file_glob}", glob::Pattern::escape(directory));

        let entries = glob::glob(&full)
            .map_err(|err| PatternError::config(format!("invalid file glob '{file_glob}': {err}")))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| PatternError::Io(err.into_error()))?;
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Import every pending file, in path order.
    ///
    /// A failed import leaves its file in place and writes the annotated copy, under
    /// the same file name, into [`FAILED_DIR`]; the remaining files are still imported.
    pub fn run_import<L: BulkLoader>(
        &self,
        job: &PatternJob<'_>,
        loader: &mut L,
    ) -> PatternResult<Vec<(PathBuf, ImportReport)>> {
        self.ensure_direction(SyncDirection::Import)?;
        let extension = {
            let pattern = job.patterns.get(&self.pattern_id)?;
            job.codec_for(pattern)?.extension().to_string()
        };

        let mut reports = Vec::new();
        for path in self.pending_files(&extension)? {
            let data = fs::read(&path)?;
            let source = path.file_name().and_then(|n| n.to_str());
            let report = job.import_source(&self.pattern_id, source, &data, loader)?;
            match (&report.status, &report.annotated) {
                (ImportStatus::Success, _) => self.dispose(&path)?,
                (ImportStatus::Failed, Some(annotated)) => {
                    warn!(task = self.name.as_str(), file = %path.display(), "import failed");
                    let failed = self.directory.join(FAILED_DIR);
                    fs::create_dir_all(&failed)?;
                    if let Some(name) = path.file_name() {
                        fs::write(failed.join(name), &annotated.data)?;
                    }
                }
                (ImportStatus::Failed, None) => {}
            }
            reports.push((path, report));
        }
        Ok(reports)
    }

    fn dispose(&self, path: &Path) -> PatternResult<()> {
        match &self.after_import {
            AfterImport::Keep => {}
            AfterImport::Delete => fs::remove_file(path)?,
            AfterImport::MoveTo(directory) => {
                fs::create_dir_all(directory)?;
                if let Some(name) = path.file_name() {
                    fs::rename(path, directory.join(name))?;
                }
            }
        }
        Ok(())
    }

    fn ensure_direction(&self, direction: SyncDirection) -> PatternResult<()> {
        if self.direction == direction {
            Ok(())
        } else {
            Err(PatternError::config(format!(
                "task '{}' is a {:?} task",
                self.name, self.direction
            )))
        }
    }
}
