//! Repository scanning: selection, then extraction + enrichment per file.
//!
//! Files are processed strictly one after another. All session state for a file lives
//! inside [`RepoScanner::scan_file`]; the session is dropped (and its process reaped)
//! before the next file starts.

use crate::blame::BlameSource;
use crate::enrich::enrich;
use crate::extract::extract;
use crate::obligation::{FileResult, ScanResult};
use crate::select::{select_candidates, SelectError, SelectOptions};
use crate::session::{SessionError, SessionFactory};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Progress callbacks.
pub trait ScanObserver {
    /// Called once per candidate after it has been fully processed.
    fn file_processed(&mut self, _path: &Path, _obligations: usize) {}

    /// Called when a candidate was skipped because its session could not be used.
    fn file_failed(&mut self, _path: &Path, _error: &SessionError) {}
}

impl ScanObserver for () {}

pub struct RepoScanner<F, B> {
    factory: F,
    blame: B,
    options: SelectOptions,
}

impl<F, B> RepoScanner<F, B>
where
    F: SessionFactory,
    B: BlameSource,
{
    pub fn new(factory: F, blame: B, options: SelectOptions) -> Self {
        Self {
            factory,
            blame,
            options,
        }
    }

    pub fn options(&self) -> &SelectOptions {
        &self.options
    }

    /// Scan every candidate file under `repo_root`.
    ///
    /// A session that cannot be started at all aborts the scan; any other per-file session
    /// failure skips that file and moves on.
    pub fn scan(
        &self,
        repo_root: &Path,
        observer: &mut dyn ScanObserver,
    ) -> Result<ScanResult, ScanError> {
        let mut result = ScanResult::default();
        let mut candidates = 0usize;

        for relative in select_candidates(repo_root, &self.options)? {
            candidates += 1;
            match self.scan_file(repo_root, &relative) {
                Ok(Some(file)) => {
                    info!(path = %relative.display(), count = file.obligations().len(), "found obligations");
                    observer.file_processed(&relative, file.obligations().len());
                    result.push(file);
                }
                Ok(None) => {
                    info!(path = %relative.display(), "no obligations found");
                    observer.file_processed(&relative, 0);
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "skipping file");
                    observer.file_failed(&relative, &e);
                }
            }
        }

        info!(
            candidates,
            files = result.files().len(),
            obligations = result.obligation_count(),
            "scan complete"
        );
        Ok(result)
    }

    /// Extract and enrich one file with its own session.
    pub fn scan_file(
        &self,
        repo_root: &Path,
        relative: &Path,
    ) -> Result<Option<FileResult>, SessionError> {
        let mut session = self.factory.open(repo_root)?;
        let raw = extract(&mut session, relative)?;
        if raw.is_empty() {
            return Ok(None);
        }
        let obligations = enrich(&mut session, &self.blame, repo_root, relative, raw);
        Ok(FileResult::new(relative, obligations))
    }
}
