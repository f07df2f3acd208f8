//! Top-level sequencing: acquire → build → scan → persist.

use crate::blame::BlameSource;
use crate::build::{lean_toolchain_version, ProjectBuilder};
use crate::git::{repo_metadata, RepoMetadata, RepoSource};
use crate::obligation::ScanResult;
use crate::scan::{RepoScanner, ScanObserver};
use crate::session::SessionFactory;
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What to scan and where to write it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub repo: String,
    pub branch: Option<String>,
    pub output: PathBuf,
    /// Also write repository metadata here.
    pub metadata_out: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: None,
            output: PathBuf::from("output.json"),
            metadata_out: None,
        }
    }
}

#[derive(Debug)]
pub struct PipelineReport {
    pub checkout: PathBuf,
    pub lean_version: Option<String>,
    pub scan: ScanResult,
    pub metadata: Option<RepoMetadata>,
}

pub struct Pipeline<R, P, F, B> {
    source: R,
    builder: P,
    scanner: RepoScanner<F, B>,
}

impl<R, P, F, B> Pipeline<R, P, F, B>
where
    R: RepoSource,
    P: ProjectBuilder,
    F: SessionFactory,
    B: BlameSource,
{
    pub fn new(source: R, builder: P, scanner: RepoScanner<F, B>) -> Self {
        Self {
            source,
            builder,
            scanner,
        }
    }

    /// Run the whole pipeline. The artifact is written once, at the end, and only on success.
    pub fn run(
        &self,
        config: &PipelineConfig,
        observer: &mut dyn ScanObserver,
    ) -> Result<PipelineReport> {
        info!(repo = %config.repo, branch = config.branch.as_deref().unwrap_or("(default)"), "processing repository");

        let checkout = self
            .source
            .acquire(&config.repo, config.branch.as_deref())
            .ok_or_else(|| anyhow!("failed to prepare repository: {}", config.repo))?;

        self.builder
            .ensure_built(&checkout)
            .with_context(|| format!("build failed for {}", checkout.display()))?;

        let lean_version = match lean_toolchain_version(&checkout) {
            Ok(v) => {
                info!(lean_version = %v, "detected toolchain");
                Some(v)
            }
            Err(e) => {
                warn!(error = %e, "continuing without a toolchain version");
                None
            }
        };

        let scan = self
            .scanner
            .scan(&checkout, observer)
            .with_context(|| format!("scan failed for {}", checkout.display()))?;

        write_json(&config.output, &scan)?;
        info!(path = %config.output.display(), "wrote scan results");

        let metadata = match &config.metadata_out {
            Some(path) => match repo_metadata(&checkout, lean_version.clone()) {
                Ok(m) => {
                    write_json(path, &m)?;
                    Some(m)
                }
                Err(e) => {
                    warn!(error = %e, "could not collect repository metadata");
                    None
                }
            },
            None => None,
        };

        Ok(PipelineReport {
            checkout,
            lean_version,
            scan,
            metadata,
        })
    }
}

/// Pretty-printed JSON, creating parent directories as needed.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
