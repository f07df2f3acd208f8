//! Lake project build and toolchain detection.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

const MATHLIB_REMOTE: &str = "https://github.com/leanprover-community/mathlib4";

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed (exit={code:?})")]
    Failed { command: String, code: Option<i32> },
}

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("no lean-toolchain file at {}", .0.display())]
    Missing(PathBuf),
    #[error("failed to read lean-toolchain: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected lean-toolchain contents: {0:?}")]
    Format(String),
}

/// Makes sure a checkout's compiled artifacts exist. Idempotent.
pub trait ProjectBuilder {
    fn ensure_built(&self, repo_root: &Path) -> Result<(), BuildError>;
}

#[derive(Debug, Clone)]
pub struct LakeBuilder {
    lake: PathBuf,
}

impl Default for LakeBuilder {
    fn default() -> Self {
        Self {
            lake: PathBuf::from("lake"),
        }
    }
}

impl LakeBuilder {
    pub fn new(lake: impl Into<PathBuf>) -> Self {
        Self { lake: lake.into() }
    }

    fn lake(&self, repo_root: &Path, args: &[&str]) -> Result<(), BuildError> {
        let command = format!("{} {}", self.lake.display(), args.join(" "));
        let status = Command::new(&self.lake)
            .args(args)
            .current_dir(repo_root)
            .status()
            .map_err(|source| BuildError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !status.success() {
            return Err(BuildError::Failed {
                command,
                code: status.code(),
            });
        }
        Ok(())
    }
}

pub fn is_built(repo_root: &Path) -> bool {
    repo_root.join("lake-manifest.json").exists() && repo_root.join(".lake/build").exists()
}

fn uses_mathlib(repo_root: &Path) -> bool {
    let manifest = repo_root.join("lake-manifest.json");
    if !manifest.exists() {
        return false;
    }
    match fs::read_to_string(&manifest) {
        Ok(text) => text.contains(MATHLIB_REMOTE),
        Err(e) => {
            warn!(error = %e, "could not read lake-manifest.json");
            false
        }
    }
}

impl ProjectBuilder for LakeBuilder {
    fn ensure_built(&self, repo_root: &Path) -> Result<(), BuildError> {
        if is_built(repo_root) {
            info!("project appears to be already built, skipping build step");
            return Ok(());
        }

        if uses_mathlib(repo_root) {
            info!("project uses mathlib4, fetching build cache");
            if let Err(e) = self.lake(repo_root, &["exe", "cache", "get"]) {
                warn!(error = %e, "build cache fetch failed, continuing anyway");
            }
        }

        info!("building project");
        self.lake(repo_root, &["build"])
    }
}

/// `leanprover/lean4:v4.17.0-rc1` → `v4.17.0-rc1`.
pub fn lean_toolchain_version(repo_root: &Path) -> Result<String, ToolchainError> {
    let path = repo_root.join("lean-toolchain");
    if !path.exists() {
        return Err(ToolchainError::Missing(path));
    }
    let text = fs::read_to_string(&path)?;
    let text = text.trim();
    match text.split_once(':') {
        Some((_, version)) if !version.trim().is_empty() => Ok(version.trim().to_string()),
        _ => Err(ToolchainError::Format(text.to_string())),
    }
}
