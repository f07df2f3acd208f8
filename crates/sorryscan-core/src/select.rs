//! Candidate file selection.
//!
//! A cheap textual pre-filter: a file is a candidate when it has the source extension,
//! sits outside the build-output directory, and its raw text contains a marker substring.
//! The engine makes the authoritative call later.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Options controlling candidate selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOptions {
    /// Source extension (without dot).
    pub extension: String,
    /// Build-output directory name; any path segment equal to it excludes the file.
    pub build_dir: String,
    /// Case-sensitive marker substrings.
    pub markers: Vec<String>,
    /// Restrict the walk to this repository-relative subdirectory.
    pub subdir: Option<PathBuf>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            extension: "lean".to_string(),
            build_dir: ".lake".to_string(),
            markers: vec![
                "sorry".to_string(),
                "admit".to_string(),
                "proof_wanted".to_string(),
            ],
            subdir: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("subdirectory {} does not exist", .0.display())]
    MissingSubdir(PathBuf),
}

/// Path-only half of the filter: extension and build-directory checks.
pub fn is_candidate_path(relative: &Path, options: &SelectOptions) -> bool {
    let ext_ok = relative
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == options.extension);
    if !ext_ok {
        return false;
    }
    !relative.components().any(|c| match c {
        Component::Normal(seg) => seg == options.build_dir.as_str(),
        _ => false,
    })
}

/// Byte-level substring search, so the file's encoding does not matter.
pub fn contains_marker(text: impl AsRef<[u8]>, markers: &[String]) -> bool {
    let text = text.as_ref();
    markers.iter().any(|m| {
        let m = m.as_bytes();
        !m.is_empty() && text.windows(m.len()).any(|w| w == m)
    })
}

/// Lazily walk `repo_root`, yielding candidate paths relative to it.
///
/// Entries are visited in file-name order.
pub fn select_candidates<'a>(
    repo_root: &'a Path,
    options: &'a SelectOptions,
) -> Result<impl Iterator<Item = PathBuf> + 'a, SelectError> {
    let start = match &options.subdir {
        Some(sub) => {
            let p = repo_root.join(sub);
            if !p.is_dir() {
                return Err(SelectError::MissingSubdir(sub.clone()));
            }
            p
        }
        None => repo_root.to_path_buf(),
    };

    let walker = WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || entry.file_name() != options.build_dir.as_str()
        });

    Ok(walker.filter_map(move |entry| {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "skipping unreadable entry");
                return None;
            }
        };
        if !entry.file_type().is_file() {
            return None;
        }

        let path = entry.path();
        let relative = path.strip_prefix(repo_root).unwrap_or(path).to_path_buf();
        if !is_candidate_path(&relative, options) {
            return None;
        }

        let text = match std::fs::read(path) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "could not read source file");
                return None;
            }
        };
        contains_marker(&text, &options.markers).then_some(relative)
    }))
}
