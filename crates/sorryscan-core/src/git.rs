//! Git plumbing: repository acquisition and checkout metadata.
//!
//! Network access is optional: a local directory is used in place. URLs and `owner/name`
//! specs are cloned into `<workdir>/<head sha>` by shelling out to `git`.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("unsupported repo spec `{0}` (expected a local dir, URL, or owner/name)")]
    UnsupportedSpec(String),
    #[error("failed to run `git {command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`git {command}` failed: {stderr}")]
    Git { command: String, stderr: String },
    #[error("no commit found for `{reference}` on {url}")]
    NoHead { url: String, reference: String },
    #[error("unexpected output from `git {command}`: {output:?}")]
    Output { command: String, output: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Run `git` with `args` (optionally in `cwd`) and return trimmed stdout.
pub(crate) fn run_git(cwd: Option<&Path>, args: &[&str]) -> Result<String, AcquireError> {
    let mut cmd = Command::new("git");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let command = args.join(" ");
    let out = cmd
        .args(args)
        .output()
        .map_err(|source| AcquireError::Spawn {
            command: command.clone(),
            source,
        })?;
    if !out.status.success() {
        return Err(AcquireError::Git {
            command,
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

/// `https://…` is kept (with `.git` appended), `file://…` is kept as is, `owner/name`
/// expands to GitHub.
pub fn normalize_repo_spec(repo: &str) -> Result<String, AcquireError> {
    let s = repo.trim();
    if s.starts_with("file://") {
        return Ok(s.to_string());
    }
    if s.starts_with("http://") || s.starts_with("https://") {
        if s.ends_with(".git") {
            return Ok(s.to_string());
        }
        return Ok(format!("{s}.git"));
    }
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 && parts.iter().all(|p| !p.is_empty()) {
        return Ok(format!("https://github.com/{s}.git"));
    }
    Err(AcquireError::UnsupportedSpec(s.to_string()))
}

/// Resolve the commit at the tip of `branch` (or the remote HEAD).
pub fn resolve_head_sha(url: &str, branch: Option<&str>) -> Result<String, AcquireError> {
    let reference = match branch {
        Some(b) => format!("refs/heads/{b}"),
        None => "HEAD".to_string(),
    };
    let out = run_git(None, &["ls-remote", url, &reference])?;
    out.lines()
        .filter_map(|line| line.split_once('\t'))
        .find(|(_, r)| *r == reference)
        .map(|(sha, _)| sha.to_string())
        .ok_or(AcquireError::NoHead {
            url: url.to_string(),
            reference,
        })
}

/// Acquires a local checkout for a repository identifier.
pub trait RepoSource {
    /// `None` means the repository could not be acquired; the reason has been logged.
    fn acquire(&self, repo: &str, branch: Option<&str>) -> Option<PathBuf>;
}

/// Clones into `<workdir>/<sha>`, reusing an existing checkout at the right commit.
#[derive(Debug, Clone)]
pub struct GitCheckout {
    workdir: PathBuf,
}

impl GitCheckout {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn prepare(&self, repo: &str, branch: Option<&str>) -> Result<PathBuf, AcquireError> {
        // Local path mode (fully offline).
        let as_path = PathBuf::from(repo);
        if as_path.is_dir() {
            info!(path = %as_path.display(), "using local repository in place");
            return Ok(as_path);
        }

        let url = normalize_repo_spec(repo)?;
        let sha = resolve_head_sha(&url, branch)?;
        let checkout = self.workdir.join(&sha);

        if checkout.exists() {
            match run_git(Some(&checkout), &["rev-parse", "HEAD"]) {
                Ok(head) if head == sha => {
                    info!(%sha, path = %checkout.display(), "repository already checked out at commit");
                    return Ok(checkout);
                }
                _ => {
                    warn!(path = %checkout.display(), "removing stale checkout");
                    fs::remove_dir_all(&checkout)?;
                }
            }
        }

        fs::create_dir_all(&self.workdir)?;
        match clone_at(&url, branch, &sha, &checkout) {
            Ok(()) => Ok(checkout),
            Err(e) => {
                if checkout.exists() {
                    let _ = fs::remove_dir_all(&checkout);
                }
                Err(e)
            }
        }
    }
}

fn clone_at(url: &str, branch: Option<&str>, sha: &str, dest: &Path) -> Result<(), AcquireError> {
    let dest_str = dest.to_string_lossy();
    let mut args = vec!["clone", "--single-branch"];
    if let Some(b) = branch {
        args.push("--branch");
        args.push(b);
    }
    args.push(url);
    args.push(dest_str.as_ref());

    info!(%url, branch = branch.unwrap_or("(default)"), "cloning repository");
    run_git(None, &args)?;
    info!(%sha, "checking out commit");
    run_git(Some(dest), &["checkout", sha])?;
    Ok(())
}

impl RepoSource for GitCheckout {
    fn acquire(&self, repo: &str, branch: Option<&str>) -> Option<PathBuf> {
        match self.prepare(repo, branch) {
            Ok(path) => Some(path),
            Err(e) => {
                error!(%repo, error = %e, "failed to prepare repository");
                None
            }
        }
    }
}

/// Where a scan was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    pub commit_time: DateTime<FixedOffset>,
    pub remote_url: String,
    pub sha: String,
    /// `HEAD` when detached.
    pub branch: String,
    pub lean_version: Option<String>,
}

pub fn repo_metadata(
    repo_root: &Path,
    lean_version: Option<String>,
) -> Result<RepoMetadata, AcquireError> {
    let log = run_git(Some(repo_root), &["log", "-1", "--format=%H%n%cI"])?;
    let (sha, commit_time) = log.split_once('\n').ok_or_else(|| AcquireError::Output {
        command: "log -1".to_string(),
        output: log.clone(),
    })?;
    let commit_time =
        DateTime::parse_from_rfc3339(commit_time.trim()).map_err(|_| AcquireError::Output {
            command: "log -1".to_string(),
            output: log.clone(),
        })?;

    let remote_url = run_git(Some(repo_root), &["remote", "get-url", "origin"])?;
    let remote_url = remote_url
        .strip_suffix(".git")
        .unwrap_or(&remote_url)
        .to_string();

    let branch = run_git(Some(repo_root), &["rev-parse", "--abbrev-ref", "HEAD"])?;

    Ok(RepoMetadata {
        commit_time,
        remote_url,
        sha: sha.trim().to_string(),
        branch,
        lean_version,
    })
}

/// Throwaway git repositories with a fixed identity and clock.
#[cfg(test)]
pub(crate) mod fixture {
    use std::path::Path;
    use std::process::Command;

    pub(crate) const AUTHOR: &str = "Ada Lovelace";
    pub(crate) const EMAIL: &str = "ada@example.org";
    /// 2023-11-14T22:13:20Z, recorded at +05:30.
    pub(crate) const DATE: &str = "1700000000 +0530";

    pub(crate) fn git(dir: &Path, args: &[&str]) -> String {
        let out = Command::new("git")
            .args(["-c", "init.defaultBranch=main", "-c", "commit.gpgsign=false"])
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", AUTHOR)
            .env("GIT_AUTHOR_EMAIL", EMAIL)
            .env("GIT_AUTHOR_DATE", DATE)
            .env("GIT_COMMITTER_NAME", AUTHOR)
            .env("GIT_COMMITTER_EMAIL", EMAIL)
            .env("GIT_COMMITTER_DATE", DATE)
            .output()
            .expect("run git");
        assert!(
            out.status.success(),
            "git {args:?}: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8_lossy(&out.stdout).trim().to_string()
    }

    /// `git init` plus one commit of `file`; returns the commit sha.
    pub(crate) fn repo_with_commit(dir: &Path, file: &str, text: &str, message: &str) -> String {
        git(dir, &["init", "-q"]);
        std::fs::write(dir.join(file), text).expect("write fixture file");
        git(dir, &["add", file]);
        git(dir, &["commit", "-q", "-m", message]);
        git(dir, &["rev-parse", "HEAD"])
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{git, repo_with_commit};
    use super::*;

    /// A bare repository served over `file://`, plus its head sha.
    fn bare_remote(root: &Path) -> (String, String) {
        let src = root.join("src");
        fs::create_dir_all(&src).unwrap();
        let sha = repo_with_commit(&src, "Main.lean", "theorem t : True := sorry\n", "init");
        git(root, &["clone", "-q", "--bare", "src", "remote.git"]);
        (format!("file://{}", root.join("remote.git").display()), sha)
    }

    #[test]
    fn normalizes_repo_specs() {
        assert_eq!(
            normalize_repo_spec("leanprover-community/mathlib4").unwrap(),
            "https://github.com/leanprover-community/mathlib4.git"
        );
        assert_eq!(
            normalize_repo_spec("https://github.com/a/b").unwrap(),
            "https://github.com/a/b.git"
        );
        assert_eq!(
            normalize_repo_spec("https://example.org/x.git").unwrap(),
            "https://example.org/x.git"
        );
        for bad in ["not-a-repo", "a/b/c", "/b", ""] {
            assert!(
                matches!(normalize_repo_spec(bad), Err(AcquireError::UnsupportedSpec(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn local_directory_is_used_in_place() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let source = GitCheckout::new(work.path());
        let got = source.acquire(&repo.path().to_string_lossy(), None);
        assert_eq!(got.as_deref(), Some(repo.path()));
    }

    #[test]
    fn file_urls_are_kept() {
        assert_eq!(
            normalize_repo_spec("file:///srv/git/proj.git").unwrap(),
            "file:///srv/git/proj.git"
        );
    }

    #[test]
    fn clones_into_sha_directory_and_reuses_it() {
        let root = tempfile::tempdir().unwrap();
        let (url, sha) = bare_remote(root.path());
        let work = root.path().join("work");
        let source = GitCheckout::new(&work);

        let checkout = source.prepare(&url, None).unwrap();
        assert_eq!(checkout, work.join(&sha));
        assert_eq!(git(&checkout, &["rev-parse", "HEAD"]), sha);
        assert!(checkout.join("Main.lean").is_file());

        // An untracked file survives: the checkout is reused, not re-cloned.
        fs::write(checkout.join("keep.txt"), "x").unwrap();
        let again = source.prepare(&url, Some("main")).unwrap();
        assert_eq!(again, checkout);
        assert!(again.join("keep.txt").exists());
    }

    #[test]
    fn stale_checkout_is_replaced() {
        let root = tempfile::tempdir().unwrap();
        let (url, sha) = bare_remote(root.path());
        let work = root.path().join("work");

        // A repository at a different commit squatting on the sha directory.
        let stale = work.join(&sha);
        fs::create_dir_all(&stale).unwrap();
        let other = repo_with_commit(&stale, "Junk.lean", "-- junk\n", "unrelated");
        assert_ne!(other, sha);

        let checkout = GitCheckout::new(&work).prepare(&url, None).unwrap();
        assert_eq!(checkout, stale);
        assert_eq!(git(&checkout, &["rev-parse", "HEAD"]), sha);
        assert!(!checkout.join("Junk.lean").exists());
        assert!(checkout.join("Main.lean").is_file());
    }

    #[test]
    fn unknown_branch_leaves_workdir_empty() {
        let root = tempfile::tempdir().unwrap();
        let (url, _) = bare_remote(root.path());
        let work = root.path().join("work");

        let err = GitCheckout::new(&work)
            .prepare(&url, Some("no-such-branch"))
            .unwrap_err();
        assert!(matches!(err, AcquireError::NoHead { .. }), "{err:?}");
        let entries = fs::read_dir(&work).map(|d| d.count()).unwrap_or(0);
        assert_eq!(entries, 0);
    }

    #[test]
    fn metadata_reports_commit_remote_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        let sha = repo_with_commit(dir.path(), "A.lean", "sorry\n", "first commit");
        git(dir.path(), &["remote", "add", "origin", "https://example.org/r.git"]);

        let m = repo_metadata(dir.path(), Some("v4.15.0".to_string())).unwrap();
        assert_eq!(m.sha, sha);
        assert_eq!(m.remote_url, "https://example.org/r");
        assert_eq!(m.branch, "main");
        assert_eq!(m.lean_version.as_deref(), Some("v4.15.0"));
        assert_eq!(m.commit_time.to_rfc3339(), "2023-11-15T03:43:20+05:30");

        git(dir.path(), &["checkout", "-q", "--detach"]);
        let detached = repo_metadata(dir.path(), None).unwrap();
        assert_eq!(detached.branch, "HEAD");
        assert_eq!(detached.lean_version, None);
    }

    #[test]
    fn metadata_needs_a_remote() {
        let dir = tempfile::tempdir().unwrap();
        repo_with_commit(dir.path(), "A.lean", "sorry\n", "first commit");
        assert!(matches!(
            repo_metadata(dir.path(), None),
            Err(AcquireError::Git { .. })
        ));
    }

    #[test]
    fn unknown_identifier_is_absent() {
        let work = tempfile::tempdir().unwrap();
        let source = GitCheckout::new(work.path().join("data"));
        assert_eq!(source.acquire("no-such-repository", None), None);
        assert!(!work.path().join("data").exists());
    }
}
