//! SorryScan core
//!
//! Inventories incomplete proofs (`sorry`, `admit`, `proof_wanted`) in a Lean repository:
//!
//! - select candidate files with a cheap textual filter,
//! - drive one verification session (Lean REPL) per file to recover each obligation's
//!   goal and proof state,
//! - enrich each obligation with its parent type (queried on the same session), a goal
//!   fingerprint for duplicate detection, and git blame,
//! - write the per-file results as one JSON artifact.
//!
//! Every collaborator with side effects (session, blame, checkout, build) sits behind a
//! trait so the pipeline can be driven without a Lean toolchain.

pub mod blame;
pub mod build;
pub mod enrich;
pub mod extract;
pub mod git;
pub mod obligation;
pub mod pipeline;
pub mod repl;
pub mod scan;
pub mod select;
pub mod session;

pub use blame::{BlameSource, GitBlame};
pub use build::{lean_toolchain_version, BuildError, LakeBuilder, ProjectBuilder, ToolchainError};
pub use enrich::enrich;
pub use extract::extract;
pub use git::{normalize_repo_spec, repo_metadata, AcquireError, GitCheckout, RepoMetadata, RepoSource};
pub use obligation::{
    goal_fingerprint, Blame, DuplicateGroup, FileRecord, FileResult, Lookup, Obligation,
    ObligationRecord, Position, RawObligation, ScanResult, Span, FINGERPRINT_HEX_LEN,
};
pub use pipeline::{write_json, Pipeline, PipelineConfig, PipelineReport};
pub use repl::{ReplCommand, ReplFactory, ReplSession, SORRYSCAN_REPL_ENV};
pub use scan::{RepoScanner, ScanError, ScanObserver};
pub use select::{contains_marker, is_candidate_path, select_candidates, SelectError, SelectOptions};
pub use session::{
    Discovery, ProofStateHandle, Request, SessionError, SessionFactory, SessionId,
    VerificationSession,
};
