//! Obligation records and the scan artifact.
//!
//! An [`Obligation`] is created from a [`RawObligation`] reported by a verification session,
//! enriched once (parent type, fingerprint, blame) and never mutated afterwards. Enrichment
//! outcomes are kept as [`Lookup`] values so a failed lookup and an empty answer stay
//! distinguishable in memory; both render as an absent field in the artifact.

use crate::session::ProofStateHandle;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Number of hex characters kept from the goal digest.
pub const FINGERPRINT_HEX_LEN: usize = 8;

/// A 1-based line / 0-based column position as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    #[serde(alias = "col")]
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// Half-open source span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

/// Version-control attribution for one source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blame {
    pub commit: String,
    pub author: String,
    pub author_email: String,
    pub date: DateTime<FixedOffset>,
    pub summary: String,
}

/// Outcome of an optional lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    /// The collaborator answered, but had nothing for us.
    NotFound,
    /// The collaborator could not answer.
    Failed(String),
}

impl<T> Lookup<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Lookup::Failed(_))
    }
}

/// An obligation as reported by the session, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObligation {
    pub span: Span,
    pub handle: ProofStateHandle,
    pub goal_text: String,
}

/// One incomplete-proof marker, fully enriched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "ObligationRecord")]
pub struct Obligation {
    span: Span,
    handle: ProofStateHandle,
    goal_text: String,
    parent_type: Lookup<String>,
    goal_fingerprint: String,
    blame: Lookup<Blame>,
}

impl Obligation {
    pub fn new(raw: RawObligation, parent_type: Lookup<String>, blame: Lookup<Blame>) -> Self {
        let goal_fingerprint = goal_fingerprint(&raw.goal_text);
        Self {
            span: raw.span,
            handle: raw.handle,
            goal_text: raw.goal_text,
            parent_type,
            goal_fingerprint,
            blame,
        }
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn handle(&self) -> ProofStateHandle {
        self.handle
    }

    pub fn goal_text(&self) -> &str {
        &self.goal_text
    }

    pub fn parent_type(&self) -> &Lookup<String> {
        &self.parent_type
    }

    pub fn goal_fingerprint(&self) -> &str {
        &self.goal_fingerprint
    }

    pub fn blame(&self) -> &Lookup<Blame> {
        &self.blame
    }
}

/// Serialized shape of an [`Obligation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObligationRecord {
    pub position: Span,
    pub proof_state_handle: u64,
    pub goal_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    pub goal_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blame: Option<Blame>,
}

impl From<Obligation> for ObligationRecord {
    fn from(o: Obligation) -> Self {
        Self {
            position: o.span,
            proof_state_handle: o.handle.raw(),
            goal_text: o.goal_text,
            parent_type: o.parent_type.into_option(),
            goal_fingerprint: o.goal_fingerprint,
            blame: o.blame.into_option(),
        }
    }
}

/// Obligations found in one file. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    path: PathBuf,
    obligations: Vec<Obligation>,
}

impl FileResult {
    /// Returns `None` for an empty obligation list: such files are omitted from output.
    pub fn new(path: impl Into<PathBuf>, obligations: Vec<Obligation>) -> Option<Self> {
        if obligations.is_empty() {
            return None;
        }
        Some(Self {
            path: path.into(),
            obligations,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn obligations(&self) -> &[Obligation] {
        &self.obligations
    }
}

/// Serialized shape of a [`FileResult`], for consumers reading the artifact back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub obligations: Vec<ObligationRecord>,
}

/// Per-file results in selector traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScanResult {
    files: Vec<FileResult>,
}

/// Obligations sharing one goal fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    pub fingerprint: String,
    pub locations: Vec<(PathBuf, Position)>,
}

impl ScanResult {
    pub fn push(&mut self, file: FileResult) {
        self.files.push(file);
    }

    pub fn files(&self) -> &[FileResult] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn obligation_count(&self) -> usize {
        self.files.iter().map(|f| f.obligations.len()).sum()
    }

    pub fn obligations(&self) -> impl Iterator<Item = (&Path, &Obligation)> {
        self.files
            .iter()
            .flat_map(|f| f.obligations.iter().map(move |o| (f.path(), o)))
    }

    /// Fingerprints shared by more than one obligation, in first-seen order.
    pub fn duplicate_groups(&self) -> Vec<DuplicateGroup> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<DuplicateGroup> = Vec::new();

        for (path, obligation) in self.obligations() {
            let location = (path.to_path_buf(), obligation.span.start);
            match index.get(obligation.goal_fingerprint()) {
                Some(&i) => groups[i].locations.push(location),
                None => {
                    index.insert(obligation.goal_fingerprint(), groups.len());
                    groups.push(DuplicateGroup {
                        fingerprint: obligation.goal_fingerprint.clone(),
                        locations: vec![location],
                    });
                }
            }
        }

        groups.retain(|g| g.locations.len() > 1);
        groups
    }
}

/// Short SHA-256 fingerprint of the goal text, byte-for-byte.
pub fn goal_fingerprint(goal_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(goal_text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(FINGERPRINT_HEX_LEN);
    for b in digest[..FINGERPRINT_HEX_LEN / 2].iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use proptest::prelude::*;

    fn raw(goal: &str, line: u32, state: u64) -> RawObligation {
        RawObligation {
            span: Span {
                start: Position::new(line, 2),
                end: Position::new(line, 7),
            },
            handle: ProofStateHandle::new(SessionId::fresh(), state),
            goal_text: goal.to_string(),
        }
    }

    #[test]
    fn fingerprint_is_sha256_prefix() {
        // sha256("") = e3b0c442...
        assert_eq!(goal_fingerprint(""), "e3b0c442");
        assert_eq!(goal_fingerprint("⊢ True").len(), FINGERPRINT_HEX_LEN);
    }

    #[test]
    fn fingerprint_does_not_normalize_whitespace() {
        assert_ne!(goal_fingerprint("⊢ True"), goal_fingerprint("⊢  True"));
        assert_ne!(goal_fingerprint("⊢ True"), goal_fingerprint("⊢ True\n"));
    }

    #[test]
    fn empty_file_result_is_not_constructed() {
        assert!(FileResult::new("A.lean", Vec::new()).is_none());
    }

    #[test]
    fn absent_enrichment_is_omitted_from_json() {
        let o = Obligation::new(
            raw("⊢ True", 5, 3),
            Lookup::Failed("boom".to_string()),
            Lookup::NotFound,
        );
        let value = serde_json::to_value(&o).unwrap();
        assert!(value.get("parentType").is_none());
        assert!(value.get("blame").is_none());
        assert_eq!(value["proofStateHandle"], 3);
        assert_eq!(value["position"]["start"]["line"], 5);
        assert_eq!(value["position"]["start"]["column"], 2);
        assert_eq!(value["goalFingerprint"], goal_fingerprint("⊢ True"));
    }

    #[test]
    fn duplicate_groups_keep_first_seen_order() {
        let mut scan = ScanResult::default();
        let a = Obligation::new(raw("⊢ P", 1, 0), Lookup::NotFound, Lookup::NotFound);
        let b = Obligation::new(raw("⊢ Q", 2, 1), Lookup::NotFound, Lookup::NotFound);
        let c = Obligation::new(raw("⊢ P", 9, 0), Lookup::NotFound, Lookup::NotFound);
        scan.push(FileResult::new("A.lean", vec![a, b]).unwrap());
        scan.push(FileResult::new("B.lean", vec![c]).unwrap());

        let groups = scan.duplicate_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].fingerprint, goal_fingerprint("⊢ P"));
        assert_eq!(
            groups[0].locations,
            vec![
                (PathBuf::from("A.lean"), Position::new(1, 2)),
                (PathBuf::from("B.lean"), Position::new(9, 2)),
            ]
        );
        assert_eq!(scan.obligation_count(), 3);
    }

    proptest! {
        #[test]
        fn identical_goals_share_fingerprints(goal in ".*") {
            let a = Obligation::new(raw(&goal, 1, 0), Lookup::NotFound, Lookup::NotFound);
            let b = Obligation::new(raw(&goal, 40, 7), Lookup::NotFound, Lookup::NotFound);
            prop_assert_eq!(a.goal_fingerprint(), b.goal_fingerprint());
        }

        #[test]
        fn fingerprint_is_short_lowercase_hex(goal in ".*") {
            let fp = goal_fingerprint(&goal);
            prop_assert_eq!(fp.len(), FINGERPRINT_HEX_LEN);
            prop_assert!(fp.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }
}
