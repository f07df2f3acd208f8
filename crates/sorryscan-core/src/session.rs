//! Verification session protocol.
//!
//! A session is one long-lived engine instance driven by JSON requests. Proof-state handles
//! reported by a session are minted paired with that session's [`SessionId`], and
//! [`VerificationSession::parent_type`] refuses handles minted elsewhere before anything is
//! sent to the engine.

use crate::obligation::{Lookup, Position, RawObligation, Span};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Response key carrying the obligation list.
pub const SORRIES_KEY: &str = "sorries";

/// Prefix of the info message carrying the parent type.
pub const PARENT_TYPE_TAG: &str = "parentType:";

/// Tactic run at an obligation's proof state to recover the parent type.
pub const PARENT_TYPE_TACTIC: &str = "run_tac do\n  let parentType ← Lean.Meta.inferType (← Lean.Elab.Tactic.getMainTarget)\n  Lean.logInfo m!\"parentType:{parentType}\"";

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn fresh() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Opaque proof-state reference, only valid against the session that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProofStateHandle {
    session: SessionId,
    state: u64,
}

impl ProofStateHandle {
    pub(crate) fn new(session: SessionId, state: u64) -> Self {
        Self { session, state }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The engine-side integer, as it appears on the wire.
    pub fn raw(&self) -> u64 {
        self.state
    }
}

/// Requests understood by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Request {
    Analyze {
        path: String,
        #[serde(rename = "allTactics")]
        all_tactics: bool,
    },
    Tactic {
        tactic: String,
        #[serde(rename = "proofState")]
        proof_state: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to start verification session `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("verification session i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("verification session closed its output")]
    Closed,
    #[error("verification session `{program}` exited before answering (exit={code:?}); stderr: {stderr:?}")]
    Exited {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("verification session returned invalid JSON: {source}; output starts with: {preview:?}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        preview: String,
    },
    #[error("proof state {state} was issued by {owner}, not {session}")]
    ForeignHandle {
        state: u64,
        owner: SessionId,
        session: SessionId,
    },
}

impl SessionError {
    /// The engine could not be started at all; no other file will fare better.
    ///
    /// A launcher (`lake env`, a shell wrapper) can start fine while the engine behind it
    /// does not, so an exit before the first response counts too.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::Spawn { .. } | SessionError::Exited { .. })
    }

    /// The session is gone and must not be queried again.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SessionError::Io(_) | SessionError::Closed | SessionError::Exited { .. }
        )
    }
}

/// Interpretation of an analyze response.
///
/// `Missing` and `Empty` produce the same output today but are kept apart so a change in
/// how the engine reports clean files stays visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// The response has no obligations key.
    Missing,
    /// The key is present with an empty list.
    Empty,
    Found(Vec<RawObligation>),
    /// Transport failure, engine error, or a response we could not decode.
    Failed(String),
}

impl Discovery {
    pub fn into_obligations(self) -> Vec<RawObligation> {
        match self {
            Discovery::Found(list) => list,
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SorryEntry {
    proof_state: u64,
    pos: Position,
    end_pos: Position,
    goal: String,
}

#[derive(Debug, Deserialize)]
struct EngineMessage {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    data: String,
}

fn render_error(err: &Value) -> String {
    err.as_str()
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string())
}

/// Classify an analyze response; handles are bound to `session`.
pub fn parse_discovery(session: SessionId, response: &Value) -> Discovery {
    let Some(obj) = response.as_object() else {
        return Discovery::Failed("response is not a JSON object".to_string());
    };
    if let Some(err) = obj.get("error") {
        return Discovery::Failed(format!("engine error: {}", render_error(err)));
    }
    let Some(sorries) = obj.get(SORRIES_KEY) else {
        return Discovery::Missing;
    };

    let entries: Vec<SorryEntry> = match serde_json::from_value(sorries.clone()) {
        Ok(entries) => entries,
        Err(e) => return Discovery::Failed(format!("malformed `{SORRIES_KEY}`: {e}")),
    };
    if entries.is_empty() {
        return Discovery::Empty;
    }

    Discovery::Found(
        entries
            .into_iter()
            .map(|e| RawObligation {
                span: Span {
                    start: e.pos,
                    end: e.end_pos,
                },
                handle: ProofStateHandle::new(session, e.proof_state),
                goal_text: e.goal,
            })
            .collect(),
    )
}

/// Classify a parent-type tactic response.
pub fn parse_parent_type(response: &Value) -> Lookup<String> {
    let Some(obj) = response.as_object() else {
        return Lookup::Failed("response is not a JSON object".to_string());
    };
    if let Some(err) = obj.get("error") {
        return Lookup::Failed(format!("engine error: {}", render_error(err)));
    }
    let messages: Vec<EngineMessage> = match obj.get("messages") {
        None => return Lookup::NotFound,
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(m) => m,
            Err(e) => return Lookup::Failed(format!("malformed `messages`: {e}")),
        },
    };

    if let Some(m) = messages.iter().find(|m| m.severity == "error") {
        return Lookup::Failed(format!("tactic failed: {}", m.data));
    }

    messages
        .iter()
        .filter(|m| m.severity == "info")
        .find_map(|m| m.data.strip_prefix(PARENT_TYPE_TAG))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| Lookup::Found(t.to_string()))
        .unwrap_or(Lookup::NotFound)
}

/// A live engine instance.
pub trait VerificationSession {
    fn id(&self) -> SessionId;

    /// Send one request and wait for its response.
    fn send(&mut self, request: &Request) -> Result<Value, SessionError>;

    /// Ask the engine for every obligation in `path` (relative to the session's root).
    ///
    /// Transport problems become [`Discovery::Failed`]; only [fatal](SessionError::is_fatal)
    /// errors are returned.
    fn analyze_file(&mut self, path: &Path) -> Result<Discovery, SessionError> {
        let request = Request::Analyze {
            path: path.to_string_lossy().into_owned(),
            all_tactics: true,
        };
        match self.send(&request) {
            Ok(response) => Ok(parse_discovery(self.id(), &response)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(Discovery::Failed(e.to_string())),
        }
    }

    /// Resolve the parent type at `handle`.
    fn parent_type(&mut self, handle: ProofStateHandle) -> Result<Lookup<String>, SessionError> {
        if handle.session() != self.id() {
            return Err(SessionError::ForeignHandle {
                state: handle.raw(),
                owner: handle.session(),
                session: self.id(),
            });
        }
        let request = Request::Tactic {
            tactic: PARENT_TYPE_TACTIC.to_string(),
            proof_state: handle.raw(),
        };
        let response = self.send(&request)?;
        Ok(parse_parent_type(&response))
    }
}

/// Opens one session per file, rooted at the repository.
pub trait SessionFactory {
    type Session: VerificationSession;

    fn open(&self, repo_root: &Path) -> Result<Self::Session, SessionError>;
}
