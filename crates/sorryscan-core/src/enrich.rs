//! Per-obligation enrichment against the still-open session.

use crate::blame::BlameSource;
use crate::obligation::{Lookup, Obligation, RawObligation};
use crate::session::VerificationSession;
use std::path::Path;
use tracing::{debug, warn};

/// Enrich every raw obligation; none are dropped.
///
/// Each obligation gets its parent type from `session` (the session that reported it), a
/// goal fingerprint, and blame for its start line. If the session dies part way, the rest
/// of the file's parent-type lookups are recorded as failed without further queries.
pub fn enrich<S, B>(
    session: &mut S,
    blame: &B,
    repo_root: &Path,
    relative_path: &Path,
    raw: Vec<RawObligation>,
) -> Vec<Obligation>
where
    S: VerificationSession + ?Sized,
    B: BlameSource + ?Sized,
{
    let mut session_alive = true;
    let mut out = Vec::with_capacity(raw.len());

    for r in raw {
        let parent_type = if session_alive {
            match session.parent_type(r.handle) {
                Ok(lookup) => lookup,
                Err(e) => {
                    if e.is_disconnect() {
                        warn!(path = %relative_path.display(), error = %e, "verification session lost during enrichment");
                        session_alive = false;
                    }
                    Lookup::Failed(e.to_string())
                }
            }
        } else {
            Lookup::Failed("verification session lost".to_string())
        };
        if let Lookup::Failed(reason) = &parent_type {
            debug!(line = r.span.start.line, %reason, "parent type unavailable");
        }

        let attribution = blame.blame(repo_root, relative_path, r.span.start.line);
        if let Lookup::Failed(reason) = &attribution {
            debug!(line = r.span.start.line, %reason, "blame unavailable");
        }

        out.push(Obligation::new(r, parent_type, attribution));
    }

    out
}
