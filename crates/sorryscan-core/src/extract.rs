//! Obligation discovery for one file.

use crate::obligation::RawObligation;
use crate::session::{Discovery, SessionError, VerificationSession};
use std::path::Path;
use tracing::{info, warn};

/// Ask `session` for the obligations in `relative_path`.
///
/// Fail-open: a missing key, an empty list, an engine error and an undecodable response all
/// yield no obligations. Nothing is retried. The only error is an engine that never
/// started.
pub fn extract<S>(session: &mut S, relative_path: &Path) -> Result<Vec<RawObligation>, SessionError>
where
    S: VerificationSession + ?Sized,
{
    let path = relative_path.display();
    Ok(match session.analyze_file(relative_path)? {
        Discovery::Found(list) => {
            info!(%path, count = list.len(), "engine reported obligations");
            list
        }
        Discovery::Empty => {
            info!(%path, "engine reported an empty obligation list");
            Vec::new()
        }
        Discovery::Missing => {
            info!(%path, "engine response has no obligations");
            Vec::new()
        }
        Discovery::Failed(reason) => {
            warn!(%path, %reason, "obligation discovery failed, treating file as clean");
            Vec::new()
        }
    })
}
