//! Child-process verification session (Lean REPL).
//!
//! Framing: one JSON object per request followed by a blank line; the response is every
//! stdout line up to the next blank line. The child is killed and reaped when the session
//! is dropped. Engine stderr is logged at debug level and its tail is attached to the
//! error when the engine exits before answering.

use crate::session::{Request, SessionError, SessionFactory, SessionId, VerificationSession};
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Environment variable naming the REPL binary.
pub const SORRYSCAN_REPL_ENV: &str = "SORRYSCAN_REPL";
/// REPL binary used when neither flag nor environment names one.
pub const DEFAULT_REPL_BINARY: &str = "repl";

/// How to launch the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ReplCommand {
    /// `lake env <repl>`, so the engine sees the project's build outputs.
    pub fn lake_env(repl_binary: impl AsRef<Path>) -> Self {
        Self {
            program: PathBuf::from("lake"),
            args: vec![
                "env".to_string(),
                repl_binary.as_ref().to_string_lossy().into_owned(),
            ],
        }
    }

    pub fn direct(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Flag first, then `SORRYSCAN_REPL`, then [`DEFAULT_REPL_BINARY`].
    pub fn resolve(repl_override: Option<&Path>, lake_env: bool) -> Result<Self> {
        let binary = match repl_override {
            Some(p) => p.to_path_buf(),
            None => match std::env::var(SORRYSCAN_REPL_ENV) {
                Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
                Ok(_) | Err(std::env::VarError::NotPresent) => {
                    PathBuf::from(DEFAULT_REPL_BINARY)
                }
                Err(e) => return Err(anyhow!("failed to read {SORRYSCAN_REPL_ENV}: {e}")),
            },
        };
        Ok(if lake_env {
            Self::lake_env(binary)
        } else {
            Self::direct(binary)
        })
    }

    fn display(&self) -> String {
        let mut s = self.program.display().to_string();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

impl Default for ReplCommand {
    fn default() -> Self {
        Self::lake_env(DEFAULT_REPL_BINARY)
    }
}

/// Engine stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

pub struct ReplSession {
    id: SessionId,
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    answered: bool,
}

impl ReplSession {
    pub fn spawn(command: &ReplCommand, cwd: &Path) -> Result<Self, SessionError> {
        let program = command.display();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: program.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(SessionError::Closed);
        };

        let id = SessionId::fresh();
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));
        drain_stderr(id, stderr, stderr_tail.clone());

        debug!(session = %id, command = %program, cwd = %cwd.display(), "started verification session");
        Ok(Self {
            id,
            program,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            stderr_tail,
            answered: false,
        })
    }

    fn read_response(&mut self) -> Result<String, SessionError> {
        let mut response = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.stdout.read_line(&mut line)?;
            if n == 0 {
                if response.trim().is_empty() {
                    return Err(self.closed_error());
                }
                break;
            }
            if line.trim().is_empty() {
                if response.is_empty() {
                    continue;
                }
                break;
            }
            response.push_str(&line);
        }
        self.answered = true;
        Ok(response)
    }

    /// Classify end-of-output. Before the first answer the engine never came up.
    fn closed_error(&mut self) -> SessionError {
        let code = self.exit_code();
        let stderr = self.stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("\n");
        if self.answered {
            debug!(session = %self.id, ?code, %stderr, "verification session closed its output");
            return SessionError::Closed;
        }
        SessionError::Exited {
            program: self.program.clone(),
            code,
            stderr,
        }
    }

    /// Exit code of a child that has closed its output, if it exits promptly.
    fn exit_code(&mut self) -> Option<i32> {
        for _ in 0..50 {
            match self.child.try_wait() {
                Ok(Some(status)) => return status.code(),
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(_) => return None,
            }
        }
        None
    }
}

/// Log engine stderr at debug level and keep its last lines.
fn drain_stderr(id: SessionId, stderr: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    thread::spawn(move || {
        for line in BufReader::new(stderr).lines() {
            let Ok(line) = line else { break };
            debug!(session = %id, "engine stderr: {line}");
            let mut tail = tail.lock();
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    });
}

impl VerificationSession for ReplSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn send(&mut self, request: &Request) -> Result<Value, SessionError> {
        let payload = serde_json::to_string(request).map_err(|source| {
            SessionError::InvalidJson {
                source,
                preview: String::new(),
            }
        })?;
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(SessionError::Closed);
        };
        let written = stdin
            .write_all(payload.as_bytes())
            .and_then(|()| stdin.write_all(b"\n\n"))
            .and_then(|()| stdin.flush());
        match written {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(self.closed_error()),
            Err(e) => return Err(e.into()),
        }

        let response = self.read_response()?;
        serde_json::from_str(&response).map_err(|source| {
            let preview = response.chars().take(300).collect::<String>();
            SessionError::InvalidJson { source, preview }
        })
    }
}

impl Drop for ReplSession {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        debug!(session = %self.id, "closed verification session");
    }
}

/// Spawns a fresh [`ReplSession`] per file.
#[derive(Debug, Clone, Default)]
pub struct ReplFactory {
    command: ReplCommand,
}

impl ReplFactory {
    pub fn new(command: ReplCommand) -> Self {
        Self { command }
    }
}

impl SessionFactory for ReplFactory {
    type Session = ReplSession;

    fn open(&self, repo_root: &Path) -> Result<ReplSession, SessionError> {
        ReplSession::spawn(&self.command, repo_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Discovery;

    #[test]
    fn lake_env_wraps_binary() {
        let cmd = ReplCommand::lake_env("/opt/repl/bin/repl");
        assert_eq!(cmd.program, PathBuf::from("lake"));
        assert_eq!(cmd.args, vec!["env", "/opt/repl/bin/repl"]);
        assert_eq!(cmd.display(), "lake env /opt/repl/bin/repl");
    }

    #[test]
    fn explicit_repl_wins() {
        let cmd = ReplCommand::resolve(Some(Path::new("/x/repl")), false).unwrap();
        assert_eq!(cmd, ReplCommand::direct("/x/repl"));
    }

    #[test]
    fn missing_program_is_fatal_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ReplSession::spawn(
            &ReplCommand::direct("sorryscan-definitely-not-a-binary"),
            dir.path(),
        )
        .err()
        .expect("spawn should fail");
        assert!(err.is_fatal());
    }

    // `cat` echoes each request back, which exercises framing end to end.
    #[cfg(unix)]
    #[test]
    fn framing_round_trips_through_a_child_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ReplFactory::new(ReplCommand::direct("cat"))
            .open(dir.path())
            .unwrap();

        // The echoed request has no `sorries` key.
        assert_eq!(
            session.analyze_file(Path::new("Foo.lean")).unwrap(),
            Discovery::Missing
        );

        let echoed = session
            .send(&Request::Analyze {
                path: "Bar.lean".to_string(),
                all_tactics: true,
            })
            .unwrap();
        assert_eq!(echoed["path"], "Bar.lean");
        assert_eq!(echoed["allTactics"], true);
    }

    #[cfg(unix)]
    #[test]
    fn child_exiting_before_first_answer_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ReplFactory::new(ReplCommand::direct("true"))
            .open(dir.path())
            .unwrap();
        let err = session
            .send(&Request::Tactic {
                tactic: "rfl".to_string(),
                proof_state: 0,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::Exited { .. }), "{err:?}");
        assert!(err.is_fatal());
    }

    // The launcher starts, the engine behind it does not.
    #[cfg(unix)]
    #[test]
    fn missing_engine_behind_a_launcher_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ReplCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "exec sorryscan-no-such-repl".to_string()],
        };
        let mut session = ReplFactory::new(launcher).open(dir.path()).unwrap();
        let err = session.analyze_file(Path::new("A.lean")).unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
        let SessionError::Exited { program, code, .. } = err else {
            panic!("expected an early exit");
        };
        assert_eq!(program, "sh -c exec sorryscan-no-such-repl");
        assert_ne!(code, Some(0));
    }

    #[cfg(unix)]
    #[test]
    fn child_exiting_after_answering_is_a_plain_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        // Answer one request with `{}`, then exit.
        let once = ReplCommand {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                "read req; read blank; echo '{}'; echo".to_string(),
            ],
        };
        let mut session = ReplFactory::new(once).open(dir.path()).unwrap();
        assert_eq!(
            session.analyze_file(Path::new("A.lean")).unwrap(),
            Discovery::Missing
        );

        let err = session
            .send(&Request::Tactic {
                tactic: "rfl".to_string(),
                proof_state: 0,
            })
            .unwrap_err();
        assert!(err.is_disconnect(), "{err:?}");
        assert!(!err.is_fatal(), "{err:?}");
    }
}
