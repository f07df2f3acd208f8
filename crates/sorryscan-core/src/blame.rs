//! Line attribution via `git blame --porcelain`.

use crate::git::run_git;
use crate::obligation::{Blame, Lookup};
use chrono::{DateTime, FixedOffset};
use std::path::Path;

/// Attribution for a single source line.
pub trait BlameSource {
    /// `line` is 1-based. Failures come back as [`Lookup::Failed`], never as errors.
    fn blame(&self, repo_root: &Path, relative_path: &Path, line: u32) -> Lookup<Blame>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitBlame;

impl BlameSource for GitBlame {
    fn blame(&self, repo_root: &Path, relative_path: &Path, line: u32) -> Lookup<Blame> {
        let range = format!("{line},{line}");
        let path = relative_path.to_string_lossy();
        match run_git(
            Some(repo_root),
            &["blame", "--porcelain", "-L", &range, "HEAD", "--", &path],
        ) {
            Ok(out) if out.is_empty() => Lookup::NotFound,
            Ok(out) => match parse_porcelain(&out) {
                Ok(b) => Lookup::Found(b),
                Err(reason) => Lookup::Failed(reason),
            },
            Err(e) => Lookup::Failed(e.to_string()),
        }
    }
}

/// `+0130` / `-0800` → offset.
fn parse_tz(tz: &str) -> Option<FixedOffset> {
    let (sign, digits) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Parse the header block of `git blame --porcelain` for one line.
pub fn parse_porcelain(out: &str) -> Result<Blame, String> {
    let mut lines = out.lines();
    let commit = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .filter(|c| c.len() >= 7 && c.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(|| "missing commit header".to_string())?
        .to_string();

    let mut author = None;
    let mut author_email = None;
    let mut author_time = None;
    let mut author_tz = None;
    let mut summary = None;

    for line in lines {
        // The blamed source line itself; headers end here.
        if line.starts_with('\t') {
            break;
        }
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        match key {
            "author" => author = Some(value.to_string()),
            "author-mail" => {
                author_email = Some(
                    value
                        .trim_start_matches('<')
                        .trim_end_matches('>')
                        .to_string(),
                )
            }
            "author-time" => author_time = value.parse::<i64>().ok(),
            "author-tz" => author_tz = parse_tz(value),
            "summary" => summary = Some(value.to_string()),
            _ => {}
        }
    }

    let secs = author_time.ok_or("missing or invalid author-time")?;
    let tz = author_tz.ok_or("missing or invalid author-tz")?;
    let date = DateTime::from_timestamp(secs, 0)
        .ok_or("author-time out of range")?
        .with_timezone(&tz);

    Ok(Blame {
        commit,
        author: author.ok_or("missing author")?,
        author_email: author_email.unwrap_or_default(),
        date,
        summary: summary.unwrap_or_default(),
    })
}
