//! Git output parsing helpers.

use std::collections::BTreeMap;
use std::process::Output;

use super::types::{ChangedPaths, CommitInfo, Contributor};

/// Field separator used in `--format` strings (`%x1f`).
pub const FIELD_SEP: char = '\u{1f}';

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses `git diff --name-status --no-renames` output.
pub fn parse_name_status(output: &str) -> ChangedPaths {
    let mut changed = ChangedPaths::default();

    for line in output.lines() {
        let mut parts = line.splitn(2, '\t');
        let (Some(status), Some(path)) = (parts.next(), parts.next()) else {
            continue;
        };
        let path = path.trim().to_string();
        match status.chars().next() {
            Some('D') => changed.deleted.push(path),
            Some('A') | Some('M') | Some('T') | Some('C') => changed.updated.push(path),
            _ => {}
        }
    }

    changed
}

/// Parses one `%H%x1f%an%x1f%aI%x1f%B` record.
pub fn parse_commit_record(record: &str) -> Option<CommitInfo> {
    let mut fields = record.trim_start_matches('\n').splitn(4, FIELD_SEP);
    let hash = fields.next()?.trim().to_string();
    if hash.is_empty() {
        return None;
    }
    Some(CommitInfo {
        hash,
        author: fields.next()?.to_string(),
        date: fields.next()?.to_string(),
        message: fields.next().unwrap_or_default().trim().to_string(),
        applied_at: None,
    })
}

/// Parses `%an%x1f%ae%x1f%aI` lines, newest first, keeping the first
/// occurrence of each author name.
pub fn parse_contributors(output: &str) -> Vec<Contributor> {
    let mut seen = std::collections::HashSet::new();
    let mut contributors = Vec::new();

    for line in output.lines() {
        let mut fields = line.splitn(3, FIELD_SEP);
        let (Some(name), Some(email), Some(date)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if seen.insert(name.to_string()) {
            contributors.push(Contributor {
                name: name.to_string(),
                email: email.to_string(),
                last_activity: date.to_string(),
            });
        }
    }

    contributors
}

/// Counts commits per `YYYY-MM-DD` line, keeping the most recent `max_days` days.
pub fn parse_pulse(output: &str, max_days: usize) -> BTreeMap<String, u32> {
    let mut pulse = BTreeMap::new();
    for day in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        *pulse.entry(day.to_string()).or_insert(0) += 1;
    }
    while pulse.len() > max_days {
        pulse.pop_first();
    }
    pulse
}
