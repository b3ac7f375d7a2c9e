//! Unified diff between the committed and the live form of a resource.

use similar::TextDiff;

/// Lines of context around each hunk.
const CONTEXT_LINES: usize = 3;

/// Diffs two canonical YAML documents.
///
/// Returns an empty string iff the documents are identical.
pub fn diff_yaml(label: &str, committed: &str, live: &str) -> String {
    if committed == live {
        return String::new();
    }

    let diff = TextDiff::from_lines(committed, live);
    let mut unified = diff.unified_diff();
    unified
        .context_radius(CONTEXT_LINES)
        .header(&format!("a/{}", label), &format!("b/{}", label));
    unified.to_string()
}
