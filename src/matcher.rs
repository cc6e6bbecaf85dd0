//! Finds the open issue which already tracks a given error.

use crate::counter;
use crate::ticket::CanonicalTitle;
use crate::tracker::Issue;

/// True if `candidate` is exactly `<title> (<digits>)`
pub fn is_duplicate(candidate: &str, title: &CanonicalTitle) -> bool {
    match candidate.strip_prefix(title.as_str()) {
        Some(rest) => counter::strip_suffix(rest) == Some(""),
        None => false,
    }
}

/// Returns the first issue in tracker order whose title carries `title` plus a counter suffix.
pub fn find_duplicate<'a>(issues: &'a [Issue], title: &CanonicalTitle) -> Option<&'a Issue> {
    let mut dups = issues.iter().filter(|i| is_duplicate(&i.title, title));
    let first = dups.next()?;
    let others: Vec<String> = dups.map(|i| format!("#{}", i.number)).collect();
    if !others.is_empty() {
        warn!(
            "Multiple open issues match '{}': using #{}, ignoring {}",
            title,
            first.number,
            others.join(", ")
        );
    }
    Some(first)
}

// === Tests ===
