//! Occurrence counter suffix `(N)` at the end of issue titles.

use lazy_static::lazy_static;
use regex::Regex;
use std::num::ParseIntError;
use thiserror::Error;

lazy_static! {
    static ref COUNTER: Regex = Regex::new(r"\((\d*)\)$").unwrap();
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("No occurrence counter found at the end of issue title '{0}'")]
    Missing(String),
    #[error("Occurrence counter in issue title '{title}' is not a number")]
    Invalid {
        title: String,
        #[source]
        e: ParseIntError,
    },
    #[error("Occurrence counter in issue title '{0}' cannot be incremented any further")]
    Overflow(String),
}

type Result<T, E = CounterError> = std::result::Result<T, E>;

/// Bumps the trailing occurrence counter: `"prod err: boom (5)"` becomes
/// `"prod err: boom (6)"`. Everything before the opening parenthesis is kept verbatim.
pub fn increment(title: &str) -> Result<String> {
    let cap = COUNTER
        .captures(title)
        .ok_or_else(|| CounterError::Missing(title.to_owned()))?;
    let digits = &cap[1];
    let n: u64 = digits.parse().map_err(|e| CounterError::Invalid {
        title: title.to_owned(),
        e,
    })?;
    let n = n
        .checked_add(1)
        .ok_or_else(|| CounterError::Overflow(title.to_owned()))?;
    // match is "(" digits ")" at the very end
    let prefix = &title[..title.len() - digits.len() - 2];
    Ok(format!("{}({})", prefix, n))
}

/// Appends the counter suffix ` (N)` to a title
pub fn with_counter(title: &str, n: u64) -> String {
    format!("{} ({})", title, n)
}

/// Returns `s` without a trailing ` (<digits>)` suffix, if there is one
pub fn strip_suffix(s: &str) -> Option<&str> {
    let inner = s.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let digits = &inner[open + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    inner[..open].strip_suffix(' ')
}

// === Tests ===
