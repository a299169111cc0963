//! Correlation-number allocation and identifier rewriting.
//!
//! Requests deferred to the node carry a rewritten identifier of the form
//! `btcwallet(<n>)-<original-id>`, where `<n>` is a fresh correlation number
//! and the original identifier is preserved verbatim so any routing
//! information a frontend embedded in it survives the round trip. Requests
//! the daemon injects on its own behalf use the suffix-less `btcwallet(<n>)`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

/// Tag prefixed to every identifier this daemon hands to the node.
pub const DAEMON_TAG: &str = "btcwallet";

/// Monotonic source of fresh correlation numbers. Each number is handed
/// out exactly once for the lifetime of the process.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Render the rewritten identifier for correlation number `n`.
///
/// `original` is the frontend's own identifier, rendered the way it would
/// appear in a format string: strings verbatim, everything else as compact
/// JSON. `None` produces the suffix-less form used for daemon-injected
/// requests.
pub fn route_id(n: u64, original: Option<&Value>) -> String {
    match original {
        Some(Value::String(s)) => format!("{DAEMON_TAG}({n})-{s}"),
        Some(other) => format!("{DAEMON_TAG}({n})-{other}"),
        None => format!("{DAEMON_TAG}({n})"),
    }
}

/// Parse a rewritten identifier back into `(n, original_id_text)`.
///
/// The correlation number is the digit run between the fixed prefix and the
/// first closing parenthesis, so the parse is unambiguous even when the
/// original identifier itself contains the daemon tag or parentheses.
pub fn parse_route_id(id: &str) -> Option<(u64, Option<&str>)> {
    let rest = id.strip_prefix(DAEMON_TAG)?.strip_prefix('(')?;
    let close = rest.find(')')?;
    let n: u64 = rest[..close].parse().ok()?;
    let tail = &rest[close + 1..];
    if tail.is_empty() {
        Some((n, None))
    } else {
        Some((n, Some(tail.strip_prefix('-')?)))
    }
}
