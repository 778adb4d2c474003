//! General utilities.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

const ISO8601: &str = "%Y-%m-%dT%H:%M:%SZ";

/// The current wall-clock time as an ISO 8601 string
/// (`2025-01-01T00:00:00Z`), for manifests and summaries.
///
/// Setting `TDS_TEST_EPOCH` to a Unix timestamp pins the clock, so tests get
/// byte-stable artifacts. Artifact timestamps must come from here, never
/// from `Utc::now()` directly.
pub fn now_iso8601() -> String {
    match test_epoch() {
        Some(epoch) => chrono::DateTime::from_timestamp(epoch, 0)
            .map(|dt| dt.format(ISO8601).to_string())
            .unwrap_or_else(|| format!("invalid-timestamp({epoch})")),
        None => chrono::Utc::now().format(ISO8601).to_string(),
    }
}

/// The pinned test clock, when `TDS_TEST_EPOCH` holds a parseable timestamp.
fn test_epoch() -> Option<i64> {
    std::env::var("TDS_TEST_EPOCH").ok()?.parse().ok()
}

/// Per-process counter folded into run identifiers so two runs created in the
/// same nanosecond still get distinct ids.
static RUN_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Generate a URL-safe run identifier of at least 12 characters.
///
/// Derived from a SHA-256 digest of (wall clock nanos, pid, counter) and
/// hex-encoded, so the token is filesystem-safe on every platform and never
/// needs escaping in `RUN_DIR=` output lines.
pub fn generate_run_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let counter = RUN_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(counter.to_le_bytes());
    let digest = hasher.finalize();

    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

/// Truncate text to roughly `max_bytes`, keeping the tail and cutting at a
/// line boundary.
pub fn truncate_tail(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }

    let start = content.len() - max_bytes;
    // Find the next newline to avoid cutting mid-line
    let start = content[start..]
        .find('\n')
        .map(|i| start + i + 1)
        .unwrap_or(start);

    format!("(truncated)\n{}", &content[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_iso8601_shape() {
        let now = now_iso8601();
        // 2025-01-01T00:00:00Z
        assert_eq!(now.len(), 20, "unexpected timestamp: {now}");
        assert!(now.ends_with('Z'));
        assert_eq!(&now[4..5], "-");
        assert_eq!(&now[10..11], "T");
    }

    #[test]
    fn test_run_id_length_and_charset() {
        let id = generate_run_id();
        assert!(id.len() >= 12, "run id must be at least 12 chars: {id}");
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_run_ids_are_unique() {
        let a = generate_run_id();
        let b = generate_run_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_tail_small_content() {
        let content = "small log content";
        assert_eq!(truncate_tail(content, 1024), content);
    }

    #[test]
    fn test_truncate_tail_large_content() {
        let content = "line\n".repeat(1000);
        let result = truncate_tail(&content, 100);
        assert!(result.starts_with("(truncated)"));
        assert!(result.len() < 200);
    }
}
