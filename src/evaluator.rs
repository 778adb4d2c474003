//! Wait/assert predicate engine.
//!
//! All three lanes evaluate their waits and assertions here, against a
//! rolling [`Snapshot`] of terminal content with two surfaces: the visible
//! **screen** (cursor positioning stripped, line boundaries retained) and the
//! **stream tail** (the last kilobytes of raw output). The evaluator samples
//! at a bounded cadence against a monotonic clock; between ticks no forward
//! progress is made. It only signals - recovery is the lane's problem.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use sha2::{Digest, Sha256};

use crate::screenplay::WaitMode;

/// Sampling cadence for wait predicates.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Default deadline when neither the action nor the scenario declares one.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Bound on the stream tail surface.
pub const STREAM_TAIL_CAPACITY: usize = 64 * 1024;

/// Compile a predicate regex in the dialect shared by every lane: multiline,
/// linear-time.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).multi_line(true).build()
}

/// Stable digest of the screen surface, used by `wait_stable`.
pub fn screen_hash(screen: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(screen.as_bytes());
    hasher.finalize().into()
}

/// Bounded buffer of recent raw output.
#[derive(Debug, Default)]
pub struct StreamTail {
    buf: VecDeque<u8>,
}

impl StreamTail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw output, discarding the oldest bytes past capacity.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
        while self.buf.len() > STREAM_TAIL_CAPACITY {
            self.buf.pop_front();
        }
    }

    pub fn as_text(&self) -> String {
        let (a, b) = self.buf.as_slices();
        let mut bytes = Vec::with_capacity(self.buf.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// One observation of terminal content.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Visible grid, lines joined with `\n`. Trailing whitespace is NOT
    /// stripped before matching.
    pub screen: String,
    /// Last kilobytes of raw output.
    pub stream_tail: String,
    /// Whether the underlying stream has closed. When set, one final
    /// evaluation happens before a timeout is declared.
    pub closed: bool,
}

impl Snapshot {
    /// The final non-empty line of the screen, for `wait_mode: line`.
    pub fn last_nonempty_line(&self) -> Option<&str> {
        self.screen.lines().rev().find(|line| !line.trim().is_empty())
    }
}

/// A compiled wait predicate.
#[derive(Debug)]
pub enum WaitPredicate {
    /// `wait_for`: plain-text containment on the selected surface.
    Contains { target: String, mode: WaitMode },
    /// `wait_screen_regex`
    ScreenRegex(Regex),
    /// `wait_line_regex`
    LineRegex(Regex),
    /// `wait_stable`: no screen change for the duration.
    Stable { duration: Duration },
}

impl WaitPredicate {
    /// Evaluate against one snapshot. Returns the matched text on success.
    /// `Stable` is handled by the sampling loop, not here.
    fn check(&self, snap: &Snapshot) -> Option<String> {
        match self {
            WaitPredicate::Contains { target, mode } => {
                let haystack = match mode {
                    WaitMode::Default => snap.stream_tail.as_str(),
                    WaitMode::Screen => snap.screen.as_str(),
                    WaitMode::Line => snap.last_nonempty_line().unwrap_or(""),
                };
                haystack.contains(target.as_str()).then(|| target.clone())
            }
            WaitPredicate::ScreenRegex(re) => {
                re.find(&snap.screen).map(|m| m.as_str().to_string())
            }
            WaitPredicate::LineRegex(re) => {
                let line = snap.last_nonempty_line().unwrap_or("");
                re.find(line).map(|m| m.as_str().to_string())
            }
            WaitPredicate::Stable { .. } => None,
        }
    }
}

/// Why a wait did not succeed.
#[derive(Debug)]
pub enum WaitError {
    TimedOut { waited: Duration },
    Cancelled,
    Io(std::io::Error),
}

/// A successful wait.
#[derive(Debug)]
pub struct WaitOutcome {
    /// The matched text, when the predicate has one.
    pub matched: Option<String>,
    pub waited: Duration,
}

/// Evaluate an assertion against a snapshot. Assertions are instantaneous:
/// they look at the current screen exactly once.
///
/// Returns the matched text for positive assertions, `None` for satisfied
/// negative assertions, or an error string naming the unmet predicate.
pub fn check_assertion(
    snap: &Snapshot,
    regex: &Regex,
    negated: bool,
) -> Result<Option<String>, String> {
    let found = regex.find(&snap.screen).map(|m| m.as_str().to_string());
    match (negated, found) {
        (false, Some(text)) => Ok(Some(text)),
        (false, None) => Err(format!(
            "assert_screen_regex '{}' did not match the screen",
            regex.as_str()
        )),
        (true, None) => Ok(None),
        (true, Some(text)) => Err(format!(
            "assert_not_screen_regex '{}' matched '{}'",
            regex.as_str(),
            text
        )),
    }
}

/// Sample a wait predicate until it holds, the deadline passes, or the run is
/// cancelled.
///
/// `fetch` refreshes the snapshot; it is the single suspension point for the
/// lane. The deadline comes from a monotonic clock and is never silently
/// extended.
pub fn evaluate_wait(
    predicate: &WaitPredicate,
    timeout: Duration,
    fetch: &mut dyn FnMut() -> std::io::Result<Snapshot>,
    cancelled: &AtomicBool,
) -> Result<WaitOutcome, WaitError> {
    let start = Instant::now();
    let deadline = start + timeout;

    // wait_stable bookkeeping
    let mut last_hash: Option<[u8; 32]> = None;
    let mut stable_since = start;

    loop {
        if cancelled.load(Ordering::Relaxed) {
            return Err(WaitError::Cancelled);
        }

        let snap = fetch().map_err(WaitError::Io)?;
        let now = Instant::now();

        match predicate {
            WaitPredicate::Stable { duration } => {
                let hash = screen_hash(&snap.screen);
                match last_hash {
                    Some(previous) if previous == hash => {
                        if now.duration_since(stable_since) >= *duration {
                            return Ok(WaitOutcome {
                                matched: None,
                                waited: now.duration_since(start),
                            });
                        }
                    }
                    _ => {
                        last_hash = Some(hash);
                        stable_since = now;
                    }
                }
            }
            other => {
                if let Some(matched) = other.check(&snap) {
                    return Ok(WaitOutcome {
                        matched: Some(matched),
                        waited: now.duration_since(start),
                    });
                }
            }
        }

        // A closed stream cannot produce new content; the evaluation above
        // was the final one.
        if snap.closed && !matches!(predicate, WaitPredicate::Stable { .. }) {
            return Err(WaitError::TimedOut {
                waited: now.duration_since(start),
            });
        }

        if now >= deadline {
            return Err(WaitError::TimedOut {
                waited: now.duration_since(start),
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        std::thread::sleep(SAMPLE_INTERVAL.min(remaining));
    }
}
