// Typing-signal debounce.
//
// Every keystroke (re)broadcasts "typing"; after a fixed quiet period
// with no keystrokes a single "stopped typing" is due. Timer expirations
// are sequence-stamped so a later keystroke invalidates older timers.

use tokio::time::Duration;

/// Quiet period after the last keystroke before "stopped typing" fires.
pub const TYPING_QUIET_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct TypingTracker {
    quiet_period: Duration,
    /// Bumped on every keystroke; only the matching timeout counts.
    seq: u64,
    composing: bool,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::with_quiet_period(TYPING_QUIET_PERIOD)
    }

    pub fn with_quiet_period(quiet_period: Duration) -> Self {
        TypingTracker {
            quiet_period,
            seq: 0,
            composing: false,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    /// Register a keystroke. Returns the sequence number the caller
    /// should arm the quiet timer with.
    pub fn keystroke(&mut self) -> u64 {
        self.seq += 1;
        self.composing = true;
        self.seq
    }

    /// A quiet timer fired. Returns true when a "stopped typing"
    /// broadcast is due; stale timers from superseded keystrokes are
    /// swallowed.
    pub fn timeout(&mut self, seq: u64) -> bool {
        if seq != self.seq || !self.composing {
            return false;
        }
        self.composing = false;
        true
    }

    /// Forget any composing state, e.g. when the active conversation
    /// changes.
    pub fn reset(&mut self) {
        self.seq += 1;
        self.composing = false;
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new()
    }
}
