//! Throttle and debounce combinators for network pacing.
//!
//! Each rate policy used by the app is a single declared constant here, and
//! the combinators take an explicit `now` in milliseconds so callers (and
//! tests) control the clock.

/// Cursor presence broadcast interval.
pub const CURSOR_THROTTLE_MS: i64 = 50;
/// In-progress stroke broadcast interval (~10 updates/sec).
pub const STROKE_PREVIEW_THROTTLE_MS: i64 = 100;
/// Drag position network propagation interval (~10 updates/sec).
pub const DRAG_SYNC_THROTTLE_MS: i64 = 100;
/// Quiet period before a coalesced stroke update is flushed.
pub const UPDATE_DEBOUNCE_MS: i64 = 100;
/// Quiet period for color-picker drags.
pub const COLOR_SYNC_DEBOUNCE_MS: i64 = 300;

/// Leading-edge throttle: at most one firing per `interval_ms` window.
///
/// The first call always fires, so local feedback never waits for the
/// window to elapse.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval_ms: i64,
    last_fired: Option<i64>,
}

impl Throttle {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            last_fired: None,
        }
    }

    /// True if a call at `now_ms` may fire; records the firing when it does.
    pub fn should_fire(&mut self, now_ms: i64) -> bool {
        match self.last_fired {
            Some(last) if now_ms - last < self.interval_ms => false,
            _ => {
                self.last_fired = Some(now_ms);
                true
            }
        }
    }

    /// Forget the last firing so the next call fires immediately.
    pub fn reset(&mut self) {
        self.last_fired = None;
    }
}

/// Trailing-edge debounce: collapses a burst of calls into one firing after
/// `quiet_ms` of silence. Re-arming replaces the pending deadline, it never
/// stacks timers.
#[derive(Debug, Clone)]
pub struct Debounce {
    quiet_ms: i64,
    deadline: Option<i64>,
}

impl Debounce {
    pub fn new(quiet_ms: i64) -> Self {
        Self {
            quiet_ms,
            deadline: None,
        }
    }

    /// Register a call at `now_ms`, pushing the deadline out.
    pub fn poke(&mut self, now_ms: i64) {
        self.deadline = Some(now_ms + self.quiet_ms);
    }

    /// True once the quiet period has elapsed; clears the pending state.
    pub fn fire_if_due(&mut self, now_ms: i64) -> bool {
        match self.deadline {
            Some(deadline) if now_ms >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Whether a firing is still pending.
    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Drop any pending firing.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
