//! Domain types shared by the idle lock engine and its collaborators.

/// Free-running millisecond counter value.
///
/// Wraps at the unsigned 32-bit boundary, roughly every 49.7 days.
pub type Tick = u32;

/// Hard floor below which the engine never locks, whatever the configured timeout.
pub const MIN_IDLE_BEFORE_LOCK_MS: u32 = 60_000;

/// One reading from the idle sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleSample {
    /// Tick at which the last user input was seen.
    pub last_input_tick: Tick,

    /// Whether a screensaver is running right now.
    pub screen_saver_running: bool,

    /// Current tick.
    pub now_tick: Tick,
}

impl IdleSample {
    /// Create a new sample.
    pub fn new(last_input_tick: Tick, screen_saver_running: bool, now_tick: Tick) -> Self {
        Self {
            last_input_tick,
            screen_saver_running,
            now_tick,
        }
    }

    /// Milliseconds since the last user input.
    pub fn idle_ms(&self) -> u32 {
        elapsed_ticks(self.last_input_tick, self.now_tick)
    }
}

/// Milliseconds elapsed from `since` to `now`, tolerating one counter wraparound.
pub fn elapsed_ticks(since: Tick, now: Tick) -> u32 {
    if since <= now {
        now - since
    } else {
        (Tick::MAX - since) + 1 + now
    }
}

/// A change to the persisted configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// Lock timeout in milliseconds.
    Timeout(u32),
    /// Whether locking requires prior screensaver activation.
    RequireScreenSaver(bool),
    /// Whether idle locking is enabled at all.
    Enabled(bool),
}

/// Everything that can drive the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Periodic evaluation tick.
    Poll,
    /// The session reported it is locked.
    SessionLocked,
    /// The session reported it is unlocked.
    SessionUnlocked,
    /// A configuration setter was invoked.
    ConfigChanged(ConfigChange),
}

/// Why an evaluation did not lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    /// Idle for less than [`MIN_IDLE_BEFORE_LOCK_MS`].
    BelowSafetyFloor,
    /// Idle for less than the configured timeout.
    BelowTimeout,
    /// Screensaver required but not seen during this idle stretch.
    AwaitingScreenSaver,
    /// Session is already locked.
    AlreadyLocked,
}

impl HoldReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BelowSafetyFloor => "below safety floor",
            Self::BelowTimeout => "below timeout",
            Self::AwaitingScreenSaver => "awaiting screensaver",
            Self::AlreadyLocked => "already locked",
        }
    }
}

/// Outcome of a single evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Idle locking is disabled; nothing was sampled.
    Disabled,
    /// The lock action was issued.
    Locked { idle_ms: u32 },
    /// No lock this cycle.
    Held { idle_ms: u32, reason: HoldReason },
}

impl Evaluation {
    /// Returns true if this evaluation issued a lock.
    pub fn is_lock(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}
