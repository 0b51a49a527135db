//! Idle lock state machine.
//!
//! Reconciles idle samples, screensaver state and session lock/unlock
//! notifications into a lock / no-lock decision on every poll.
//!
//! The engine is single-owner and has no internal locking. Callers serialize
//! access by feeding every [`EngineEvent`] through one task.

use thiserror::Error;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::domain::ConfigChange;
use crate::domain::EngineEvent;
use crate::domain::Evaluation;
use crate::domain::HoldReason;
use crate::domain::MIN_IDLE_BEFORE_LOCK_MS;
use crate::domain::Tick;
use crate::domain::elapsed_ticks;
use crate::idle::IdleSampleError;
use crate::idle::IdleSampler;
use crate::session::LockAction;
use crate::settings::Settings;
use crate::settings::SettingsStore;

/// Errors surfaced by an evaluation cycle.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Idle sample unavailable: {0}")]
    IdleSampleUnavailable(#[from] IdleSampleError),
}

/// Transient per-session state. Never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Idle duration at which the screensaver was first seen this stretch, 0 if not seen.
    pub screen_saver_active_at: u32,

    /// Whether the session last reported itself locked.
    pub is_locked: bool,

    /// Tick of the most recent unlock notification, until input newer than it is seen.
    pub unlocked_at_tick: Option<Tick>,
}

/// Coarse view of [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    IdleTracking,
    ScreenSaverSeen,
    Locked,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IdleTracking => "idle-tracking",
            Self::ScreenSaverSeen => "screensaver-seen",
            Self::Locked => "locked",
        }
    }
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        if self.is_locked {
            Phase::Locked
        } else if self.screen_saver_active_at != 0 {
            Phase::ScreenSaverSeen
        } else {
            Phase::IdleTracking
        }
    }
}

/// Decide whether to lock, given the idle duration for this cycle.
fn decide(idle_ms: u32, settings: &Settings, state: &SessionState) -> Option<HoldReason> {
    if idle_ms <= MIN_IDLE_BEFORE_LOCK_MS {
        Some(HoldReason::BelowSafetyFloor)
    } else if idle_ms < settings.lock_timeout_ms {
        Some(HoldReason::BelowTimeout)
    } else if settings.require_screen_saver && state.screen_saver_active_at == 0 {
        Some(HoldReason::AwaitingScreenSaver)
    } else if state.is_locked {
        // Locking again while a screensaver-driven lock is in progress can cancel it.
        Some(HoldReason::AlreadyLocked)
    } else {
        None
    }
}

/// Idle lock engine.
pub struct IdleLockEngine {
    store: Box<dyn SettingsStore>,
    sampler: Box<dyn IdleSampler>,
    locker: Box<dyn LockAction>,
    settings: Settings,
    state: SessionState,
}

impl IdleLockEngine {
    /// Create an engine, loading settings from the store.
    pub fn new(
        store: Box<dyn SettingsStore>,
        sampler: Box<dyn IdleSampler>,
        locker: Box<dyn LockAction>,
    ) -> Self {
        let settings = Settings::load(store.as_ref());
        info!(
            "Settings loaded: timeout={} min, require_screensaver={}, enabled={}",
            settings.timeout_minutes(),
            settings.require_screen_saver,
            settings.enabled
        );

        Self {
            store,
            sampler,
            locker,
            settings,
            state: SessionState::default(),
        }
    }

    /// Feed one event to the engine. Only [`EngineEvent::Poll`] yields an evaluation.
    pub fn handle(&mut self, event: EngineEvent) -> Result<Option<Evaluation>, EngineError> {
        match event {
            EngineEvent::Poll => self.evaluate().map(Some),
            EngineEvent::SessionLocked => {
                self.report_lock();
                Ok(None)
            }
            EngineEvent::SessionUnlocked => {
                self.report_unlock();
                Ok(None)
            }
            EngineEvent::ConfigChanged(change) => {
                self.apply(change);
                Ok(None)
            }
        }
    }

    /// Sample idle state and lock if the configured conditions hold.
    pub fn evaluate(&mut self) -> Result<Evaluation, EngineError> {
        if !self.settings.enabled {
            return Ok(Evaluation::Disabled);
        }

        let sample = self.sampler.sample()?;

        // The last action is never earlier than the last unlock. Once input
        // newer than the unlock is seen the floor is spent; dropping it keeps
        // the tick difference from wrapping into a short idle.
        let mut idle_ms = sample.idle_ms();
        if let Some(unlocked) = self.state.unlocked_at_tick {
            let since_unlock = elapsed_ticks(unlocked, sample.now_tick);
            if idle_ms <= since_unlock {
                trace!("Input seen since unlock, clearing unlock floor");
                self.state.unlocked_at_tick = None;
            } else {
                idle_ms = since_unlock;
            }
        }

        // The screensaver may stop being reported once the monitor powers
        // down, so remember that it ran at some point during this stretch.
        if self.state.screen_saver_active_at == 0 && sample.screen_saver_running {
            info!("Screensaver start detected (idle {} ms)", idle_ms);
            self.state.screen_saver_active_at = idle_ms;
        } else if idle_ms < self.state.screen_saver_active_at {
            debug!(
                "Activity since screensaver start (idle {} ms < {} ms)",
                idle_ms, self.state.screen_saver_active_at
            );
            self.state.screen_saver_active_at = 0;
        }

        if let Some(reason) = decide(idle_ms, &self.settings, &self.state) {
            trace!("Not locking: idle {} ms, {}", idle_ms, reason.as_str());
            return Ok(Evaluation::Held { idle_ms, reason });
        }

        info!(
            "Idle for {} s (timeout {} s), locking session",
            idle_ms / 1000,
            self.settings.lock_timeout_ms / 1000
        );
        self.locker.lock();
        Ok(Evaluation::Locked { idle_ms })
    }

    /// The session reported that it is locked.
    pub fn report_lock(&mut self) {
        if !self.state.is_locked {
            info!("Session locked");
        }
        self.state.is_locked = true;
    }

    /// The session reported that it is unlocked.
    pub fn report_unlock(&mut self) {
        if self.state.is_locked {
            info!("Session unlocked");
        }
        self.state.is_locked = false;
        self.state.unlocked_at_tick = Some(self.sampler.now_tick());
        self.state.screen_saver_active_at = 0;
    }

    /// Set the lock timeout in milliseconds and persist it.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.apply(ConfigChange::Timeout(timeout_ms));
    }

    /// Require (or not) screensaver activation before locking, and persist it.
    pub fn require_screensaver(&mut self, require: bool) {
        self.apply(ConfigChange::RequireScreenSaver(require));
    }

    /// Enable or disable idle locking, and persist it.
    pub fn enable(&mut self, enabled: bool) {
        self.apply(ConfigChange::Enabled(enabled));
    }

    fn apply(&mut self, change: ConfigChange) {
        info!("Setting changed: {:?}", change);
        self.settings.apply(change);

        // In-memory state stays authoritative even if persisting fails.
        if let Err(e) = self.settings.save(self.store.as_mut()) {
            warn!("Failed to save settings: {}", e);
        }
    }

    /// Re-read settings from the store without writing them back.
    pub fn reload(&mut self) {
        let settings = Settings::load(self.store.as_ref());
        if settings == self.settings {
            debug!("Settings unchanged on reload");
        } else {
            info!(
                "Settings reloaded: timeout={} min, require_screensaver={}, enabled={}",
                settings.timeout_minutes(),
                settings.require_screen_saver,
                settings.enabled
            );
            self.settings = settings;
        }
    }

    pub fn timeout_ms(&self) -> u32 {
        self.settings.lock_timeout_ms
    }

    pub fn is_screen_saver_required(&self) -> bool {
        self.settings.require_screen_saver
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }
}
