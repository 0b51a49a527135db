//! Idle sampling via the X11 `MIT-SCREEN-SAVER` extension.
//!
//! `QueryInfo` on the root window reports milliseconds since the last user
//! input and whether the server's screensaver is currently on.

use tracing::info;
use tracing::trace;
use x11rb::connection::Connection;
use x11rb::connection::RequestConnection;
use x11rb::protocol::screensaver;
use x11rb::protocol::screensaver::ConnectionExt as _;
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::IdleSampleError;
use super::IdleSampler;
use super::TickClock;
use crate::domain::IdleSample;
use crate::domain::Tick;

/// Idle sampler backed by an X11 display connection.
pub struct X11IdleSampler {
    conn: RustConnection,
    root: Window,
    clock: TickClock,
}

impl X11IdleSampler {
    /// Connect to the display named by `DISPLAY` and verify the extension.
    pub fn connect(clock: TickClock) -> Result<Self, IdleSampleError> {
        let (conn, screen_num) = RustConnection::connect(None)
            .map_err(|e| IdleSampleError::ConnectionFailed(e.to_string()))?;

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .map(|screen| screen.root)
            .ok_or_else(|| {
                IdleSampleError::ConnectionFailed(format!("screen {screen_num} not found"))
            })?;

        let extension = conn
            .extension_information(screensaver::X11_EXTENSION_NAME)
            .map_err(|e| IdleSampleError::ConnectionFailed(e.to_string()))?;
        if extension.is_none() {
            return Err(IdleSampleError::ExtensionMissing(
                screensaver::X11_EXTENSION_NAME.to_string(),
            ));
        }

        let mut sampler = Self { conn, root, clock };

        // A server that cannot answer QueryInfo fails here, not on the first poll.
        let probe = sampler.sample()?;
        info!(
            "Connected to X11 display (screen {}, idle {} ms)",
            screen_num,
            probe.idle_ms()
        );

        Ok(sampler)
    }

    /// Get diagnostic information about the X11 environment.
    pub fn get_diagnostics() -> Vec<String> {
        let mut diags = Vec::new();

        match std::env::var("DISPLAY") {
            Ok(v) => diags.push(format!("DISPLAY={v}")),
            Err(_) => diags.push("DISPLAY: NOT SET".to_string()),
        }

        match std::env::var("XDG_SESSION_TYPE") {
            Ok(v) => diags.push(format!("XDG_SESSION_TYPE={v}")),
            Err(_) => diags.push("XDG_SESSION_TYPE: NOT SET".to_string()),
        }

        diags
    }
}

impl IdleSampler for X11IdleSampler {
    fn sample(&mut self) -> Result<IdleSample, IdleSampleError> {
        let reply = self
            .conn
            .screensaver_query_info(self.root)
            .map_err(|e| IdleSampleError::QueryFailed(e.to_string()))?
            .reply()
            .map_err(|e| IdleSampleError::QueryFailed(e.to_string()))?;

        let now_tick = self.clock.now();
        let last_input_tick = now_tick.wrapping_sub(reply.ms_since_user_input);
        let screen_saver_running = u8::from(reply.state) == u8::from(screensaver::State::ON);

        trace!(
            "X11 idle query: ms_since_user_input={}, state={}, saver_window={}",
            reply.ms_since_user_input,
            u8::from(reply.state),
            reply.saver_window
        );

        Ok(IdleSample::new(
            last_input_tick,
            screen_saver_running,
            now_tick,
        ))
    }

    fn now_tick(&self) -> Tick {
        self.clock.now()
    }
}
