//! Session lock integration via systemd-logind `DBus` interface.
//!
//! Watches the `LockedHint` property of the current session and calls
//! `Session.Lock` to lock it.

use std::env;

use anyhow::Context;
use anyhow::Result;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;
use zbus::Connection;

use super::LockAction;
use super::SessionEvent;

/// `DBus` service and path for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Resolve the session object path for the current session.
pub async fn resolve_session_path(conn: &Connection) -> Result<String> {
    // First try XDG_SESSION_ID if available
    if let Ok(session_id) = env::var("XDG_SESSION_ID") {
        debug!("Using XDG_SESSION_ID: {}", session_id);

        let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
            .await
            .context("Failed to create Manager proxy")?;

        let path: zbus::zvariant::OwnedObjectPath = proxy
            .call("GetSession", &(&session_id,))
            .await
            .context("GetSession call failed")?;

        return Ok(path.to_string());
    }

    debug!("XDG_SESSION_ID not set, trying session aliases");

    for alias in ["self", "auto"] {
        let path = format!("{LOGIND_PATH}/session/{alias}");
        if get_locked_hint(conn, &path).await.is_ok() {
            return Ok(path);
        }
    }

    anyhow::bail!(
        "Could not resolve session path. Set XDG_SESSION_ID or ensure logind session is available."
    )
}

/// Get the `LockedHint` property from a session.
pub async fn get_locked_hint(conn: &Connection, session_path: &str) -> Result<bool> {
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, PROPERTIES_INTERFACE)
        .await
        .context("Failed to create Properties proxy")?;

    let value: zbus::zvariant::OwnedValue = proxy
        .call("Get", &(SESSION_INTERFACE, "LockedHint"))
        .await
        .context("Failed to get LockedHint property")?;

    let locked: bool = value
        .downcast_ref::<bool>()
        .map_err(|_| anyhow::anyhow!("LockedHint is not a boolean"))?;

    Ok(locked)
}

/// Locks the session through `org.freedesktop.login1.Session.Lock`.
///
/// Each call spawns a task on the current tokio runtime and returns at once.
#[derive(Clone)]
pub struct LogindLock {
    conn: Connection,
    session_path: String,
}

impl LogindLock {
    pub fn new(conn: Connection, session_path: String) -> Self {
        Self { conn, session_path }
    }
}

impl LockAction for LogindLock {
    fn lock(&mut self) {
        let conn = self.conn.clone();
        let session_path = self.session_path.clone();

        tokio::spawn(async move {
            match lock_session(&conn, &session_path).await {
                Ok(()) => info!("Lock requested for {}", session_path),
                Err(e) => error!("Failed to lock session: {:#}", e),
            }
        });
    }
}

async fn lock_session(conn: &Connection, session_path: &str) -> Result<()> {
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, SESSION_INTERFACE)
        .await
        .context("Failed to create Session proxy")?;

    proxy
        .call_method("Lock", &())
        .await
        .context("Session.Lock call failed")?;

    Ok(())
}

/// Background task forwarding session lock/unlock notifications.
///
/// Dropping the watcher stops the task.
pub struct SessionWatcher {
    cancel: CancellationToken,
}

impl SessionWatcher {
    /// Subscribe to `LockedHint` changes of the given session.
    ///
    /// A session that is already locked is reported first, so the receiver
    /// starts in sync. An unlocked session sends nothing until it changes.
    pub fn spawn(conn: Connection, session_path: String, tx: mpsc::Sender<SessionEvent>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!("Session watcher cancelled");
                }
                result = watch_locked_hint(&conn, &session_path, &tx) => {
                    match result {
                        Ok(()) => warn!("Session lock notifications ended"),
                        Err(e) => error!("Session watcher failed: {:#}", e),
                    }
                }
            }
        });

        Self { cancel }
    }
}

impl Drop for SessionWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Turns observed `LockedHint` values into session events.
///
/// Only transitions are reported. The property stream repeats the current
/// value when it starts, and an unlocked start is not an unlock.
#[derive(Debug)]
struct LockedHintFilter {
    locked: bool,
}

impl LockedHintFilter {
    /// Start from the value read at startup, returning the event to send for it.
    fn start(locked: bool) -> (Self, Option<SessionEvent>) {
        (Self { locked }, locked.then_some(SessionEvent::Locked))
    }

    fn update(&mut self, locked: bool) -> Option<SessionEvent> {
        if locked == self.locked {
            return None;
        }
        self.locked = locked;
        Some(SessionEvent::from_locked(locked))
    }
}

async fn watch_locked_hint(
    conn: &Connection,
    session_path: &str,
    tx: &mpsc::Sender<SessionEvent>,
) -> Result<()> {
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, SESSION_INTERFACE)
        .await
        .context("Failed to create Session proxy")?;

    let mut changes = proxy.receive_property_changed::<bool>("LockedHint").await;

    let initial = get_locked_hint(conn, session_path).await?;
    info!(
        "Watching lock state of {} (currently {})",
        session_path,
        if initial { "locked" } else { "unlocked" }
    );
    let (mut filter, first) = LockedHintFilter::start(initial);
    if let Some(event) = first
        && tx.send(event).await.is_err()
    {
        return Ok(());
    }

    while let Some(change) = changes.next().await {
        let locked = match change.get().await {
            Ok(locked) => locked,
            Err(e) => {
                warn!("Failed to read LockedHint change: {}", e);
                continue;
            }
        };

        trace!("LockedHint is {}", locked);
        let Some(event) = filter.update(locked) else {
            continue;
        };
        if tx.send(event).await.is_err() {
            debug!("Session event receiver dropped");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;

    const SESSION_PATH: &str = "/org/freedesktop/login1/session/c1";

    /// Stand-in for a logind session object.
    struct FakeSession {
        locked_hint: bool,
        lock_calls: Arc<AtomicUsize>,
    }

    #[zbus::interface(name = "org.freedesktop.login1.Session")]
    impl FakeSession {
        fn lock(&self) {
            self.lock_calls.fetch_add(1, Ordering::SeqCst);
        }

        #[zbus(property)]
        fn locked_hint(&self) -> bool {
            self.locked_hint
        }
    }

    struct FakeLogind {
        // Kept alive for the bus lifetime.
        _daemon: dbus_launch::Daemon,
        server: Connection,
        client: Connection,
        lock_calls: Arc<AtomicUsize>,
    }

    impl FakeLogind {
        /// Start a private bus serving one session, or `None` without `dbus-daemon`.
        async fn start(locked_hint: bool) -> Option<Self> {
            let daemon = match dbus_launch::Launcher::daemon().launch() {
                Ok(daemon) => daemon,
                Err(e) => {
                    eprintln!("skipping: cannot launch dbus-daemon: {e}");
                    return None;
                }
            };

            let lock_calls = Arc::new(AtomicUsize::new(0));
            let session = FakeSession {
                locked_hint,
                lock_calls: lock_calls.clone(),
            };

            let server = zbus::connection::Builder::address(daemon.address())
                .unwrap()
                .name(LOGIND_SERVICE)
                .unwrap()
                .serve_at(SESSION_PATH, session)
                .unwrap()
                .build()
                .await
                .unwrap();
            let client = zbus::connection::Builder::address(daemon.address())
                .unwrap()
                .build()
                .await
                .unwrap();

            Some(Self {
                _daemon: daemon,
                server,
                client,
                lock_calls,
            })
        }

        async fn set_locked_hint(&self, locked: bool) {
            let iface = self
                .server
                .object_server()
                .interface::<_, FakeSession>(SESSION_PATH)
                .await
                .unwrap();
            let mut session = iface.get_mut().await;
            session.locked_hint = locked;
            session
                .locked_hint_changed(iface.signal_emitter())
                .await
                .unwrap();
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<SessionEvent>) -> Option<SessionEvent> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a session event")
    }

    #[test]
    fn test_unlocked_start_sends_nothing() {
        let (_, first) = LockedHintFilter::start(false);
        assert_eq!(first, None);
    }

    #[test]
    fn test_locked_start_reports_lock() {
        let (_, first) = LockedHintFilter::start(true);
        assert_eq!(first, Some(SessionEvent::Locked));
    }

    #[test]
    fn test_filter_reports_transitions_only() {
        let (mut filter, _) = LockedHintFilter::start(false);

        // The stream's first item repeats the startup value.
        assert_eq!(filter.update(false), None);
        assert_eq!(filter.update(true), Some(SessionEvent::Locked));
        assert_eq!(filter.update(true), None);
        assert_eq!(filter.update(false), Some(SessionEvent::Unlocked));
        assert_eq!(filter.update(false), None);
    }

    #[tokio::test]
    async fn test_get_locked_hint() {
        let Some(logind) = FakeLogind::start(true).await else {
            return;
        };

        assert!(get_locked_hint(&logind.client, SESSION_PATH).await.unwrap());
        logind.set_locked_hint(false).await;
        assert!(!get_locked_hint(&logind.client, SESSION_PATH).await.unwrap());
    }

    #[tokio::test]
    async fn test_watcher_forwards_lock_changes() {
        let Some(logind) = FakeLogind::start(true).await else {
            return;
        };

        let (tx, mut rx) = mpsc::channel(16);
        let watcher = SessionWatcher::spawn(logind.client.clone(), SESSION_PATH.to_string(), tx);

        assert_eq!(next_event(&mut rx).await, Some(SessionEvent::Locked));

        logind.set_locked_hint(false).await;
        assert_eq!(next_event(&mut rx).await, Some(SessionEvent::Unlocked));

        logind.set_locked_hint(true).await;
        assert_eq!(next_event(&mut rx).await, Some(SessionEvent::Locked));

        // Dropping the watcher ends the task and closes the channel.
        drop(watcher);
        assert_eq!(next_event(&mut rx).await, None);
    }

    #[tokio::test]
    async fn test_watcher_silent_for_unlocked_start() {
        let Some(logind) = FakeLogind::start(false).await else {
            return;
        };

        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = SessionWatcher::spawn(logind.client.clone(), SESSION_PATH.to_string(), tx);

        let quiet = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert!(quiet.is_err(), "unexpected event: {quiet:?}");

        logind.set_locked_hint(true).await;
        assert_eq!(next_event(&mut rx).await, Some(SessionEvent::Locked));
    }

    #[tokio::test]
    async fn test_logind_lock_calls_session_lock() {
        let Some(logind) = FakeLogind::start(false).await else {
            return;
        };

        let mut lock = LogindLock::new(logind.client.clone(), SESSION_PATH.to_string());
        lock.lock();

        tokio::time::timeout(Duration::from_secs(5), async {
            while logind.lock_calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("Session.Lock was not called");
        assert_eq!(logind.lock_calls.load(Ordering::SeqCst), 1);
    }
}
