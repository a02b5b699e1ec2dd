//! Session lifecycle state shared between a session and its observers
//!
//! A [`SessionHandle`] is the read-only face of a running session: listeners
//! receive one in every callback and callers may clone it freely. The
//! session loop is the only writer; positions and state are published through
//! `watch` channels so readers never see a torn value.

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CdcError, Position, SessionMetrics};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Streaming,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

struct Shared {
    state: watch::Sender<SessionState>,
    position: watch::Sender<Position>,
    checkpoint: watch::Sender<Position>,
    last_error: RwLock<Option<Arc<CdcError>>>,
    server_version: RwLock<Option<String>>,
    stop: Mutex<CancellationToken>,
    metrics: SessionMetrics,
}

/// Read-only view of a session, passed to listener callbacks.
///
/// Cloning is cheap; every clone observes the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .field("position", &self.current_position())
            .finish()
    }
}

impl SessionHandle {
    pub(crate) fn new(source: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (position, _) = watch::channel(Position::Current);
        let (checkpoint, _) = watch::channel(Position::Current);
        Self {
            shared: Arc::new(Shared {
                state,
                position,
                checkpoint,
                last_error: RwLock::new(None),
                server_version: RwLock::new(None),
                stop: Mutex::new(CancellationToken::new()),
                metrics: SessionMetrics::new(source),
            }),
        }
    }

    /// A handle not attached to any connection, for driving listeners directly.
    pub fn detached() -> Self {
        Self::new("detached")
    }

    /// Last fully processed position. `Current` until the handshake resolves it.
    pub fn current_position(&self) -> Position {
        self.shared.position.borrow().clone()
    }

    /// Last transaction boundary whose mutations were all dispatched.
    pub fn checkpoint_position(&self) -> Position {
        self.shared.checkpoint.borrow().clone()
    }

    /// Watch position updates.
    pub fn subscribe_position(&self) -> watch::Receiver<Position> {
        self.shared.position.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Wait until the session enters `target`.
    pub async fn wait_for_state(&self, target: SessionState) {
        let mut rx = self.shared.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|state| *state == target).await;
    }

    /// Error that ended the most recent run, if any.
    pub fn last_error(&self) -> Option<Arc<CdcError>> {
        self.shared
            .last_error
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Version string from the source's greeting.
    pub fn server_version(&self) -> Option<String> {
        self.shared
            .server_version
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.shared.metrics
    }

    /// Ask the running session to stop without waiting for it.
    ///
    /// Safe to call from inside a listener callback, where awaiting the
    /// session's own disconnect would deadlock.
    pub fn request_stop(&self) {
        self.stop_token().cancel();
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.shared
            .stop
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn reset_stop_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.shared.stop.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        token
    }

    pub(crate) fn publish_position(&self, position: Position) {
        self.shared.position.send_replace(position);
    }

    pub(crate) fn publish_checkpoint(&self, position: Position) {
        self.shared.checkpoint.send_replace(position);
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            debug!("Session state {} -> {}", previous, state);
        }
    }

    /// Disconnected → Connecting, or `false` if the session is not idle.
    pub(crate) fn try_begin_connect(&self) -> bool {
        self.shared.state.send_if_modified(|state| {
            if *state == SessionState::Disconnected {
                *state = SessionState::Connecting;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn set_last_error(&self, error: Option<Arc<CdcError>>) {
        *self
            .shared
            .last_error
            .write()
            .unwrap_or_else(|e| e.into_inner()) = error;
    }

    pub(crate) fn set_server_version(&self, version: &str) {
        *self
            .shared
            .server_version
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(version.to_string());
    }
}
