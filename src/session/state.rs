//! Session state machine and the single in-flight operation guard

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::session::error::SessionError;

/// Lifecycle state of a test host session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No usable host connection (never bound, closed, or torn down)
    Disconnected,
    /// Host connection bound, version not yet negotiated
    Connected,
    /// Handshake succeeded; ready for one operation
    VersionChecked,
    /// An operation is running
    OperationInFlight,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connected => "Connected",
            SessionState::VersionChecked => "VersionChecked",
            SessionState::OperationInFlight => "OperationInFlight",
        };
        f.write_str(name)
    }
}

/// Thread-safe holder of the session state
#[derive(Debug, Clone)]
pub struct SessionStateCell {
    inner: Arc<Mutex<SessionState>>,
}

impl SessionStateCell {
    pub fn new(initial: SessionState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn get(&self) -> SessionState {
        // Intentional .unwrap() - poisoned mutex indicates serious bug, panic is appropriate
        *self.inner.lock().unwrap()
    }

    pub fn set(&self, state: SessionState) {
        *self.inner.lock().unwrap() = state;
    }

    /// Move VersionChecked -> OperationInFlight
    ///
    /// The returned guard moves the state back when dropped, unless the
    /// session was torn down meanwhile.
    pub fn begin_operation(&self) -> Result<OperationGuard, SessionError> {
        let mut state = self.inner.lock().unwrap();
        match *state {
            SessionState::VersionChecked => {
                *state = SessionState::OperationInFlight;
                Ok(OperationGuard {
                    cell: self.clone(),
                })
            }
            SessionState::OperationInFlight => Err(SessionError::SessionBusy),
            current => Err(SessionError::invalid_state(
                current,
                SessionState::VersionChecked,
            )),
        }
    }
}

/// Marks one operation as in flight for its lifetime
#[derive(Debug)]
pub struct OperationGuard {
    cell: SessionStateCell,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.cell.inner.lock() {
            if *state == SessionState::OperationInFlight {
                *state = SessionState::VersionChecked;
            }
        }
    }
}
