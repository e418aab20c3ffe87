//! Status reporting toward the presentation layer
//!
//! The core never renders anything. It pushes [`RouterEvent`]s into a
//! channel; whoever owns the receiver decides how to show them.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Events held for a slow reader before new ones are dropped
const EVENT_BACKLOG: usize = 256;

/// How a status message should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub text: String,
    pub severity: Severity,
}

/// Events emitted by the controller and its background threads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    Status(StatusUpdate),
    /// A keybind capture finished; carries the display name of the key
    KeybindCaptured(String),
}

/// Cloneable sending half, handed to every thread that reports status.
///
/// Each report is also logged at a level matching its severity. Reports
/// never block: once the backlog is full, new events are only logged.
#[derive(Clone)]
pub struct StatusReporter {
    tx: Sender<RouterEvent>,
}

impl StatusReporter {
    /// Create a reporter and the receiver the presentation layer reads from
    pub fn channel() -> (Self, Receiver<RouterEvent>) {
        let (tx, rx) = bounded(EVENT_BACKLOG);
        (Self { tx }, rx)
    }

    pub fn report(&self, severity: Severity, text: impl Into<String>) {
        let text = text.into();
        match severity {
            Severity::Normal | Severity::Success => log::info!("Status: {}", text),
            Severity::Warning => log::warn!("Status: {}", text),
            Severity::Error => log::error!("Status: {}", text),
        }
        self.send(RouterEvent::Status(StatusUpdate { text, severity }));
    }

    pub fn normal(&self, text: impl Into<String>) {
        self.report(Severity::Normal, text);
    }

    pub fn success(&self, text: impl Into<String>) {
        self.report(Severity::Success, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.report(Severity::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.report(Severity::Error, text);
    }

    pub fn keybind_captured(&self, name: impl Into<String>) {
        let name = name.into();
        log::info!("Keybind captured: {}", name);
        self.send(RouterEvent::KeybindCaptured(name));
    }

    fn send(&self, event: RouterEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => log::debug!("Event backlog full, dropping {:?}", event),
            // Nobody is listening any more
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}
