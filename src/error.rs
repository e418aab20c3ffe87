//! Error types
//!
//! - [`BleepError`]: returned synchronously on the foreground start/stop path
//! - [`TriggerError`]: raised inside a trigger source on the background thread
//!   and turned into a status update, never propagated across threads

use thiserror::Error;

/// Errors surfaced to the caller of the controller
#[derive(Debug, Error)]
pub enum BleepError {
    /// The selected input and output devices share none of the candidate rates
    #[error("no common sample rate found for devices (tried {candidates:?})")]
    NoCommonSampleRate { candidates: Vec<u32> },

    #[error("audio device [{id}] not found")]
    DeviceNotFound { id: usize },

    #[error("failed to open audio stream: {0}")]
    DeviceOpen(String),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("audio backend error: {0}")]
    Backend(String),

    #[error("keybind capture already in progress")]
    CaptureInProgress,

    #[error("keyboard hook unavailable: {0}")]
    KeyboardHook(String),
}

/// Errors from a trigger source
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TriggerError {
    /// Port missing, busy or unplugged. Recoverable.
    #[error("serial transport error: {0}")]
    Transport(String),

    /// Unexpected failure while processing serial input. Ends the serial loop.
    #[error("serial protocol error: {0}")]
    Protocol(String),

    #[error("keyboard hook error: {0}")]
    KeyboardHook(String),
}

impl From<serialport::Error> for TriggerError {
    fn from(e: serialport::Error) -> Self {
        TriggerError::Transport(e.to_string())
    }
}

impl From<TriggerError> for BleepError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::KeyboardHook(msg) => BleepError::KeyboardHook(msg),
            other => BleepError::Backend(other.to_string()),
        }
    }
}
