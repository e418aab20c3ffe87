//! Trigger sources - what turns the bleep on and off
//!
//! This module provides:
//! - `ToneFlag`, the single boolean crossing into the audio thread
//! - `TriggerSource` trait and its two implementations (serial, keybind)
//! - `TriggerSupervisor`, which picks a source and runs it on a background thread

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::TriggerError;
use crate::status::StatusReporter;

#[cfg(feature = "keyboard-hook")]
mod hook;
mod keybind;
mod serial;
mod supervisor;

#[cfg(feature = "keyboard-hook")]
pub use hook::GlobalKeyboard;
pub use keybind::{
    Key, KeyBroadcast, KeyCapture, KeyEvent, KeyEventSource, KeySubscription, KeyTarget, KeybindTrigger, NoKeyboard,
};
pub use serial::{parse_line, SerialOpener, SerialTrigger, SystemSerial};
pub use supervisor::{SupervisorState, TriggerSupervisor};

/// The platform keyboard, or a stand-in that always refuses
pub fn system_keyboard() -> Arc<dyn KeyEventSource> {
    #[cfg(feature = "keyboard-hook")]
    {
        GlobalKeyboard::shared()
    }
    #[cfg(not(feature = "keyboard-hook"))]
    {
        log::debug!("Built without keyboard-hook; keybind mode is unavailable");
        Arc::new(NoKeyboard)
    }
}

/// Press/release reported by a trigger source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Pressed,
    Released,
}

/// Whether the tone replaces the passthrough audio.
///
/// Lock-free; the audio callback reads it once per buffer.
#[derive(Clone, Debug, Default)]
pub struct ToneFlag {
    active: Arc<AtomicBool>,
}

impl ToneFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn apply(&self, event: TriggerEvent) {
        self.set(event == TriggerEvent::Pressed);
    }
}

/// Which source drives the flag for the current session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Uninitialized,
    Serial,
    Keybind,
}

/// `TriggerMode` readable from any thread
#[derive(Clone, Debug)]
pub struct SharedMode {
    value: Arc<AtomicU8>,
}

impl SharedMode {
    pub fn new() -> Self {
        Self {
            value: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn get(&self) -> TriggerMode {
        match self.value.load(Ordering::Relaxed) {
            1 => TriggerMode::Serial,
            2 => TriggerMode::Keybind,
            _ => TriggerMode::Uninitialized,
        }
    }

    pub fn set(&self, mode: TriggerMode) {
        let value = match mode {
            TriggerMode::Uninitialized => 0,
            TriggerMode::Serial => 1,
            TriggerMode::Keybind => 2,
        };
        self.value.store(value, Ordering::Relaxed);
    }
}

impl Default for SharedMode {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative stop request for background loops.
///
/// Loops check it at every natural wake point (read timeout, poll interval).
#[derive(Clone, Debug, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Relaxed);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early if a stop is requested.
    ///
    /// Returns `true` if a stop was requested.
    pub fn sleep(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(10);
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

/// Everything a running source needs from its session
#[derive(Clone)]
pub struct TriggerContext {
    pub flag: ToneFlag,
    pub stop: StopSignal,
    pub status: StatusReporter,
}

/// A source of press/release events.
///
/// `start` opens the underlying device; `run` blocks on the source loop
/// until the stop signal is raised (`Ok`) or the source gives up (`Err`);
/// `stop` releases whatever `start` acquired. At most one source runs per
/// session.
pub trait TriggerSource: Send {
    /// Human readable name of the endpoint (port name, "keyboard")
    fn name(&self) -> String;

    fn start(&mut self) -> Result<(), TriggerError>;

    fn run(&mut self, ctx: &TriggerContext) -> Result<(), TriggerError>;

    fn stop(&mut self);
}
