//! Trigger supervisor
//!
//! Runs on its own thread for the lifetime of a routing session:
//! probe the serial port, fall back to the keybind when it is absent,
//! and make sure the tone is off whenever the session winds down.
//!
//! ```text
//! IDLE -> PROBING -> SERIAL_ACTIVE ----------------------> STOPPED
//!                 \                 \ (protocol error)    ^
//!                  \                 v                    |
//!                   `-------------> KEYBIND_ACTIVE -------'
//! ```
//!
//! The mode picked at probe time is sticky: a serial disconnect is retried
//! by the serial source itself, never downgraded to the keybind.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use super::{SharedMode, TriggerContext, TriggerMode, TriggerSource};
use crate::error::BleepError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Probing,
    SerialActive,
    KeybindActive,
    Stopped,
}

impl SupervisorState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Probing,
            2 => Self::SerialActive,
            3 => Self::KeybindActive,
            4 => Self::Stopped,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Probing => 1,
            Self::SerialActive => 2,
            Self::KeybindActive => 3,
            Self::Stopped => 4,
        }
    }
}

#[derive(Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn get(&self) -> SupervisorState {
        SupervisorState::from_u8(self.0.load(Ordering::Relaxed))
    }

    fn set(&self, state: SupervisorState) {
        log::debug!("Trigger supervisor: {:?}", state);
        self.0.store(state.as_u8(), Ordering::Relaxed);
    }
}

/// Signals the supervisor thread's exit, even if it panics
struct ExitGuard(Sender<()>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Owner of the background trigger thread
pub struct TriggerSupervisor {
    state: SharedState,
    ctx: TriggerContext,
    handle: Option<JoinHandle<()>>,
    exited: Receiver<()>,
}

impl TriggerSupervisor {
    /// Start supervising on a new thread
    pub fn spawn(
        serial: Box<dyn TriggerSource>,
        keybind: Box<dyn TriggerSource>,
        ctx: TriggerContext,
        mode: SharedMode,
    ) -> Result<Self, BleepError> {
        let state = SharedState(Arc::new(AtomicU8::new(SupervisorState::Idle.as_u8())));
        let (exit_tx, exited) = bounded(1);

        let thread_state = state.clone();
        let thread_ctx = ctx.clone();
        let handle = std::thread::Builder::new()
            .name("openbleep-trigger".to_string())
            .spawn(move || {
                let _guard = ExitGuard(exit_tx);
                supervise(serial, keybind, &thread_ctx, &thread_state, &mode);
            })
            .map_err(|e| BleepError::Backend(format!("spawning trigger thread: {}", e)))?;

        Ok(Self {
            state,
            ctx,
            handle: Some(handle),
            exited,
        })
    }

    pub fn state(&self) -> SupervisorState {
        self.state.get()
    }

    /// Stop the active source and wait up to `timeout` for the thread.
    ///
    /// The tone flag is off when this returns. Returns `false` if the thread
    /// had to be left behind. Calling it again is a no-op.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.take() else {
            self.ctx.flag.set(false);
            return true;
        };

        self.ctx.stop.request();
        self.ctx.flag.set(false);

        let joined = match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    log::error!("Trigger thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Trigger thread did not stop within {:?}; detaching it", timeout);
                false
            }
        };

        // The source may have written the flag while winding down
        self.ctx.flag.set(false);
        self.state.set(SupervisorState::Stopped);
        joined
    }
}

impl Drop for TriggerSupervisor {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(1));
    }
}

fn supervise(
    mut serial: Box<dyn TriggerSource>,
    mut keybind: Box<dyn TriggerSource>,
    ctx: &TriggerContext,
    state: &SharedState,
    mode: &SharedMode,
) {
    state.set(SupervisorState::Probing);
    let port = serial.name();

    match serial.start() {
        Ok(()) => {
            state.set(SupervisorState::SerialActive);
            mode.set(TriggerMode::Serial);
            ctx.status.success(format!("Running (listening on {})", port));

            let result = serial.run(ctx);
            serial.stop();
            match result {
                Ok(()) => {
                    ctx.flag.set(false);
                    return;
                }
                Err(e) => {
                    ctx.flag.set(false);
                    ctx.status.error(format!("Serial trigger failed: {}", e));
                }
            }
        }
        Err(e) => log::info!("Serial probe on {} failed: {}", port, e),
    }

    if ctx.stop.is_requested() {
        return;
    }

    state.set(SupervisorState::KeybindActive);
    mode.set(TriggerMode::Keybind);
    ctx.status.warning(format!("{} not found. Use keybind mode.", port));

    if let Err(e) = keybind.start() {
        ctx.status.error(format!("Keybind mode unavailable: {}", e));
        return;
    }
    if let Err(e) = keybind.run(ctx) {
        ctx.status.error(format!("Keybind listener failed: {}", e));
    }
    keybind.stop();
    ctx.flag.set(false);
}
