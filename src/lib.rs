//! openbleep - live audio passthrough with a triggered bleep
//!
//! Routes one audio input to one output and, while a trigger is held,
//! replaces the input with a sine tone. The trigger is a serial beep box
//! when one is connected, otherwise a global keybind.
//!
//! ```no_run
//! use openbleep::{BleepConfig, BleepRouter};
//!
//! let mut router = BleepRouter::new(BleepConfig::load());
//! let devices = router.list_audio_devices()?;
//! router.start_routing(devices.inputs[0].id, devices.outputs[0].id, 0.25)?;
//! // ...
//! router.stop_routing();
//! # Ok::<(), openbleep::BleepError>(())
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod status;
pub mod trigger;

#[cfg(test)]
mod test_support;

pub use config::BleepConfig;
pub use error::{BleepError, TriggerError};
pub use session::BleepRouter;
pub use status::{RouterEvent, Severity, StatusReporter, StatusUpdate};
pub use trigger::{Key, SupervisorState, TriggerMode};
