//! Audio module - routing, tone generation and device I/O
//!
//! This module provides:
//! - Tone oscillator for the bleep
//! - Frame processor trait and the passthrough/tone router
//! - Device listing and format negotiation
//! - Audio engine for cpal integration

mod devices;
mod engine;
mod oscillator;
mod router;

// Re-export public types
pub use devices::{
    dedup_by_name, negotiate, pick_setup, preferred_output, AudioFormat, ConfigRange, DeviceInfo, DeviceList,
    DeviceSetup,
};
pub use engine::{AudioBackend, AudioStream, CpalBackend};
pub use oscillator::{SharedAmplitude, ToneOscillator};
pub use router::{AudioRouter, FrameProcessor};
