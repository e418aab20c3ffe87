//! Tone oscillator - the bleep
//!
//! A phase-continuous sine generator rendering signed 16-bit samples.
//! Phase is carried across calls so consecutive buffers join without clicks.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Tone amplitude shared between the controller and the audio thread.
///
/// Stored as the bit pattern of an `f32` so reads and writes are single
/// atomic operations. No ordering is needed: the value only scales a waveform.
#[derive(Clone, Debug)]
pub struct SharedAmplitude {
    bits: Arc<AtomicU32>,
}

impl SharedAmplitude {
    pub fn new(amplitude: f32) -> Self {
        let shared = Self {
            bits: Arc::new(AtomicU32::new(0)),
        };
        shared.set(amplitude);
        shared
    }

    /// Set the amplitude, clamped to 0.0..=1.0 (NaN becomes 0.0)
    pub fn set(&self, amplitude: f32) {
        let amplitude = if amplitude.is_nan() {
            0.0
        } else {
            amplitude.clamp(0.0, 1.0)
        };
        self.bits.store(amplitude.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Sine tone generator
///
/// Owns its phase exclusively; only the audio callback renders from it.
pub struct ToneOscillator {
    /// Current phase in radians, always in [0, 2π)
    phase: f64,
    /// Phase advance per sample
    phase_increment: f64,
    frequency: f32,
    sample_rate: u32,
    amplitude: SharedAmplitude,
}

impl ToneOscillator {
    /// Create an oscillator starting at phase 0
    pub fn new(frequency: f32, sample_rate: u32, amplitude: SharedAmplitude) -> Self {
        let sample_rate = sample_rate.max(1);
        Self {
            phase: 0.0,
            phase_increment: TAU * frequency as f64 / sample_rate as f64,
            frequency,
            sample_rate,
            amplitude,
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Fill `out` with the next `out.len()` tone samples.
    ///
    /// Amplitude is read per sample, so a change lands on the very next
    /// sample. Scaling truncates toward zero, no dithering. Does not allocate.
    pub fn render_into(&mut self, out: &mut [i16]) {
        for sample in out.iter_mut() {
            let amplitude = self.amplitude.get() as f64;
            // `as` truncates toward zero and saturates
            *sample = (self.phase.sin() * amplitude * i16::MAX as f64) as i16;

            self.phase += self.phase_increment;
            if self.phase >= TAU {
                self.phase %= TAU;
            }
        }
    }

    /// Render `frame_count` samples into a new buffer
    pub fn render(&mut self, frame_count: usize) -> Vec<i16> {
        let mut out = vec![0; frame_count];
        self.render_into(&mut out);
        out
    }
}
