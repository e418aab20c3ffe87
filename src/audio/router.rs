//! Frame processing on the real-time audio thread
//!
//! The backend calls a [`FrameProcessor`] once per period with the captured
//! mono input and the output slice to fill. [`AudioRouter`] is the one
//! processor we ship: passthrough, or the bleep while the trigger is held.

use super::oscillator::ToneOscillator;
use crate::trigger::ToneFlag;

/// Per-period audio processing.
///
/// Runs on the backend's real-time thread: implementations must not
/// allocate, block, or take locks that other threads hold for unbounded time.
pub trait FrameProcessor: Send {
    /// Fill `output` from `input`. The slices may differ in length; the
    /// frame count is `output.len()`.
    fn process(&mut self, input: &[i16], output: &mut [i16]);
}

/// Passthrough vs. tone switch
pub struct AudioRouter {
    oscillator: ToneOscillator,
    tone_active: ToneFlag,
}

impl AudioRouter {
    pub fn new(oscillator: ToneOscillator, tone_active: ToneFlag) -> Self {
        Self {
            oscillator,
            tone_active,
        }
    }
}

impl FrameProcessor for AudioRouter {
    fn process(&mut self, input: &[i16], output: &mut [i16]) {
        // Read once: a toggle mid-period takes effect next period
        if self.tone_active.is_active() {
            self.oscillator.render_into(output);
        } else {
            let frames = input.len().min(output.len());
            output[..frames].copy_from_slice(&input[..frames]);
            // Short input (capture underrun) pads with silence
            output[frames..].fill(0);
        }
    }
}
