//! Device listing and stream format negotiation
//!
//! Everything here is plain data so it can be exercised without hardware;
//! the cpal queries that feed it live in the engine.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use cpal::SampleFormat;

use crate::error::BleepError;

/// An audio device as offered to the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Index in the host's device enumeration
    pub id: usize,
    pub name: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.name)
    }
}

/// Input and output candidates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    pub inputs: Vec<DeviceInfo>,
    pub outputs: Vec<DeviceInfo>,
}

/// Keep the first device of each name
pub fn dedup_by_name(devices: impl IntoIterator<Item = DeviceInfo>) -> Vec<DeviceInfo> {
    let mut seen = HashSet::new();
    devices
        .into_iter()
        .filter(|d| seen.insert(d.name.clone()))
        .collect()
}

/// The first output whose name contains `needle` (a virtual cable, usually),
/// otherwise the first output
pub fn preferred_output<'a>(outputs: &'a [DeviceInfo], needle: &str) -> Option<&'a DeviceInfo> {
    outputs
        .iter()
        .find(|d| !needle.is_empty() && d.name.contains(needle))
        .or_else(|| outputs.first())
}

/// One supported configuration range reported by a device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigRange {
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub min_rate: u32,
    pub max_rate: u32,
    /// Supported period sizes in frames, if the backend reports them
    pub buffer_frames: Option<(u32, u32)>,
}

/// How one side of the stream talks to its device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSetup {
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Fixed period size, or `None` to let the backend choose
    pub buffer_frames: Option<u32>,
}

/// Negotiated stream format.
///
/// Routing is mono 16-bit at `sample_rate`; the device setups describe how
/// capture and playback map onto that. Immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    /// Frames per period requested from the backend
    pub buffer_frames: u32,
    pub input: DeviceSetup,
    pub output: DeviceSetup,
}

impl AudioFormat {
    /// Duration of one period: the callback's real-time deadline
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_frames as f64 / self.sample_rate.max(1) as f64)
    }
}

/// Lower is better: mono 16-bit needs no conversion at all
fn setup_cost(range: &ConfigRange) -> Option<u32> {
    let format_cost = match range.sample_format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::U16 => 2,
        _ => return None,
    };
    let channel_cost = if range.channels == 1 { 0 } else { 10 };
    Some(channel_cost + format_cost)
}

/// Best device setup at `rate`, if any range supports it
pub fn pick_setup(ranges: &[ConfigRange], rate: u32, buffer_frames: u32) -> Option<DeviceSetup> {
    ranges
        .iter()
        .filter(|r| r.channels > 0 && r.min_rate <= rate && rate <= r.max_rate)
        .filter_map(|r| setup_cost(r).map(|cost| (cost, r)))
        .min_by_key(|(cost, _)| *cost)
        .map(|(_, r)| DeviceSetup {
            channels: r.channels,
            sample_format: r.sample_format,
            buffer_frames: match r.buffer_frames {
                Some((min, max)) if min <= buffer_frames && buffer_frames <= max => Some(buffer_frames),
                Some(_) => None,
                // Unknown range: ask for it anyway
                None => Some(buffer_frames),
            },
        })
}

/// Pick the first candidate rate both devices support
pub fn negotiate(
    input: &[ConfigRange],
    output: &[ConfigRange],
    candidates: &[u32],
    buffer_frames: u32,
) -> Result<AudioFormat, BleepError> {
    let buffer_frames = buffer_frames.max(1);
    candidates
        .iter()
        .find_map(|&rate| {
            let input = pick_setup(input, rate, buffer_frames)?;
            let output = pick_setup(output, rate, buffer_frames)?;
            Some(AudioFormat {
                sample_rate: rate,
                buffer_frames,
                input,
                output,
            })
        })
        .ok_or_else(|| BleepError::NoCommonSampleRate {
            candidates: candidates.to_vec(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANDIDATES: [u32; 4] = [48_000, 44_100, 32_000, 16_000];

    fn range(channels: u16, format: SampleFormat, min: u32, max: u32) -> ConfigRange {
        ConfigRange {
            channels,
            sample_format: format,
            min_rate: min,
            max_rate: max,
            buffer_frames: Some((64, 4096)),
        }
    }

    fn info(id: usize, name: &str) -> DeviceInfo {
        DeviceInfo {
            id,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_first_common_rate_wins() {
        let input = [range(1, SampleFormat::I16, 16_000, 44_100)];
        let output = [range(2, SampleFormat::F32, 44_100, 96_000)];

        let format = negotiate(&input, &output, &CANDIDATES, 1024).unwrap();
        assert_eq!(format.sample_rate, 44_100);
        assert_eq!(format.buffer_frames, 1024);
        assert_eq!(format.input.sample_format, SampleFormat::I16);
        assert_eq!(format.output.channels, 2);
    }

    #[test]
    fn test_no_common_rate_is_configuration_error() {
        let input = [range(1, SampleFormat::I16, 8_000, 8_000)];
        let output = [range(1, SampleFormat::I16, 48_000, 48_000)];

        match negotiate(&input, &output, &CANDIDATES, 1024) {
            Err(BleepError::NoCommonSampleRate { candidates }) => {
                assert_eq!(candidates, CANDIDATES.to_vec())
            }
            other => panic!("expected NoCommonSampleRate, got {:?}", other),
        }
    }

    #[test]
    fn test_mono_i16_preferred() {
        let ranges = [
            range(2, SampleFormat::I16, 8_000, 96_000),
            range(1, SampleFormat::F32, 8_000, 96_000),
            range(1, SampleFormat::I16, 8_000, 96_000),
        ];
        let setup = pick_setup(&ranges, 48_000, 1024).unwrap();
        assert_eq!(setup.channels, 1);
        assert_eq!(setup.sample_format, SampleFormat::I16);
    }

    #[test]
    fn test_unsupported_formats_skipped() {
        let ranges = [range(1, SampleFormat::I32, 8_000, 96_000)];
        assert!(pick_setup(&ranges, 48_000, 1024).is_none());
    }

    #[test]
    fn test_buffer_size_outside_range_left_to_backend() {
        let mut r = range(1, SampleFormat::I16, 8_000, 96_000);
        r.buffer_frames = Some((128, 512));
        assert_eq!(pick_setup(&[r], 48_000, 1024).unwrap().buffer_frames, None);

        r.buffer_frames = None;
        assert_eq!(pick_setup(&[r], 48_000, 1024).unwrap().buffer_frames, Some(1024));
    }

    #[test]
    fn test_period() {
        let setup = DeviceSetup {
            channels: 1,
            sample_format: SampleFormat::I16,
            buffer_frames: Some(480),
        };
        let format = AudioFormat {
            sample_rate: 48_000,
            buffer_frames: 480,
            input: setup,
            output: setup,
        };
        assert_eq!(format.period(), Duration::from_millis(10));
    }

    #[test]
    fn test_dedup_keeps_first() {
        let devices = dedup_by_name(vec![info(0, "Mic"), info(3, "Mic"), info(5, "Line In")]);
        assert_eq!(devices, vec![info(0, "Mic"), info(5, "Line In")]);
        assert_eq!(devices[0].to_string(), "[0] Mic");
    }

    #[test]
    fn test_preferred_output() {
        let outputs = vec![info(1, "Speakers"), info(4, "CABLE Input (VB-Audio Virtual Cable)")];
        assert_eq!(preferred_output(&outputs, "CABLE Input").unwrap().id, 4);
        assert_eq!(preferred_output(&outputs, "Nothing like it").unwrap().id, 1);
        assert!(preferred_output(&[], "CABLE Input").is_none());
    }
}
