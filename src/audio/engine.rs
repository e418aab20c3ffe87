//! Audio engine - cpal input/output binding
//!
//! Capture and playback are two cpal streams joined by a lock-free ring
//! buffer. The playback callback drains one period of captured audio,
//! hands it to the injected [`FrameProcessor`] and writes the result to
//! every output channel.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use super::devices::{self, AudioFormat, ConfigRange, DeviceInfo, DeviceList, DeviceSetup};
use super::router::FrameProcessor;
use crate::config::AudioConfig;
use crate::error::BleepError;
use crate::status::StatusReporter;

/// Largest period handed to the processor in one call (frames).
/// Longer backend periods are processed in slices of this size.
const SCRATCH_FRAMES: usize = 8192;

/// Minimum ring capacity (samples) between capture and playback
const MIN_RING_CAPACITY: usize = 4096;

/// A running audio stream. Dropping it also stops it.
pub trait AudioStream {
    /// Stop callbacks and release the devices. Idempotent.
    fn close(&mut self);
}

/// The audio backend binding.
///
/// Device ids are indices into the backend's device enumeration, as
/// returned by [`AudioBackend::list_devices`].
pub trait AudioBackend {
    fn list_devices(&self) -> Result<DeviceList, BleepError>;

    /// Choose the session format for an input/output pair
    fn negotiate(&self, input: usize, output: usize, config: &AudioConfig) -> Result<AudioFormat, BleepError>;

    /// Open and start both streams with `processor` on the playback callback
    fn open(
        &self,
        input: usize,
        output: usize,
        format: &AudioFormat,
        processor: Box<dyn FrameProcessor>,
        status: StatusReporter,
    ) -> Result<Box<dyn AudioStream>, BleepError>;
}

/// cpal implementation of [`AudioBackend`] on the platform's default host
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    pub fn new() -> Self {
        let host = cpal::default_host();
        log::info!("Audio host: {:?}", host.id());
        Self { host }
    }

    fn device(&self, id: usize) -> Result<cpal::Device, BleepError> {
        self.host
            .devices()
            .map_err(|e| BleepError::Backend(e.to_string()))?
            .nth(id)
            .ok_or(BleepError::DeviceNotFound { id })
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn to_range(range: &cpal::SupportedStreamConfigRange) -> ConfigRange {
    ConfigRange {
        channels: range.channels(),
        sample_format: range.sample_format(),
        min_rate: range.min_sample_rate().0,
        max_rate: range.max_sample_rate().0,
        buffer_frames: match range.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => Some((*min, *max)),
            cpal::SupportedBufferSize::Unknown => None,
        },
    }
}

fn input_ranges(device: &cpal::Device) -> Vec<ConfigRange> {
    device
        .supported_input_configs()
        .map(|configs| configs.map(|r| to_range(&r)).collect())
        .unwrap_or_default()
}

fn output_ranges(device: &cpal::Device) -> Vec<ConfigRange> {
    device
        .supported_output_configs()
        .map(|configs| configs.map(|r| to_range(&r)).collect())
        .unwrap_or_default()
}

impl AudioBackend for CpalBackend {
    fn list_devices(&self) -> Result<DeviceList, BleepError> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        let all = self
            .host
            .devices()
            .map_err(|e| BleepError::Backend(e.to_string()))?;
        for (id, device) in all.enumerate() {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            if !input_ranges(&device).is_empty() {
                inputs.push(DeviceInfo { id, name: name.clone() });
            }
            if !output_ranges(&device).is_empty() {
                outputs.push(DeviceInfo { id, name });
            }
        }

        Ok(DeviceList {
            inputs: devices::dedup_by_name(inputs),
            outputs: devices::dedup_by_name(outputs),
        })
    }

    fn negotiate(&self, input: usize, output: usize, config: &AudioConfig) -> Result<AudioFormat, BleepError> {
        let input_device = self.device(input)?;
        let output_device = self.device(output)?;

        let format = devices::negotiate(
            &input_ranges(&input_device),
            &output_ranges(&output_device),
            &config.sample_rates,
            config.buffer_frames,
        )?;

        log::info!(
            "Negotiated {} Hz, {} frames/period ({:?}); input {:?}, output {:?}",
            format.sample_rate,
            format.buffer_frames,
            format.period(),
            format.input,
            format.output
        );
        Ok(format)
    }

    fn open(
        &self,
        input: usize,
        output: usize,
        format: &AudioFormat,
        processor: Box<dyn FrameProcessor>,
        status: StatusReporter,
    ) -> Result<Box<dyn AudioStream>, BleepError> {
        let input_device = self.device(input)?;
        let output_device = self.device(output)?;
        log::info!(
            "Routing {} -> {}",
            input_device.name().unwrap_or_else(|_| "Unknown".to_string()),
            output_device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let period = format.buffer_frames as usize;
        let ring = HeapRb::<i16>::new((period * 4).max(MIN_RING_CAPACITY));
        let (mut producer, consumer) = ring.split();
        // One period of silence so playback does not start on an empty ring
        for _ in 0..period {
            let _ = producer.try_push(0);
        }

        let input_stream = build_input(&input_device, &format.input, format.sample_rate, producer, status.clone())?;
        let output_stream = build_output(
            &output_device,
            &format.output,
            format.sample_rate,
            consumer,
            processor,
            status,
        )?;

        output_stream
            .play()
            .map_err(|e| BleepError::DeviceOpen(format!("starting output: {}", e)))?;
        input_stream
            .play()
            .map_err(|e| BleepError::DeviceOpen(format!("starting input: {}", e)))?;

        log::info!("Audio started successfully");
        Ok(Box::new(CpalStream {
            input: Some(input_stream),
            output: Some(output_stream),
        }))
    }
}

/// Both halves of a running route
struct CpalStream {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
}

impl AudioStream for CpalStream {
    fn close(&mut self) {
        if self.input.is_none() && self.output.is_none() {
            return;
        }
        if let Some(output) = self.output.take() {
            if let Err(e) = output.pause() {
                log::warn!("Failed to pause output stream: {}", e);
            }
        }
        if let Some(input) = self.input.take() {
            if let Err(e) = input.pause() {
                log::warn!("Failed to pause input stream: {}", e);
            }
        }
        log::info!("Audio stopped");
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn stream_config(setup: &DeviceSetup, sample_rate: u32) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: setup.channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: match setup.buffer_frames {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        },
    }
}

fn build_input(
    device: &cpal::Device,
    setup: &DeviceSetup,
    sample_rate: u32,
    producer: HeapProd<i16>,
    status: StatusReporter,
) -> Result<cpal::Stream, BleepError> {
    let config = stream_config(setup, sample_rate);
    match setup.sample_format {
        cpal::SampleFormat::I16 => input_stream::<i16>(device, &config, producer, status),
        cpal::SampleFormat::F32 => input_stream::<f32>(device, &config, producer, status),
        cpal::SampleFormat::U16 => input_stream::<u16>(device, &config, producer, status),
        format => Err(BleepError::UnsupportedFormat(format!("{:?}", format))),
    }
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<i16>,
    status: StatusReporter,
) -> Result<cpal::Stream, BleepError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                capture_samples(data, channels, &mut producer);
            },
            move |err| status.error(format!("Audio input stream error: {}", err)),
            None,
        )
        .map_err(|e| BleepError::DeviceOpen(format!("input: {}", e)))
}

fn build_output(
    device: &cpal::Device,
    setup: &DeviceSetup,
    sample_rate: u32,
    consumer: HeapCons<i16>,
    processor: Box<dyn FrameProcessor>,
    status: StatusReporter,
) -> Result<cpal::Stream, BleepError> {
    let config = stream_config(setup, sample_rate);
    let playback = Playback::new(consumer, processor);
    match setup.sample_format {
        cpal::SampleFormat::I16 => output_stream::<i16>(device, &config, playback, status),
        cpal::SampleFormat::F32 => output_stream::<f32>(device, &config, playback, status),
        cpal::SampleFormat::U16 => output_stream::<u16>(device, &config, playback, status),
        format => Err(BleepError::UnsupportedFormat(format!("{:?}", format))),
    }
}

fn output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut playback: Playback,
    status: StatusReporter,
) -> Result<cpal::Stream, BleepError>
where
    T: SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                playback.fill(data, channels);
            },
            move |err| status.error(format!("Audio output stream error: {}", err)),
            None,
        )
        .map_err(|e| BleepError::DeviceOpen(format!("output: {}", e)))
}

/// Push the first channel of each captured frame into the ring.
/// A full ring drops the newest samples.
fn capture_samples<T>(data: &[T], channels: usize, producer: &mut HeapProd<i16>)
where
    T: Sample,
    i16: FromSample<T>,
{
    for frame in data.chunks(channels.max(1)) {
        if producer.try_push(i16::from_sample(frame[0])).is_err() {
            break;
        }
    }
}

/// Playback-side state owned by the output callback
struct Playback {
    consumer: HeapCons<i16>,
    processor: Box<dyn FrameProcessor>,
    input: Vec<i16>,
    output: Vec<i16>,
}

impl Playback {
    fn new(consumer: HeapCons<i16>, processor: Box<dyn FrameProcessor>) -> Self {
        // Allocated here, never inside the callback
        Self {
            consumer,
            processor,
            input: vec![0; SCRATCH_FRAMES],
            output: vec![0; SCRATCH_FRAMES],
        }
    }

    fn fill<T>(&mut self, data: &mut [T], channels: usize)
    where
        T: Sample + FromSample<i16>,
    {
        let channels = channels.max(1);

        for chunk in data.chunks_mut(SCRATCH_FRAMES * channels) {
            // A trailing partial frame still gets a sample
            let frames = chunk.len().div_ceil(channels);

            let popped = self.consumer.pop_slice(&mut self.input[..frames]);
            self.input[popped..frames].fill(0);

            self.processor
                .process(&self.input[..frames], &mut self.output[..frames]);

            for (frame, &sample) in chunk.chunks_mut(channels).zip(self.output[..frames].iter()) {
                frame.fill(T::from_sample(sample));
            }
        }
    }
}
