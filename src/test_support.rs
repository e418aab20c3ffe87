//! Test doubles for serial ports, keyboards and audio devices

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::SampleFormat;

use crate::audio::{
    negotiate, AudioBackend, AudioFormat, AudioStream, ConfigRange, DeviceInfo, DeviceList, FrameProcessor,
};
use crate::config::{AudioConfig, SerialConfig};
use crate::error::{BleepError, TriggerError};
use crate::status::StatusReporter;
use crate::trigger::{Key, KeyBroadcast, KeyEvent, KeyEventSource, KeySubscription, SerialOpener};

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

enum Step {
    Data(Vec<u8>),
    Timeout,
    Fail(io::ErrorKind),
}

/// A serial port that plays back a script, one step per `read` call.
///
/// Once the script runs out every read times out.
#[derive(Default)]
pub struct ScriptedPort {
    steps: VecDeque<Step>,
}

impl ScriptedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.steps.push_back(Step::Data(bytes.to_vec()));
        self
    }

    pub fn timeout(mut self) -> Self {
        self.steps.push_back(Step::Timeout);
        self
    }

    pub fn fail(mut self, kind: io::ErrorKind) -> Self {
        self.steps.push_back(Step::Fail(kind));
        self
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.pop_front() {
            Some(Step::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.steps.push_front(Step::Data(bytes.split_off(n)));
                }
                Ok(n)
            }
            Some(Step::Timeout) => Err(io::Error::new(io::ErrorKind::TimedOut, "scripted timeout")),
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
            None => {
                std::thread::sleep(Duration::from_millis(2));
                Err(io::Error::new(io::ErrorKind::TimedOut, "script exhausted"))
            }
        }
    }
}

/// Hands out scripted ports in order. `None` entries, and an empty
/// queue, fail like a missing device.
pub struct ScriptedOpener {
    ports: Mutex<VecDeque<Option<ScriptedPort>>>,
    opens: AtomicUsize,
}

impl ScriptedOpener {
    pub fn new(ports: Vec<Option<ScriptedPort>>) -> Self {
        Self {
            ports: Mutex::new(ports.into()),
            opens: AtomicUsize::new(0),
        }
    }

    /// Number of open attempts so far, failed ones included
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SerialOpener for ScriptedOpener {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Read + Send>, TriggerError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.ports.lock().unwrap().pop_front().flatten();
        match next {
            Some(port) => Ok(Box::new(port)),
            None => Err(TriggerError::Transport(format!("{}: no such device", config.port))),
        }
    }
}

/// Keyboard driven by the test
#[derive(Default)]
pub struct TestKeyboard {
    broadcast: KeyBroadcast,
}

impl TestKeyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self, name: &str) {
        self.broadcast.publish(KeyEvent::Pressed(Key::named(name)));
    }

    pub fn release(&self, name: &str) {
        self.broadcast.publish(KeyEvent::Released(Key::named(name)));
    }

    /// The keyboard goes away, as when the global hook dies
    pub fn close(&self) {
        self.broadcast.close();
    }

    pub fn subscriber_count(&self) -> usize {
        self.broadcast.subscriber_count()
    }
}

impl KeyEventSource for TestKeyboard {
    fn subscribe(&self) -> Result<KeySubscription, TriggerError> {
        Ok(self.broadcast.subscribe())
    }
}

/// What the null backend saw, shared with the test
#[derive(Default)]
pub struct NullDevices {
    processor: Mutex<Option<Box<dyn FrameProcessor>>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

impl NullDevices {
    /// Run one period through the installed processor, as the playback callback would
    pub fn process(&self, input: &[i16]) -> Option<Vec<i16>> {
        let mut processor = self.processor.lock().unwrap();
        let processor = processor.as_mut()?;
        let mut output = vec![0; input.len()];
        processor.process(input, &mut output);
        Some(output)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// An audio backend with one fake microphone and one fake virtual cable
pub struct NullBackend {
    pub input_ranges: Vec<ConfigRange>,
    pub output_ranges: Vec<ConfigRange>,
    pub fail_open: bool,
    pub devices: Arc<NullDevices>,
}

impl NullBackend {
    pub fn new() -> Self {
        let mono = ConfigRange {
            channels: 1,
            sample_format: SampleFormat::I16,
            min_rate: 8_000,
            max_rate: 48_000,
            buffer_frames: None,
        };
        Self {
            input_ranges: vec![mono],
            output_ranges: vec![mono],
            fail_open: false,
            devices: Arc::new(NullDevices::default()),
        }
    }
}

impl AudioBackend for NullBackend {
    fn list_devices(&self) -> Result<DeviceList, BleepError> {
        Ok(DeviceList {
            inputs: vec![DeviceInfo {
                id: 0,
                name: "Test Microphone".to_string(),
            }],
            outputs: vec![DeviceInfo {
                id: 1,
                name: "CABLE Input (Test)".to_string(),
            }],
        })
    }

    fn negotiate(&self, input: usize, output: usize, config: &AudioConfig) -> Result<AudioFormat, BleepError> {
        if input != 0 {
            return Err(BleepError::DeviceNotFound { id: input });
        }
        if output != 1 {
            return Err(BleepError::DeviceNotFound { id: output });
        }
        negotiate(
            &self.input_ranges,
            &self.output_ranges,
            &config.sample_rates,
            config.buffer_frames,
        )
    }

    fn open(
        &self,
        _input: usize,
        _output: usize,
        _format: &AudioFormat,
        processor: Box<dyn FrameProcessor>,
        _status: StatusReporter,
    ) -> Result<Box<dyn AudioStream>, BleepError> {
        if self.fail_open {
            return Err(BleepError::DeviceOpen("device busy".to_string()));
        }
        *self.devices.processor.lock().unwrap() = Some(processor);
        self.devices.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(NullStream {
            devices: Arc::clone(&self.devices),
            open: true,
        }))
    }
}

struct NullStream {
    devices: Arc<NullDevices>,
    open: bool,
}

impl AudioStream for NullStream {
    fn close(&mut self) {
        if self.open {
            self.open = false;
            *self.devices.processor.lock().unwrap() = None;
            self.devices.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for NullStream {
    fn drop(&mut self) {
        self.close();
    }
}
