//! The router controller
//!
//! [`BleepRouter`] is what a presentation layer talks to: list devices,
//! start and stop routing, set the amplitude, capture a keybind, and read
//! [`RouterEvent`]s. Everything that lives for one start/stop cycle sits
//! in a [`RoutingSession`].

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::audio::{
    AudioBackend, AudioFormat, AudioRouter, AudioStream, CpalBackend, DeviceList, SharedAmplitude, ToneOscillator,
};
use crate::config::BleepConfig;
use crate::error::BleepError;
use crate::status::{RouterEvent, StatusReporter};
use crate::trigger::{
    system_keyboard, Key, KeyCapture, KeyEventSource, KeyTarget, KeybindTrigger, SerialOpener, SerialTrigger,
    SharedMode, StopSignal, SupervisorState, SystemSerial, ToneFlag, TriggerContext, TriggerMode, TriggerSupervisor,
};

/// State owned by one running session
struct RoutingSession {
    format: AudioFormat,
    stream: Box<dyn AudioStream>,
    flag: ToneFlag,
    supervisor: TriggerSupervisor,
}

pub struct BleepRouter {
    config: BleepConfig,
    backend: Box<dyn AudioBackend>,
    serial: Arc<dyn SerialOpener>,
    keyboard: Arc<dyn KeyEventSource>,
    amplitude: SharedAmplitude,
    keybind: KeyTarget,
    capture: KeyCapture,
    mode: SharedMode,
    status: StatusReporter,
    events: Receiver<RouterEvent>,
    session: Option<RoutingSession>,
}

impl BleepRouter {
    /// Router on the system audio host, serial ports and keyboard
    pub fn new(config: BleepConfig) -> Self {
        Self::with_parts(
            config,
            Box::new(CpalBackend::new()),
            Arc::new(SystemSerial),
            system_keyboard(),
        )
    }

    pub fn with_parts(
        config: BleepConfig,
        backend: Box<dyn AudioBackend>,
        serial: Arc<dyn SerialOpener>,
        keyboard: Arc<dyn KeyEventSource>,
    ) -> Self {
        let (status, events) = StatusReporter::channel();
        let keybind = KeyTarget::new();
        Self {
            amplitude: SharedAmplitude::new(config.tone.amplitude),
            capture: KeyCapture::new(Arc::clone(&keyboard), keybind.clone()),
            config,
            backend,
            serial,
            keyboard,
            keybind,
            mode: SharedMode::new(),
            status,
            events,
            session: None,
        }
    }

    pub fn config(&self) -> &BleepConfig {
        &self.config
    }

    /// Status and keybind events, for the presentation layer
    pub fn events(&self) -> Receiver<RouterEvent> {
        self.events.clone()
    }

    pub fn list_audio_devices(&self) -> Result<DeviceList, BleepError> {
        self.backend.list_devices()
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    pub fn trigger_mode(&self) -> TriggerMode {
        self.mode.get()
    }

    pub fn supervisor_state(&self) -> SupervisorState {
        self.session
            .as_ref()
            .map(|s| s.supervisor.state())
            .unwrap_or(SupervisorState::Idle)
    }

    /// Whether the bleep is currently replacing the input. Always `false` when stopped.
    pub fn is_tone_active(&self) -> bool {
        self.session.as_ref().map(|s| s.flag.is_active()).unwrap_or(false)
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        self.session.as_ref().map(|s| s.format)
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude.get()
    }

    /// Takes effect on the next rendered sample. Clamped to [0, 1].
    pub fn set_amplitude(&self, amplitude: f32) {
        self.amplitude.set(amplitude);
    }

    pub fn keybind(&self) -> Option<Key> {
        self.keybind.get()
    }

    pub fn set_keybind(&self, key: Key) {
        log::info!("Keybind set to [{}]", key);
        self.keybind.set(key);
    }

    /// Capture the next key pressed anywhere as the keybind.
    ///
    /// Completion arrives as [`RouterEvent::KeybindCaptured`].
    pub fn begin_keybind_capture(&self) -> Result<(), BleepError> {
        self.capture.begin(&self.status)
    }

    /// Start passthrough from `input` to `output` and the trigger supervisor.
    ///
    /// Does nothing if already running. On error nothing is left running.
    pub fn start_routing(&mut self, input: usize, output: usize, amplitude: f32) -> Result<(), BleepError> {
        if self.session.is_some() {
            log::debug!("start_routing: already running");
            return Ok(());
        }

        self.amplitude.set(amplitude);
        match self.open_session(input, output) {
            Ok(session) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                self.status.error(format!("Error: {}", e));
                Err(e)
            }
        }
    }

    fn open_session(&self, input: usize, output: usize) -> Result<RoutingSession, BleepError> {
        let format = self.backend.negotiate(input, output, &self.config.audio)?;
        log::info!(
            "Routing [{}] -> [{}] at {} Hz, {} frames per period",
            input,
            output,
            format.sample_rate,
            format.buffer_frames
        );

        let flag = ToneFlag::new();
        let oscillator = ToneOscillator::new(self.config.tone.frequency, format.sample_rate, self.amplitude.clone());
        let router = AudioRouter::new(oscillator, flag.clone());
        let mut stream = self
            .backend
            .open(input, output, &format, Box::new(router), self.status.clone())?;

        let ctx = TriggerContext {
            flag: flag.clone(),
            stop: StopSignal::new(),
            status: self.status.clone(),
        };
        self.mode.set(TriggerMode::Uninitialized);
        let supervisor = TriggerSupervisor::spawn(
            Box::new(SerialTrigger::new(self.config.serial.clone(), Arc::clone(&self.serial))),
            Box::new(KeybindTrigger::new(Arc::clone(&self.keyboard), self.keybind.clone())),
            ctx,
            self.mode.clone(),
        );
        let supervisor = match supervisor {
            Ok(s) => s,
            Err(e) => {
                stream.close();
                return Err(e);
            }
        };

        Ok(RoutingSession {
            format,
            stream,
            flag,
            supervisor,
        })
    }

    /// Stop the trigger, silence the tone, then close the audio streams.
    ///
    /// Safe to call when not running.
    pub fn stop_routing(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if !session.supervisor.shutdown(self.config.shutdown_timeout()) {
            log::warn!("Trigger thread still running after stop");
        }
        session.flag.set(false);
        session.stream.close();
        drop(session);

        self.mode.set(TriggerMode::Uninitialized);
        self.status.normal("Stopped");
    }
}

impl Drop for BleepRouter {
    fn drop(&mut self) {
        self.stop_routing();
        self.capture.cancel();
    }
}
