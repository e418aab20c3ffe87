//! Serial trigger
//!
//! Reads newline-terminated text from a beep box. Lines containing
//! `pressed` turn the tone on, lines containing `depressed` turn it off.
//! A lost port is reopened after a backoff for as long as the session runs.

use std::io::{self, BufRead, BufReader, Read};
use std::sync::Arc;

use super::{TriggerContext, TriggerEvent, TriggerSource};
use crate::config::SerialConfig;
use crate::error::TriggerError;

const PRESSED_MARKER: &str = "pressed";
const DEPRESSED_MARKER: &str = "depressed";

/// Lines longer than this without a newline are discarded as noise
const MAX_LINE_BYTES: usize = 1024;

const DISCONNECTED_STATUS: &str = "Serial disconnected. Retrying...";

/// Map one received line to a trigger event.
///
/// Case-sensitive substring match. `depressed` is checked first and wins
/// when both markers appear (it contains `pressed` anyway).
pub fn parse_line(line: &str) -> Option<TriggerEvent> {
    if line.contains(DEPRESSED_MARKER) {
        Some(TriggerEvent::Released)
    } else if line.contains(PRESSED_MARKER) {
        Some(TriggerEvent::Pressed)
    } else {
        None
    }
}

/// Opens the serial endpoint
pub trait SerialOpener: Send + Sync {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Read + Send>, TriggerError>;
}

/// Real serial ports via `serialport`
pub struct SystemSerial;

impl SerialOpener for SystemSerial {
    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Read + Send>, TriggerError> {
        let mut port = serialport::new(config.port.as_str(), config.baud_rate)
            .timeout(config.read_timeout())
            .open()?;
        // Some beep boxes reset into a bad state while DTR is asserted
        port.write_data_terminal_ready(false)?;
        Ok(Box::new(port))
    }
}

/// Sort a read failure. `None` means "no data yet, keep going".
fn classify(e: io::Error) -> Option<TriggerError> {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => None,
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported => {
            Some(TriggerError::Protocol(e.to_string()))
        }
        _ => Some(TriggerError::Transport(e.to_string())),
    }
}

/// Trigger source reading a serial port
pub struct SerialTrigger {
    config: SerialConfig,
    opener: Arc<dyn SerialOpener>,
    reader: Option<BufReader<Box<dyn Read + Send>>>,
    /// Bytes of the line being assembled; survives read timeouts
    line: Vec<u8>,
    /// The current line ran past `MAX_LINE_BYTES` and is being skipped
    overflowed: bool,
}

impl SerialTrigger {
    pub fn new(config: SerialConfig, opener: Arc<dyn SerialOpener>) -> Self {
        Self {
            config,
            opener,
            reader: None,
            line: Vec::with_capacity(MAX_LINE_BYTES + 1),
            overflowed: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn close(&mut self) {
        self.reader = None;
        self.line.clear();
        self.overflowed = false;
    }

    /// Read until a full line is available. `Ok(None)` on timeout.
    ///
    /// Reads at most one line's worth of bytes per call, so a port that
    /// streams without newlines still returns to the loop.
    fn read_line(&mut self) -> Result<Option<String>, TriggerError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let limit = (MAX_LINE_BYTES + 1).saturating_sub(self.line.len()) as u64;
        let result = reader.by_ref().take(limit).read_until(b'\n', &mut self.line);

        if self.line.last() == Some(&b'\n') {
            let complete = !self.overflowed;
            self.overflowed = false;
            let line = String::from_utf8_lossy(&self.line).trim().to_string();
            self.line.clear();
            return Ok(complete.then_some(line));
        }
        if self.line.len() > MAX_LINE_BYTES {
            log::debug!("Discarding {} bytes of unterminated serial input", self.line.len());
            self.line.clear();
            // Skip the rest of this line too
            self.overflowed = true;
        }

        match result {
            Ok(0) if limit > 0 => Err(TriggerError::Transport("end of stream".to_string())),
            // Stream ended mid-line; the next read reports it
            Ok(_) => Ok(None),
            Err(e) => match classify(e) {
                None => Ok(None),
                Some(err) => Err(err),
            },
        }
    }

    fn listening_status(&self) -> String {
        format!("Running (listening on {})", self.config.port)
    }
}

impl TriggerSource for SerialTrigger {
    fn name(&self) -> String {
        self.config.port.clone()
    }

    fn start(&mut self) -> Result<(), TriggerError> {
        let port = self.opener.open(&self.config)?;
        log::info!("Opened serial port {} at {} baud", self.config.port, self.config.baud_rate);
        self.reader = Some(BufReader::new(port));
        self.line.clear();
        self.overflowed = false;
        Ok(())
    }

    fn run(&mut self, ctx: &TriggerContext) -> Result<(), TriggerError> {
        while !ctx.stop.is_requested() {
            if !self.is_open() {
                match self.start() {
                    Ok(()) => ctx.status.success(self.listening_status()),
                    Err(TriggerError::Transport(e)) => {
                        log::debug!("Reopening {} failed: {}", self.config.port, e);
                        ctx.status.warning(DISCONNECTED_STATUS);
                        if ctx.stop.sleep(self.config.reconnect_backoff()) {
                            break;
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }

            match self.read_line() {
                Ok(Some(line)) => {
                    if let Some(event) = parse_line(&line) {
                        log::debug!("Serial {:?}: {:?}", event, line);
                        ctx.flag.apply(event);
                    }
                }
                Ok(None) => {}
                Err(TriggerError::Transport(e)) => {
                    log::warn!("Serial port {} lost: {}", self.config.port, e);
                    self.close();
                    // A release may be lost with the port
                    ctx.flag.set(false);
                    ctx.status.warning(DISCONNECTED_STATUS);
                    if ctx.stop.sleep(self.config.reconnect_backoff()) {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    log::error!("Serial thread error: {}", e);
                    self.close();
                    return Err(e);
                }
            }

            if ctx.stop.sleep(self.config.poll_interval()) {
                break;
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.is_open() {
            log::info!("Closing serial port {}", self.config.port);
        }
        self.close();
    }
}
