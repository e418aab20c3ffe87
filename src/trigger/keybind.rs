//! Keybind trigger
//!
//! Holds the tone while a user-chosen key is down. Key events come from a
//! [`KeyEventSource`] (the global keyboard hook in production). The target
//! key is chosen with a one-shot [`KeyCapture`], independent of routing.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::{StopSignal, TriggerContext, TriggerSource};
use crate::error::{BleepError, TriggerError};
use crate::status::StatusReporter;

/// How long a listener blocks before checking for a stop request
const LISTEN_POLL: Duration = Duration::from_millis(50);

/// A keyboard key, identified by its display name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    Pressed(Key),
    Released(Key),
}

/// Receiving end of a key listener. Dropping it unsubscribes.
pub struct KeySubscription {
    rx: Receiver<KeyEvent>,
}

impl KeySubscription {
    /// Wait up to `timeout` for the next event.
    ///
    /// `Ok(None)` on timeout; an error once the source has gone away.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<KeyEvent>, TriggerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TriggerError::KeyboardHook("key event source stopped".to_string()))
            }
        }
    }
}

/// Anything that can deliver global key events to listeners
pub trait KeyEventSource: Send + Sync {
    fn subscribe(&self) -> Result<KeySubscription, TriggerError>;
}

#[derive(Default)]
struct Subscribers {
    senders: Vec<Sender<KeyEvent>>,
    closed: bool,
}

/// Fan-out of key events to every live subscription
#[derive(Default)]
pub struct KeyBroadcast {
    subscribers: Mutex<Subscribers>,
}

impl KeyBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscription taken after [`close`](Self::close) is disconnected from the start
    pub fn subscribe(&self) -> KeySubscription {
        let (tx, rx) = unbounded();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            if !subscribers.closed {
                subscribers.senders.push(tx);
            }
        }
        KeySubscription { rx }
    }

    /// Deliver `event` to every subscriber, forgetting dropped ones
    pub fn publish(&self, event: KeyEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.senders.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// The source is gone for good. Every subscription sees a disconnect.
    pub fn close(&self) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.closed = true;
            subscribers.senders.clear();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.senders.len()).unwrap_or(0)
    }
}

/// Source used when the crate is built without a keyboard hook
pub struct NoKeyboard;

impl KeyEventSource for NoKeyboard {
    fn subscribe(&self) -> Result<KeySubscription, TriggerError> {
        Err(TriggerError::KeyboardHook(
            "built without the keyboard-hook feature".to_string(),
        ))
    }
}

/// The key that holds the tone, shared between capture and trigger
#[derive(Clone, Debug, Default)]
pub struct KeyTarget {
    key: Arc<RwLock<Option<Key>>>,
}

impl KeyTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Key> {
        self.key.read().ok().and_then(|k| k.clone())
    }

    pub fn set(&self, key: Key) {
        if let Ok(mut target) = self.key.write() {
            *target = Some(key);
        }
    }

    fn matches(&self, key: &Key) -> bool {
        self.key
            .read()
            .map(|target| target.as_ref() == Some(key))
            .unwrap_or(false)
    }
}

/// Trigger source following a single key
pub struct KeybindTrigger {
    source: Arc<dyn KeyEventSource>,
    target: KeyTarget,
    subscription: Option<KeySubscription>,
}

impl KeybindTrigger {
    pub fn new(source: Arc<dyn KeyEventSource>, target: KeyTarget) -> Self {
        Self {
            source,
            target,
            subscription: None,
        }
    }
}

impl TriggerSource for KeybindTrigger {
    fn name(&self) -> String {
        "keyboard".to_string()
    }

    fn start(&mut self) -> Result<(), TriggerError> {
        if self.subscription.is_none() {
            self.subscription = Some(self.source.subscribe()?);
        }
        match self.target.get() {
            Some(key) => log::info!("Keybind listener started for [{}]", key),
            None => log::info!("Keybind listener started with no key set"),
        }
        Ok(())
    }

    fn run(&mut self, ctx: &TriggerContext) -> Result<(), TriggerError> {
        if self.subscription.is_none() {
            self.start()?;
        }
        let Some(subscription) = self.subscription.as_ref() else {
            return Ok(());
        };

        while !ctx.stop.is_requested() {
            match subscription.recv_timeout(LISTEN_POLL)? {
                Some(KeyEvent::Pressed(key)) if self.target.matches(&key) => ctx.flag.set(true),
                Some(KeyEvent::Released(key)) if self.target.matches(&key) => ctx.flag.set(false),
                _ => {}
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.subscription.take().is_some() {
            log::info!("Keybind listener stopped");
        }
    }
}

/// One-shot "press the key you want" flow
pub struct KeyCapture {
    source: Arc<dyn KeyEventSource>,
    target: KeyTarget,
    in_progress: Arc<AtomicBool>,
    /// Cancels the capture currently running, if any
    cancel: Mutex<StopSignal>,
}

impl KeyCapture {
    pub fn new(source: Arc<dyn KeyEventSource>, target: KeyTarget) -> Self {
        Self {
            source,
            target,
            in_progress: Arc::new(AtomicBool::new(false)),
            cancel: Mutex::new(StopSignal::new()),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Start listening for the next key press anywhere.
    ///
    /// The captured key becomes the target and is reported through
    /// `status`. Refuses to start while another capture is running.
    pub fn begin(&self, status: &StatusReporter) -> Result<(), BleepError> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BleepError::CaptureInProgress);
        }

        let subscription = match self.source.subscribe() {
            Ok(s) => s,
            Err(e) => {
                self.in_progress.store(false, Ordering::Release);
                return Err(e.into());
            }
        };

        status.warning("Waiting for key input...");

        let target = self.target.clone();
        let in_progress = Arc::clone(&self.in_progress);
        let cancel = StopSignal::new();
        if let Ok(mut current) = self.cancel.lock() {
            *current = cancel.clone();
        }
        let status = status.clone();
        let spawned = std::thread::Builder::new()
            .name("openbleep-key-capture".to_string())
            .spawn(move || {
                capture_loop(&subscription, &target, &cancel, &status);
                in_progress.store(false, Ordering::Release);
            });

        if let Err(e) = spawned {
            self.in_progress.store(false, Ordering::Release);
            return Err(BleepError::Backend(format!("spawning key capture: {}", e)));
        }
        Ok(())
    }

    /// Abandon a running capture
    pub fn cancel(&self) {
        if let Ok(current) = self.cancel.lock() {
            current.request();
        }
    }
}

/// Stop at the first key press
fn on_capture_event(event: KeyEvent) -> ControlFlow<Key> {
    match event {
        KeyEvent::Pressed(key) => ControlFlow::Break(key),
        KeyEvent::Released(_) => ControlFlow::Continue(()),
    }
}

fn capture_loop(subscription: &KeySubscription, target: &KeyTarget, cancel: &StopSignal, status: &StatusReporter) {
    while !cancel.is_requested() {
        match subscription.recv_timeout(LISTEN_POLL) {
            Ok(Some(event)) => {
                if let ControlFlow::Break(key) = on_capture_event(event) {
                    target.set(key.clone());
                    status.keybind_captured(key.name());
                    status.normal("Keybind set. Ready to start.");
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                status.error(format!("Keybind capture failed: {}", e));
                return;
            }
        }
    }
    log::info!("Keybind capture cancelled");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{RouterEvent, Severity};
    use crate::test_support::{wait_for, TestKeyboard};
    use crate::trigger::ToneFlag;

    fn context() -> TriggerContext {
        let (status, _rx) = StatusReporter::channel();
        TriggerContext {
            flag: ToneFlag::new(),
            stop: StopSignal::new(),
            status,
        }
    }

    #[test]
    fn test_broadcast_drops_closed_subscribers() {
        let broadcast = KeyBroadcast::new();
        let kept = broadcast.subscribe();
        let dropped = broadcast.subscribe();
        drop(dropped);

        broadcast.publish(KeyEvent::Pressed(Key::named("a")));
        assert_eq!(broadcast.subscriber_count(), 1);
        assert_eq!(
            kept.recv_timeout(Duration::from_millis(10)).unwrap(),
            Some(KeyEvent::Pressed(Key::named("a")))
        );
    }

    #[test]
    fn test_closed_broadcast_disconnects_everyone() {
        let broadcast = KeyBroadcast::new();
        let before = broadcast.subscribe();
        broadcast.close();
        let after = broadcast.subscribe();

        assert!(matches!(
            before.recv_timeout(Duration::from_millis(10)),
            Err(TriggerError::KeyboardHook(_))
        ));
        assert!(matches!(
            after.recv_timeout(Duration::from_millis(10)),
            Err(TriggerError::KeyboardHook(_))
        ));
        assert_eq!(broadcast.subscriber_count(), 0);
    }

    #[test]
    fn test_lost_source_ends_listener() {
        let keyboard = Arc::new(TestKeyboard::new());
        let target = KeyTarget::new();
        target.set(Key::named("f"));
        let mut trigger = KeybindTrigger::new(keyboard.clone(), target);
        let ctx = context();
        trigger.start().unwrap();

        let handle = std::thread::spawn(move || trigger.run(&ctx));
        keyboard.close();
        assert!(matches!(handle.join().unwrap(), Err(TriggerError::KeyboardHook(_))));
    }

    #[test]
    fn test_lost_source_ends_capture() {
        let keyboard = Arc::new(TestKeyboard::new());
        let target = KeyTarget::new();
        let capture = KeyCapture::new(keyboard.clone(), target.clone());
        let (status, rx) = StatusReporter::channel();

        capture.begin(&status).unwrap();
        keyboard.close();
        assert!(wait_for(Duration::from_secs(2), || !capture.is_capturing()));
        assert_eq!(target.get(), None);

        let last = rx.try_iter().last();
        assert!(matches!(last, Some(RouterEvent::Status(s)) if s.severity == Severity::Error));

        // Not stuck: a new capture is accepted (and fails the same way)
        capture.begin(&status).unwrap();
        assert!(wait_for(Duration::from_secs(2), || !capture.is_capturing()));
    }

    #[test]
    fn test_target_key_drives_flag() {
        let keyboard = Arc::new(TestKeyboard::new());
        let target = KeyTarget::new();
        target.set(Key::named("f"));
        let mut trigger = KeybindTrigger::new(keyboard.clone(), target);
        let ctx = context();
        trigger.start().unwrap();

        let flag = ctx.flag.clone();
        let stop = ctx.stop.clone();
        let handle = std::thread::spawn(move || {
            let result = trigger.run(&ctx);
            trigger.stop();
            result
        });

        keyboard.press("g");
        keyboard.press("f");
        assert!(wait_for(Duration::from_secs(2), || flag.is_active()));
        keyboard.release("g");
        keyboard.release("f");
        assert!(wait_for(Duration::from_secs(2), || !flag.is_active()));

        stop.request();
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert!(wait_for(Duration::from_secs(1), || {
            keyboard.press("x");
            keyboard.subscriber_count() == 0
        }));
    }

    #[test]
    fn test_other_keys_ignored() {
        let keyboard = Arc::new(TestKeyboard::new());
        let target = KeyTarget::new();
        target.set(Key::named("space"));
        let mut trigger = KeybindTrigger::new(keyboard.clone(), target);
        let ctx = context();
        trigger.start().unwrap();

        let flag = ctx.flag.clone();
        let stop = ctx.stop.clone();
        let handle = std::thread::spawn(move || trigger.run(&ctx));
        keyboard.press("a");
        keyboard.press("Space");
        std::thread::sleep(Duration::from_millis(30));
        stop.request();

        assert_eq!(handle.join().unwrap(), Ok(()));
        assert!(!flag.is_active());
    }

    #[test]
    fn test_no_target_ignores_everything() {
        let keyboard = Arc::new(TestKeyboard::new());
        let mut trigger = KeybindTrigger::new(keyboard.clone(), KeyTarget::new());
        let ctx = context();
        trigger.start().unwrap();

        let flag = ctx.flag.clone();
        let stop = ctx.stop.clone();
        let handle = std::thread::spawn(move || trigger.run(&ctx));
        keyboard.press("a");
        std::thread::sleep(Duration::from_millis(30));
        stop.request();
        assert_eq!(handle.join().unwrap(), Ok(()));
        assert!(!flag.is_active());
    }

    #[test]
    fn test_start_fails_without_hook() {
        let mut trigger = KeybindTrigger::new(Arc::new(NoKeyboard), KeyTarget::new());
        assert!(matches!(trigger.start(), Err(TriggerError::KeyboardHook(_))));
    }

    #[test]
    fn test_capture_records_next_press() {
        let keyboard = Arc::new(TestKeyboard::new());
        let target = KeyTarget::new();
        let capture = KeyCapture::new(keyboard.clone(), target.clone());
        let (status, rx) = StatusReporter::channel();

        capture.begin(&status).unwrap();
        assert!(capture.is_capturing());

        keyboard.release("q");
        keyboard.press("k");
        keyboard.press("j");
        assert!(wait_for(Duration::from_secs(2), || !capture.is_capturing()));
        assert_eq!(target.get(), Some(Key::named("k")));

        let events: Vec<RouterEvent> = rx.try_iter().collect();
        assert!(matches!(&events[0], RouterEvent::Status(s) if s.severity == Severity::Warning));
        assert!(events.contains(&RouterEvent::KeybindCaptured("k".to_string())));
        assert!(matches!(events.last(), Some(RouterEvent::Status(s)) if s.severity == Severity::Normal));
    }

    #[test]
    fn test_second_capture_rejected() {
        let keyboard = Arc::new(TestKeyboard::new());
        let capture = KeyCapture::new(keyboard.clone(), KeyTarget::new());
        let (status, _rx) = StatusReporter::channel();

        capture.begin(&status).unwrap();
        assert!(matches!(capture.begin(&status), Err(BleepError::CaptureInProgress)));

        keyboard.press("z");
        assert!(wait_for(Duration::from_secs(2), || !capture.is_capturing()));
        // Once finished a new capture may start
        capture.begin(&status).unwrap();
        capture.cancel();
        assert!(wait_for(Duration::from_secs(2), || !capture.is_capturing()));
    }

    #[test]
    fn test_capture_without_hook_is_an_error() {
        let capture = KeyCapture::new(Arc::new(NoKeyboard), KeyTarget::new());
        let (status, _rx) = StatusReporter::channel();
        assert!(matches!(capture.begin(&status), Err(BleepError::KeyboardHook(_))));
        assert!(!capture.is_capturing());
    }

    #[test]
    fn test_capture_stops_on_first_press() {
        assert_eq!(
            on_capture_event(KeyEvent::Released(Key::named("a"))),
            ControlFlow::Continue(())
        );
        assert_eq!(
            on_capture_event(KeyEvent::Pressed(Key::named("a"))),
            ControlFlow::Break(Key::named("a"))
        );
    }
}
