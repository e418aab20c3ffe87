//! Process-wide keyboard hook
//!
//! `rdev::listen` blocks its thread forever and cannot be stopped, so it is
//! started once per process and fans events out through a [`KeyBroadcast`].
//! Listeners "stop" by dropping their subscription.

use std::sync::{Arc, Mutex, OnceLock};

use rdev::{Event, EventType};

use super::keybind::{Key, KeyBroadcast, KeyEvent, KeyEventSource, KeySubscription};
use crate::error::TriggerError;

enum HookState {
    Idle,
    Listening,
    Failed(String),
}

/// The global low-level keyboard listener
pub struct GlobalKeyboard {
    broadcast: Arc<KeyBroadcast>,
    state: Arc<Mutex<HookState>>,
}

impl GlobalKeyboard {
    /// The single hook shared by the whole process
    pub fn shared() -> Arc<GlobalKeyboard> {
        static HOOK: OnceLock<Arc<GlobalKeyboard>> = OnceLock::new();
        Arc::clone(HOOK.get_or_init(|| {
            Arc::new(GlobalKeyboard {
                broadcast: Arc::new(KeyBroadcast::new()),
                state: Arc::new(Mutex::new(HookState::Idle)),
            })
        }))
    }

    fn ensure_listening(&self) -> Result<(), TriggerError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TriggerError::KeyboardHook("hook state poisoned".to_string()))?;

        match &*state {
            HookState::Listening => return Ok(()),
            HookState::Failed(msg) => return Err(TriggerError::KeyboardHook(msg.clone())),
            HookState::Idle => {}
        }

        let broadcast = Arc::clone(&self.broadcast);
        let hook_state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("openbleep-keyboard-hook".to_string())
            .spawn(move || {
                log::info!("Keyboard hook listening");
                let publisher = Arc::clone(&broadcast);
                let result = rdev::listen(move |event: Event| {
                    if let Some(key_event) = to_key_event(&event.event_type) {
                        publisher.publish(key_event);
                    }
                });
                let msg = match result {
                    Err(e) => format!("{:?}", e),
                    Ok(()) => "listener returned".to_string(),
                };
                log::error!("Keyboard hook failed: {}", msg);
                if let Ok(mut state) = hook_state.lock() {
                    *state = HookState::Failed(msg);
                }
                // Wake every listener and capture still waiting on the hook
                broadcast.close();
            })
            .map_err(|e| TriggerError::KeyboardHook(e.to_string()))?;

        *state = HookState::Listening;
        Ok(())
    }
}

impl KeyEventSource for GlobalKeyboard {
    fn subscribe(&self) -> Result<KeySubscription, TriggerError> {
        self.ensure_listening()?;
        Ok(self.broadcast.subscribe())
    }
}

fn to_key_event(event_type: &EventType) -> Option<KeyEvent> {
    match event_type {
        EventType::KeyPress(key) => Some(KeyEvent::Pressed(Key::named(key_name(*key)))),
        EventType::KeyRelease(key) => Some(KeyEvent::Released(Key::named(key_name(*key)))),
        _ => None,
    }
}

/// Printable keys by their character, everything else by its key name
fn key_name(key: rdev::Key) -> String {
    let name = format!("{:?}", key);
    if let Some(letter) = name.strip_prefix("Key") {
        if letter.len() == 1 {
            return letter.to_lowercase();
        }
    }
    if let Some(digit) = name.strip_prefix("Num") {
        if digit.len() == 1 && digit.chars().all(|c| c.is_ascii_digit()) {
            return digit.to_string();
        }
    }
    name
}
