//! The keyboard-listener side of the hotkey bridge.
//!
//! A [`KeyboardListener`] blocks on its own OS thread ([`KeyThread`]) and
//! reports presses and releases to a [`KeySink`]. The sink tracks held
//! modifiers, matches chords against the bound combos and pushes
//! [`KeyMessage`]s into a bounded crossbeam channel. Nothing on this thread
//! touches the event bus.

use super::combo::{Combo, Key, Modifier, NamedKey};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Physical modifier keys as reported by the OS, sides included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierKey {
    /// Left Control
    CtrlLeft,
    /// Right Control
    CtrlRight,
    /// Left Alt / Option
    AltLeft,
    /// Right Alt / Option
    AltRight,
    /// AltGr, treated as Alt
    AltGr,
    /// Left Shift
    ShiftLeft,
    /// Right Shift
    ShiftRight,
    /// Left Meta / Command / Windows
    MetaLeft,
    /// Right Meta / Command / Windows
    MetaRight,
}

impl ModifierKey {
    /// The side-less modifier
    pub fn modifier(self) -> Modifier {
        match self {
            ModifierKey::CtrlLeft | ModifierKey::CtrlRight => Modifier::Ctrl,
            ModifierKey::AltLeft | ModifierKey::AltRight | ModifierKey::AltGr => Modifier::Alt,
            ModifierKey::ShiftLeft | ModifierKey::ShiftRight => Modifier::Shift,
            ModifierKey::MetaLeft | ModifierKey::MetaRight => Modifier::Meta,
        }
    }
}

/// Portable key representation produced by a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawKey {
    /// A character, possibly a control-character artifact such as `\x13`
    Char(char),
    /// F-keys by number
    Function(u8),
    /// Navigation and editing keys
    Named(NamedKey),
    /// A modifier with its side
    Modifier(ModifierKey),
    /// Anything the listener could not classify
    Unknown(String),
}

impl RawKey {
    /// Left Ctrl
    pub fn ctrl() -> Self {
        RawKey::Modifier(ModifierKey::CtrlLeft)
    }

    /// Left Alt
    pub fn alt() -> Self {
        RawKey::Modifier(ModifierKey::AltLeft)
    }

    /// Left Shift
    pub fn shift() -> Self {
        RawKey::Modifier(ModifierKey::ShiftLeft)
    }

    /// Left Meta
    pub fn meta() -> Self {
        RawKey::Modifier(ModifierKey::MetaLeft)
    }
}

/// A raw key mapped onto the combo vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedKey {
    /// A modifier, sides collapsed
    Modifier(Modifier),
    /// A bindable key
    Key(Key),
    /// Not bindable; ignored
    Ignored,
}

/// Map a reported key onto a modifier or a bindable key.
///
/// Left/right variants collapse to one modifier. With Ctrl held some
/// platforms report letters as control characters (`Ctrl+S` as `\x13`);
/// those are decoded back to the letter, but only while Ctrl is in `held`.
/// Without Ctrl, the control characters of Enter, Tab, Backspace and Esc map
/// to their named keys and every other control character is ignored.
pub fn normalize(raw: &RawKey, held: &BTreeSet<Modifier>) -> NormalizedKey {
    match raw {
        RawKey::Modifier(m) => NormalizedKey::Modifier(m.modifier()),
        RawKey::Char(c) => {
            let code = *c as u32;
            if held.contains(&Modifier::Ctrl) && (0x01..=0x1a).contains(&code) {
                let letter = (b'a' + (code - 1) as u8) as char;
                NormalizedKey::Key(Key::Char(letter))
            } else if c.is_control() {
                match c {
                    '\r' | '\n' => NormalizedKey::Key(Key::Named(NamedKey::Enter)),
                    '\t' => NormalizedKey::Key(Key::Named(NamedKey::Tab)),
                    '\x08' | '\x7f' => NormalizedKey::Key(Key::Named(NamedKey::Backspace)),
                    '\x1b' => NormalizedKey::Key(Key::Named(NamedKey::Esc)),
                    _ => NormalizedKey::Ignored,
                }
            } else if c.is_ascii_alphanumeric() {
                NormalizedKey::Key(Key::Char(c.to_ascii_lowercase()))
            } else {
                NormalizedKey::Ignored
            }
        }
        RawKey::Function(n) => Key::function(*n)
            .map(NormalizedKey::Key)
            .unwrap_or(NormalizedKey::Ignored),
        RawKey::Named(named) => NormalizedKey::Key(Key::Named(*named)),
        RawKey::Unknown(_) => NormalizedKey::Ignored,
    }
}

/// Receives the press and release streams of a listener.
pub trait KeyCallbacks {
    /// A key went down
    fn on_press(&mut self, key: RawKey);
    /// A key came up
    fn on_release(&mut self, key: RawKey);
}

/// An OS keyboard listener.
///
/// `run` blocks the calling thread, delivering keys to `callbacks` until
/// `stop` is set or the listener ends. An `Err` means the listener failed.
pub trait KeyboardListener: Send + 'static {
    /// Deliver keys until stopped
    fn run(&mut self, callbacks: &mut dyn KeyCallbacks, stop: &AtomicBool) -> Result<()>;
}

/// One matched chord, produced on the key thread.
#[derive(Debug, Clone, PartialEq)]
pub struct HotkeyEvent {
    /// Id of the matched registration
    pub hotkey_id: String,
    /// The combo that matched
    pub combo: Combo,
    /// Action bound to the combo
    pub action: String,
    /// When the key went down
    pub timestamp: DateTime<Utc>,
}

/// What travels from the key thread to the event loop.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyMessage {
    /// A bound chord was pressed
    Hotkey(HotkeyEvent),
    /// The listener failed and stopped
    ListenerError(String),
}

/// A combo the key thread should react to.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveBinding {
    /// Chord to match
    pub combo: Combo,
    /// Action reported when it matches
    pub action: String,
}

/// Bound combos by hotkey id, written by the event loop, read by the key thread
pub type BindingTable = Arc<DashMap<String, ActiveBinding>>;

/// Key-thread state: held modifiers plus the outbound queue.
#[derive(Debug)]
pub struct KeySink {
    held: BTreeSet<Modifier>,
    bindings: BindingTable,
    tx: Sender<KeyMessage>,
}

impl KeySink {
    /// A sink with nothing held
    pub fn new(bindings: BindingTable, tx: Sender<KeyMessage>) -> Self {
        Self {
            held: BTreeSet::new(),
            bindings,
            tx,
        }
    }

    /// Modifiers currently held down
    pub fn held(&self) -> &BTreeSet<Modifier> {
        &self.held
    }

    fn find_match(&self, key: &Key) -> Option<HotkeyEvent> {
        self.bindings.iter().find_map(|entry| {
            let binding = entry.value();
            binding.combo.matches(&self.held, key).then(|| HotkeyEvent {
                hotkey_id: entry.key().clone(),
                combo: binding.combo.clone(),
                action: binding.action.clone(),
                timestamp: Utc::now(),
            })
        })
    }

    fn push(&self, message: KeyMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                warn!(?message, "Hotkey queue full, dropping key message");
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("Hotkey queue closed, dropping key message");
            }
        }
    }
}

impl KeyCallbacks for KeySink {
    fn on_press(&mut self, key: RawKey) {
        match normalize(&key, &self.held) {
            NormalizedKey::Modifier(modifier) => {
                self.held.insert(modifier);
            }
            NormalizedKey::Key(key) => {
                if let Some(event) = self.find_match(&key) {
                    debug!(hotkey_id = %event.hotkey_id, combo = %event.combo, "Hotkey matched");
                    self.push(KeyMessage::Hotkey(event));
                }
            }
            NormalizedKey::Ignored => trace!(?key, "Ignoring key"),
        }
    }

    fn on_release(&mut self, key: RawKey) {
        if let NormalizedKey::Modifier(modifier) = normalize(&key, &self.held) {
            self.held.remove(&modifier);
        }
    }
}

/// The dedicated OS thread running a listener.
#[derive(Debug)]
pub struct KeyThread {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl KeyThread {
    /// Start `listener` on a new thread.
    ///
    /// If the listener fails, a [`KeyMessage::ListenerError`] is posted
    /// before the thread exits.
    pub fn spawn(
        mut listener: Box<dyn KeyboardListener>,
        bindings: BindingTable,
        tx: Sender<KeyMessage>,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("hotkey-listener".into())
            .spawn(move || {
                debug!("Key thread started");
                let mut sink = KeySink::new(bindings, tx.clone());
                match listener.run(&mut sink, &stop_flag) {
                    Ok(()) => debug!("Keyboard listener stopped"),
                    Err(e) => {
                        error!(error = %e, "Keyboard listener failed");
                        let _ = tx.try_send(KeyMessage::ListenerError(e.to_string()));
                    }
                }
            })
            .map_err(|e| Error::ListenerError(format!("could not start key thread: {}", e)))?;

        Ok(Self {
            handle: Some(handle),
            stop,
        })
    }

    /// Ask the listener to stop
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Whether the thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the listener and wait up to `timeout` for the thread to exit.
    ///
    /// Returns `false` if the thread was still running when time ran out.
    pub async fn join(mut self, timeout: Duration) -> bool {
        self.stop();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let joined = tokio::task::spawn_blocking(move || handle.join());
        match tokio::time::timeout(timeout, joined).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(_))) => {
                warn!("Key thread panicked");
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Could not join key thread");
                false
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Key thread did not stop in time");
                false
            }
        }
    }
}

impl Drop for KeyThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Scripted input for [`FakeKeyboard`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyInput {
    /// Key down
    Press(RawKey),
    /// Key up
    Release(RawKey),
    /// Make the listener fail with this message
    Fail(String),
}

/// A deterministic in-memory keyboard listener.
#[derive(Debug)]
pub struct FakeKeyboard {
    rx: Receiver<KeyInput>,
    poll: Duration,
}

/// Feeds a [`FakeKeyboard`] from any thread.
#[derive(Debug, Clone)]
pub struct FakeKeyboardHandle {
    tx: Sender<KeyInput>,
}

impl FakeKeyboard {
    /// A listener plus the handle that drives it
    pub fn new() -> (Self, FakeKeyboardHandle) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let keyboard = Self {
            rx,
            poll: Duration::from_millis(5),
        };
        (keyboard, FakeKeyboardHandle { tx })
    }
}

impl KeyboardListener for FakeKeyboard {
    fn run(&mut self, callbacks: &mut dyn KeyCallbacks, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Acquire) {
            match self.rx.recv_timeout(self.poll) {
                Ok(KeyInput::Press(key)) => callbacks.on_press(key),
                Ok(KeyInput::Release(key)) => callbacks.on_release(key),
                Ok(KeyInput::Fail(message)) => return Err(Error::ListenerError(message)),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }
}

impl FakeKeyboardHandle {
    /// Queue a key press
    pub fn press(&self, key: RawKey) {
        let _ = self.tx.send(KeyInput::Press(key));
    }

    /// Queue a key release
    pub fn release(&self, key: RawKey) {
        let _ = self.tx.send(KeyInput::Release(key));
    }

    /// Press every key in order, then release them in reverse
    pub fn chord(&self, keys: &[RawKey]) {
        for key in keys {
            self.press(key.clone());
        }
        for key in keys.iter().rev() {
            self.release(key.clone());
        }
    }

    /// Make the listener fail
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(KeyInput::Fail(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, &str, &str)]) -> BindingTable {
        let table = BindingTable::default();
        for (id, combo, action) in entries {
            table.insert(
                id.to_string(),
                ActiveBinding {
                    combo: Combo::parse(combo).unwrap(),
                    action: action.to_string(),
                },
            );
        }
        table
    }

    #[test]
    fn test_normalize() {
        let none = BTreeSet::new();
        let ctrl: BTreeSet<Modifier> = [Modifier::Ctrl].into_iter().collect();

        assert_eq!(
            normalize(&RawKey::Modifier(ModifierKey::CtrlRight), &none),
            NormalizedKey::Modifier(Modifier::Ctrl)
        );
        assert_eq!(normalize(&RawKey::Char('S'), &none), NormalizedKey::Key(Key::Char('s')));
        assert_eq!(normalize(&RawKey::Char('\x13'), &ctrl), NormalizedKey::Key(Key::Char('s')));
        assert_eq!(normalize(&RawKey::Char('\x13'), &none), NormalizedKey::Ignored);
        assert_eq!(normalize(&RawKey::Char('\x1b'), &none), NormalizedKey::Key(Key::Named(NamedKey::Esc)));
        assert_eq!(normalize(&RawKey::Char('?'), &none), NormalizedKey::Ignored);
        assert_eq!(normalize(&RawKey::Function(13), &none), NormalizedKey::Ignored);
        assert_eq!(normalize(&RawKey::Unknown("media".into()), &none), NormalizedKey::Ignored);
    }

    #[test]
    fn test_control_characters_without_ctrl_are_not_letters() {
        let shift: BTreeSet<Modifier> = [Modifier::Shift].into_iter().collect();
        assert_eq!(normalize(&RawKey::Char('\r'), &shift), NormalizedKey::Key(Key::Named(NamedKey::Enter)));
        assert_eq!(normalize(&RawKey::Char('\t'), &shift), NormalizedKey::Key(Key::Named(NamedKey::Tab)));
        assert_eq!(
            normalize(&RawKey::Char('\x08'), &shift),
            NormalizedKey::Key(Key::Named(NamedKey::Backspace))
        );

        let (tx, rx) = crossbeam_channel::bounded(8);
        let mut sink = KeySink::new(
            table(&[("m", "shift+m", "noop"), ("enter", "shift+enter", "submit")]),
            tx,
        );
        sink.on_press(RawKey::shift());
        sink.on_press(RawKey::Char('\r'));
        sink.on_release(RawKey::Char('\r'));
        sink.on_press(RawKey::Char('\t'));
        sink.on_press(RawKey::Char('\x08'));
        sink.on_release(RawKey::shift());

        let fired: Vec<String> = rx
            .try_iter()
            .filter_map(|message| match message {
                KeyMessage::Hotkey(event) => Some(event.hotkey_id),
                KeyMessage::ListenerError(_) => None,
            })
            .collect();
        assert_eq!(fired, vec!["enter"]);
    }

    #[test]
    fn test_sink_matches_exact_chord() {
        let (tx, rx) = crossbeam_channel::bounded(8);
        let mut sink = KeySink::new(table(&[("shot", "ctrl+shift+s", "capture_screenshot")]), tx);

        sink.on_press(RawKey::ctrl());
        sink.on_press(RawKey::shift());
        sink.on_press(RawKey::Char('\x13'));
        sink.on_release(RawKey::Char('\x13'));
        sink.on_release(RawKey::shift());

        // Ctrl+S alone does not match
        sink.on_press(RawKey::Char('s'));
        sink.on_release(RawKey::ctrl());
        assert!(sink.held().is_empty());

        let messages: Vec<_> = rx.try_iter().collect();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            KeyMessage::Hotkey(event) => {
                assert_eq!(event.hotkey_id, "shot");
                assert_eq!(event.combo.display(), "Ctrl+Shift+S");
                assert_eq!(event.action, "capture_screenshot");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_sink_drops_when_queue_full() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut sink = KeySink::new(table(&[("o", "alt+o", "toggle_overlay")]), tx);

        sink.on_press(RawKey::alt());
        for _ in 0..3 {
            sink.on_press(RawKey::Char('o'));
        }
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[tokio::test]
    async fn test_key_thread_reports_listener_failure() {
        let (keyboard, handle) = FakeKeyboard::new();
        let (tx, rx) = crossbeam_channel::bounded(8);
        let thread = KeyThread::spawn(Box::new(keyboard), BindingTable::default(), tx).unwrap();

        handle.fail("device unplugged");
        let message = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(message, KeyMessage::ListenerError("Keyboard listener error: device unplugged".into()));
        assert!(thread.join(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_key_thread_stops_on_request() {
        let (keyboard, _handle) = FakeKeyboard::new();
        let (tx, _rx) = crossbeam_channel::bounded(8);
        let thread = KeyThread::spawn(Box::new(keyboard), BindingTable::default(), tx).unwrap();
        assert!(thread.join(Duration::from_secs(2)).await);
    }
}
