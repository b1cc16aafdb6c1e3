//! Key combinations: parsing, validation and canonical display.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Chords the operating system reserves; binding them is refused.
const RESERVED: &[&str] = &[
    "ctrl+alt+delete",
    "ctrl+shift+esc",
    "alt+tab",
    "alt+shift+tab",
    "alt+f4",
    "ctrl+esc",
    "alt+esc",
    "meta+l",
    "meta+r",
    "meta+tab",
    "meta+d",
];

/// A modifier key. The declaration order is the display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    /// Control
    Ctrl,
    /// Alt / Option
    Alt,
    /// Shift
    Shift,
    /// Windows / Command / Super
    Meta,
}

impl Modifier {
    /// Every modifier in display order
    pub const ALL: [Modifier; 4] = [Modifier::Ctrl, Modifier::Alt, Modifier::Shift, Modifier::Meta];

    /// Parse a lowercase token, accepting common aliases
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "ctrl" | "control" => Some(Modifier::Ctrl),
            "alt" | "option" => Some(Modifier::Alt),
            "shift" => Some(Modifier::Shift),
            "meta" | "cmd" | "win" | "super" => Some(Modifier::Meta),
            _ => None,
        }
    }

    /// Canonical lowercase token
    pub fn token(self) -> &'static str {
        match self {
            Modifier::Ctrl => "ctrl",
            Modifier::Alt => "alt",
            Modifier::Shift => "shift",
            Modifier::Meta => "meta",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Modifier::Ctrl => "Ctrl",
            Modifier::Alt => "Alt",
            Modifier::Shift => "Shift",
            Modifier::Meta => "Meta",
        }
    }
}

/// Non-character keys that may be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NamedKey {
    /// Enter / Return
    Enter,
    /// Tab
    Tab,
    /// Escape
    Esc,
    /// Space bar
    Space,
    /// Up arrow
    Up,
    /// Down arrow
    Down,
    /// Left arrow
    Left,
    /// Right arrow
    Right,
    /// Home
    Home,
    /// End
    End,
    /// Page Up
    PageUp,
    /// Page Down
    PageDown,
    /// Backspace
    Backspace,
    /// Delete
    Delete,
    /// Insert
    Insert,
}

impl NamedKey {
    /// Parse a lowercase token, accepting common aliases
    pub fn from_token(token: &str) -> Option<Self> {
        let key = match token {
            "enter" | "return" => NamedKey::Enter,
            "tab" => NamedKey::Tab,
            "esc" | "escape" => NamedKey::Esc,
            "space" => NamedKey::Space,
            "up" => NamedKey::Up,
            "down" => NamedKey::Down,
            "left" => NamedKey::Left,
            "right" => NamedKey::Right,
            "home" => NamedKey::Home,
            "end" => NamedKey::End,
            "pageup" | "page_up" | "pgup" => NamedKey::PageUp,
            "pagedown" | "page_down" | "pgdn" => NamedKey::PageDown,
            "backspace" => NamedKey::Backspace,
            "delete" | "del" => NamedKey::Delete,
            "insert" | "ins" => NamedKey::Insert,
            _ => return None,
        };
        Some(key)
    }

    /// Canonical lowercase token
    pub fn token(self) -> &'static str {
        match self {
            NamedKey::Enter => "enter",
            NamedKey::Tab => "tab",
            NamedKey::Esc => "esc",
            NamedKey::Space => "space",
            NamedKey::Up => "up",
            NamedKey::Down => "down",
            NamedKey::Left => "left",
            NamedKey::Right => "right",
            NamedKey::Home => "home",
            NamedKey::End => "end",
            NamedKey::PageUp => "pageup",
            NamedKey::PageDown => "pagedown",
            NamedKey::Backspace => "backspace",
            NamedKey::Delete => "delete",
            NamedKey::Insert => "insert",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            NamedKey::Enter => "Enter",
            NamedKey::Tab => "Tab",
            NamedKey::Esc => "Esc",
            NamedKey::Space => "Space",
            NamedKey::Up => "Up",
            NamedKey::Down => "Down",
            NamedKey::Left => "Left",
            NamedKey::Right => "Right",
            NamedKey::Home => "Home",
            NamedKey::End => "End",
            NamedKey::PageUp => "PageUp",
            NamedKey::PageDown => "PageDown",
            NamedKey::Backspace => "Backspace",
            NamedKey::Delete => "Delete",
            NamedKey::Insert => "Insert",
        }
    }
}

/// The non-modifier key of a combo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Lowercase ASCII letter or digit
    Char(char),
    /// F1 to F12
    Function(u8),
    /// Navigation and editing keys
    Named(NamedKey),
}

impl Key {
    /// Parse a lowercase token
    pub fn from_token(token: &str) -> Result<Self> {
        let mut chars = token.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return if c.is_ascii_alphanumeric() {
                Ok(Key::Char(c.to_ascii_lowercase()))
            } else {
                Err(Error::validation(format!("key '{}' cannot be bound", token)))
            };
        }

        if let Some(number) = token.strip_prefix('f') {
            if let Ok(n) = number.parse::<u8>() {
                return Key::function(n);
            }
        }

        NamedKey::from_token(token)
            .map(Key::Named)
            .ok_or_else(|| Error::validation(format!("unknown key '{}'", token)))
    }

    /// A function key, F1 to F12
    pub fn function(n: u8) -> Result<Self> {
        if (1..=12).contains(&n) {
            Ok(Key::Function(n))
        } else {
            Err(Error::validation(format!("function key F{} is out of range", n)))
        }
    }

    /// Canonical lowercase token
    pub fn token(&self) -> String {
        match self {
            Key::Char(c) => c.to_string(),
            Key::Function(n) => format!("f{}", n),
            Key::Named(named) => named.token().to_string(),
        }
    }

    fn display_name(&self) -> String {
        match self {
            Key::Char(c) => c.to_ascii_uppercase().to_string(),
            Key::Function(n) => format!("F{}", n),
            Key::Named(named) => named.display_name().to_string(),
        }
    }
}

/// A set of modifiers plus exactly one key, e.g. `Ctrl+Shift+S`.
///
/// Equality covers the modifier set and the key; parsing is
/// case-insensitive, so `CTRL+shift+s` and `ctrl+Shift+S` are the same combo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Combo {
    modifiers: BTreeSet<Modifier>,
    key: Key,
    display: String,
}

impl Combo {
    /// Build a combo from parts, applying the same rules as parsing
    pub fn from_parts(modifiers: impl IntoIterator<Item = Modifier>, key: Key) -> Result<Self> {
        let modifiers: BTreeSet<Modifier> = modifiers.into_iter().collect();
        if modifiers.is_empty() {
            return Err(Error::validation(
                "a hotkey needs at least one modifier",
            ));
        }

        let display = modifiers
            .iter()
            .map(|m| m.display_name().to_string())
            .chain(std::iter::once(key.display_name()))
            .collect::<Vec<_>>()
            .join("+");
        let combo = Self {
            modifiers,
            key,
            display,
        };

        if combo.is_reserved() {
            return Err(Error::validation(format!(
                "{} is reserved by the operating system",
                combo.display
            )));
        }
        Ok(combo)
    }

    /// Parse a `+`-separated combo such as `ctrl+shift+s`
    pub fn parse(input: &str) -> Result<Self> {
        let lowered = input.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return Err(Error::validation("hotkey combination is empty"));
        }

        let tokens: Vec<&str> = lowered.split('+').map(str::trim).collect();
        if tokens.iter().any(|t| t.is_empty()) {
            return Err(Error::validation(format!(
                "malformed hotkey combination '{}'",
                input
            )));
        }

        let (key_token, modifier_tokens) = tokens
            .split_last()
            .ok_or_else(|| Error::validation("hotkey combination is empty"))?;

        let modifiers = modifier_tokens
            .iter()
            .map(|token| {
                Modifier::from_token(token)
                    .ok_or_else(|| Error::validation(format!("unknown modifier '{}'", token)))
            })
            .collect::<Result<Vec<_>>>()?;

        if Modifier::from_token(key_token).is_some() {
            return Err(Error::validation(format!(
                "'{}' ends with a modifier instead of a key",
                input
            )));
        }

        Self::from_parts(modifiers, Key::from_token(key_token)?)
    }

    /// The modifier set
    pub fn modifiers(&self) -> &BTreeSet<Modifier> {
        &self.modifiers
    }

    /// The key
    pub fn key(&self) -> Key {
        self.key
    }

    /// Display form, e.g. `Ctrl+Shift+S`
    pub fn display(&self) -> &str {
        &self.display
    }

    /// Lowercase form as written in settings, e.g. `ctrl+shift+s`
    pub fn canonical(&self) -> String {
        self.modifiers
            .iter()
            .map(|m| m.token().to_string())
            .chain(std::iter::once(self.key.token()))
            .collect::<Vec<_>>()
            .join("+")
    }

    /// Whether the held modifiers and pressed key trigger this combo
    pub fn matches(&self, held: &BTreeSet<Modifier>, key: &Key) -> bool {
        self.key == *key && self.modifiers == *held
    }

    fn is_reserved(&self) -> bool {
        RESERVED.contains(&self.canonical().as_str())
    }

    /// Candidate replacements for a conflicting combo, best first.
    ///
    /// Other modifier sets with the same key come first, then
    /// `Ctrl+Shift+F9` to `Ctrl+Shift+F12`. The combo itself, reserved chords
    /// and duplicates are left out.
    pub fn alternatives(&self) -> Vec<Combo> {
        use Modifier::{Alt, Ctrl, Shift};

        let modifier_sets: [&[Modifier]; 4] =
            [&[Ctrl, Alt], &[Ctrl, Shift], &[Ctrl, Alt, Shift], &[Alt, Shift]];
        let same_key = modifier_sets
            .iter()
            .filter_map(|set| Combo::from_parts(set.iter().copied(), self.key).ok());
        let function_keys = (9..=12)
            .filter_map(|n| Key::function(n).ok())
            .filter_map(|key| Combo::from_parts([Ctrl, Shift], key).ok());

        let mut candidates: Vec<Combo> = Vec::new();
        for candidate in same_key.chain(function_keys) {
            if candidate != *self && !candidates.contains(&candidate) {
                candidates.push(candidate);
            }
        }
        candidates
    }
}

impl fmt::Display for Combo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl FromStr for Combo {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Combo::parse(s)
    }
}

impl TryFrom<String> for Combo {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Combo::parse(&value)
    }
}

impl From<Combo> for String {
    fn from(combo: Combo) -> Self {
        combo.canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let combo = Combo::parse("shift+CTRL+s").unwrap();
        assert_eq!(combo.display(), "Ctrl+Shift+S");
        assert_eq!(combo.canonical(), "ctrl+shift+s");
        assert_eq!(combo.key(), Key::Char('s'));
        assert_eq!(combo, Combo::parse("Ctrl+Shift+S").unwrap());
    }

    #[test]
    fn test_aliases_and_named_keys() {
        assert_eq!(Combo::parse("control+option+return").unwrap().display(), "Ctrl+Alt+Enter");
        assert_eq!(Combo::parse("cmd+shift+pgup").unwrap().display(), "Shift+Meta+PageUp");
        assert_eq!(Combo::parse("ctrl + f12").unwrap().display(), "Ctrl+F12");
        assert_eq!(Combo::parse("alt+7").unwrap().canonical(), "alt+7");
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "", "s", "ctrl+", "+s", "ctrl+shift", "hyper+s", "ctrl+f13", "ctrl+f0", "ctrl+?",
            "ctrl+capslock",
        ] {
            assert!(
                matches!(Combo::parse(bad), Err(Error::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_reserved_chords_rejected() {
        for reserved in ["ctrl+alt+delete", "alt+tab", "Shift+Alt+Tab", "win+l", "alt+f4", "ctrl+alt+del"] {
            let err = Combo::parse(reserved);
            assert!(matches!(err, Err(Error::Validation(_))), "{:?} should be reserved", reserved);
        }
        assert!(Combo::parse("ctrl+shift+esc").is_err());
        assert!(Combo::parse("ctrl+alt+esc").is_ok());
    }

    #[test]
    fn test_parse_display_roundtrip() {
        for input in ["ctrl+shift+s", "alt+meta+f5", "ctrl+alt+shift+meta+space", "shift+0"] {
            let combo = Combo::parse(input).unwrap();
            assert_eq!(Combo::parse(combo.display()).unwrap(), combo);
            assert_eq!(Combo::parse(&combo.canonical()).unwrap(), combo);
        }
    }

    #[test]
    fn test_matches_exact_modifier_set() {
        let combo = Combo::parse("ctrl+shift+s").unwrap();
        let exact: BTreeSet<_> = [Modifier::Shift, Modifier::Ctrl].into_iter().collect();
        let extra: BTreeSet<_> = [Modifier::Ctrl, Modifier::Shift, Modifier::Alt].into_iter().collect();

        assert!(combo.matches(&exact, &Key::Char('s')));
        assert!(!combo.matches(&extra, &Key::Char('s')));
        assert!(!combo.matches(&exact, &Key::Char('d')));
    }

    #[test]
    fn test_alternatives() {
        let combo = Combo::parse("ctrl+shift+s").unwrap();
        let alternatives: Vec<String> = combo.alternatives().iter().map(|c| c.canonical()).collect();
        assert_eq!(
            alternatives,
            vec![
                "ctrl+alt+s",
                "ctrl+alt+shift+s",
                "alt+shift+s",
                "ctrl+shift+f9",
                "ctrl+shift+f10",
                "ctrl+shift+f11",
                "ctrl+shift+f12",
            ]
        );
    }

    #[test]
    fn test_serde_as_string() {
        let combo = Combo::parse("ctrl+alt+o").unwrap();
        let json = serde_json::to_string(&combo).unwrap();
        assert_eq!(json, "\"ctrl+alt+o\"");
        let back: Combo = serde_json::from_str("\"Ctrl+Alt+O\"").unwrap();
        assert_eq!(back, combo);
        assert!(serde_json::from_str::<Combo>("\"alt+tab\"").is_err());
    }
}
