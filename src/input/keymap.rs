//! Key names and characters to Linux evdev codes
//!
//! See /usr/include/linux/input-event-codes.h. Text goes through a fixed
//! US QWERTY table; anything outside it needs the Unicode text path.

use crate::error::{Error, Result};

pub const KEY_LEFTSHIFT: u32 = 42;
pub const KEY_LEFTCTRL: u32 = 29;
pub const KEY_LEFTALT: u32 = 56;
pub const KEY_LEFTMETA: u32 = 125;
pub const KEY_V: u32 = 47;

/// Mouse buttons as evdev `BTN_*` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Back,
    Forward,
}

impl MouseButton {
    pub fn code(self) -> u32 {
        match self {
            MouseButton::Left => 0x110,
            MouseButton::Right => 0x111,
            MouseButton::Middle => 0x112,
            MouseButton::Back => 0x113,
            MouseButton::Forward => 0x114,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Back => "back",
            MouseButton::Forward => "forward",
        }
    }
}

impl std::str::FromStr for MouseButton {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            "back" | "side" => Ok(MouseButton::Back),
            "forward" | "extra" => Ok(MouseButton::Forward),
            other => Err(Error::Config(format!(
                "unknown mouse button '{other}' (expected left, right, middle, back, forward)"
            ))),
        }
    }
}

/// Modifier names to their left-hand key codes
pub fn modifier_code(name: &str) -> Option<u32> {
    match name.trim().to_lowercase().as_str() {
        "shift" => Some(KEY_LEFTSHIFT),
        "ctrl" | "control" => Some(KEY_LEFTCTRL),
        "alt" => Some(KEY_LEFTALT),
        "super" | "meta" | "win" => Some(KEY_LEFTMETA),
        _ => None,
    }
}

/// Resolve a modifier list, skipping names that are not modifiers
pub fn resolve_modifiers<S: AsRef<str>>(names: &[S]) -> Vec<u32> {
    names
        .iter()
        .filter_map(|name| {
            let code = modifier_code(name.as_ref());
            if code.is_none() {
                tracing::debug!(modifier = name.as_ref(), "Ignoring unknown modifier");
            }
            code
        })
        .collect()
}

/// Named (non-character) keys
fn named_key(name: &str) -> Option<u32> {
    let code = match name {
        // Special keys
        "return" | "enter" => 28,
        "escape" | "esc" => 1,
        "tab" => 15,
        "backspace" => 14,
        "space" => 57,
        "delete" | "del" => 111,
        "insert" => 110,
        "home" => 102,
        "end" => 107,
        "pageup" | "page_up" => 104,
        "pagedown" | "page_down" => 109,
        "print" => 99,
        "scroll_lock" => 70,
        "pause" => 119,
        "caps_lock" => 58,
        "num_lock" => 69,
        "menu" => 127,

        // Arrow keys
        "up" => 103,
        "down" => 108,
        "left" => 105,
        "right" => 106,

        // Function keys
        "f1" => 59,
        "f2" => 60,
        "f3" => 61,
        "f4" => 62,
        "f5" => 63,
        "f6" => 64,
        "f7" => 65,
        "f8" => 66,
        "f9" => 67,
        "f10" => 68,
        "f11" => 87,
        "f12" => 88,

        _ => return None,
    };
    Some(code)
}

// (unshifted, shifted, keycodes) per keyboard row
const QWERTY_ROWS: [(&str, &str, &[u32]); 4] = [
    ("`1234567890-=", "~!@#$%^&*()_+", &[41, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13]),
    ("qwertyuiop[]\\", "QWERTYUIOP{}|", &[16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 43]),
    ("asdfghjkl;'", "ASDFGHJKL:\"", &[30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40]),
    ("zxcvbnm,./", "ZXCVBNM<>?", &[44, 45, 46, 47, 48, 49, 50, 51, 52, 53]),
];

/// A character's key code and whether shift must be held
pub fn char_key(ch: char) -> Option<(u32, bool)> {
    match ch {
        ' ' => return Some((57, false)),
        '\t' => return Some((15, false)),
        '\n' => return Some((28, false)),
        _ => {}
    }
    for (normal, shifted, codes) in QWERTY_ROWS {
        if let Some(i) = normal.chars().position(|c| c == ch) {
            return Some((codes[i], false));
        }
        if let Some(i) = shifted.chars().position(|c| c == ch) {
            return Some((codes[i], true));
        }
    }
    None
}

/// Named key or single character
pub fn key_code(name: &str) -> Option<u32> {
    let trimmed = name.trim();
    if let Some(code) = named_key(&trimmed.to_lowercase()) {
        return Some(code);
    }
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => char_key(ch).map(|(code, _)| code),
        _ => None,
    }
}

/// Parsed `ctrl+shift+t` style combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCombo {
    /// In press order
    pub modifiers: Vec<u32>,
    pub key: Option<u32>,
}

impl KeyCombo {
    /// Split on `+`; modifier names go to `modifiers`, the last other part is the key
    ///
    /// A lone `+` (or a trailing `++`) means the plus key itself.
    pub fn parse(combo: &str) -> Result<Self> {
        let mut modifiers = Vec::new();
        let mut main: Option<&str> = None;

        let parts: Vec<&str> = if combo.trim() == "+" {
            vec!["+"]
        } else if let Some(rest) = combo.strip_suffix("++") {
            rest.split('+').chain(std::iter::once("+")).collect()
        } else {
            combo.split('+').collect()
        };

        for part in parts {
            if let Some(code) = modifier_code(part) {
                modifiers.push(code);
            } else if !part.trim().is_empty() {
                main = Some(part);
            }
        }

        let key = match main {
            Some(name) => Some(key_code(name).ok_or_else(|| {
                Error::Config(format!("unknown key '{}' in '{combo}'", name.trim()))
            })?),
            None => None,
        };

        if key.is_none() && modifiers.is_empty() {
            return Err(Error::Config(format!("empty key combination '{combo}'")));
        }
        Ok(Self { modifiers, key })
    }
}
