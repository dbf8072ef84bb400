//! Key mapping for terminal input
//!
//! Converts key presses to the byte sequences the device REPL expects.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Keys with a fixed encoding
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key {
    Tab,
    Backspace,
    Up,
    Down,
    Left,
    Right,
    /// Anything else; encoded from its text
    Other,
}

/// Key mapper for converting key presses to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Fixed table for named keys, UTF-8 of `fallback_text` otherwise
    pub fn translate(key: Key, fallback_text: &str) -> Vec<u8> {
        match key {
            Key::Tab => b"\t".to_vec(),
            Key::Backspace => b"\x7f".to_vec(),
            Key::Up => b"\x1b[A".to_vec(),
            Key::Down => b"\x1b[B".to_vec(),
            Key::Right => b"\x1b[C".to_vec(),
            Key::Left => b"\x1b[D".to_vec(),
            Key::Other => fallback_text.as_bytes().to_vec(),
        }
    }

    /// Map a crossterm KeyEvent; `None` for keys the device has no use for
    pub fn from_event(event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),
            KeyCode::Enter => Some(b"\r".to_vec()),
            // Some terminals report Shift+Tab as Tab with SHIFT
            KeyCode::Tab if mods.contains(Modifiers::SHIFT) => Some(b"\x1b[Z".to_vec()),
            KeyCode::Tab => Some(Self::translate(Key::Tab, "")),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
            KeyCode::Backspace => Some(Self::translate(Key::Backspace, "")),
            KeyCode::Esc => Some(vec![0x1B]),

            KeyCode::Up => Some(Self::translate(Key::Up, "")),
            KeyCode::Down => Some(Self::translate(Key::Down, "")),
            KeyCode::Right => Some(Self::translate(Key::Right, "")),
            KeyCode::Left => Some(Self::translate(Key::Left, "")),

            KeyCode::Home => Some(b"\x1b[H".to_vec()),
            KeyCode::End => Some(b"\x1b[F".to_vec()),
            KeyCode::Delete => Some(b"\x1b[3~".to_vec()),

            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        // Ctrl + letter = control character
        if mods.contains(Modifiers::CTRL) && !mods.contains(Modifiers::ALT) {
            if ch.is_ascii_alphabetic() {
                return vec![(ch.to_ascii_lowercase() as u8) - b'a' + 1];
            }
            match ch {
                '@' | ' ' => return vec![0x00],
                '[' => return vec![0x1B],
                '\\' => return vec![0x1C],
                ']' => return vec![0x1D],
                '^' => return vec![0x1E],
                '_' => return vec![0x1F],
                _ => {}
            }
        }

        let text = ch.to_string();
        let mut bytes = Vec::with_capacity(text.len() + 1);
        // Alt + key = ESC + key
        if mods.contains(Modifiers::ALT) {
            bytes.push(0x1B);
        }
        bytes.extend(Self::translate(Key::Other, &text));
        bytes
    }
}
