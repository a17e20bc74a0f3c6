//! Hotkey chords: `"Ctrl+Space"` → modifier mask + keysym → keycode.
//!
//! Parsing is pure; only [`Chord::resolve`] touches the X server.

use x11rb::protocol::xproto::{Keysym, ModMask};

use super::HotkeyError;
use crate::x11::X11Session;

/// A parsed chord, not yet bound to a keyboard mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chord {
    pub modifiers: u16,
    pub keysym: Keysym,
    pub raw: String,
}

/// A chord resolved against the server's keyboard mapping.
#[derive(Debug, Clone)]
pub struct Binding {
    pub modifiers: u16,
    pub keycode: u8,
    pub raw: String,
}

impl Chord {
    /// Parse `Modifier[+Modifier...]+Key`.
    ///
    /// Modifiers: `Shift`, `Control`/`Ctrl`, `Alt`, `Super`. At least one
    /// is required so the grab never swallows a plain key.
    pub fn parse(spec: &str) -> Result<Self, HotkeyError> {
        let parts: Vec<&str> = spec.split('+').map(str::trim).collect();
        let Some((key_name, modifier_parts)) = parts.split_last() else {
            return Err(HotkeyError::InvalidBinding("empty binding".into()));
        };
        if modifier_parts.is_empty() {
            return Err(HotkeyError::InvalidBinding(format!(
                "bare key without modifier: {spec:?}"
            )));
        }

        let mut modifiers: u16 = 0;
        for &m in modifier_parts {
            modifiers |= parse_modifier(m)
                .ok_or_else(|| HotkeyError::InvalidBinding(format!("unknown modifier: {m:?}")))?;
        }

        let keysym = key_name_to_keysym(key_name)
            .ok_or_else(|| HotkeyError::InvalidBinding(format!("unknown key: {key_name:?}")))?;

        Ok(Self {
            modifiers,
            keysym,
            raw: spec.trim().to_string(),
        })
    }

    pub fn resolve(&self, session: &X11Session) -> Result<Binding, HotkeyError> {
        let keycode = session.keycode_for(self.keysym)?;
        Ok(Binding {
            modifiers: self.modifiers,
            keycode,
            raw: self.raw.clone(),
        })
    }
}

fn parse_modifier(name: &str) -> Option<u16> {
    match name.to_ascii_lowercase().as_str() {
        "shift" => Some(ModMask::SHIFT.into()),
        "control" | "ctrl" => Some(ModMask::CONTROL.into()),
        "alt" | "mod1" => Some(ModMask::M1.into()),
        "super" | "mod4" => Some(ModMask::M4.into()),
        _ => None,
    }
}

/// Letters, digits, F1-F12 and a handful of named keys.
fn key_name_to_keysym(name: &str) -> Option<Keysym> {
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        if ch.is_ascii_alphabetic() {
            return Some(ch.to_ascii_lowercase() as Keysym);
        }
        if ch.is_ascii_digit() {
            return Some(ch as Keysym);
        }
    }

    if let Some(rest) = name.strip_prefix('F').or_else(|| name.strip_prefix('f'))
        && let Ok(n) = rest.parse::<u32>()
        && (1..=12).contains(&n)
    {
        // XK_F1 = 0xffbe, consecutive through F12.
        return Some(0xffbe + n - 1);
    }

    match name.to_ascii_lowercase().as_str() {
        "space" => Some(0x0020),
        "return" | "enter" => Some(0xff0d),
        "escape" | "esc" => Some(0xff1b),
        "tab" => Some(0xff09),
        "backspace" => Some(0xff08),
        "insert" => Some(0xff63),
        "grave" | "`" => Some(0x0060),
        "period" | "." => Some(0x002e),
        "comma" | "," => Some(0x002c),
        "slash" | "/" => Some(0x002f),
        "semicolon" | ";" => Some(0x003b),
        _ => None,
    }
}

/// True when a key event is `binding`, ignoring CapsLock, NumLock and
/// pointer button bits in `event_state`.
pub fn event_matches_binding(
    event_keycode: u8,
    event_state: u16,
    binding: &Binding,
    numlock_mask: u16,
) -> bool {
    let lock_mask = u16::from(ModMask::LOCK) | numlock_mask;
    let mods = event_state & !lock_mask & 0x00ff;
    event_keycode == binding.keycode && mods == binding.modifiers
}
