//! Passive key grabs on the root window.

use x11rb::connection::Connection;
use x11rb::protocol::xproto::{self, GrabMode, ModMask};

use super::HotkeyError;
use super::keybinding::Binding;
use crate::x11::X11Session;

/// CapsLock is always LockMask.
const LOCK_MASK: u16 = 0x0002;

/// The hotkey must fire with any combination of CapsLock and NumLock,
/// so each binding is grabbed once per lock state.
fn lock_masks(numlock_mask: u16) -> [u16; 4] {
    [0, LOCK_MASK, numlock_mask, LOCK_MASK | numlock_mask]
}

/// Grab `binding` on the root window.
///
/// `Ok(false)` means some variant was refused, usually because another
/// client already holds the chord.
pub fn grab(session: &X11Session, binding: &Binding) -> Result<bool, HotkeyError> {
    let conn = session.conn();
    let mut all_ok = true;

    for lock in lock_masks(session.numlock_mask()) {
        let cookie = xproto::grab_key(
            &**conn,
            true,
            session.root(),
            ModMask::from(binding.modifiers | lock),
            binding.keycode,
            GrabMode::ASYNC,
            GrabMode::ASYNC,
        )
        .map_err(crate::x11::X11Error::from)?;

        if let Err(e) = cookie.check() {
            tracing::warn!(
                binding = %binding.raw,
                lock_mask = lock,
                error = %e,
                "XGrabKey refused; the chord may belong to another application"
            );
            all_ok = false;
        }
    }

    Ok(all_ok)
}

/// Release every variant taken by [`grab`]. Best effort.
pub fn ungrab(session: &X11Session, binding: &Binding) {
    let conn = session.conn();
    for lock in lock_masks(session.numlock_mask()) {
        let mods = ModMask::from(binding.modifiers | lock);
        if let Err(e) = xproto::ungrab_key(&**conn, binding.keycode, session.root(), mods) {
            tracing::debug!(binding = %binding.raw, error = %e, "XUngrabKey failed");
        }
    }
    if let Err(e) = conn.flush() {
        tracing::debug!(error = %e, "flush after ungrab failed");
    }
}
