//! Shared X11 connection: focus, key mapping and the event thread.
//!
//! One `RustConnection` serves the hotkey grabber, the XTest key
//! injector, and source-window lookup. [`X11Session::connect`] is the
//! single connection point; everything else holds an `Arc` clone.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::errors::{ConnectError, ConnectionError, ReplyError};
use x11rb::protocol::Event;
use x11rb::protocol::xproto::{self, Atom, AtomEnum, ClientMessageEvent, EventMask, Keysym, Window};
use x11rb::protocol::xtest;
use x11rb::rust_connection::RustConnection;

use crate::error::PipelineError;

/// XK_Num_Lock keysym for dynamic modifier detection.
const XK_NUM_LOCK: Keysym = 0xff7f;

/// Modifiers that must be released before synthetic keys are sent.
/// Shift, Control, Mod1 (Alt), Mod4 (Super).
pub const HELD_MODIFIERS: u16 = 0x0001 | 0x0004 | 0x0008 | 0x0040;

#[derive(Debug, thiserror::Error)]
pub enum X11Error {
    #[error("connect failed: {0}")]
    Connect(#[from] ConnectError),
    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),
    #[error("request failed: {0}")]
    Reply(#[from] ReplyError),
    #[error("keysym 0x{0:04x} not found in keyboard mapping")]
    UnmappedKeysym(Keysym),
    #[error("XTEST extension not available")]
    NoXTest,
}

impl From<X11Error> for PipelineError {
    fn from(e: X11Error) -> Self {
        PipelineError::Capture(format!("X11: {e}"))
    }
}

struct Atoms {
    net_active_window: Atom,
    net_wm_name: Atom,
    utf8_string: Atom,
}

/// Shared X11 connection state.
pub struct X11Session {
    conn: Arc<RustConnection>,
    screen_num: usize,
    root: Window,
    atoms: Atoms,
    numlock_mask: u16,
}

fn intern(conn: &RustConnection, name: &[u8]) -> Result<Atom, X11Error> {
    Ok(xproto::intern_atom(conn, false, name)?.reply()?.atom)
}

impl X11Session {
    /// Connect to `$DISPLAY` and intern the atoms used for focus queries.
    pub fn connect() -> Result<Self, X11Error> {
        let (conn, screen_num) = RustConnection::connect(None)?;
        let root = conn.setup().roots[screen_num].root;

        let atoms = Atoms {
            net_active_window: intern(&conn, b"_NET_ACTIVE_WINDOW")?,
            net_wm_name: intern(&conn, b"_NET_WM_NAME")?,
            utf8_string: intern(&conn, b"UTF8_STRING")?,
        };

        let numlock_mask = detect_numlock_mask(&conn);
        tracing::debug!(
            screen = screen_num,
            numlock_mask = format_args!("0x{numlock_mask:04x}"),
            "connected to X11 display"
        );

        Ok(Self {
            conn: Arc::new(conn),
            screen_num,
            root,
            atoms,
            numlock_mask,
        })
    }

    pub fn conn(&self) -> &Arc<RustConnection> {
        &self.conn
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn screen_num(&self) -> usize {
        self.screen_num
    }

    /// Dynamically detected NumLock modifier bit.
    pub fn numlock_mask(&self) -> u16 {
        self.numlock_mask
    }

    /// True when the server offers the XTEST extension.
    pub fn has_xtest(&self) -> Result<bool, X11Error> {
        Ok(self
            .conn
            .extension_information(xtest::X11_EXTENSION_NAME)?
            .is_some())
    }

    /// `_NET_ACTIVE_WINDOW` on the root window, if the WM sets it.
    pub fn active_window(&self) -> Result<Option<Window>, X11Error> {
        let reply = xproto::get_property(
            &*self.conn,
            false,
            self.root,
            self.atoms.net_active_window,
            AtomEnum::WINDOW,
            0,
            1,
        )?
        .reply()?;

        Ok(reply
            .value32()
            .and_then(|mut v| v.next())
            .filter(|&w| w != 0))
    }

    /// `_NET_WM_NAME`, falling back to the legacy `WM_NAME`.
    pub fn window_title(&self, window: Window) -> Result<Option<String>, X11Error> {
        let reply = xproto::get_property(
            &*self.conn,
            false,
            window,
            self.atoms.net_wm_name,
            self.atoms.utf8_string,
            0,
            1024,
        )?
        .reply()?;
        if !reply.value.is_empty() {
            return Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()));
        }

        let reply = xproto::get_property(
            &*self.conn,
            false,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::ANY,
            0,
            1024,
        )?
        .reply()?;
        Ok((!reply.value.is_empty()).then(|| String::from_utf8_lossy(&reply.value).into_owned()))
    }

    /// Ask the window manager to raise and focus `window`.
    pub fn activate(&self, window: Window) -> Result<(), X11Error> {
        // Source indication 2: request from a pager, honoured by most WMs
        // even without a fresh user timestamp.
        let event = ClientMessageEvent::new(
            32,
            window,
            self.atoms.net_active_window,
            [2, x11rb::CURRENT_TIME, 0, 0, 0],
        );
        xproto::send_event(
            &*self.conn,
            false,
            self.root,
            EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
            event,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    /// Modifier bits currently held, ignoring lock keys.
    pub fn pressed_modifiers(&self) -> Result<u16, X11Error> {
        let reply = xproto::query_pointer(&*self.conn, self.root)?.reply()?;
        Ok(u16::from(reply.mask) & HELD_MODIFIERS)
    }

    /// Resolve a keysym through the server's keyboard mapping.
    pub fn keycode_for(&self, keysym: Keysym) -> Result<u8, X11Error> {
        keysym_to_keycode(&self.conn, keysym)?.ok_or(X11Error::UnmappedKeysym(keysym))
    }

    /// Press (`true`) or release one key through XTEST.
    pub fn fake_key(&self, keycode: u8, press: bool) -> Result<(), X11Error> {
        let kind = if press {
            xproto::KEY_PRESS_EVENT
        } else {
            xproto::KEY_RELEASE_EVENT
        };
        xtest::fake_input(
            &*self.conn,
            kind,
            keycode,
            x11rb::CURRENT_TIME,
            self.root,
            0,
            0,
            0,
        )?;
        Ok(())
    }

    pub fn flush(&self) -> Result<(), X11Error> {
        self.conn.flush()?;
        Ok(())
    }
}

/// First keycode producing `keysym`, if any.
fn keysym_to_keycode(conn: &RustConnection, keysym: Keysym) -> Result<Option<u8>, X11Error> {
    let setup = conn.setup();
    let min_keycode = setup.min_keycode;
    let count = setup.max_keycode - min_keycode + 1;

    let reply = xproto::get_keyboard_mapping(conn, min_keycode, count)?.reply()?;
    let per = reply.keysyms_per_keycode as usize;
    if per == 0 {
        return Ok(None);
    }

    Ok(reply
        .keysyms
        .chunks(per)
        .position(|syms| syms.contains(&keysym))
        .map(|i| min_keycode + i as u8))
}

/// Which modifier bit NumLock is mapped to. Falls back to Mod2.
fn detect_numlock_mask(conn: &RustConnection) -> u16 {
    const FALLBACK: u16 = 0x0010;

    let Ok(Some(numlock)) = keysym_to_keycode(conn, XK_NUM_LOCK) else {
        return FALLBACK;
    };
    let Some(reply) = xproto::get_modifier_mapping(conn)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
    else {
        return FALLBACK;
    };

    let per = reply.keycodes_per_modifier() as usize;
    if per == 0 {
        return FALLBACK;
    }

    // 8 rows: Shift, Lock, Control, Mod1..Mod5. Row i is bit 1 << i.
    reply
        .keycodes
        .chunks(per)
        .take(8)
        .position(|row| row.contains(&numlock))
        .map(|row| 1u16 << row)
        .unwrap_or(FALLBACK)
}

/// Poll the X11 fd on a dedicated thread and forward events.
///
/// Checks `stop` every 100 ms. The thread exits when the receiver is
/// dropped or the connection fails.
pub fn spawn_event_thread(
    conn: Arc<RustConnection>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<(tokio::sync::mpsc::UnboundedReceiver<Event>, JoinHandle<()>)> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    let handle = std::thread::Builder::new()
        .name("x11-events".into())
        .spawn(move || {
            let raw_fd = conn.stream().as_raw_fd();

            while !stop.load(Ordering::Relaxed) {
                // SAFETY: raw_fd is the X11 connection fd, valid while conn is alive.
                let borrowed = unsafe { BorrowedFd::borrow_raw(raw_fd) };
                let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];

                match poll(&mut fds, PollTimeout::from(100u16)) {
                    Ok(0) => continue,
                    Ok(_) => loop {
                        match conn.poll_for_event() {
                            Ok(Some(event)) => {
                                if tx.send(event).is_err() {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "X11 connection error");
                                return;
                            }
                        }
                    },
                    Err(nix::Error::EINTR) => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "poll error on X11 fd");
                        return;
                    }
                }
            }
        })?;

    Ok((rx, handle))
}
