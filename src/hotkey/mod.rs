//! Hotkey daemon: a global X11 key grab driving the pipeline.
//!
//! Each press of the configured chord runs one capture → dispatch →
//! deliver cycle on a spawned task, so the event loop keeps draining X11
//! events while a provider is thinking. Bursts of presses are dropped by
//! the spam guard.

mod grab;
mod keybinding;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::signal::unix::{SignalKind, signal as tokio_signal};
use tokio::task::JoinSet;
use x11rb::protocol::Event;

use crate::app::AppContext;
use crate::console::format;
use crate::dispatch::SpamGuard;
use crate::error::PipelineError;
use crate::x11::{self, X11Error, X11Session};

use keybinding::{Chord, event_matches_binding};

/// How long shutdown waits for running triggers after cancelling them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("X11: {0}")]
    X11(#[from] X11Error),
    #[error("invalid key binding: {0}")]
    InvalidBinding(String),
    #[error("no command named {0:?}")]
    UnknownCommand(String),
    #[error("hotkey {0} is held by another application")]
    Unavailable(String),
    #[error("hotkeys need an X11 display (DISPLAY is not usable)")]
    NoDisplay,
    #[error("X11 event thread exited unexpectedly")]
    EventThreadDied,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HotkeyError> for PipelineError {
    fn from(e: HotkeyError) -> Self {
        match e {
            HotkeyError::InvalidBinding(_) | HotkeyError::UnknownCommand(_) => {
                PipelineError::Config(e.to_string())
            }
            other => PipelineError::Capture(other.to_string()),
        }
    }
}

/// What a press of the hotkey runs.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub hotkey: String,
    pub command: String,
    pub instruction: Option<String>,
}

/// Turns accepted presses into pipeline runs.
struct Presses {
    app: Arc<AppContext>,
    command: Arc<str>,
    instruction: Option<Arc<str>>,
    spam: SpamGuard,
    tasks: JoinSet<()>,
}

impl Presses {
    fn new(app: Arc<AppContext>, options: &DaemonOptions) -> Self {
        Self {
            app,
            command: options.command.as_str().into(),
            instruction: options.instruction.as_deref().map(Into::into),
            spam: SpamGuard::default(),
            tasks: JoinSet::new(),
        }
    }

    /// Start a run for a press at `now`. False when the press was spam.
    fn press(&mut self, now: Instant) -> bool {
        if self.spam.record(now) {
            tracing::warn!(command = %self.command, "hotkey pressed too often; trigger dropped");
            return false;
        }

        let app = Arc::clone(&self.app);
        let command = Arc::clone(&self.command);
        let instruction = self.instruction.clone();
        self.tasks.spawn(async move {
            let result = app.trigger(&command, instruction.as_deref()).await;
            report(&command, result);
        });
        true
    }

    /// Cancel in-flight work and give it a moment to unwind.
    async fn drain(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        self.app.cancel();
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while self.tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(remaining = self.tasks.len(), "aborting unfinished triggers");
            self.tasks.shutdown().await;
        }
    }
}

fn report(command: &str, result: Result<crate::dispatch::Outcome, PipelineError>) {
    match result {
        Ok(outcome) => {
            tracing::info!(command, outcome = format::outcome_label(&outcome), "trigger finished");
            format::print_outcome(&outcome);
        }
        Err(e) => {
            tracing::warn!(command, kind = ?e.kind(), error = %e, "trigger failed");
            format::print_error(&e);
        }
    }
}

/// Run the daemon until SIGINT or SIGTERM.
pub async fn run(
    app: Arc<AppContext>,
    session: Option<Arc<X11Session>>,
    options: DaemonOptions,
) -> Result<(), HotkeyError> {
    let session = session.ok_or(HotkeyError::NoDisplay)?;
    if app.commands().get(&options.command).is_none() {
        return Err(HotkeyError::UnknownCommand(options.command));
    }

    let binding = Chord::parse(&options.hotkey)?.resolve(&session)?;
    tracing::info!(
        binding = %binding.raw,
        keycode = binding.keycode,
        command = %options.command,
        "binding parsed"
    );

    if !grab::grab(&session, &binding)? {
        grab::ungrab(&session, &binding);
        return Err(HotkeyError::Unavailable(binding.raw));
    }
    session.flush()?;

    let stop = Arc::new(AtomicBool::new(false));
    let (mut event_rx, event_thread) =
        x11::spawn_event_thread(Arc::clone(session.conn()), Arc::clone(&stop))?;

    let mut sig_term = tokio_signal(SignalKind::terminate())?;
    let mut sig_int = tokio_signal(SignalKind::interrupt())?;

    let mut presses = Presses::new(Arc::clone(&app), &options);
    let numlock = session.numlock_mask();
    let mut thread_died = false;

    tracing::info!(hotkey = %binding.raw, provider = %app.active_provider().kind(), "daemon running");

    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    tracing::error!("X11 event thread exited; shutting down");
                    thread_died = true;
                    break;
                };
                if let Event::KeyPress(key) = event
                    && event_matches_binding(key.detail, u16::from(key.state), &binding, numlock)
                {
                    presses.press(Instant::now());
                }
            }

            Some(joined) = presses.tasks.join_next() => {
                if let Err(e) = joined
                    && e.is_panic()
                {
                    tracing::error!(error = %e, "trigger task panicked");
                }
            }

            _ = sig_term.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }

            _ = sig_int.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
        }
    }

    presses.drain().await;
    stop.store(true, Ordering::Relaxed);
    grab::ungrab(&session, &binding);
    if let Err(e) = event_thread.join() {
        tracing::warn!("X11 event thread panicked: {e:?}");
    }
    tracing::info!("daemon stopped");

    if thread_died {
        return Err(HotkeyError::EventThreadDied);
    }
    Ok(())
}
