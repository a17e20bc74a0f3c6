//! Wayland clipboard backend via `wl-paste` / `wl-copy`.

use super::command::{feed, into_text, read, run};
use super::{ClipboardBackend, ClipboardError, ClipboardImage, ImageFormat, Selection};

const PASTE: &str = "wl-paste";
const COPY: &str = "wl-copy";

/// wl-clipboard implementation of [`ClipboardBackend`].
#[derive(Debug, Default)]
pub struct WlClipboardBackend;

impl WlClipboardBackend {
    pub fn new() -> Self {
        Self
    }
}

fn paste_args(selection: Selection, extra: &[&'static str]) -> Vec<&'static str> {
    let mut args = Vec::with_capacity(extra.len() + 1);
    if selection == Selection::Primary {
        args.push("--primary");
    }
    args.extend_from_slice(extra);
    args
}

impl ClipboardBackend for WlClipboardBackend {
    fn name(&self) -> &'static str {
        PASTE
    }

    fn formats(&self, selection: Selection) -> Result<Vec<String>, ClipboardError> {
        let out = read(PASTE, &paste_args(selection, &["--list-types"]))?;
        Ok(into_text(out)
            .map(|s| s.lines().map(|l| l.trim().to_string()).collect())
            .unwrap_or_default())
    }

    fn read_text(&self, selection: Selection) -> Result<Option<String>, ClipboardError> {
        let out = read(
            PASTE,
            &paste_args(selection, &["--no-newline", "--type", "text"]),
        )?;
        Ok(into_text(out))
    }

    fn read_image(
        &self,
        selection: Selection,
        format: ImageFormat,
    ) -> Result<Option<Vec<u8>>, ClipboardError> {
        let mut args = paste_args(selection, &["--type"]);
        args.push(format.mime());
        read(PASTE, &args)
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        feed(COPY, &["--type", "text/plain;charset=utf-8"], text.as_bytes())
    }

    fn write_image(&self, image: &ClipboardImage) -> Result<(), ClipboardError> {
        feed(COPY, &["--type", image.format.mime()], &image.bytes)
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        run(COPY, &["--clear"])
    }
}
