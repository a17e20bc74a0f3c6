//! X11 clipboard backend via `xclip`.

use super::command::{feed, into_text, read, run};
use super::{ClipboardBackend, ClipboardError, ClipboardImage, ImageFormat, Selection};

const TOOL: &str = "xclip";

/// X11 implementation of [`ClipboardBackend`].
#[derive(Debug, Default)]
pub struct XclipBackend;

impl XclipBackend {
    pub fn new() -> Self {
        Self
    }
}

fn selection_name(selection: Selection) -> &'static str {
    match selection {
        Selection::Clipboard => "clipboard",
        Selection::Primary => "primary",
    }
}

impl ClipboardBackend for XclipBackend {
    fn name(&self) -> &'static str {
        TOOL
    }

    fn formats(&self, selection: Selection) -> Result<Vec<String>, ClipboardError> {
        let out = read(
            TOOL,
            &["-selection", selection_name(selection), "-t", "TARGETS", "-o"],
        )?;
        Ok(into_text(out)
            .map(|s| s.lines().map(|l| l.trim().to_string()).collect())
            .unwrap_or_default())
    }

    fn read_text(&self, selection: Selection) -> Result<Option<String>, ClipboardError> {
        let out = read(
            TOOL,
            &["-selection", selection_name(selection), "-t", "UTF8_STRING", "-o"],
        )?;
        Ok(into_text(out))
    }

    fn read_image(
        &self,
        selection: Selection,
        format: ImageFormat,
    ) -> Result<Option<Vec<u8>>, ClipboardError> {
        read(
            TOOL,
            &["-selection", selection_name(selection), "-t", format.mime(), "-o"],
        )
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        feed(
            TOOL,
            &["-selection", "clipboard", "-t", "UTF8_STRING", "-i"],
            text.as_bytes(),
        )
    }

    fn write_image(&self, image: &ClipboardImage) -> Result<(), ClipboardError> {
        feed(
            TOOL,
            &["-selection", "clipboard", "-t", image.format.mime(), "-i"],
            &image.bytes,
        )
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        run(TOOL, &["-selection", "clipboard", "-i", "/dev/null"])
    }
}
