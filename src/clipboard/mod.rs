//! System clipboard access.
//!
//! [`ClipboardBackend`] abstracts the platform mechanism (xclip on X11,
//! wl-clipboard on Wayland). Nothing outside this module talks to a
//! backend directly: every access goes through [`ClipboardArbiter`],
//! which serializes scopes and restores the user's content on exit.

pub mod arbiter;
mod command;
#[cfg(test)]
pub mod fake;
pub mod wayland;
pub mod xclip;

pub use arbiter::{ClipboardArbiter, ClipboardGuard, ClipboardSnapshot, Scoped};

use crate::error::PipelineError;

/// Which X11/Wayland selection to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The explicit copy/paste clipboard.
    Clipboard,
    /// The highlight-to-select primary selection.
    Primary,
}

/// Image formats, in capture preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Tiff,
    Gif,
    Bmp,
}

impl ImageFormat {
    /// Preference order. Capture takes the first one offered.
    pub const PRIORITY: [ImageFormat; 5] = [
        ImageFormat::Png,
        ImageFormat::Jpeg,
        ImageFormat::Tiff,
        ImageFormat::Gif,
        ImageFormat::Bmp,
    ];

    pub fn mime(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Tiff => "image/tiff",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Bmp => "image/bmp",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let base = mime.split(';').next().unwrap_or(mime).trim();
        Self::PRIORITY.into_iter().find(|f| f.mime() == base)
    }
}

/// An image held on the clipboard in exactly one format.
#[derive(Clone, PartialEq, Eq)]
pub struct ClipboardImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for ClipboardImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardImage")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Errors returned by clipboard backends.
#[derive(Debug, thiserror::Error)]
pub enum ClipboardError {
    /// The helper tool is not installed or could not be started.
    #[error("failed to spawn {tool}: {source}")]
    Spawn {
        tool: &'static str,
        source: std::io::Error,
    },
    #[error("{tool} I/O: {source}")]
    Io {
        tool: &'static str,
        source: std::io::Error,
    },
    /// The helper exited non-zero on a write.
    #[error("{tool} exited with {status}")]
    Exit { tool: &'static str, status: String },
}

impl From<ClipboardError> for PipelineError {
    fn from(e: ClipboardError) -> Self {
        PipelineError::Capture(e.to_string())
    }
}

/// Reads and writes one platform clipboard.
///
/// Reads return `Ok(None)` when the requested representation is not
/// offered; `Err` is reserved for the mechanism itself failing.
///
/// `Send + Sync` because the arbiter hands the backend to async tasks,
/// and methods are synchronous so that the arbiter's drop guard can
/// restore content without an executor.
pub trait ClipboardBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Targets / MIME types currently offered.
    fn formats(&self, selection: Selection) -> Result<Vec<String>, ClipboardError>;

    fn read_text(&self, selection: Selection) -> Result<Option<String>, ClipboardError>;

    fn read_image(
        &self,
        selection: Selection,
        format: ImageFormat,
    ) -> Result<Option<Vec<u8>>, ClipboardError>;

    /// Replace the clipboard with `text`.
    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;

    /// Replace the clipboard with a single image representation.
    fn write_image(&self, image: &ClipboardImage) -> Result<(), ClipboardError>;

    /// Empty the clipboard.
    fn clear(&self) -> Result<(), ClipboardError>;
}

/// Read the first offered image format in [`ImageFormat::PRIORITY`].
///
/// Exactly one format is read. When an application offers the same
/// image as PNG and TIFF, only the PNG is returned.
pub fn read_preferred_image(
    backend: &dyn ClipboardBackend,
    selection: Selection,
) -> Result<Option<ClipboardImage>, ClipboardError> {
    let offered = backend.formats(selection)?;
    let Some(format) = ImageFormat::PRIORITY
        .into_iter()
        .find(|f| offered.iter().any(|o| ImageFormat::from_mime(o) == Some(*f)))
    else {
        return Ok(None);
    };

    Ok(backend
        .read_image(selection, format)?
        .filter(|bytes| !bytes.is_empty())
        .map(|bytes| ClipboardImage { format, bytes }))
}
