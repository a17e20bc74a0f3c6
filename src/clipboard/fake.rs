//! In-memory clipboard used by tests across the crate.

use std::sync::Mutex;

use super::{ClipboardBackend, ClipboardError, ClipboardImage, ImageFormat, Selection};

#[derive(Debug, Default)]
struct State {
    text: Option<String>,
    /// Representations currently offered, in the order applications
    /// announced them.
    images: Vec<ClipboardImage>,
    primary_text: Option<String>,
    fail_writes: bool,
    fail_reads: bool,
    image_reads: Vec<ImageFormat>,
    writes: usize,
}

/// Shared, inspectable fake clipboard.
#[derive(Debug, Default)]
pub struct FakeClipboard {
    state: Mutex<State>,
}

impl FakeClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let fake = Self::new();
        fake.set_text(text);
        fake
    }

    /// Simulate another application taking ownership with text.
    pub fn set_text(&self, text: &str) {
        let mut s = self.state.lock().unwrap();
        s.text = Some(text.to_string());
        s.images.clear();
    }

    /// Simulate an application offering the same image in several formats.
    pub fn offer_images(&self, images: &[(ImageFormat, Vec<u8>)]) {
        let mut s = self.state.lock().unwrap();
        s.text = None;
        s.images = images
            .iter()
            .map(|(format, bytes)| ClipboardImage {
                format: *format,
                bytes: bytes.clone(),
            })
            .collect();
    }

    pub fn set_primary(&self, text: &str) {
        self.state.lock().unwrap().primary_text = Some(text.to_string());
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().unwrap().fail_writes = fail;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn text(&self) -> Option<String> {
        self.state.lock().unwrap().text.clone()
    }

    pub fn images(&self) -> Vec<ClipboardImage> {
        self.state.lock().unwrap().images.clone()
    }

    pub fn image_reads(&self) -> Vec<ImageFormat> {
        self.state.lock().unwrap().image_reads.clone()
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    fn write_failure() -> ClipboardError {
        ClipboardError::Exit {
            tool: "fake",
            status: "write denied".into(),
        }
    }
}

impl ClipboardBackend for FakeClipboard {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn formats(&self, selection: Selection) -> Result<Vec<String>, ClipboardError> {
        let s = self.state.lock().unwrap();
        if selection == Selection::Primary {
            return Ok(s.primary_text.iter().map(|_| "UTF8_STRING".into()).collect());
        }
        let mut out: Vec<String> = s.images.iter().map(|i| i.format.mime().into()).collect();
        if s.text.is_some() {
            out.push("UTF8_STRING".into());
        }
        Ok(out)
    }

    fn read_text(&self, selection: Selection) -> Result<Option<String>, ClipboardError> {
        let s = self.state.lock().unwrap();
        if s.fail_reads {
            return Err(ClipboardError::Exit {
                tool: "fake",
                status: "read denied".into(),
            });
        }
        Ok(match selection {
            Selection::Clipboard => s.text.clone(),
            Selection::Primary => s.primary_text.clone(),
        })
    }

    fn read_image(
        &self,
        selection: Selection,
        format: ImageFormat,
    ) -> Result<Option<Vec<u8>>, ClipboardError> {
        let mut s = self.state.lock().unwrap();
        if selection == Selection::Primary {
            return Ok(None);
        }
        s.image_reads.push(format);
        Ok(s
            .images
            .iter()
            .find(|i| i.format == format)
            .map(|i| i.bytes.clone()))
    }

    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_writes {
            return Err(Self::write_failure());
        }
        s.writes += 1;
        s.text = Some(text.to_string());
        s.images.clear();
        Ok(())
    }

    fn write_image(&self, image: &ClipboardImage) -> Result<(), ClipboardError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_writes {
            return Err(Self::write_failure());
        }
        s.writes += 1;
        s.text = None;
        s.images = vec![image.clone()];
        Ok(())
    }

    fn clear(&self) -> Result<(), ClipboardError> {
        let mut s = self.state.lock().unwrap();
        if s.fail_writes {
            return Err(Self::write_failure());
        }
        s.text = None;
        s.images.clear();
        Ok(())
    }
}
