//! Recording injector for pipeline tests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::KeyInjector;
use crate::capture::SourceApplication;
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injected {
    Copy,
    Paste,
    Activate(Option<u32>),
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Records every call; optional hooks simulate the focused application.
#[derive(Default)]
pub struct RecordingInjector {
    log: Mutex<Vec<Injected>>,
    on_copy: Option<Hook>,
    on_paste: Option<Hook>,
    fail_copy: bool,
    fail_paste: bool,
}

impl RecordingInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `hook` when copy is injected, e.g. to put the selection
    /// on a fake clipboard.
    pub fn on_copy(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_copy = Some(Box::new(hook));
        self
    }

    pub fn on_paste(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_paste = Some(Box::new(hook));
        self
    }

    pub fn failing_copy(mut self) -> Self {
        self.fail_copy = true;
        self
    }

    pub fn failing_paste(mut self) -> Self {
        self.fail_paste = true;
        self
    }

    pub fn log(&self) -> Vec<Injected> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl KeyInjector for RecordingInjector {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send_copy(&self) -> Result<(), PipelineError> {
        if self.fail_copy {
            return Err(PipelineError::Capture("copy injection denied".into()));
        }
        self.log.lock().unwrap().push(Injected::Copy);
        if let Some(hook) = &self.on_copy {
            hook();
        }
        Ok(())
    }

    async fn send_paste(&self) -> Result<(), PipelineError> {
        if self.fail_paste {
            return Err(PipelineError::Delivery("paste injection denied".into()));
        }
        self.log.lock().unwrap().push(Injected::Paste);
        if let Some(hook) = &self.on_paste {
            hook();
        }
        Ok(())
    }

    async fn activate(&self, source: &SourceApplication) -> Result<(), PipelineError> {
        self.log
            .lock()
            .unwrap()
            .push(Injected::Activate(source.window_id));
        Ok(())
    }
}
