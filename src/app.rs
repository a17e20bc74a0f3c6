//! Application context: the one place that owns the pipeline parts.
//!
//! Built once at startup from [`Config`] and the probed [`Platform`], then
//! shared by the hotkey loop and the CLI. Every provider client is built
//! eagerly so switching the active provider never drops a running request.

use std::sync::Arc;

use crate::capture::{Platform, SelectionCapturer};
use crate::config::Config;
use crate::deliver::ResultDeliverer;
use crate::dispatch::{CommandSet, Dispatcher, Outcome};
use crate::error::PipelineError;
use crate::provider::{ProviderClient, ProviderKind};

/// One client per backend.
pub struct Providers {
    gemini: Arc<ProviderClient>,
    openai: Arc<ProviderClient>,
    ollama: Arc<ProviderClient>,
    local: Arc<ProviderClient>,
}

impl Providers {
    pub fn from_config(config: &Config, http: &reqwest::Client) -> Self {
        let build = |kind| Arc::new(ProviderClient::from_config(kind, &config.providers, http));
        Self {
            gemini: build(ProviderKind::Gemini),
            openai: build(ProviderKind::OpenAi),
            ollama: build(ProviderKind::Ollama),
            local: build(ProviderKind::Local),
        }
    }

    pub fn get(&self, kind: ProviderKind) -> &Arc<ProviderClient> {
        match kind {
            ProviderKind::Gemini => &self.gemini,
            ProviderKind::OpenAi => &self.openai,
            ProviderKind::Ollama => &self.ollama,
            ProviderKind::Local => &self.local,
        }
    }
}

pub struct AppContext {
    config: Config,
    commands: CommandSet,
    capturer: Arc<dyn SelectionCapturer>,
    providers: Providers,
    dispatcher: Dispatcher,
}

impl AppContext {
    pub fn new(config: Config, platform: &Platform, http: &reqwest::Client) -> Self {
        let providers = Providers::from_config(&config, http);
        Self::with_providers(config, platform, providers)
    }

    pub fn with_providers(config: Config, platform: &Platform, providers: Providers) -> Self {
        let deliverer = ResultDeliverer::new(
            Arc::clone(&platform.arbiter),
            Arc::clone(&platform.injector),
            config.capture.paste_settle(),
        );
        let active = Arc::clone(providers.get(config.general.provider));
        Self {
            commands: CommandSet::new(&config.commands),
            capturer: Arc::clone(&platform.capturer),
            dispatcher: Dispatcher::new(active, deliverer),
            providers,
            config,
        }
    }

    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    pub fn provider(&self, kind: ProviderKind) -> &Arc<ProviderClient> {
        self.providers.get(kind)
    }

    pub fn active_provider(&self) -> Arc<ProviderClient> {
        self.dispatcher.active()
    }

    /// Route later triggers to `kind`. A request already running on the
    /// previous provider is left alone.
    pub fn set_active_provider(&self, kind: ProviderKind) {
        if self.dispatcher.active().kind() != kind {
            self.dispatcher.set_active(Arc::clone(self.providers.get(kind)));
        }
    }

    /// Cancel whatever the active provider is doing.
    pub fn cancel(&self) {
        self.dispatcher.cancel();
    }

    /// One capture, dispatch and deliver cycle for `command_name`.
    pub async fn trigger(
        &self,
        command_name: &str,
        instruction: Option<&str>,
    ) -> Result<Outcome, PipelineError> {
        let command = self
            .commands
            .get(command_name)
            .ok_or_else(|| PipelineError::Config(format!("unknown command: {command_name}")))?;

        if self.dispatcher.is_busy() {
            let active = self.dispatcher.active();
            if !self.config.general.cancel_on_retrigger {
                return Err(PipelineError::ConcurrentUseConflict(format!(
                    "{} is still processing the previous request",
                    active.kind()
                )));
            }
            tracing::info!(provider = %active.kind(), "retrigger cancels running request");
            active.cancel();
            active.wait_idle().await;
        }

        let capture = self.capturer.capture().await?;
        tracing::debug!(
            strategy = ?self.capturer.strategy(),
            chars = capture.text.chars().count(),
            images = capture.images.len(),
            window = %capture.source.title,
            "selection captured"
        );
        self.dispatcher.execute(command, &capture, instruction).await
    }
}
