mod app;
mod capture;
mod cli;
mod clipboard;
mod config;
mod console;
mod conversation;
mod deliver;
mod dispatch;
mod error;
mod hotkey;
mod input;
mod provider;
mod x11;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

use app::{AppContext, Providers};
use capture::ProbeEnv;
use config::Config;
use dispatch::CommandSet;
use error::PipelineError;
use hotkey::DaemonOptions;
use provider::local::LocalModel;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let name = command_name(&cli.command);

    if let Err(e) = run(cli).await {
        if e.is_cancelled() {
            tracing::info!(command = name, "cancelled");
            std::process::exit(130);
        }
        tracing::error!(command = name, kind = ?e.kind(), error = %e, "command failed");
        if let Some(message) = e.user_message() {
            eprintln!("scrivd {name}: {message}");
        }
        std::process::exit(1);
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Run { .. } => "run",
        Command::Once { .. } => "once",
        Command::Chat { .. } => "chat",
        Command::Commands => "commands",
        Command::Model { .. } => "model",
    }
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(kind) = cli.provider {
        config.general.provider = kind;
    }

    match cli.command {
        Command::Run {
            hotkey,
            command,
            instruction,
        } => {
            let options = DaemonOptions {
                hotkey: hotkey.unwrap_or_else(|| config.general.hotkey.clone()),
                command: command.unwrap_or_else(|| config.general.default_command.clone()),
                instruction,
            };
            let platform = capture::probe(&ProbeEnv::from_process(), &config.capture)?;
            let x11 = platform.x11.clone();
            let http = provider::http_client()?;
            let app = Arc::new(AppContext::new(config, &platform, &http));
            hotkey::run(app, x11, options).await?;
        }
        Command::Once {
            command,
            instruction,
        } => {
            let platform = capture::probe(&ProbeEnv::from_process(), &config.capture)?;
            let http = provider::http_client()?;
            let app = AppContext::new(config, &platform, &http);
            console::once(&app, &command, instruction.as_deref()).await?;
        }
        Command::Chat { seed } => {
            let http = provider::http_client()?;
            let providers = Providers::from_config(&config, &http);
            let provider = Arc::clone(providers.get(config.general.provider));
            console::chat(provider, seed.as_deref()).await?;
        }
        Command::Commands => console::commands(&CommandSet::new(&config.commands)),
        Command::Model { action } => {
            let http = provider::http_client()?;
            let local = LocalModel::new(http, config.providers.local.clone());
            console::model(&local, action.into()).await?;
        }
    }
    Ok(())
}
