//! Serve command running the carelink server

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use carelink_core::FileSessionStore;
use carelink_server::{
    AppState, CarelinkServer, LiveApiConnector, LiveAudioGenerator, ServerConfig, UpstreamConfig,
};

use crate::config::CliConfig;

/// Arguments for the serve command
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Path to a TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the serve command
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = CliConfig::load(args.config.as_deref())?;

    let api_key = std::env::var(&config.upstream.api_key_env).with_context(|| {
        format!(
            "upstream API key not found in ${}",
            config.upstream.api_key_env
        )
    })?;

    let assistant = apply_overrides(UpstreamConfig::assistant(&api_key), &config);
    let notifier = apply_overrides(UpstreamConfig::notifier(&api_key), &config);

    let session_file = config.session_file();
    if let Some(parent) = session_file.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    info!("Persisting session handle at {}", session_file.display());
    let store = Arc::new(FileSessionStore::new(
        session_file,
        config.timeouts.resume_window(),
    ));

    let state = Arc::new(AppState::new(
        Arc::new(LiveApiConnector::new(assistant)),
        Arc::new(LiveAudioGenerator::new(Arc::new(LiveApiConnector::new(
            notifier,
        )))),
        store,
        config.timeouts.clone(),
    ));

    let server_config = ServerConfig {
        host: args.host.unwrap_or(config.server.host),
        port: args.port.unwrap_or(config.server.port),
    };

    CarelinkServer::new(server_config, state)
        .run()
        .await
        .map_err(Into::into)
}

fn apply_overrides(mut upstream: UpstreamConfig, config: &CliConfig) -> UpstreamConfig {
    if let Some(url) = &config.upstream.url {
        upstream.url = url.clone();
    }
    if let Some(model) = &config.upstream.model {
        upstream.model = model.clone();
    }
    if let Some(voice) = &config.upstream.voice {
        upstream.voice = voice.clone();
    }
    if let Some(language_code) = &config.upstream.language_code {
        upstream.language_code = language_code.clone();
    }
    upstream
}
