//! Headless host binary.
//!
//! Runs the full lifecycle outside any editor: resolve or download the
//! server, start a session, surface rate-limit pushes as log warnings, and
//! shut down cleanly on Ctrl-C. Useful for smoke-testing a release binary
//! and as the reference wiring for editor integrations.

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sherpa_host::{
    EnvCredentials, HostConfig, OutputChannel, PathProbe, ReleaseDownloader, StdioLauncher,
    Supervisor,
};

/// Variable the host itself reads the token from; distinct from the
/// variable the server sees so a bare `GITHUB_TOKEN` in the shell is not
/// silently forwarded.
const HOST_TOKEN_ENV: &str = "SHERPA_GITHUB_TOKEN";

const CONFIG_ENV: &str = "SHERPA_HOST_CONFIG";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(env_filter)
        .init();
}

fn load_config() -> Result<HostConfig> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))
        }
        Err(_) => Ok(HostConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    let output = OutputChannel::to_tracing();

    let supervisor = Supervisor::new(
        config.clone(),
        PathProbe::new(),
        ReleaseDownloader::new(&config),
        EnvCredentials::new(HOST_TOKEN_ENV),
        StdioLauncher::new(&config, output.clone()),
        output,
    );

    supervisor.start().await.context("starting language server")?;

    let mut rate_limit = supervisor.rate_limit();
    let watcher = tokio::spawn(async move {
        while rate_limit.changed().await.is_ok() {
            let status = rate_limit.borrow_and_update().clone();
            if let Some(status) = status
                && status.limited
            {
                match status.resets_at {
                    Some(resets_at) => tracing::warn!(
                        resets_at,
                        "server is rate limited upstream; configure a token to raise the limit"
                    ),
                    None => tracing::warn!(
                        "server is rate limited upstream; configure a token to raise the limit"
                    ),
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("shutdown signal received");

    supervisor.stop().await;
    watcher.abort();
    Ok(())
}
