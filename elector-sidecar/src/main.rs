use anyhow::{Context, Result};
use clap::Parser;
use elector_sidecar::{shutdown_signal, LogFormat, Settings, Supervisor};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::parse();
    init_tracing(settings.log_format);

    let grace = settings.shutdown_grace;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor = tokio::spawn(Supervisor::new(settings).run(shutdown_rx));

    tokio::select! {
        result = &mut supervisor => return finish(result),
        signal = shutdown_signal() => signal.context("failed to install signal handlers")?,
    }

    info!("Received termination, signaling shutdown");
    shutdown_tx.send_replace(true);

    match tokio::time::timeout(grace, &mut supervisor).await {
        Ok(result) => finish(result),
        Err(_) => {
            warn!("Shutdown did not finish within {:?}, exiting", grace);
            Ok(())
        }
    }
}

fn finish(result: std::result::Result<elector_core::Result<()>, JoinError>) -> Result<()> {
    result
        .context("supervisor task panicked")?
        .context("elector failed")?;
    info!("Exiting");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}
