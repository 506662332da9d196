use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use recruit_sync::config::Config;
use recruit_sync::outreach::OutreachStatus;
use recruit_sync::SyncContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("recruit_sync={}", &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting recruit-sync v{}", env!("CARGO_PKG_VERSION"));
    info!("Backend: {}", config.api_base_url);

    let refresh_every = config.probe_interval;
    let ctx = SyncContext::init(config).await?;
    let network = ctx.network.current();
    info!(
        "Network: connected={} transport={:?}",
        network.is_connected, network.transport
    );

    ctx.start();

    let mut ticker = tokio::time::interval(refresh_every);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match ctx.outreach.refresh().await {
                    Ok(view) => info!(
                        "Outreach: {} engaged, {} waiting, {} responded, {} need contact ({} hot, stale: {}, pending writes: {})",
                        view.section(OutreachStatus::Engaged).len(),
                        view.section(OutreachStatus::Waiting).len(),
                        view.section(OutreachStatus::Responded).len(),
                        view.section(OutreachStatus::NeedContact).len(),
                        view.hot_count,
                        view.is_stale,
                        ctx.queue.count().await,
                    ),
                    Err(e) => warn!("Outreach refresh failed: {e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    ctx.teardown();
    Ok(())
}
