pub mod courier;
mod console;

use std::sync::Arc;

use tokio::sync::mpsc::unbounded_channel;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier::{
    ChallengeSolver, Collaborators, Courier, CourierConfig, CourierError, OutboxDestination, ReqwestTransport,
    YtDlpDownloader,
};

const DEFAULT_LOG_FILTER: &str = "media_courier=info";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(feature = "browser")]
fn challenge_solver(config: &CourierConfig) -> Option<Arc<dyn ChallengeSolver>> {
    Some(Arc::new(courier::bypass::HeadlessBrowser::new(
        config.network.user_agent.clone(),
    )))
}

#[cfg(not(feature = "browser"))]
fn challenge_solver(_config: &CourierConfig) -> Option<Arc<dyn ChallengeSolver>> {
    None
}

/// Load configuration, wire the collaborators and serve the console until EOF
pub fn run() -> Result<(), CourierError> {
    init_tracing();

    let config = CourierConfig::load()?;
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))
}

async fn serve(config: CourierConfig) -> Result<(), CourierError> {
    let transport = Arc::new(ReqwestTransport::new(&config.network)?);
    let downloader = YtDlpDownloader::detect(&config.external, config.network.proxy.clone());
    let ffmpeg = downloader.ffmpeg().map(str::to_string);
    let destination = OutboxDestination::new(config.destination.outbox_dir.clone());
    let solver = challenge_solver(&config);

    info!(
        "[Courier] Delivering to channel {} via outbox {} (scripted browser: {})",
        config.destination.channel_id,
        config.destination.outbox_dir.display(),
        if solver.is_some() { "on" } else { "off" }
    );

    let (tx, rx) = unbounded_channel();
    let courier = Courier::new(
        config,
        Collaborators {
            transport,
            solver,
            downloader: Arc::new(downloader),
            destination: Arc::new(destination),
            ffmpeg,
        },
        tx,
    )?;

    console::run(courier, rx).await
}
