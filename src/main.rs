use std::sync::Arc;

use remotecam::{
    camera::{self, ffmpeg_backend::FfmpegBackend},
    config::AppConfig,
    core::state::CameraEvent,
    orchestrator::{Command, Orchestrator},
    settings::SettingsStore,
    stream::hub::FrameHub,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_appender::rolling;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    if std::env::args().any(|arg| arg == "--probe-cameras") {
        let cameras = camera::discovery::probe_cameras().await?;
        println!("{}", serde_json::to_string_pretty(&cameras)?);
        return Ok(());
    }

    let config = AppConfig::from_env()?;

    tokio::fs::create_dir_all(&config.log_dir).await?;
    let file_appender = rolling::daily(&config.log_dir, "remotecam.log");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_max_level(config.log_level)
        .init();

    let settings = Arc::new(SettingsStore::open(&config.settings_path));
    let backend = FfmpegBackend::discover(
        config.ffmpeg_bin.clone(),
        config.camera_input_format.clone(),
    )
    .await?;
    let hub = Arc::new(FrameHub::new());
    let (events, mut observed) = broadcast::channel(64);

    tokio::spawn(async move {
        loop {
            match observed.recv().await {
                Ok(CameraEvent::Throughput(sample)) => debug!(
                    "{} ms/frame, {} KB/s",
                    sample.frame_interval_ms, sample.rate_kbs
                ),
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => info!("camera event {json}"),
                    Err(err) => warn!("failed to encode camera event: {err}"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("event log skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (orchestrator, task) = Orchestrator::new(
        Arc::new(backend),
        settings.clone(),
        hub,
        events,
        config.bind_host,
    )
    .spawn();
    orchestrator.send(Command::Start);
    orchestrator.send(Command::OpenWithPreview(None));

    info!(
        "{} streaming on {}:{}",
        config.app_name,
        config.bind_host,
        settings.snapshot().http_port
    );
    tokio::signal::ctrl_c().await?;

    info!("{} shutting down", config.app_name);
    orchestrator.send(Command::Stop);
    task.await?;

    Ok(())
}
