//! Edge detection demo: synthetic camera → pipeline → stats sink

use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use edgecam::error::PipelineError;
use edgecam::processing::ProcessedFrame;
use edgecam::{Config, Pipeline, SyntheticCamera};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("edgecam launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!("Configuration: {:?}", config);

    let pipeline = Pipeline::start(&config)?;
    let mut camera = SyntheticCamera::new(&config.capture)?;

    // Spawn capture task
    let feed = pipeline.feed();
    let capture_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(camera.frame_interval());
        loop {
            ticker.tick().await;
            match feed.deliver_raw(camera.capture_frame()) {
                Ok(_) => {}
                Err(PipelineError::Closed) => break,
                Err(e) => warn!("Capture error: {}", e),
            }
        }
    });

    // Renderer stand-in: keep the newest output
    let output = pipeline.output();
    let sink_handle = tokio::task::spawn_blocking(move || {
        let mut last: Option<ProcessedFrame> = None;
        while let Some(frame) = output.recv() {
            last = Some(frame);
        }
        last
    });

    let events = pipeline.monitor().events();
    let mut report = tokio::time::interval(Duration::from_secs(
        config.demo.report_interval_secs.max(1),
    ));
    let deadline = async {
        if config.demo.duration_secs == 0 {
            std::future::pending::<()>().await
        } else {
            tokio::time::sleep(Duration::from_secs(config.demo.duration_secs)).await
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            _ = &mut deadline => {
                info!("Demo duration elapsed");
                break;
            }
            _ = report.tick() => {
                info!("{}", pipeline.stats());
            }
            Ok(event) = events.recv_async() => {
                info!("Monitor event: {:?}", event);
            }
        }
    }

    info!("edgecam shutting down");
    capture_handle.abort();
    pipeline.shutdown();

    let last = sink_handle.await?;
    if let (Some(path), Some(frame)) = (config.demo.dump_path.as_deref(), last) {
        dump_png(path, &frame)?;
    }

    println!("{}", pipeline.performance_report());
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edgecam=info"));

    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::prelude::*;
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
            .with(tracing_tracy::TracyLayer::default())
            .init();
    }

    #[cfg(not(feature = "profiling"))]
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

fn dump_png(path: &Path, processed: &ProcessedFrame) -> Result<()> {
    let frame = &processed.frame;
    let image = image::GrayImage::from_raw(frame.width(), frame.height(), frame.data.to_vec())
        .ok_or_else(|| eyre!("processed frame does not match its dimensions"))?;
    match image.save(path) {
        Ok(()) => {
            info!("Saved frame {} to {}", frame.meta.sequence, path.display());
            Ok(())
        }
        Err(e) => {
            error!("Failed to save {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}
