use crate::{
    batch::{scan, BatchSummary},
    cache::VerdictCache,
    config::Config,
    pipeline::HelmetPipeline,
    poller::{FrameSource, VerdictPoller},
    server::{HttpServer, SharedState},
    stream::VideoStream,
    telemetry::Metrics,
};
use anyhow::Context;
use std::{path::Path, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> anyhow::Result<()> {
    let pipeline = match HelmetPipeline::from_config(&config) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            tracing::error!("Failed to initialize detectors: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Detectors ready: {:?}", pipeline.detector_names());

    let metrics = Arc::new(Metrics::new()?);
    let cache = Arc::new(VerdictCache::new());
    let (shutdown_tx, _) = broadcast::channel(1);

    let camera = open_camera(&config).await?;
    let video_stream = camera.as_ref().map(|source| {
        VideoStream::new(
            source.clone(),
            cache.clone(),
            config.camera.get_stream_delay_ms(),
            config.batch.jpeg_quality,
        )
    });

    let poller_handle = camera.map(|source| {
        VerdictPoller::new(source, pipeline.clone(), cache.clone(), &config.polling)
            .with_metrics(metrics.clone())
            .run(shutdown_tx.subscribe())
    });

    let state = SharedState {
        pipeline,
        cache,
        video_stream,
        metrics,
        jpeg_quality: config.batch.jpeg_quality,
    };
    let server = HttpServer::new(state, &config.server).await?;
    let server_handle = server.run(shutdown_tx.subscribe()).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    if let Some(handle) = poller_handle {
        let _ = handle.await;
    }
    server_handle.await??;

    Ok(())
}

#[cfg(feature = "webcam")]
async fn open_camera(config: &Config) -> anyhow::Result<Option<Arc<dyn FrameSource>>> {
    if !config.camera.enabled {
        return Ok(None);
    }
    let camera = crate::camera::Camera::open(&config.camera)
        .await
        .context("Failed to initialize camera")?;
    let camera: Arc<dyn FrameSource> = Arc::new(camera);
    Ok(Some(camera))
}

#[cfg(not(feature = "webcam"))]
async fn open_camera(config: &Config) -> anyhow::Result<Option<Arc<dyn FrameSource>>> {
    if config.camera.enabled {
        tracing::warn!("Camera is enabled but this build lacks the `webcam` feature; live loop disabled");
    }
    Ok(None)
}

/// Runs a one-off scan and returns its totals.
pub async fn run_scan(
    config: &Config,
    input: &Path,
    output: Option<&Path>,
) -> anyhow::Result<BatchSummary> {
    let pipeline = HelmetPipeline::from_config(config).context("Failed to initialize detectors")?;
    let output_dir = output.unwrap_or(config.batch.output_dir.as_path());

    let summary = scan(&pipeline, input, output_dir, &config.batch).await?;
    tracing::info!(
        processed = summary.processed,
        failed = summary.failed,
        persons = summary.persons,
        protected = summary.protected,
        unprotected = summary.unprotected,
        unknown = summary.unknown,
        "Scan finished, results in {:?}",
        output_dir
    );
    Ok(summary)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
