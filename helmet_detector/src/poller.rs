use crate::{
    cache::VerdictCache,
    config::PollingConfig,
    pipeline::{HelmetPipeline, PipelineError},
    telemetry::Metrics,
};
use async_trait::async_trait;
use image::RgbImage;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::{
    sync::broadcast,
    task::JoinHandle,
    time::{sleep, Duration},
};

#[derive(Error, Debug)]
pub enum FrameSourceError {
    #[error("Failed to open frame source: {0}")]
    Open(String),
    #[error("Failed to read frame: {0}")]
    Read(String),
}

/// Anything that produces live frames, typically a camera.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Next frame, or `None` when the source had nothing to deliver this time.
    async fn capture(&self) -> Result<Option<RgbImage>, FrameSourceError>;
}

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Frame source error: {0}")]
    FrameSource(#[from] FrameSourceError),
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Every detector failed on the frame")]
    AllDetectorsFailed,
}

/// Periodically analyses frames and publishes the result to a `VerdictCache`.
pub struct VerdictPoller {
    source: Arc<dyn FrameSource>,
    pipeline: Arc<HelmetPipeline>,
    cache: Arc<VerdictCache>,
    metrics: Option<Arc<Metrics>>,
    poll_interval_ms: u64,
    max_retries: u64,
    initial_delay: u64,
    backoff_factor: u32,
    max_consecutive_failures: u64,
}

impl VerdictPoller {
    pub fn new(
        source: Arc<dyn FrameSource>,
        pipeline: Arc<HelmetPipeline>,
        cache: Arc<VerdictCache>,
        polling_config: &PollingConfig,
    ) -> Self {
        Self {
            source,
            pipeline,
            cache,
            metrics: None,
            poll_interval_ms: polling_config.get_prediction_delay_ms(),
            max_retries: polling_config.max_retries,
            initial_delay: polling_config.initial_delay,
            backoff_factor: polling_config.backoff_factor,
            max_consecutive_failures: polling_config.max_consecutive_failures,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawns the polling loop. It stops on shutdown, or after
    /// `max_consecutive_failures` intervals in which every retry failed. The
    /// second case is final for the process: the cache is cleared so
    /// `/verdicts` reports no live data instead of a stale frame, while the
    /// HTTP server keeps serving on-demand requests.
    pub fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let initial_delay = Duration::from_millis(self.initial_delay);
        let mut consecutive_failures = 0;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = self.poll_once() => {
                        match result {
                            Ok(_) => {
                                consecutive_failures = 0;
                            },
                            Err(ref err) => {
                                tracing::error!("Error during polling: {}", err);
                                let mut retry_delay = initial_delay;
                                let mut retry_successful = false;
                                for retry_count in 0..self.max_retries {
                                    tracing::warn!(
                                        "Retrying poll (attempt {}/{}) on consecutive failures: {}/{}",
                                        retry_count + 1,
                                        self.max_retries,
                                        consecutive_failures,
                                        self.max_consecutive_failures
                                    );
                                    sleep(retry_delay).await;

                                    match self.poll_once().await {
                                        Ok(_) => {
                                            tracing::info!("Retry successful");
                                            retry_successful = true;
                                            break;
                                        }
                                        Err(e) => {
                                            tracing::error!("Retry failed: {}", e);
                                            retry_delay *= self.backoff_factor;
                                        }
                                    }
                                }
                                if retry_successful {
                                    consecutive_failures = 0;
                                } else {
                                    consecutive_failures += 1;
                                    tracing::error!("Max number of retries reached, skipping current poll interval");
                                }
                                if consecutive_failures >= self.max_consecutive_failures {
                                    tracing::error!(
                                        "Persistent failure detected after {} intervals. Live loop stopped; restart the service to resume live verdicts",
                                        consecutive_failures
                                    );
                                    self.cache.clear();
                                    break;
                                }
                            }
                        }
                    },
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Verdict polling received shutdown signal");
                        break;
                    }
                }

                sleep(Duration::from_millis(self.poll_interval_ms)).await;
            }
            tracing::info!("Verdict polling stopped");
        })
    }

    async fn poll_once(&self) -> Result<(), PollError> {
        let Some(frame) = self.source.capture().await? else {
            return Ok(());
        };

        let started = Instant::now();
        let report = self.pipeline.analyze(Arc::new(frame)).await?;
        if report.degraded_detectors.len() >= self.pipeline.detector_names().len() {
            return Err(PollError::AllDetectorsFailed);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_analysis_duration(started.elapsed().as_millis() as u64, "live");
            metrics.record_live_report(&report);
        }
        self.cache.replace(report);

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::tests::{person_at, test_pipeline, FailingDetector, StaticDetector};
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    /// Uniform grey frames, counting how many were taken.
    #[derive(Default)]
    pub struct StillSource {
        pub captured: AtomicUsize,
    }

    #[async_trait]
    impl FrameSource for StillSource {
        async fn capture(&self) -> Result<Option<RgbImage>, FrameSourceError> {
            self.captured.fetch_add(1, Ordering::SeqCst);
            Ok(Some(RgbImage::from_pixel(320, 240, Rgb([90, 90, 90]))))
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl FrameSource for BrokenSource {
        async fn capture(&self) -> Result<Option<RgbImage>, FrameSourceError> {
            Err(FrameSourceError::Read("unplugged".into()))
        }
    }

    fn fast_polling() -> PollingConfig {
        PollingConfig {
            prediction_fps: 200,
            max_retries: 1,
            initial_delay: 1,
            backoff_factor: 2,
            max_consecutive_failures: 2,
        }
    }

    #[tokio::test]
    async fn test_poller_publishes_reports() {
        let source = Arc::new(StillSource::default());
        let pipeline = Arc::new(test_pipeline(vec![Arc::new(StaticDetector {
            name: "person",
            detections: vec![person_at(0.)],
        })]));
        let cache = Arc::new(VerdictCache::new());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = VerdictPoller::new(source.clone(), pipeline, cache.clone(), &fast_polling())
            .run(shutdown_rx);

        timeout(Duration::from_secs(5), async {
            while cache.latest().map_or(true, |c| c.sequence < 2) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown_tx.send(()).unwrap();
        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();

        let latest = cache.latest().unwrap();
        assert_eq!(latest.report.summary.persons, 1);
        assert!(source.captured.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_poller_gives_up_and_drops_stale_report() {
        let pipeline = Arc::new(test_pipeline(vec![Arc::new(StaticDetector {
            name: "person",
            detections: vec![person_at(0.)],
        })]));
        let cache = Arc::new(VerdictCache::new());
        cache.replace(crate::pipeline::ImageReport::new(Vec::new(), Vec::new()));
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = VerdictPoller::new(Arc::new(BrokenSource), pipeline, cache.clone(), &fast_polling())
            .run(shutdown_rx);

        timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert!(cache.latest().is_none());
    }

    #[tokio::test]
    async fn test_failed_detectors_keep_previous_report() {
        let cache = Arc::new(VerdictCache::new());
        let pipeline = Arc::new(test_pipeline(vec![Arc::new(FailingDetector("person"))]));
        let poller = VerdictPoller::new(
            Arc::new(StillSource::default()),
            pipeline,
            cache.clone(),
            &fast_polling(),
        );

        assert!(matches!(
            poller.poll_once().await,
            Err(PollError::AllDetectorsFailed)
        ));
        assert!(cache.latest().is_none());
    }
}
