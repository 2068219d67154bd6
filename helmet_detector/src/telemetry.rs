use crate::pipeline::ImageReport;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;

pub struct Metrics {
    request_counter: Counter<u64>,
    analysis_duration: Histogram<u64>,
    verdict_counter: Counter<u64>,
    detector_failures: Counter<u64>,
    live_unprotected: Gauge<u64>,
    // Held so the reader outlives any later global provider swap.
    _provider: SdkMeterProvider,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();

        let meter = provider.meter("helmet_detector");
        global::set_meter_provider(provider.clone());

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        // Fine-grained where hosted round trips land, coarse in the tail.
        let boundaries =
            bucket_boundaries(&[(10, 50, 10), (50, 150, 25), (150, 1000, 50), (1000, 5000, 1000)]);

        let analysis_duration = meter
            .u64_histogram("analysis_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of image analysis in milliseconds")
            .build();

        let verdict_counter = meter
            .u64_counter("verdicts_total")
            .with_description("Person verdicts by status")
            .build();

        let detector_failures = meter
            .u64_counter("detector_failures_total")
            .with_description("Images on which a detector failed")
            .build();

        let live_unprotected = meter
            .u64_gauge("live_unprotected_persons")
            .with_description("Unprotected persons in the latest live frame")
            .build();

        Ok(Metrics {
            request_counter,
            analysis_duration,
            verdict_counter,
            detector_failures,
            live_unprotected,
            _provider: provider,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_analysis_duration(&self, duration_ms: u64, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.analysis_duration.record(duration_ms, &attributes);
    }

    pub fn record_report(&self, report: &ImageReport) {
        for verdict in &report.verdicts {
            let attributes = vec![KeyValue::new("status", verdict.status.as_str())];
            self.verdict_counter.add(1, &attributes);
        }
        for detector in &report.degraded_detectors {
            let attributes = vec![KeyValue::new("detector", detector.clone())];
            self.detector_failures.add(1, &attributes);
        }
    }

    pub fn record_live_report(&self, report: &ImageReport) {
        self.record_report(report);
        self.live_unprotected
            .record(report.summary.unprotected as u64, &[]);
    }
}

/// Histogram bucket edges from `(start, end, step)` segments. Segments may
/// share an edge; it is emitted once.
fn bucket_boundaries(segments: &[(u32, u32, usize)]) -> Vec<f64> {
    let mut boundaries: Vec<f64> = Vec::new();
    for &(start, end, step) in segments {
        for edge in (start..=end).step_by(step.max(1)) {
            let edge = edge as f64;
            if boundaries.last().map_or(true, |&last| edge > last) {
                boundaries.push(edge);
            }
        }
    }
    boundaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmet_core::{associate, BoundingBox, Detection};
    use image::{Rgb, RgbImage};
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_bucket_boundaries_share_edges_once() {
        let boundaries = bucket_boundaries(&[(10, 30, 10), (30, 40, 5), (40, 100, 60)]);
        assert_eq!(boundaries, vec![10., 20., 30., 35., 40., 100.]);
    }

    #[test]
    fn test_reports_are_exported() {
        let metrics = Metrics::new().unwrap();
        let image = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
        let persons = vec![Detection::new("person", 0.9, BoundingBox::new(0., 0., 100., 200.))];
        let helmets = vec![Detection::new("helmet", 0.8, BoundingBox::new(10., 0., 90., 40.))];
        let report = ImageReport::new(
            associate(&persons, &helmets, &image),
            vec!["helmet".to_string()],
        );

        metrics.record_request("predict");
        metrics.record_report(&report);

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("verdicts_total"), "{text}");
        assert!(text.contains("status=\"protected\""), "{text}");
        assert!(text.contains("detector_failures_total"), "{text}");
        assert!(text.contains("requests_total"), "{text}");
    }
}
