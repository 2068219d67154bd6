use crate::pipeline::ImageReport;
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Debug, Clone, Serialize)]
pub struct CachedReport {
    /// Increases by one with every replacement.
    pub sequence: u64,
    /// Milliseconds since the Unix epoch when the report was stored.
    pub timestamp: u64,
    #[serde(flatten)]
    pub report: ImageReport,
}

/// Latest live report. A new report replaces the previous one wholesale, so
/// readers never see verdicts from two different frames.
#[derive(Debug, Default)]
pub struct VerdictCache {
    latest: RwLock<Option<Arc<CachedReport>>>,
    sequence: AtomicU64,
}

impl VerdictCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, report: ImageReport) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        *self.latest.write() = Some(Arc::new(CachedReport {
            sequence,
            timestamp,
            report,
        }));
        sequence
    }

    pub fn latest(&self) -> Option<Arc<CachedReport>> {
        self.latest.read().clone()
    }

    pub fn clear(&self) {
        *self.latest.write() = None;
    }
}
