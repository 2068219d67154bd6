mod batch;
mod cache;
#[cfg(feature = "webcam")]
mod camera;
mod render;
mod routes;
mod server;
mod stream;
mod telemetry;

pub mod app;
pub mod cli;
pub mod config;
pub mod detector;
pub mod pipeline;
pub mod poller;

pub use app::{run_scan, start_app};
pub use batch::BatchSummary;
pub use cache::{CachedReport, VerdictCache};
pub use pipeline::{HelmetPipeline, ImageReport};
