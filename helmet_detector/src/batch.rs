//! Offline scan of an image file or a directory of images.

use crate::{
    config::BatchConfig,
    pipeline::{HelmetPipeline, ImageReport, PipelineError},
    render::{annotate, decode_image, encode_jpeg, RenderError},
};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Input path does not exist: {0:?}")]
    MissingInput(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Render error: {0}")]
    Render(#[from] RenderError),
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Failed to write image: {0}")]
    Write(#[from] image::ImageError),
    #[error("Failed to write report: {0}")]
    Report(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub persons: usize,
    pub protected: usize,
    pub unprotected: usize,
    pub unknown: usize,
}

impl BatchSummary {
    fn add(&mut self, report: &ImageReport) {
        self.processed += 1;
        self.persons += report.summary.persons;
        self.protected += report.summary.protected;
        self.unprotected += report.summary.unprotected;
        self.unknown += report.summary.unknown;
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// `path` itself when it is a file, otherwise the images directly inside it,
/// sorted by name.
pub fn collect_images(path: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, BatchError> {
    if !path.exists() {
        return Err(BatchError::MissingInput(path.to_path_buf()));
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut images = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry_path = entry?.path();
        if entry_path.is_file() && has_extension(&entry_path, extensions) {
            images.push(entry_path);
        }
    }
    images.sort();
    Ok(images)
}

/// `{stem}_detected.{ext}` and `{stem}_detected.json` inside `output_dir`.
pub fn output_paths(input: &Path, output_dir: &Path) -> (PathBuf, PathBuf) {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_lowercase();

    (
        output_dir.join(format!("{stem}_detected.{ext}")),
        output_dir.join(format!("{stem}_detected.json")),
    )
}

async fn process_one(
    pipeline: &HelmetPipeline,
    input: &Path,
    output_dir: &Path,
    jpeg_quality: u8,
) -> Result<ImageReport, BatchError> {
    let bytes = tokio::fs::read(input).await?;
    let image = Arc::new(decode_image(&bytes)?);
    let report = pipeline.analyze(image.clone()).await?;

    let (image_path, report_path) = output_paths(input, output_dir);
    let annotated = annotate(&image, &report);
    match image_path.extension().and_then(|e| e.to_str()) {
        Some("jpg") | Some("jpeg") => {
            tokio::fs::write(&image_path, encode_jpeg(&annotated, jpeg_quality)?).await?;
        }
        _ => annotated.save(&image_path)?,
    }
    tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?).await?;

    Ok(report)
}

/// Analyses every image under `input`, writing annotated copies and JSON
/// reports to `output_dir`. A failing image is logged and counted; it never
/// stops the scan.
pub async fn scan(
    pipeline: &HelmetPipeline,
    input: &Path,
    output_dir: &Path,
    config: &BatchConfig,
) -> Result<BatchSummary, BatchError> {
    let images = collect_images(input, &config.extensions)?;
    tokio::fs::create_dir_all(output_dir).await?;
    tracing::info!("Scanning {} images from {:?}", images.len(), input);

    let mut summary = BatchSummary::default();
    for path in &images {
        match process_one(pipeline, path, output_dir, config.jpeg_quality).await {
            Ok(report) => {
                tracing::info!(
                    persons = report.summary.persons,
                    unprotected = report.summary.unprotected,
                    "Processed {:?}",
                    path
                );
                summary.add(&report);
            }
            Err(e) => {
                tracing::error!("Failed to process {:?}: {}", path, e);
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}
