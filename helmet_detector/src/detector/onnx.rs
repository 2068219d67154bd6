use super::{Detector, DetectorError};
use crate::config::OnnxConfig;
use async_trait::async_trait;
use helmet_core::{geometry::iou, BoundingBox, Detection};
use image::{imageops, RgbImage};
use ndarray::{s, Array, ArrayViewD, Axis, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

const INPUT_SIZE: u32 = 640;
const NMS_IOU_THRESHOLD: f32 = 0.7;

/// Reads one class label per line. Lines may carry a colour as
/// `label,r,g,b`; only the label is kept.
pub fn load_labels(path: &Path) -> io::Result<Vec<String>> {
    let reader = io::BufReader::new(File::open(path)?);
    let mut labels = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').collect();
        match parts.len() {
            1 | 4 => labels.push(parts[0].trim().to_string()),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Invalid line format: {}", line),
                ))
            }
        }
    }

    Ok(labels)
}

fn to_input(image: &RgbImage) -> Array<f32, Ix4> {
    let resized = imageops::resize(
        image,
        INPUT_SIZE,
        INPUT_SIZE,
        imageops::FilterType::CatmullRom,
    );

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = r as f32 / 255.;
        input[[0, 1, y, x]] = g as f32 / 255.;
        input[[0, 2, y, x]] = b as f32 / 255.;
    }
    input
}

/// Decodes a YOLOv8 `[1, 4 + classes, anchors]` output into detections in
/// the coordinates of a `width` x `height` frame.
fn decode(
    output: ArrayViewD<f32>,
    labels: &[String],
    min_probability: f32,
    (width, height): (u32, u32),
) -> Vec<Detection> {
    let output = output.t();
    let output = output.slice(s![.., .., 0]);
    let (sx, sy) = (
        width as f32 / INPUT_SIZE as f32,
        height as f32 / INPUT_SIZE as f32,
    );

    let mut detections = Vec::new();
    for row in output.axis_iter(Axis(0)) {
        let row: Vec<f32> = row.iter().copied().collect();
        let Some((class_id, probability)) = row
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
        else {
            continue;
        };
        if probability < min_probability {
            continue;
        }

        let label = labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id));
        let bbox = BoundingBox::from_center(row[0], row[1], row[2], row[3]).scale(sx, sy);
        detections.push(Detection::new(label, probability, bbox));
    }

    non_max_suppression(detections, NMS_IOU_THRESHOLD)
}

/// Greedy class-agnostic suppression, strongest first.
fn non_max_suppression(mut boxes: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::new();

    for candidate in boxes {
        if kept
            .iter()
            .all(|keeper| iou(&keeper.bbox, &candidate.bbox) < threshold)
        {
            kept.push(candidate);
        }
    }

    kept
}

/// Local YOLOv8 model run through ONNX Runtime.
pub struct OnnxDetector {
    name: String,
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    labels: Vec<String>,
    min_probability: f32,
}

impl OnnxDetector {
    pub fn new(name: &str, config: &OnnxConfig) -> Result<Self, DetectorError> {
        let labels = load_labels(&config.get_labels_path())
            .map_err(|e| DetectorError::Config(format!("Failed to load labels: {}", e)))?;

        let num_instances = config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(config.get_model_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| DetectorError::Model(e.to_string()))?;

        tracing::info!(
            "Created {} ONNX sessions for detector `{}` with {} labels",
            num_instances,
            name,
            labels.len()
        );

        Ok(Self {
            name: name.to_string(),
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            labels,
            min_probability: config.min_probability,
        })
    }

    /// Runs on the blocking pool; ONNX Runtime calls are synchronous.
    async fn infer(&self, input: Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session = self.sessions[index].clone();

        tokio::task::spawn_blocking(move || run_inference(&session, index, &input))
            .await
            .map_err(|e| DetectorError::Model(format!("inference task failed: {}", e)))?
    }
}

fn run_inference(
    session: &Mutex<Session>,
    index: usize,
    input: &Array<f32, Ix4>,
) -> Result<ndarray::ArrayD<f32>, DetectorError> {
    let mut session = session
        .lock()
        .map_err(|e| DetectorError::Model(format!("session mutex poisoned: {}", e)))?;

    tracing::debug!("Handling frame with session {}", index);
    let tensor_ref = TensorRef::from_array_view(input.view())
        .map_err(|e| DetectorError::Model(format!("failed to build tensor: {}", e)))?;

    let outputs = session
        .run(ort::inputs![tensor_ref])
        .map_err(|e| DetectorError::Model(format!("inference failed: {}", e)))?;

    let (shape, data) = outputs["output0"]
        .try_extract_tensor::<f32>()
        .map_err(|e| DetectorError::Model(format!("failed to extract tensor: {}", e)))?;

    ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
        .map_err(|e| DetectorError::Model(format!("invalid tensor shape: {}", e)))
}

#[async_trait]
impl Detector for OnnxDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        let input = to_input(image);
        let output = self.infer(input).await?;
        Ok(decode(
            output.view(),
            &self.labels,
            self.min_probability,
            image.dimensions(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::Array3;
    use std::io::Write;

    #[test]
    fn test_to_input_shape_and_scale() {
        let image = RgbImage::from_pixel(100, 50, Rgb([255, 0, 0]));
        let input = to_input(&image);
        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(input[[0, 0, 320, 320]], 1.);
        assert_eq!(input[[0, 1, 320, 320]], 0.);
    }

    #[test]
    fn test_load_labels_accepts_both_layouts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "person,255,0,0").unwrap();
        writeln!(file, "hardhat").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "NO-Hardhat,0,0,255").unwrap();

        let labels = load_labels(file.path()).unwrap();
        assert_eq!(labels, vec!["person", "hardhat", "NO-Hardhat"]);
    }

    #[test]
    fn test_load_labels_rejects_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "person,255").unwrap();
        assert!(load_labels(file.path()).is_err());
    }

    #[test]
    fn test_decode_scales_and_suppresses() {
        // Three anchors, two classes: [x, y, w, h, p(person), p(hardhat)].
        let anchors = [
            [320., 320., 64., 128., 0.9, 0.1],
            [322., 320., 64., 128., 0.8, 0.1],
            [100., 60., 40., 40., 0.05, 0.7],
        ];
        let mut output = Array3::<f32>::zeros((1, 6, 3));
        for (a, values) in anchors.iter().enumerate() {
            for (c, value) in values.iter().enumerate() {
                output[[0, c, a]] = *value;
            }
        }
        let labels = vec!["person".to_string(), "hardhat".to_string()];

        let detections = decode(output.view().into_dyn(), &labels, 0.25, (1280, 640));
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].label, "person");
        assert_eq!(detections[0].bbox, BoundingBox::new(576., 256., 704., 384.));
        assert_eq!(detections[1].label, "hardhat");
    }
}
