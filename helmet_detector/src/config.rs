use helmet_core::{AssociationConfig, ClassificationPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_log_level")]
    pub log_level: LogLevel,
    pub server: ServerConfig,
    #[serde(default)]
    pub association: AssociationConfig,
    #[serde(default)]
    pub classification: ClassificationPolicy,
    pub detectors: DetectorsConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<LogLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.try_into().map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn get_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorsConfig {
    pub person: DetectorSettings,
    pub helmet: DetectorSettings,
    /// Person-class detections below this confidence are discarded.
    #[serde(default = "default_min_person_confidence")]
    pub min_person_confidence: f32,
    /// Helmet-class detections below this confidence are discarded.
    #[serde(default = "default_min_helmet_confidence")]
    pub min_helmet_confidence: f32,
}

fn default_min_person_confidence() -> f32 {
    0.5
}

fn default_min_helmet_confidence() -> f32 {
    0.4
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DetectorKind {
    Roboflow,
    Onnx,
    Disabled,
}

impl DetectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorKind::Roboflow => "roboflow",
            DetectorKind::Onnx => "onnx",
            DetectorKind::Disabled => "disabled",
        }
    }
}

impl TryFrom<String> for DetectorKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "roboflow" => Ok(Self::Roboflow),
            "onnx" => Ok(Self::Onnx),
            "disabled" => Ok(Self::Disabled),
            other => Err(format!(
                "{} is not a supported detector. Use `roboflow`, `onnx` or `disabled`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DetectorSettings {
    pub kind: DetectorKind,
    #[serde(default)]
    pub roboflow: Option<RoboflowConfig>,
    #[serde(default)]
    pub onnx: Option<OnnxConfig>,
}

impl DetectorSettings {
    pub fn disabled() -> Self {
        Self {
            kind: DetectorKind::Disabled,
            roboflow: None,
            onnx: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoboflowConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Threshold sent to the hosted model, in [0, 1].
    #[serde(default = "default_remote_confidence")]
    pub confidence: f32,
    /// Frames are resized to this square size before upload when set.
    #[serde(default)]
    pub inference_size: Option<u32>,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_api_url() -> String {
    "https://detect.roboflow.com".into()
}

fn default_remote_confidence() -> f32 {
    0.4
}

fn default_jpeg_quality() -> u8 {
    90
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

impl RoboflowConfig {
    pub fn get_endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            self.model_id.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OnnxConfig {
    pub model_dir: PathBuf,
    pub onnx_file: String,
    pub labels_file: String,
    #[serde(default = "default_min_probability")]
    pub min_probability: f32,
    #[serde(default = "default_model_instances")]
    pub num_instances: usize,
}

fn default_min_probability() -> f32 {
    0.25
}

fn default_model_instances() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl OnnxConfig {
    pub fn get_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.onnx_file)
    }

    pub fn get_labels_path(&self) -> PathBuf {
        self.model_dir.join(&self.labels_file)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.get_model_path().exists() {
            return Err(format!("Model file not found: {:?}", self.get_model_path()));
        }
        if !self.get_labels_path().exists() {
            return Err(format!(
                "Labels file not found: {:?}",
                self.get_labels_path()
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct CameraConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fixed device index; when unset the first `probe_limit` indices are tried.
    #[serde(default)]
    pub device_index: Option<i32>,
    #[serde(default = "default_probe_limit")]
    pub probe_limit: i32,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_stream_fps")]
    pub stream_fps: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_index: None,
            probe_limit: default_probe_limit(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            stream_fps: default_stream_fps(),
        }
    }
}

fn default_probe_limit() -> i32 {
    5
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

fn default_stream_fps() -> u64 {
    30
}

fn fps_to_delay_ms(fps: u64) -> u64 {
    (1000.0 / fps.max(1) as f64).round() as u64
}

impl CameraConfig {
    pub fn get_stream_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.stream_fps)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct PollingConfig {
    #[serde(default = "default_prediction_fps")]
    pub prediction_fps: u64,
    #[serde(default = "default_max_retries_u64")]
    pub max_retries: u64,
    /// First retry delay in milliseconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            prediction_fps: default_prediction_fps(),
            max_retries: default_max_retries_u64(),
            initial_delay: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

fn default_prediction_fps() -> u64 {
    3
}

fn default_max_retries_u64() -> u64 {
    3
}

fn default_initial_delay() -> u64 {
    100
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_consecutive_failures() -> u64 {
    10
}

impl PollingConfig {
    pub fn get_prediction_delay_ms(&self) -> u64 {
        fps_to_delay_ms(self.prediction_fps)
    }
}

#[derive(Clone, Deserialize, Debug)]
pub struct BatchConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            extensions: default_extensions(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "bmp", "webp"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            other => Err(format!(
                "{} is not a supported minimum log level. Use `debug`, `info` or `warn`.",
                other
            )),
        }
    }
}

/// Loads `configuration/` (or `config_dir`) layered with the
/// `APP_ENVIRONMENT` file and `HELMET_*` environment overrides.
pub fn get_configuration(config_dir: Option<&Path>) -> Result<Config, config::ConfigError> {
    let configuration_directory = match config_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| {
                config::ConfigError::Message(format!(
                    "Failed to determine the current directory: {}",
                    e
                ))
            })?
            .join("configuration"),
    };

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;

    load_from(&configuration_directory, environment)
}

pub fn load_from(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<Config, config::ConfigError> {
    let config = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join("base.yaml"),
        ))
        .add_source(config::File::from(
            configuration_directory.join(format!("{}.yaml", environment.as_str())),
        ))
        .add_source(
            config::Environment::with_prefix("HELMET")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let config: Config = config.try_deserialize::<Config>()?;

    Ok(config)
}
