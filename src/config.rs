use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::{BlankSurfaceCheck, ControllerSettings};

const DEFAULT_CAMERA_DEVICE: &str = "/dev/video0";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_READ_RETRY_MS: u64 = 500;

const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";
const DEFAULT_BAUD_RATE: u32 = 9600;
const DEFAULT_SERIAL_READ_TIMEOUT_MS: u64 = 100;
const DEFAULT_SERIAL_SETTLE_MS: u64 = 2000;
const DEFAULT_RECONNECT_SECS: u64 = 5;

const DEFAULT_DETECTOR_BACKEND: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_INPUT_SIZE: u32 = 320;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

const DEFAULT_SETTLE_MS: u64 = 500;
const DEFAULT_FRAME_WAIT_ATTEMPTS: u32 = 5;
const DEFAULT_FRAME_WAIT_MS: u64 = 100;
const DEFAULT_MAX_ATTEMPTS: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_WHITE_LUMA: u8 = 240;
const DEFAULT_WHITE_FRACTION: f32 = 0.95;

const KNOWN_BACKENDS: &[&str] = &["tract", "stub"];

#[derive(Debug, Deserialize, Default)]
struct SorterConfigFile {
    camera: Option<CameraConfigFile>,
    serial: Option<SerialConfigFile>,
    detector: Option<DetectorConfigFile>,
    controller: Option<ControllerConfigFile>,
    annotate: Option<AnnotateConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    read_retry_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SerialConfigFile {
    port: Option<String>,
    baud_rate: Option<u32>,
    read_timeout_ms: Option<u64>,
    settle_ms: Option<u64>,
    reconnect_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence: Option<f32>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ControllerConfigFile {
    settle_ms: Option<u64>,
    frame_wait_attempts: Option<u32>,
    frame_wait_ms: Option<u64>,
    max_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    blank_check: Option<bool>,
    white_luma: Option<u8>,
    white_fraction: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AnnotateConfigFile {
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SorterConfig {
    pub camera: CameraSettings,
    pub serial: SerialSettings,
    pub detector: DetectorSettings,
    pub controller: ControllerSettings,
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    /// Device node, still-image path, or `stub://` URL.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Pause after a failed read before trying again.
    pub read_retry: Duration,
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    /// Peer reset time after opening; bytes received earlier are discarded.
    pub settle: Duration,
    pub reconnect_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub confidence: f32,
    pub iou_threshold: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            device: DEFAULT_CAMERA_DEVICE.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
            read_retry: Duration::from_millis(DEFAULT_READ_RETRY_MS),
        }
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_SERIAL_READ_TIMEOUT_MS),
            settle: Duration::from_millis(DEFAULT_SERIAL_SETTLE_MS),
            reconnect_interval: Duration::from_secs(DEFAULT_RECONNECT_SECS),
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR_BACKEND.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_size: DEFAULT_INPUT_SIZE,
            confidence: DEFAULT_CONFIDENCE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_MS),
            frame_wait_attempts: DEFAULT_FRAME_WAIT_ATTEMPTS,
            frame_wait_interval: Duration::from_millis(DEFAULT_FRAME_WAIT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            blank_check: Some(BlankSurfaceCheck {
                luma_threshold: DEFAULT_WHITE_LUMA,
                max_fraction: DEFAULT_WHITE_FRACTION,
            }),
        }
    }
}

impl SorterConfig {
    /// Load from `SORTER_CONFIG` (if set), then apply `SORTER_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SORTER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file path taking the place of `SORTER_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => SorterConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SorterConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let serial = file.serial.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let controller = file.controller.unwrap_or_default();

        let camera_defaults = CameraSettings::default();
        let camera = CameraSettings {
            device: camera.device.unwrap_or(camera_defaults.device),
            width: camera.width.unwrap_or(camera_defaults.width),
            height: camera.height.unwrap_or(camera_defaults.height),
            target_fps: camera.target_fps.unwrap_or(camera_defaults.target_fps),
            read_retry: camera
                .read_retry_ms
                .map(Duration::from_millis)
                .unwrap_or(camera_defaults.read_retry),
        };

        let serial_defaults = SerialSettings::default();
        let serial = SerialSettings {
            port: serial.port.unwrap_or(serial_defaults.port),
            baud_rate: serial.baud_rate.unwrap_or(serial_defaults.baud_rate),
            read_timeout: serial
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(serial_defaults.read_timeout),
            settle: serial
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(serial_defaults.settle),
            reconnect_interval: serial
                .reconnect_secs
                .map(Duration::from_secs)
                .unwrap_or(serial_defaults.reconnect_interval),
        };

        let detector_defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            backend: detector.backend.unwrap_or(detector_defaults.backend),
            model_path: detector.model_path.unwrap_or(detector_defaults.model_path),
            input_size: detector.input_size.unwrap_or(detector_defaults.input_size),
            confidence: detector.confidence.unwrap_or(detector_defaults.confidence),
            iou_threshold: detector
                .iou_threshold
                .unwrap_or(detector_defaults.iou_threshold),
        };

        let controller_defaults = ControllerSettings::default();
        let blank_check = if controller.blank_check.unwrap_or(true) {
            Some(BlankSurfaceCheck {
                luma_threshold: controller.white_luma.unwrap_or(DEFAULT_WHITE_LUMA),
                max_fraction: controller.white_fraction.unwrap_or(DEFAULT_WHITE_FRACTION),
            })
        } else {
            None
        };
        let controller = ControllerSettings {
            settle_delay: controller
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(controller_defaults.settle_delay),
            frame_wait_attempts: controller
                .frame_wait_attempts
                .unwrap_or(controller_defaults.frame_wait_attempts),
            frame_wait_interval: controller
                .frame_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(controller_defaults.frame_wait_interval),
            max_attempts: controller
                .max_attempts
                .unwrap_or(controller_defaults.max_attempts),
            retry_backoff: controller
                .retry_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(controller_defaults.retry_backoff),
            blank_check,
        };

        Self {
            camera,
            serial,
            detector,
            controller,
            snapshot_path: file.annotate.and_then(|annotate| annotate.snapshot_path),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = non_empty_env("SORTER_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(port) = non_empty_env("SORTER_SERIAL_PORT") {
            self.serial.port = port;
        }
        if let Some(baud) = non_empty_env("SORTER_BAUD_RATE") {
            self.serial.baud_rate = baud
                .parse()
                .map_err(|_| anyhow!("SORTER_BAUD_RATE must be an integer"))?;
        }
        if let Some(backend) = non_empty_env("SORTER_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("SORTER_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(attempts) = non_empty_env("SORTER_MAX_ATTEMPTS") {
            self.controller.max_attempts = attempts
                .parse()
                .map_err(|_| anyhow!("SORTER_MAX_ATTEMPTS must be an integer"))?;
        }
        if let Some(path) = non_empty_env("SORTER_SNAPSHOT_PATH") {
            self.snapshot_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("serial baud_rate must be greater than zero"));
        }
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        if !KNOWN_BACKENDS.contains(&self.detector.backend.as_str()) {
            return Err(anyhow!(
                "unknown detector backend '{}' (expected one of {:?})",
                self.detector.backend,
                KNOWN_BACKENDS
            ));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!("detector input_size must be a positive multiple of 32"));
        }
        if !(self.detector.confidence > 0.0 && self.detector.confidence <= 1.0) {
            return Err(anyhow!("detector confidence must be in (0, 1]"));
        }
        if !(self.detector.iou_threshold > 0.0 && self.detector.iou_threshold <= 1.0) {
            return Err(anyhow!("detector iou_threshold must be in (0, 1]"));
        }
        if self.controller.max_attempts == 0 {
            return Err(anyhow!("controller max_attempts must be at least 1"));
        }
        if self.controller.frame_wait_attempts == 0 {
            return Err(anyhow!("controller frame_wait_attempts must be at least 1"));
        }
        if let Some(check) = &self.controller.blank_check {
            if !(check.max_fraction > 0.0 && check.max_fraction <= 1.0) {
                return Err(anyhow!("controller white_fraction must be in (0, 1]"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<SorterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}
