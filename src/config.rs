use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::Point;
use crate::transport::RetryPolicy;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_TARGET_CLASS: u32 = 0;
const DEFAULT_DEVICE: &str = "cpu";
const DEFAULT_PERSISTENCE_SECS: f64 = 2.0;
const DEFAULT_TRACK_TTL_SECS: f64 = 30.0;
const DEFAULT_RECONNECT_DELAY_SECS: f64 = 5.0;
const DEFAULT_REALTIME_PATH: &str = "imagerecord/capturerealtime";
const DEFAULT_CAPTURE_INTERVAL_SECS: f64 = 1.0;
const DEFAULT_CAPTURES_PATH: &str = "data/captures";
const DEFAULT_FRAMERECORD_PATH: &str = "data/framerecord";
const DEFAULT_LOG_PATH: &str = "logs/dwelld.log";
const DEFAULT_NOTIFY_WORKERS: usize = 5;
const DEFAULT_API_TIMEOUT_SECS: f64 = 10.0;
const MAX_API_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Deserialize, Default)]
struct DwellConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    processing: Option<ProcessingConfigFile>,
    tracking: Option<TrackingConfigFile>,
    storage: Option<StorageConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source_type: Option<String>,
    rtsp_url: Option<String>,
    webcam_id: Option<u32>,
    reconnect_delay_sec: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<String>,
    confidence_threshold: Option<f32>,
    target_class: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ProcessingConfigFile {
    device: Option<String>,
    enable_roi: Option<bool>,
    roi_points: Option<Vec<[f32; 2]>>,
    notify_workers: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    persistence_threshold_sec: Option<f64>,
    track_ttl_sec: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    realtime: Option<RealtimeConfigFile>,
    captures: Option<CapturesConfigFile>,
    framerecord: Option<FramerecordConfigFile>,
    log_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct RealtimeConfigFile {
    path: Option<PathBuf>,
    interval_sec: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct CapturesConfigFile {
    path: Option<PathBuf>,
    save_crop: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct FramerecordConfigFile {
    enabled: Option<bool>,
    path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    api_key: Option<String>,
    auth_scheme: Option<String>,
    timeout_sec: Option<f64>,
    whatsapp: Option<ChannelConfigFile>,
    log_server: Option<ChannelConfigFile>,
    retry: Option<RetryConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ChannelConfigFile {
    enabled: Option<bool>,
    endpoint: Option<String>,
    recipient: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    max_attempts: Option<u32>,
    base_delay_sec: Option<f64>,
}

/// Resolved, validated configuration. Immutable after load.
#[derive(Debug, Clone)]
pub struct DwellConfig {
    pub camera: CameraSettings,
    pub model: ModelSettings,
    /// ROI polygon, present when `processing.enable_roi` is set.
    pub roi: Option<Vec<Point>>,
    pub tracking: TrackingSettings,
    pub storage: StorageSettings,
    pub api: ApiSettings,
    pub notify_workers: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Rtsp(String),
    Webcam(u32),
}

impl std::fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceSpec::Rtsp(url) => write!(f, "rtsp {}", url),
            SourceSpec::Webcam(id) => write!(f, "webcam {}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub source: SourceSpec,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: String,
    pub confidence_threshold: f32,
    pub target_class: u32,
    pub device: String,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub persistence: Duration,
    /// `None` disables eviction of stale tracks.
    pub track_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub realtime_path: PathBuf,
    pub capture_interval: Duration,
    pub captures_path: PathBuf,
    pub save_crop: bool,
    /// Annotated-frame archive folder, present when enabled.
    pub framerecord_path: Option<PathBuf>,
    pub log_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `x-api-key: <key>`
    ApiKeyHeader,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api_key: String,
    pub auth_scheme: AuthScheme,
    pub timeout: Duration,
    pub alert: ChannelSettings,
    pub audit: ChannelSettings,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub recipient: Option<String>,
}

impl DwellConfig {
    /// Load from `path` (TOML, or JSON for `.json` files), then apply env overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let file_cfg = read_config_file(path)?;
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file_cfg: DwellConfigFile =
            toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DwellConfigFile) -> Result<Self> {
        let camera_file = file
            .camera
            .ok_or_else(|| anyhow!("missing [camera] section"))?;
        let source_type = camera_file
            .source_type
            .as_deref()
            .ok_or_else(|| anyhow!("camera.source_type is required"))?
            .trim()
            .to_lowercase();
        let source = match source_type.as_str() {
            "rtsp" => SourceSpec::Rtsp(
                camera_file
                    .rtsp_url
                    .clone()
                    .ok_or_else(|| anyhow!("camera.rtsp_url is required for rtsp sources"))?,
            ),
            "webcam" => SourceSpec::Webcam(camera_file.webcam_id.unwrap_or(0)),
            other => {
                return Err(anyhow!(
                    "camera.source_type '{}' is not supported; expected rtsp or webcam",
                    other
                ))
            }
        };
        let camera = CameraSettings {
            source,
            reconnect_delay: secs_f64(
                "camera.reconnect_delay_sec",
                camera_file
                    .reconnect_delay_sec
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_SECS),
            )?,
        };

        let model_file = file.model.unwrap_or_default();
        let processing = file.processing.unwrap_or_default();
        let model = ModelSettings {
            path: model_file
                .path
                .ok_or_else(|| anyhow!("model.path is required"))?,
            confidence_threshold: model_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            target_class: model_file.target_class.unwrap_or(DEFAULT_TARGET_CLASS),
            device: processing
                .device
                .clone()
                .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
        };

        let roi = if processing.enable_roi.unwrap_or(false) {
            let points = processing.roi_points.clone().unwrap_or_default();
            Some(points.into_iter().map(|[x, y]| Point::new(x, y)).collect())
        } else {
            None
        };

        let tracking_file = file.tracking.unwrap_or_default();
        let ttl_secs = tracking_file
            .track_ttl_sec
            .unwrap_or(DEFAULT_TRACK_TTL_SECS);
        let tracking = TrackingSettings {
            persistence: secs_f64(
                "tracking.persistence_threshold_sec",
                tracking_file
                    .persistence_threshold_sec
                    .unwrap_or(DEFAULT_PERSISTENCE_SECS),
            )?,
            track_ttl: if ttl_secs == 0.0 {
                None
            } else {
                Some(secs_f64("tracking.track_ttl_sec", ttl_secs)?)
            },
        };

        let storage_file = file.storage.unwrap_or_default();
        let realtime = storage_file.realtime.unwrap_or_default();
        let captures = storage_file.captures.unwrap_or_default();
        let framerecord = storage_file.framerecord.unwrap_or_default();
        let storage = StorageSettings {
            realtime_path: realtime
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REALTIME_PATH)),
            capture_interval: secs_f64(
                "storage.realtime.interval_sec",
                realtime
                    .interval_sec
                    .unwrap_or(DEFAULT_CAPTURE_INTERVAL_SECS),
            )?,
            captures_path: captures
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURES_PATH)),
            save_crop: captures.save_crop.unwrap_or(false),
            framerecord_path: if framerecord.enabled.unwrap_or(false) {
                Some(
                    framerecord
                        .path
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_FRAMERECORD_PATH)),
                )
            } else {
                None
            },
            log_path: storage_file
                .log_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
        };

        let api_file = file.api.unwrap_or_default();
        let auth_scheme = match api_file.auth_scheme.as_deref().map(str::to_lowercase) {
            None => AuthScheme::Bearer,
            Some(scheme) if scheme == "bearer" => AuthScheme::Bearer,
            Some(scheme) if scheme == "x-api-key" => AuthScheme::ApiKeyHeader,
            Some(other) => {
                return Err(anyhow!(
                    "api.auth_scheme '{}' is not supported; expected bearer or x-api-key",
                    other
                ))
            }
        };
        let retry_file = api_file.retry.unwrap_or_default();
        let default_retry = RetryPolicy::default();
        let api = ApiSettings {
            api_key: api_file.api_key.unwrap_or_default(),
            auth_scheme,
            timeout: secs_f64(
                "api.timeout_sec",
                api_file.timeout_sec.unwrap_or(DEFAULT_API_TIMEOUT_SECS),
            )?,
            alert: channel_settings(api_file.whatsapp),
            audit: channel_settings(api_file.log_server),
            retry: RetryPolicy {
                max_attempts: retry_file
                    .max_attempts
                    .unwrap_or(default_retry.max_attempts),
                base_delay: match retry_file.base_delay_sec {
                    Some(secs) => secs_f64("api.retry.base_delay_sec", secs)?,
                    None => default_retry.base_delay,
                },
            },
        };

        Ok(Self {
            camera,
            model,
            roi,
            tracking,
            storage,
            api,
            notify_workers: processing.notify_workers.unwrap_or(DEFAULT_NOTIFY_WORKERS),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("DWELL_RTSP_URL") {
            if !url.trim().is_empty() {
                self.camera.source = SourceSpec::Rtsp(url);
            }
        }
        if let Ok(key) = std::env::var("DWELL_API_KEY") {
            if !key.trim().is_empty() {
                self.api.api_key = key;
            }
        }
        if let Ok(path) = std::env::var("DWELL_LOG_PATH") {
            if !path.trim().is_empty() {
                self.storage.log_path = PathBuf::from(path);
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.confidence_threshold) {
            return Err(anyhow!("model.confidence_threshold must be within 0..1"));
        }
        if let SourceSpec::Rtsp(url) = &self.camera.source {
            if url.trim().is_empty() {
                return Err(anyhow!("camera.rtsp_url must not be empty"));
            }
        }
        if let Some(points) = &self.roi {
            if points.len() < 3 {
                return Err(anyhow!(
                    "processing.roi_points needs at least 3 points when ROI is enabled"
                ));
            }
        }
        if self.api.timeout.is_zero()
            || self.api.timeout > Duration::from_secs(MAX_API_TIMEOUT_SECS)
        {
            return Err(anyhow!(
                "api.timeout_sec must be greater than zero and at most {}",
                MAX_API_TIMEOUT_SECS
            ));
        }
        if self.storage.capture_interval.is_zero() {
            return Err(anyhow!("storage.realtime.interval_sec must be greater than zero"));
        }
        if self.notify_workers == 0 {
            return Err(anyhow!("processing.notify_workers must be at least 1"));
        }
        if self.api.retry.max_attempts == 0 {
            return Err(anyhow!("api.retry.max_attempts must be at least 1"));
        }
        for (name, channel) in [
            ("api.whatsapp", &self.api.alert),
            ("api.log_server", &self.api.audit),
        ] {
            if channel.enabled {
                validate_endpoint(name, &channel.endpoint)?;
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<DwellConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn channel_settings(file: Option<ChannelConfigFile>) -> ChannelSettings {
    let file = file.unwrap_or_default();
    ChannelSettings {
        enabled: file.enabled.unwrap_or(false),
        endpoint: file.endpoint.unwrap_or_default(),
        recipient: file.recipient.filter(|r| !r.trim().is_empty()),
    }
}

fn validate_endpoint(name: &str, endpoint: &str) -> Result<()> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| anyhow!("{}.endpoint '{}' is not a valid URL: {}", name, endpoint, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(anyhow!(
            "{}.endpoint must use http or https, got '{}'",
            name,
            other
        )),
    }
}

fn secs_f64(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow!("{} must be a finite, non-negative number of seconds", name))
}
