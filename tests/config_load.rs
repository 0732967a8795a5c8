use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use dwell_alert::config::{AuthScheme, DwellConfig, SourceSpec};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in ["DWELL_CONFIG", "DWELL_RTSP_URL", "DWELL_API_KEY", "DWELL_LOG_PATH"] {
        std::env::remove_var(key);
    }
}

fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

const FULL_TOML: &str = r#"
[camera]
source_type = "rtsp"
rtsp_url = "rtsp://10.0.0.5/stream1"
reconnect_delay_sec = 3

[model]
path = "models/yolov8n.onnx"
confidence_threshold = 0.6
target_class = 0

[processing]
device = "cuda"
enable_roi = true
roi_points = [[100, 100], [500, 100], [500, 400], [100, 400]]
notify_workers = 3

[tracking]
persistence_threshold_sec = 2.5
track_ttl_sec = 60

[storage]
log_path = "logs/test.log"

[storage.realtime]
path = "rt"
interval_sec = 0.5

[storage.captures]
path = "caps"
save_crop = true

[storage.framerecord]
enabled = true
path = "frames"

[api]
api_key = "file-key"
auth_scheme = "x-api-key"
timeout_sec = 5

[api.whatsapp]
enabled = true
endpoint = "https://alerts.example.com/send"
recipient = "+15550100"

[api.log_server]
enabled = true
endpoint = "http://127.0.0.1:8080/events"

[api.retry]
max_attempts = 4
base_delay_sec = 0.5
"#;

#[test]
fn loads_full_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(".toml", FULL_TOML);
    let cfg = DwellConfig::load(file.path()).expect("load config");

    assert_eq!(
        cfg.camera.source,
        SourceSpec::Rtsp("rtsp://10.0.0.5/stream1".to_string())
    );
    assert_eq!(cfg.camera.reconnect_delay, Duration::from_secs(3));
    assert_eq!(cfg.model.device, "cuda");
    assert_eq!(cfg.model.confidence_threshold, 0.6);
    assert_eq!(cfg.roi.as_ref().map(Vec::len), Some(4));
    assert_eq!(cfg.notify_workers, 3);
    assert_eq!(cfg.tracking.persistence, Duration::from_millis(2500));
    assert_eq!(cfg.tracking.track_ttl, Some(Duration::from_secs(60)));
    assert_eq!(cfg.storage.capture_interval, Duration::from_millis(500));
    assert!(cfg.storage.save_crop);
    assert_eq!(
        cfg.storage.framerecord_path.as_deref(),
        Some(std::path::Path::new("frames"))
    );
    assert_eq!(cfg.api.auth_scheme, AuthScheme::ApiKeyHeader);
    assert_eq!(cfg.api.timeout, Duration::from_secs(5));
    assert_eq!(cfg.api.alert.recipient.as_deref(), Some("+15550100"));
    assert!(cfg.api.audit.enabled);
    assert_eq!(cfg.api.retry.max_attempts, 4);
    assert_eq!(cfg.api.retry.base_delay, Duration::from_millis(500));
}

#[test]
fn env_overrides_apply_after_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(".toml", FULL_TOML);
    std::env::set_var("DWELL_RTSP_URL", "rtsp://10.0.0.9/backup");
    std::env::set_var("DWELL_API_KEY", "env-key");
    std::env::set_var("DWELL_LOG_PATH", "/var/log/dwelld.log");

    let cfg = DwellConfig::load(file.path()).expect("load config");
    clear_env();

    assert_eq!(
        cfg.camera.source,
        SourceSpec::Rtsp("rtsp://10.0.0.9/backup".to_string())
    );
    assert_eq!(cfg.api.api_key, "env-key");
    assert_eq!(
        cfg.storage.log_path,
        std::path::PathBuf::from("/var/log/dwelld.log")
    );
}

#[test]
fn loads_json_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_temp(
        ".json",
        r#"{
            "camera": { "source_type": "webcam", "webcam_id": 2 },
            "model": { "path": "stub://yolo", "target_class": 2 },
            "tracking": { "persistence_threshold_sec": 0 }
        }"#,
    );
    let cfg = DwellConfig::load(file.path()).expect("load json config");

    assert_eq!(cfg.camera.source, SourceSpec::Webcam(2));
    assert_eq!(cfg.model.target_class, 2);
    assert_eq!(cfg.tracking.persistence, Duration::ZERO);
}

#[test]
fn missing_or_malformed_config_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let dir = tempfile::tempdir().expect("temp dir");
    assert!(DwellConfig::load(&dir.path().join("absent.toml")).is_err());

    let broken = write_temp(".toml", "[camera\nsource_type = ");
    assert!(DwellConfig::load(broken.path()).is_err());

    let no_model = write_temp(".toml", "[camera]\nsource_type = \"webcam\"\n");
    assert!(DwellConfig::load(no_model.path()).is_err());
}
