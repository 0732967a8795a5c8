use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{Rgb, RgbImage};

use dwell_alert::transport::{AttemptOutcome, OutboundRequest, RequestBody, SleepFn};
use dwell_alert::{
    BoundingBox, Detection, DwellConfig, Frame, FrameSource, HttpTransport, Point, Runner,
    TrackerBackend,
};

const CAMERA_GRAY: Rgb<u8> = Rgb([200, 200, 200]);

/// Yields `frames` frames, failing the reads listed in `fail_at`, then raises shutdown.
struct ScriptedCamera {
    frames: u64,
    fail_at: Vec<u64>,
    reads: u64,
    delivered: u64,
    opens: u32,
    shutdown: Arc<AtomicBool>,
}

impl FrameSource for ScriptedCamera {
    fn open(&mut self) -> Result<()> {
        self.opens += 1;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame> {
        self.reads += 1;
        if self.fail_at.contains(&self.reads) {
            return Err(anyhow!("stream dropped"));
        }
        self.delivered += 1;
        if self.delivered >= self.frames {
            self.shutdown.store(true, Ordering::SeqCst);
        }
        Ok(Frame::new(
            RgbImage::from_pixel(64, 48, CAMERA_GRAY),
            self.delivered,
        ))
    }

    fn close(&mut self) {}

    fn describe(&self) -> String {
        "scripted camera".to_string()
    }
}

/// Reports the same tracked person on every frame.
struct FixedTracker;

impl TrackerBackend for FixedTracker {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn track(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(vec![Detection {
            class_id: 0,
            confidence: 0.92,
            track_id: Some(7),
            bbox: BoundingBox::new(8.0, 8.0, 24.0, 40.0),
        }])
    }
}

/// Records one pixel inside and one outside the left-half ROI of every frame it sees.
struct PixelRecordingTracker {
    seen: Arc<Mutex<Vec<(Rgb<u8>, Rgb<u8>)>>>,
}

impl TrackerBackend for PixelRecordingTracker {
    fn name(&self) -> &'static str {
        "pixel-recording"
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let inside = *frame.image().get_pixel(10, 20);
        let outside = *frame.image().get_pixel(50, 20);
        self.seen.lock().unwrap().push((inside, outside));
        Ok(vec![])
    }
}

#[derive(Default)]
struct RecordingTransport {
    requests: Mutex<Vec<OutboundRequest>>,
}

impl HttpTransport for RecordingTransport {
    fn post(&self, request: &OutboundRequest) -> AttemptOutcome {
        self.requests.lock().unwrap().push(request.clone());
        AttemptOutcome::Delivered { status: 200 }
    }
}

fn config(dir: &Path) -> DwellConfig {
    let raw = format!(
        r#"
        [camera]
        source_type = "rtsp"
        rtsp_url = "stub://cam"

        [model]
        path = "stub://yolo"

        [processing]
        notify_workers = 2

        [tracking]
        persistence_threshold_sec = 0

        [storage.realtime]
        path = "{dir}/rt"

        [storage.captures]
        path = "{dir}/captures"

        [api]
        api_key = "k"

        [api.whatsapp]
        enabled = true
        endpoint = "http://alerts.local/send"

        [api.log_server]
        enabled = true
        endpoint = "http://audit.local/events"
        "#,
        dir = dir.display()
    );
    DwellConfig::from_toml_str(&raw).unwrap()
}

fn recording_sleep() -> (SleepFn, Arc<Mutex<Vec<Duration>>>) {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let sink = delays.clone();
    let sleep: SleepFn = Arc::new(move |d| sink.lock().unwrap().push(d));
    (sleep, delays)
}

fn captured_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    for day in std::fs::read_dir(dir).unwrap() {
        for entry in std::fs::read_dir(day.unwrap().path()).unwrap() {
            files.push(entry.unwrap().path());
        }
    }
    files
}

#[test]
fn persistent_track_is_notified_once_and_drained_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let shutdown = Arc::new(AtomicBool::new(false));
    let camera = ScriptedCamera {
        frames: 20,
        fail_at: vec![],
        reads: 0,
        delivered: 0,
        opens: 0,
        shutdown: shutdown.clone(),
    };
    let transport = Arc::new(RecordingTransport::default());
    let (sleep, _) = recording_sleep();

    let runner = Runner::new(&cfg, camera, Box::new(FixedTracker), transport.clone(), sleep)
        .expect("runner");
    let summary = runner.run(&shutdown).expect("run");

    assert_eq!(summary.frames, 20);
    assert_eq!(summary.notifications, 1);
    assert_eq!(summary.alerts_delivered, 1);
    assert_eq!(summary.audits_delivered, 1);

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    let audit = requests
        .iter()
        .find(|r| r.url == "http://audit.local/events")
        .expect("audit request");
    let RequestBody::Json(body) = &audit.body else {
        panic!("audit body should be json");
    };
    assert_eq!(body["event"], "persistent_detection");
    assert_eq!(body["track_id"], 7);
    assert_eq!(body["confidence"], "0.92");

    let alert = requests
        .iter()
        .find(|r| r.url == "http://alerts.local/send")
        .expect("alert request");
    let RequestBody::Multipart(form) = &alert.body else {
        panic!("alert body should be multipart");
    };
    assert_eq!(form.files.len(), 1);
    assert!(alert
        .headers
        .iter()
        .any(|(k, v)| k == "Authorization" && v == "Bearer k"));

    let files = captured_files(&dir.path().join("captures"));
    assert_eq!(files.len(), 1);
    let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("capture_id_7_"), "{name}");
    assert!(name.ends_with(".jpg"), "{name}");
}

#[test]
fn read_failure_reconnects_without_losing_track_state() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let shutdown = Arc::new(AtomicBool::new(false));
    let camera = ScriptedCamera {
        frames: 10,
        fail_at: vec![4],
        reads: 0,
        delivered: 0,
        opens: 0,
        shutdown: shutdown.clone(),
    };
    let transport = Arc::new(RecordingTransport::default());
    let (sleep, delays) = recording_sleep();

    let runner = Runner::new(&cfg, camera, Box::new(FixedTracker), transport.clone(), sleep)
        .expect("runner");
    let summary = runner.run(&shutdown).expect("run");

    assert_eq!(summary.frames, 10);
    assert_eq!(summary.reconnects, 1);
    assert_eq!(summary.notifications, 1, "track 7 is not re-notified after reconnect");
    assert_eq!(*delays.lock().unwrap(), vec![Duration::from_secs(5)]);
    assert_eq!(transport.requests.lock().unwrap().len(), 2);
}

#[test]
fn tracker_input_is_masked_by_the_configured_roi() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.roi = Some(vec![
        Point::new(0.0, 0.0),
        Point::new(32.0, 0.0),
        Point::new(32.0, 48.0),
        Point::new(0.0, 48.0),
    ]);
    let shutdown = Arc::new(AtomicBool::new(false));
    let camera = ScriptedCamera {
        frames: 3,
        fail_at: vec![],
        reads: 0,
        delivered: 0,
        opens: 0,
        shutdown: shutdown.clone(),
    };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tracker = PixelRecordingTracker { seen: seen.clone() };
    let (sleep, _) = recording_sleep();

    let runner = Runner::new(
        &cfg,
        camera,
        Box::new(tracker),
        Arc::new(RecordingTransport::default()),
        sleep,
    )
    .expect("runner");
    runner.run(&shutdown).expect("run");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    for (inside, outside) in seen.iter() {
        assert_eq!(*inside, CAMERA_GRAY);
        assert_eq!(*outside, Rgb([0, 0, 0]));
    }
}
