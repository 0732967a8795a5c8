//! Frame orchestration.
//!
//! `Orchestrator` is the single-threaded owner of the track store. For every
//! frame it filters detections, advances per-track persistence and hands an
//! owned `NotificationTask` to the dispatcher on the one-shot persistent edge.
//! `Runner` wires it to a reconnecting frame source, a tracker backend and the
//! notification worker pool, and runs until the shutdown flag is set.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::imageops;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::CaptureScheduler;
use crate::config::DwellConfig;
use crate::detect::{Detection, TrackerBackend};
use crate::evidence::EvidenceImages;
use crate::frame::{Frame, BOX_COLOR, ROI_COLOR};
use crate::ingest::{FrameSource, Reconnector};
use crate::roi::{RoiGate, RoiMask};
use crate::track::{Observation, TrackStore};
use crate::transport::{
    DispatchContext, Dispatcher, HttpTransport, NotificationTask, SleepFn, TaskSink,
};

const BOX_THICKNESS: u32 = 2;
const EVICTION_INTERVAL: Duration = Duration::from_secs(1);
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// What one frame produced.
#[derive(Debug)]
pub struct FrameOutcome {
    /// Detections that passed class, confidence, track-id and ROI checks.
    pub qualifying: usize,
    /// Track ids that crossed the persistence threshold on this frame.
    pub notified: Vec<u64>,
    /// Copy of the frame with boxes and the ROI outline drawn.
    pub annotated: Frame,
}

pub struct Orchestrator<S: TaskSink> {
    confidence_threshold: f32,
    target_class: u32,
    roi: RoiGate,
    tracks: TrackStore,
    capture: CaptureScheduler,
    sink: S,
    save_crop: bool,
    keep_annotated: bool,
    last_eviction: Instant,
    notifications: u64,
}

impl<S: TaskSink> Orchestrator<S> {
    pub fn new(cfg: &DwellConfig, sink: S, start: Instant) -> Self {
        let roi = match &cfg.roi {
            Some(points) => RoiGate::new(points.clone()),
            None => RoiGate::disabled(),
        };
        Self {
            confidence_threshold: cfg.model.confidence_threshold,
            target_class: cfg.model.target_class,
            roi,
            tracks: TrackStore::new(cfg.tracking.persistence, cfg.tracking.track_ttl),
            capture: CaptureScheduler::new(
                cfg.storage.realtime_path.clone(),
                cfg.storage.capture_interval,
                start,
            ),
            sink,
            save_crop: cfg.storage.save_crop,
            keep_annotated: cfg.storage.framerecord_path.is_some(),
            last_eviction: start,
            notifications: 0,
        }
    }

    fn qualifies(&self, det: &Detection) -> bool {
        det.class_id == self.target_class
            && det.confidence >= self.confidence_threshold
            && det.track_id.is_some()
            && self.roi.contains(det.bbox.center())
    }

    /// Process one frame's detections.
    ///
    /// `now` drives persistence and scheduling; `wall` stamps evidence and alerts.
    pub fn process_frame(
        &mut self,
        frame: &Frame,
        detections: &[Detection],
        now: Instant,
        wall: DateTime<Local>,
    ) -> FrameOutcome {
        let qualifying: Vec<&Detection> =
            detections.iter().filter(|d| self.qualifies(d)).collect();

        let mut annotated = frame.clone();
        for det in &qualifying {
            annotated.draw_box(&det.bbox, BOX_COLOR, BOX_THICKNESS);
        }
        if let Some(polygon) = self.roi.polygon() {
            annotated.draw_polygon(polygon, ROI_COLOR);
        }

        let mut notified = Vec::new();
        for det in &qualifying {
            let Some(track_id) = det.track_id else {
                continue;
            };
            match self.tracks.observe(track_id, now) {
                Observation::New => {
                    log::debug!("track {} entered (conf {:.2})", track_id, det.confidence);
                }
                Observation::Dwelling { elapsed } => {
                    log::trace!("track {} dwelling {:.2}s", track_id, elapsed.as_secs_f64());
                }
                Observation::AlreadyNotified => {}
                Observation::Persistent { dwell } => {
                    log::info!(
                        "track {} persistent after {:.2}s (conf {:.2})",
                        track_id,
                        dwell.as_secs_f64(),
                        det.confidence
                    );
                    let task = NotificationTask {
                        track_id,
                        class_id: det.class_id,
                        confidence: det.confidence,
                        detected_at: wall,
                        dwell,
                        images: self.evidence_images(frame, &annotated, det),
                    };
                    self.sink.submit(task);
                    self.notifications += 1;
                    notified.push(track_id);
                }
            }
        }

        self.capture.poll(now, frame, &annotated);

        if now.saturating_duration_since(self.last_eviction) >= EVICTION_INTERVAL {
            self.last_eviction = now;
            let evicted = self.tracks.evict_stale(now);
            if evicted > 0 {
                log::debug!(
                    "evicted {} stale track(s), {} active",
                    evicted,
                    self.tracks.len()
                );
            }
        }

        FrameOutcome {
            qualifying: qualifying.len(),
            notified,
            annotated,
        }
    }

    fn evidence_images(&self, frame: &Frame, annotated: &Frame, det: &Detection) -> EvidenceImages {
        let crop = if self.save_crop {
            det.bbox
                .clamped_rect(frame.width(), frame.height())
                .map(|(x, y, w, h)| imageops::crop_imm(frame.image(), x, y, w, h).to_image())
        } else {
            None
        };
        EvidenceImages {
            capture: crop.unwrap_or_else(|| frame.image().clone()),
            annotated: self.keep_annotated.then(|| annotated.image().clone()),
        }
    }

    pub fn roi(&self) -> &RoiGate {
        &self.roi
    }

    pub fn tracks(&self) -> &TrackStore {
        &self.tracks
    }

    pub fn capture(&self) -> &CaptureScheduler {
        &self.capture
    }

    pub fn notifications(&self) -> u64 {
        self.notifications
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// Counters reported when a run ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub detector_errors: u64,
    pub reconnects: u64,
    pub notifications: u64,
    pub alerts_delivered: u64,
    pub audits_delivered: u64,
}

/// The long-running detection loop.
pub struct Runner<F: FrameSource> {
    source: Reconnector<F>,
    tracker: Box<dyn TrackerBackend>,
    /// Cached mask for the current frame size, built from the orchestrator's gate.
    roi_mask: Option<RoiMask>,
    orchestrator: Orchestrator<Dispatcher>,
}

impl<F: FrameSource> Runner<F> {
    /// Start the notification workers and assemble the loop. The source is not opened yet.
    pub fn new(
        cfg: &DwellConfig,
        source: F,
        tracker: Box<dyn TrackerBackend>,
        transport: Arc<dyn HttpTransport>,
        sleep: SleepFn,
    ) -> Result<Self> {
        let dispatcher = Dispatcher::start(
            DispatchContext {
                storage: cfg.storage.clone(),
                api: cfg.api.clone(),
                transport,
                sleep: sleep.clone(),
            },
            cfg.notify_workers,
        )
        .context("start notification dispatcher")?;
        Ok(Self {
            source: Reconnector::new(source, cfg.camera.reconnect_delay, sleep),
            tracker,
            roi_mask: None,
            orchestrator: Orchestrator::new(cfg, dispatcher, Instant::now()),
        })
    }

    /// Run until `shutdown` is set, then drain pending notifications.
    ///
    /// Only the initial source open and tracker warm-up can fail.
    pub fn run(mut self, shutdown: &AtomicBool) -> Result<RunSummary> {
        self.source.connect()?;
        self.tracker
            .warm_up()
            .with_context(|| format!("warm up tracker {}", self.tracker.name()))?;
        log::info!(
            "dwelld running: tracker={} roi={}",
            self.tracker.name(),
            if self.orchestrator.roi().is_enabled() {
                "on"
            } else {
                "off"
            }
        );

        let mut summary = RunSummary::default();
        let mut last_health_log = Instant::now();

        while let Some(frame) = self.source.next_frame(shutdown) {
            summary.frames += 1;

            let detections = match self.track(&frame) {
                Ok(detections) => detections,
                Err(e) => {
                    summary.detector_errors += 1;
                    log::warn!("tracker failed on frame {}: {:#}", frame.sequence, e);
                    Vec::new()
                }
            };

            let outcome =
                self.orchestrator
                    .process_frame(&frame, &detections, Instant::now(), Local::now());
            if !outcome.notified.is_empty() {
                log::debug!("frame {} notified tracks {:?}", frame.sequence, outcome.notified);
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let stats = self.orchestrator.sink().stats();
                log::info!(
                    "health source={:?} frames={} tracks={} notifications={} pending={}",
                    self.source.state(),
                    summary.frames,
                    self.orchestrator.tracks().len(),
                    self.orchestrator.notifications(),
                    stats.pending()
                );
                last_health_log = Instant::now();
            }

            if shutdown.load(Ordering::SeqCst) {
                break;
            }
        }

        log::info!("shutdown requested; closing video source");
        self.source.close();
        summary.reconnects = self.source.reconnects();
        summary.notifications = self.orchestrator.notifications();

        let dispatcher = self.orchestrator.into_sink();
        let stats = dispatcher.stats();
        dispatcher.shutdown();
        summary.alerts_delivered = stats.alerts_delivered.load(Ordering::SeqCst);
        summary.audits_delivered = stats.audits_delivered.load(Ordering::SeqCst);

        log::info!(
            "dwelld stopped: frames={} notifications={} alerts_delivered={} audits_delivered={} reconnects={}",
            summary.frames,
            summary.notifications,
            summary.alerts_delivered,
            summary.audits_delivered,
            summary.reconnects
        );
        Ok(summary)
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let roi = self.orchestrator.roi();
        if !roi.is_enabled() {
            return self.tracker.track(frame);
        }
        if !self.roi_mask.as_ref().is_some_and(|mask| mask.matches(frame)) {
            self.roi_mask = roi.mask_for(frame.width(), frame.height());
        }
        let mut masked = frame.clone();
        if let Some(mask) = &self.roi_mask {
            mask.apply(&mut masked);
        }
        self.tracker.track(&masked)
    }
}
