//! Debounced "latest live view" snapshots.
//!
//! Independent of detection state: at most once per `interval`, the raw frame
//! and the annotated frame overwrite two fixed files in the realtime folder.
//! A failed write is logged and the interval still restarts.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::evidence::{encode_jpeg, write_image_file};
use crate::frame::Frame;

pub const REALTIME_RAW: &str = "realtime.jpg";
pub const REALTIME_ANNOTATED: &str = "realtime-withbox.jpg";

#[derive(Debug)]
pub struct CaptureScheduler {
    dir: PathBuf,
    interval: Duration,
    last_capture: Instant,
    snapshots: u64,
}

impl CaptureScheduler {
    /// The first snapshot is due one `interval` after `start`.
    pub fn new(dir: PathBuf, interval: Duration, start: Instant) -> Self {
        Self {
            dir,
            interval,
            last_capture: start,
            snapshots: 0,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_capture) >= self.interval
    }

    /// Write both snapshots if the interval has elapsed. Returns whether it was due.
    pub fn poll(&mut self, now: Instant, raw: &Frame, annotated: &Frame) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last_capture = now;
        self.snapshots += 1;

        for (name, frame) in [(REALTIME_RAW, raw), (REALTIME_ANNOTATED, annotated)] {
            let path = self.dir.join(name);
            match encode_jpeg(frame.image()).and_then(|bytes| write_image_file(&path, &bytes)) {
                Ok(()) => log::debug!("realtime snapshot updated: {}", path.display()),
                Err(e) => log::warn!("realtime snapshot {} failed: {:#}", path.display(), e),
            }
        }
        true
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots
    }
}
