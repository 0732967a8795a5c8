use anyhow::Result;

use crate::detect::backend::TrackerBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Frames in one synthetic visit cycle.
const CYCLE_FRAMES: u64 = 100;
/// Frames of each cycle during which the visitor is in view.
const VISIBLE_FRAMES: u64 = 60;

/// Stub backend for testing and dry runs.
///
/// Emits a single synthetic visitor that walks across the frame for
/// `VISIBLE_FRAMES` frames, leaves, and returns with a fresh track id.
pub struct StubTracker {
    class_id: u32,
    confidence: f32,
    frames_seen: u64,
}

impl StubTracker {
    pub fn new(class_id: u32, confidence: f32) -> Self {
        Self {
            class_id,
            confidence,
            frames_seen: 0,
        }
    }
}

impl TrackerBackend for StubTracker {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let index = self.frames_seen;
        self.frames_seen += 1;

        let phase = index % CYCLE_FRAMES;
        if phase >= VISIBLE_FRAMES {
            return Ok(vec![]);
        }

        let width = frame.width() as f32;
        let height = frame.height() as f32;
        let box_w = width / 6.0;
        let box_h = height / 2.0;
        let travel = (width - box_w).max(0.0);
        let x1 = travel * phase as f32 / VISIBLE_FRAMES as f32;
        let y1 = height / 4.0;

        Ok(vec![Detection {
            class_id: self.class_id,
            confidence: self.confidence,
            track_id: Some(index / CYCLE_FRAMES + 1),
            bbox: BoundingBox::new(x1, y1, x1 + box_w, y1 + box_h),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_visitor_leaves_and_returns_with_new_id() -> Result<()> {
        let frame = Frame::blank(320, 240, 0);
        let mut tracker = StubTracker::new(0, 0.9);

        let first = tracker.track(&frame)?;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].track_id, Some(1));

        for _ in 1..VISIBLE_FRAMES {
            tracker.track(&frame)?;
        }
        assert!(tracker.track(&frame)?.is_empty());

        for _ in (VISIBLE_FRAMES + 1)..CYCLE_FRAMES {
            tracker.track(&frame)?;
        }
        let returned = tracker.track(&frame)?;
        assert_eq!(returned[0].track_id, Some(2));
        Ok(())
    }
}
