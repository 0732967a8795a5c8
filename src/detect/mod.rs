mod backend;
mod backends;
mod result;

use anyhow::{anyhow, Result};

use crate::config::ModelSettings;

pub use backend::TrackerBackend;
pub use backends::StubTracker;
pub use result::{BoundingBox, Detection, Point};

const STUB_CONFIDENCE: f32 = 0.9;

/// Open the tracker backend named by `model.path`.
///
/// `stub://` models resolve to the synthetic [`StubTracker`]. Other models must be
/// supplied by embedding applications through [`crate::pipeline::Runner::new`].
pub fn open_tracker(model: &ModelSettings) -> Result<Box<dyn TrackerBackend>> {
    if model.path.starts_with("stub://") {
        log::info!(
            "tracker: using synthetic stub backend for {} (device {})",
            model.path,
            model.device
        );
        return Ok(Box::new(StubTracker::new(
            model.target_class,
            STUB_CONFIDENCE.max(model.confidence_threshold),
        )));
    }
    Err(anyhow!(
        "no built-in tracker backend for model '{}'; use a stub:// model or embed a TrackerBackend",
        model.path
    ))
}
