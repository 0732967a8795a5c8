use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detection-and-tracking backend.
///
/// Backends own track-ID assignment and re-identification across frames. The
/// orchestrator only consumes their per-frame output and never feeds state back.
pub trait TrackerBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection plus tracking on one frame.
    ///
    /// An empty vector is a normal outcome, not an error.
    fn track(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
