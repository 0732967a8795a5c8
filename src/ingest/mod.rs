//! Frame ingestion sources.
//!
//! This module provides:
//! - `FrameSource`: open / read / close contract shared by every source
//! - `CameraSource`: RTSP streams and local webcams (GStreamer, feature
//!   `rtsp-gstreamer`), with a synthetic `stub://` fallback for tests
//! - `Reconnector`: the reconnection controller that reopens a failed source
//!   after a fixed delay, forever, until shutdown is requested

pub mod camera;
pub mod reconnect;

use anyhow::Result;

use crate::frame::Frame;

pub use camera::CameraSource;
pub use reconnect::{Reconnector, SourceState};

/// A source of decoded frames.
pub trait FrameSource: Send {
    /// Open (or reopen) the underlying stream.
    fn open(&mut self) -> Result<()>;

    /// Read the next frame. An error means the stream failed and must be reopened.
    fn read(&mut self) -> Result<Frame>;

    /// Release the stream. Must be safe to call on a closed source.
    fn close(&mut self);

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}
