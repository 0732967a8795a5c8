//! Dwell-time alerting pipeline.
//!
//! For each video frame the pipeline consumes tracked detections, decides
//! whether a subject has been continuously present long enough to count as an
//! event, and exactly once per qualifying track saves evidence imagery and
//! dispatches external notifications.
//!
//! # Architecture
//!
//! One synchronous thread owns frame acquisition, detection, ROI filtering and
//! the track store. Notification work (evidence save, alert POST, audit POST)
//! runs on a fixed pool of worker threads that only ever see owned task
//! snapshots.
//!
//! # Module Structure
//!
//! - `config`: configuration file model, defaults, env overrides, validation
//! - `logging`: console + file logger
//! - `frame`: owned RGB frames and annotation drawing
//! - `detect`: detections, tracker backend trait, synthetic stub tracker
//! - `roi`: region-of-interest gate and processing mask
//! - `track`: per-track persistence state machine
//! - `capture`: debounced realtime snapshots
//! - `evidence`: dated evidence paths and JPEG persistence
//! - `transport`: notification dispatcher, retry/backoff, HTTP transport
//! - `ingest`: frame sources and the reconnection controller
//! - `pipeline`: per-frame orchestration and the long-running runner

pub mod capture;
pub mod config;
pub mod detect;
pub mod evidence;
pub mod frame;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod roi;
pub mod track;
pub mod transport;

pub use config::{DwellConfig, SourceSpec};
pub use detect::{open_tracker, BoundingBox, Detection, Point, TrackerBackend};
pub use frame::Frame;
pub use ingest::{CameraSource, FrameSource, Reconnector};
pub use pipeline::{FrameOutcome, Orchestrator, RunSummary, Runner};
pub use roi::RoiGate;
pub use track::{Observation, TrackStore};
pub use transport::{Dispatcher, HttpTransport, NotificationTask, TaskSink, UreqTransport};
