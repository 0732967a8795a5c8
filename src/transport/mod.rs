//! Outbound notification transport.
//!
//! This module provides the notification dispatcher (bounded worker pool),
//! retry/backoff over explicit per-attempt outcomes, and the HTTP transport
//! used to reach the alert and audit endpoints.

pub mod dispatcher;
mod http;
mod retry;

pub use dispatcher::{
    handle_task, DispatchContext, DispatchStats, Dispatcher, NotificationTask, TaskReport,
    TaskSink,
};
pub use http::{FilePart, HttpTransport, MultipartForm, OutboundRequest, RequestBody, UreqTransport};
pub use retry::{
    deliver_with_retry, thread_sleep, AttemptOutcome, DeliveryReport, RetryPolicy, SleepFn,
};
