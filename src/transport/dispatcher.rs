//! Notification dispatcher.
//!
//! A fixed pool of worker threads consumes `NotificationTask` values from an
//! unbounded channel. Submitting never blocks the frame loop. Each task saves
//! its evidence, then runs the alert and audit channels independently, each
//! with its own bounded retry. Workers only ever see task snapshots.
//!
//! Dropping or shutting down the dispatcher closes the channel and joins the
//! workers, so queued tasks are drained before the process exits.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{ApiSettings, AuthScheme, StorageSettings};
use crate::evidence::{EvidenceImages, SavedEvidence, CAPTURE_PREFIX, IMAGE_EXT};
use crate::transport::http::{HttpTransport, MultipartForm, OutboundRequest, RequestBody};
use crate::transport::retry::{deliver_with_retry, DeliveryReport, SleepFn};

pub const ALERT_CHANNEL: &str = "alert";
pub const AUDIT_CHANNEL: &str = "audit";
pub const AUDIT_EVENT_KIND: &str = "persistent_detection";

/// Immutable snapshot taken when a track crosses the persistence threshold.
#[derive(Clone, Debug)]
pub struct NotificationTask {
    pub track_id: u64,
    pub class_id: u32,
    pub confidence: f32,
    pub detected_at: DateTime<Local>,
    pub dwell: Duration,
    pub images: EvidenceImages,
}

/// Anything that accepts notification tasks without blocking.
pub trait TaskSink {
    fn submit(&self, task: NotificationTask);
}

/// Everything a worker needs, shared read-only across the pool.
pub struct DispatchContext {
    pub storage: StorageSettings,
    pub api: ApiSettings,
    pub transport: Arc<dyn HttpTransport>,
    pub sleep: SleepFn,
}

/// What happened to one task.
#[derive(Clone, Debug)]
pub struct TaskReport {
    pub track_id: u64,
    pub evidence: Option<SavedEvidence>,
    pub alert: Option<DeliveryReport>,
    pub audit: Option<DeliveryReport>,
}

/// Counters across the life of the pool.
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub alerts_delivered: AtomicU64,
    pub alerts_dropped: AtomicU64,
    pub audits_delivered: AtomicU64,
    pub audits_dropped: AtomicU64,
}

impl DispatchStats {
    /// Tasks submitted but not yet finished.
    pub fn pending(&self) -> u64 {
        self.submitted
            .load(Ordering::SeqCst)
            .saturating_sub(self.completed.load(Ordering::SeqCst))
    }

    fn record(&self, report: &TaskReport) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        if let Some(alert) = &report.alert {
            let counter = if alert.delivered() {
                &self.alerts_delivered
            } else {
                &self.alerts_dropped
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(audit) = &report.audit {
            let counter = if audit.delivered() {
                &self.audits_delivered
            } else {
                &self.audits_dropped
            };
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct Dispatcher {
    sender: Option<Sender<NotificationTask>>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<DispatchStats>,
}

impl Dispatcher {
    /// Spawn `workers` threads.
    pub fn start(ctx: DispatchContext, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(anyhow!("dispatcher needs at least one worker"));
        }
        let (sender, receiver) = mpsc::channel::<NotificationTask>();
        let receiver = Arc::new(Mutex::new(receiver));
        let ctx = Arc::new(ctx);
        let stats = Arc::new(DispatchStats::default());

        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let receiver = receiver.clone();
            let ctx = ctx.clone();
            let stats = stats.clone();
            let handle = std::thread::Builder::new()
                .name(format!("notify-{}", i))
                .spawn(move || worker_loop(receiver, ctx, stats))
                .context("spawn notification worker")?;
            handles.push(handle);
        }
        log::info!("notification dispatcher started with {} workers", workers);

        Ok(Self {
            sender: Some(sender),
            workers: handles,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Close the queue and wait for every queued and in-flight task to finish.
    pub fn shutdown(mut self) {
        self.drain();
    }

    fn drain(&mut self) {
        let Some(sender) = self.sender.take() else {
            return;
        };
        drop(sender);
        let pending = self.stats.pending();
        if pending > 0 {
            log::info!("draining {} pending notification task(s)", pending);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::error!("notification worker panicked");
            }
        }
    }
}

impl TaskSink for Dispatcher {
    fn submit(&self, task: NotificationTask) {
        let Some(sender) = &self.sender else {
            log::error!("dispatcher closed; dropping task for track {}", task.track_id);
            return;
        };
        let track_id = task.track_id;
        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        if sender.send(task).is_err() {
            self.stats.completed.fetch_add(1, Ordering::SeqCst);
            log::error!("all notification workers exited; dropping task for track {}", track_id);
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.drain();
    }
}

fn worker_loop(
    receiver: Arc<Mutex<Receiver<NotificationTask>>>,
    ctx: Arc<DispatchContext>,
    stats: Arc<DispatchStats>,
) {
    loop {
        let next = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => {
                log::error!("notification queue lock poisoned; worker exiting");
                return;
            }
        };
        let Ok(task) = next else {
            return;
        };
        let report = handle_task(&ctx, task);
        stats.record(&report);
    }
}

/// Save evidence, then run the alert and audit channels.
pub fn handle_task(ctx: &DispatchContext, task: NotificationTask) -> TaskReport {
    log::debug!(
        "handling task for track {} (conf {:.2}, dwell {:.2}s)",
        task.track_id,
        task.confidence,
        task.dwell.as_secs_f64()
    );

    let evidence = match task
        .images
        .save(&ctx.storage, task.track_id, &task.detected_at)
    {
        Ok(saved) => Some(saved),
        Err(e) => {
            log::error!("evidence for track {} could not be encoded: {:#}", task.track_id, e);
            None
        }
    };

    let alert = if ctx.api.alert.enabled {
        let request = alert_request(ctx, &task, evidence.as_ref());
        Some(deliver_with_retry(
            ALERT_CHANNEL,
            &ctx.api.retry,
            &ctx.sleep,
            |_| ctx.transport.post(&request),
        ))
    } else {
        None
    };

    let audit = if ctx.api.audit.enabled {
        let request = audit_request(ctx, &task, evidence.as_ref());
        Some(deliver_with_retry(
            AUDIT_CHANNEL,
            &ctx.api.retry,
            &ctx.sleep,
            |_| ctx.transport.post(&request),
        ))
    } else {
        None
    };

    TaskReport {
        track_id: task.track_id,
        evidence,
        alert,
        audit,
    }
}

fn auth_headers(api: &ApiSettings) -> Vec<(String, String)> {
    if api.api_key.is_empty() {
        return vec![];
    }
    match api.auth_scheme {
        AuthScheme::Bearer => vec![(
            "Authorization".to_string(),
            format!("Bearer {}", api.api_key),
        )],
        AuthScheme::ApiKeyHeader => vec![("x-api-key".to_string(), api.api_key.clone())],
    }
}

pub fn alert_message(task: &NotificationTask) -> String {
    format!(
        "Security alert: tracked subject {} (class {}) present for {:.1}s, detected at {}.",
        task.track_id,
        task.class_id,
        task.dwell.as_secs_f64(),
        task.detected_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn alert_request(
    ctx: &DispatchContext,
    task: &NotificationTask,
    evidence: Option<&SavedEvidence>,
) -> OutboundRequest {
    let mut form = MultipartForm::new().text("message", &alert_message(task));
    if let Some(recipient) = &ctx.api.alert.recipient {
        form = form.text("recipient", recipient);
    }
    if let Some(evidence) = evidence {
        let filename = evidence
            .capture_path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{}.{}", CAPTURE_PREFIX, task.track_id, IMAGE_EXT));
        form = form.file(
            "attachment",
            &filename,
            "image/jpeg",
            evidence.capture_jpeg.clone(),
        );
    }
    OutboundRequest {
        url: ctx.api.alert.endpoint.clone(),
        headers: auth_headers(&ctx.api),
        body: RequestBody::Multipart(form),
    }
}

fn audit_request(
    ctx: &DispatchContext,
    task: &NotificationTask,
    evidence: Option<&SavedEvidence>,
) -> OutboundRequest {
    let image_path = evidence
        .and_then(|e| e.capture_path.as_ref())
        .map(|p| p.display().to_string());
    let body = serde_json::json!({
        "event": AUDIT_EVENT_KIND,
        "track_id": task.track_id,
        "class_id": task.class_id,
        "timestamp": task.detected_at.to_rfc3339(),
        "confidence": format!("{:.2}", task.confidence),
        "dwell_sec": task.dwell.as_secs_f64(),
        "image_path": image_path,
        "image_sha256": evidence.map(|e| e.capture_sha256.clone()),
    });
    OutboundRequest {
        url: ctx.api.audit.endpoint.clone(),
        headers: auth_headers(&ctx.api),
        body: RequestBody::Json(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelSettings;
    use crate::transport::retry::{AttemptOutcome, RetryPolicy};
    use image::RgbImage;
    use std::path::Path;

    /// Fails the first `failures` posts to each URL, then succeeds.
    struct FlakyTransport {
        failures: u32,
        calls: Mutex<Vec<String>>,
    }

    impl HttpTransport for FlakyTransport {
        fn post(&self, request: &OutboundRequest) -> AttemptOutcome {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.url.clone());
            let seen = calls.iter().filter(|u| **u == request.url).count() as u32;
            if seen <= self.failures {
                AttemptOutcome::TransportError("timed out".into())
            } else {
                AttemptOutcome::Delivered { status: 200 }
            }
        }
    }

    fn context(dir: &Path, transport: Arc<dyn HttpTransport>) -> DispatchContext {
        DispatchContext {
            storage: StorageSettings {
                realtime_path: dir.join("realtime"),
                capture_interval: Duration::from_secs(1),
                captures_path: dir.join("captures"),
                save_crop: false,
                framerecord_path: None,
                log_path: dir.join("log.txt"),
            },
            api: ApiSettings {
                api_key: "secret".to_string(),
                auth_scheme: AuthScheme::Bearer,
                timeout: Duration::from_secs(5),
                alert: ChannelSettings {
                    enabled: true,
                    endpoint: "http://alert.local/send".to_string(),
                    recipient: Some("ops".to_string()),
                },
                audit: ChannelSettings {
                    enabled: true,
                    endpoint: "http://audit.local/log".to_string(),
                    recipient: None,
                },
                retry: RetryPolicy::default(),
            },
            transport,
            sleep: Arc::new(|_: Duration| {}),
        }
    }

    fn task(track_id: u64) -> NotificationTask {
        NotificationTask {
            track_id,
            class_id: 0,
            confidence: 0.87,
            detected_at: Local::now(),
            dwell: Duration::from_secs(2),
            images: EvidenceImages {
                capture: RgbImage::new(16, 16),
                annotated: None,
            },
        }
    }

    #[test]
    fn channels_retry_independently() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FlakyTransport {
            failures: 2,
            calls: Mutex::new(Vec::new()),
        });
        let ctx = context(dir.path(), transport.clone());

        let report = handle_task(&ctx, task(5));

        let alert = report.alert.expect("alert report");
        let audit = report.audit.expect("audit report");
        assert!(alert.delivered());
        assert_eq!(alert.attempts, 3);
        assert!(audit.delivered());
        assert_eq!(audit.attempts, 3);
        assert_eq!(transport.calls.lock().unwrap().len(), 6);

        let evidence = report.evidence.expect("evidence");
        assert!(evidence.capture_path.expect("capture path").exists());
    }

    /// Rejects every post to the alert endpoint with 503, accepts everything else.
    struct AlertOutageTransport {
        calls: Mutex<Vec<String>>,
    }

    impl HttpTransport for AlertOutageTransport {
        fn post(&self, request: &OutboundRequest) -> AttemptOutcome {
            self.calls.lock().unwrap().push(request.url.clone());
            if request.url.contains("alert") {
                AttemptOutcome::Rejected { status: 503 }
            } else {
                AttemptOutcome::Delivered { status: 200 }
            }
        }
    }

    #[test]
    fn failing_alert_does_not_affect_audit() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(AlertOutageTransport {
            calls: Mutex::new(Vec::new()),
        });
        let ctx = context(dir.path(), transport.clone());

        let report = handle_task(&ctx, task(3));

        let alert = report.alert.expect("alert report");
        assert!(!alert.delivered());
        assert_eq!(alert.attempts, 3);
        assert_eq!(alert.last_outcome, AttemptOutcome::Rejected { status: 503 });
        let audit = report.audit.expect("audit report");
        assert!(audit.delivered());
        assert_eq!(audit.attempts, 1);
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec![
                "http://alert.local/send".to_string(),
                "http://alert.local/send".to_string(),
                "http://alert.local/send".to_string(),
                "http://audit.local/log".to_string(),
            ]
        );

        let dispatcher = Dispatcher::start(context(dir.path(), transport.clone()), 2).unwrap();
        let stats = dispatcher.stats();
        dispatcher.submit(task(4));
        dispatcher.shutdown();

        assert_eq!(stats.completed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.alerts_dropped.load(Ordering::SeqCst), 1);
        assert_eq!(stats.alerts_delivered.load(Ordering::SeqCst), 0);
        assert_eq!(stats.audits_delivered.load(Ordering::SeqCst), 1);
        assert_eq!(stats.audits_dropped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_channels_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FlakyTransport {
            failures: 0,
            calls: Mutex::new(Vec::new()),
        });
        let mut ctx = context(dir.path(), transport.clone());
        ctx.api.alert.enabled = false;

        let report = handle_task(&ctx, task(9));
        assert!(report.alert.is_none());
        assert!(report.audit.expect("audit").delivered());
        assert_eq!(
            *transport.calls.lock().unwrap(),
            vec!["http://audit.local/log".to_string()]
        );
    }

    #[test]
    fn audit_payload_carries_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let transport: Arc<dyn HttpTransport> = Arc::new(FlakyTransport {
            failures: 0,
            calls: Mutex::new(Vec::new()),
        });
        let ctx = context(dir.path(), transport);
        let t = task(11);
        let saved = t
            .images
            .save(&ctx.storage, t.track_id, &t.detected_at)
            .unwrap();

        let request = audit_request(&ctx, &t, Some(&saved));
        let RequestBody::Json(body) = request.body else {
            panic!("audit body must be json");
        };
        assert_eq!(body["event"], AUDIT_EVENT_KIND);
        assert_eq!(body["track_id"], 11);
        assert_eq!(body["confidence"], "0.87");
        assert_eq!(body["image_sha256"], saved.capture_sha256.as_str());
        assert!(body["image_path"].is_string());
        assert_eq!(
            request.headers,
            vec![("Authorization".to_string(), "Bearer secret".to_string())]
        );
    }

    #[test]
    fn dispatcher_drains_queue_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FlakyTransport {
            failures: 0,
            calls: Mutex::new(Vec::new()),
        });
        let ctx = context(dir.path(), transport.clone());
        let dispatcher = Dispatcher::start(ctx, 2).unwrap();
        let stats = dispatcher.stats();

        for id in 0..6 {
            dispatcher.submit(task(id));
        }
        dispatcher.shutdown();

        assert_eq!(stats.submitted.load(Ordering::SeqCst), 6);
        assert_eq!(stats.completed.load(Ordering::SeqCst), 6);
        assert_eq!(stats.alerts_delivered.load(Ordering::SeqCst), 6);
        assert_eq!(stats.audits_delivered.load(Ordering::SeqCst), 6);
        assert_eq!(transport.calls.lock().unwrap().len(), 12);
    }
}
