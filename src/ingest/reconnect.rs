//! Reconnection controller.
//!
//! `Open -> Reading -> (Closed -> Reopening) -> Open ...`
//!
//! A failed read closes the source, waits a fixed delay and reopens the same
//! source. There is no attempt limit and no backoff: an unreachable camera is
//! retried until shutdown is requested. Only the initial `connect` is fatal.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::transport::SleepFn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    Closed,
    Open,
    Reading,
    Reopening,
}

pub struct Reconnector<S: FrameSource> {
    source: S,
    delay: Duration,
    sleep: SleepFn,
    state: SourceState,
    reconnects: u64,
}

impl<S: FrameSource> Reconnector<S> {
    pub fn new(source: S, delay: Duration, sleep: SleepFn) -> Self {
        Self {
            source,
            delay,
            sleep,
            state: SourceState::Closed,
            reconnects: 0,
        }
    }

    /// Initial open. Failure here is an initialization error.
    pub fn connect(&mut self) -> Result<()> {
        self.source
            .open()
            .with_context(|| format!("failed to open video source {}", self.source.describe()))?;
        self.state = SourceState::Open;
        log::info!("video source opened: {}", self.source.describe());
        Ok(())
    }

    /// Next frame, reconnecting as often as needed. `None` only once `shutdown` is set.
    pub fn next_frame(&mut self, shutdown: &AtomicBool) -> Option<Frame> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return None;
            }

            if self.state == SourceState::Closed {
                self.state = SourceState::Reopening;
                match self.source.open() {
                    Ok(()) => {
                        self.reconnects += 1;
                        self.state = SourceState::Open;
                        log::info!(
                            "video source reopened: {} (reconnect #{})",
                            self.source.describe(),
                            self.reconnects
                        );
                    }
                    Err(e) => {
                        log::warn!(
                            "reopening {} failed: {:#}; retrying in {}s",
                            self.source.describe(),
                            e,
                            self.delay.as_secs_f64()
                        );
                        self.source.close();
                        self.state = SourceState::Closed;
                        (self.sleep)(self.delay);
                        continue;
                    }
                }
            }

            self.state = SourceState::Reading;
            match self.source.read() {
                Ok(frame) => {
                    self.state = SourceState::Open;
                    return Some(frame);
                }
                Err(e) => {
                    log::warn!(
                        "empty frame from {}: {:#}; reconnecting in {}s",
                        self.source.describe(),
                        e,
                        self.delay.as_secs_f64()
                    );
                    self.source.close();
                    self.state = SourceState::Closed;
                    (self.sleep)(self.delay);
                }
            }
        }
    }

    /// Release the source.
    pub fn close(&mut self) {
        self.source.close();
        self.state = SourceState::Closed;
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
