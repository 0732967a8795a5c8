use std::sync::Arc;
use std::time::Duration;

/// Injected sleep, so backoff can be observed without waiting in tests.
pub type SleepFn = Arc<dyn Fn(Duration) + Send + Sync>;

/// Real wall-clock sleep.
pub fn thread_sleep() -> SleepFn {
    Arc::new(std::thread::sleep)
}

/// Bounded retry with exponential backoff.
///
/// After failed attempt `n` (1-based) the delay is `base_delay * 2^(n-1)`.
/// There is no delay after the final attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

/// Outcome of a single HTTP attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// 2xx response.
    Delivered { status: u16 },
    /// Any other response status.
    Rejected { status: u16 },
    /// Connection, TLS, timeout or I/O failure.
    TransportError(String),
}

impl AttemptOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, AttemptOutcome::Delivered { .. })
    }
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Delivered { status } => write!(f, "delivered (status {})", status),
            AttemptOutcome::Rejected { status } => write!(f, "rejected (status {})", status),
            AttemptOutcome::TransportError(err) => write!(f, "transport error: {}", err),
        }
    }
}

/// Summary of one channel delivery across all attempts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    pub channel: String,
    pub attempts: u32,
    pub last_outcome: AttemptOutcome,
}

impl DeliveryReport {
    pub fn delivered(&self) -> bool {
        self.last_outcome.is_delivered()
    }
}

/// Run `attempt` until it delivers or the policy is exhausted.
///
/// `attempt` receives the 1-based attempt number.
pub fn deliver_with_retry<F>(
    channel: &str,
    policy: &RetryPolicy,
    sleep: &SleepFn,
    mut attempt: F,
) -> DeliveryReport
where
    F: FnMut(u32) -> AttemptOutcome,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut n = 0;
    loop {
        n += 1;
        let outcome = attempt(n);
        if outcome.is_delivered() {
            log::info!("{} notification {} on attempt {}", channel, outcome, n);
            return DeliveryReport {
                channel: channel.to_string(),
                attempts: n,
                last_outcome: outcome,
            };
        }

        log::warn!(
            "{} notification failed (attempt {}/{}): {}",
            channel,
            n,
            max_attempts,
            outcome
        );
        if n >= max_attempts {
            log::error!(
                "{} notification dropped after {} attempts",
                channel,
                max_attempts
            );
            return DeliveryReport {
                channel: channel.to_string(),
                attempts: n,
                last_outcome: outcome,
            };
        }
        sleep(policy.delay_after(n));
    }
}
