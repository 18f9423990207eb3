//! Bounded polling with pluggable backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Delay schedule between poll attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay after every attempt.
    Fixed(Duration),
    /// `base + step * k` after the k-th failed attempt (1-based).
    Linear { base: Duration, step: Duration },
}

impl Backoff {
    pub const fn fixed(delay: Duration) -> Self {
        Backoff::Fixed(delay)
    }

    pub const fn linear(base: Duration, step: Duration) -> Self {
        Backoff::Linear { base, step }
    }

    /// Delay to wait after the `attempt`-th failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Linear { base, step } => base.saturating_add(step.saturating_mul(attempt)),
        }
    }
}

/// How long and how often to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Wall-clock bound measured from the first attempt.
    pub deadline: Option<Duration>,
}

impl PollPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
            deadline: None,
        }
    }

    /// Poll every `interval` until `deadline` passes.
    pub fn every(interval: Duration, deadline: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            backoff: Backoff::Fixed(interval),
            deadline: Some(deadline),
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    /// The first value the probe produced, if any.
    pub value: Option<T>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Time from the first attempt until polling stopped.
    pub elapsed: Duration,
}

impl<T> PollOutcome<T> {
    pub fn found(&self) -> bool {
        self.value.is_some()
    }
}

/// Call `probe` until it yields `Some`, the attempts run out or the deadline
/// passes.
///
/// `probe` receives the 1-based attempt number. There is no sleep after the
/// final attempt, and no sleep ever extends past the deadline.
pub async fn poll_until<T, F, Fut>(policy: &PollPolicy, mut probe: F) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        if attempts > 0 && policy.deadline.is_some_and(|d| start.elapsed() >= d) {
            break;
        }

        attempts += 1;
        if let Some(value) = probe(attempts).await {
            return PollOutcome {
                value: Some(value),
                attempts,
                elapsed: start.elapsed(),
            };
        }

        if attempts == policy.max_attempts {
            break;
        }

        let mut delay = policy.backoff.delay(attempts);
        if let Some(deadline) = policy.deadline {
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            delay = delay.min(remaining);
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    PollOutcome {
        value: None,
        attempts,
        elapsed: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff() {
        let backoff = Backoff::linear(Duration::from_millis(25), Duration::from_millis(15));
        assert_eq!(backoff.delay(1), Duration::from_millis(40));
        assert_eq!(backoff.delay(2), Duration::from_millis(55));
        assert_eq!(backoff.delay(11), Duration::from_millis(190));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_first_value() {
        let policy = PollPolicy::new(12, Backoff::fixed(Duration::from_millis(10)));
        let outcome = poll_until(&policy, |attempt| async move {
            (attempt == 3).then_some(attempt * 10)
        })
        .await;

        assert_eq!(outcome.value, Some(30));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.elapsed, Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_without_trailing_sleep() {
        let policy = PollPolicy::new(4, Backoff::linear(Duration::ZERO, Duration::from_millis(10)));
        let outcome: PollOutcome<()> = poll_until(&policy, |_| async { None }).await;

        assert!(!outcome.found());
        assert_eq!(outcome.attempts, 4);
        // 10 + 20 + 30, nothing after the fourth attempt
        assert_eq!(outcome.elapsed, Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_polling() {
        let policy = PollPolicy::every(Duration::from_secs(1), Duration::from_secs(25));
        let outcome: PollOutcome<()> = poll_until(&policy, |_| async { None }).await;

        assert!(!outcome.found());
        // one attempt per second from t=0 to t=24
        assert_eq!(outcome.attempts, 25);
        assert_eq!(outcome.elapsed, Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_clamped_to_deadline() {
        let policy = PollPolicy::new(10, Backoff::fixed(Duration::from_secs(4)))
            .with_deadline(Duration::from_secs(6));
        let outcome: PollOutcome<()> = poll_until(&policy, |_| async { None }).await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.elapsed, Duration::from_secs(6));
    }
}
