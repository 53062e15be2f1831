//! Polls a remote operation handle to a terminal state.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use plinth_core::{Operation, ReconcileError, ReconcileResult};
use tracing::{debug, warn};

use crate::{Clock, OperationPoller};

/// Bounds for [`OperationWaiter`]. There is no wall-clock deadline: a wait ends on
/// success, on a reported operation error, or when one of these bounds runs out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_polls: u32,
    /// Consecutive failed polls tolerated before giving up.
    pub max_poll_failures: u32,
    /// Extra delay per consecutive failure (linear).
    pub backoff: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2_000),
            max_polls: 300,
            max_poll_failures: 5,
            backoff: Duration::from_millis(500),
        }
    }
}

impl WaitPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            interval: env_ms("PLINTH_POLL_INTERVAL_MS").unwrap_or(d.interval),
            max_polls: env_u32("PLINTH_WAIT_MAX_POLLS").unwrap_or(d.max_polls),
            max_poll_failures: env_u32("PLINTH_WAIT_MAX_POLL_FAILURES").unwrap_or(d.max_poll_failures),
            backoff: env_ms("PLINTH_WAIT_BACKOFF_MS").unwrap_or(d.backoff),
        }
    }

    fn failure_delay(&self, failures: u32) -> Duration {
        self.backoff.saturating_mul(failures)
    }
}

fn env_ms(key: &str) -> Option<Duration> {
    std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok()).map(Duration::from_millis)
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|s| s.parse::<u32>().ok())
}

#[derive(Clone)]
pub struct OperationWaiter {
    clock: Arc<dyn Clock>,
    policy: WaitPolicy,
}

impl OperationWaiter {
    pub fn new(clock: Arc<dyn Clock>, policy: WaitPolicy) -> Self {
        Self { clock, policy }
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Wait for `op` to finish. A finished operation carrying an error maps to
    /// [`ReconcileError::Operation`]; running out of polls maps to [`ReconcileError::WaitTimeout`].
    pub async fn wait(
        &self,
        poller: &dyn OperationPoller,
        project_id: &str,
        op: Operation,
        description: &str,
    ) -> ReconcileResult<()> {
        let mut current = op;
        let mut polls = 0u32;
        let mut failures = 0u32;
        loop {
            if current.done {
                return match current.error {
                    Some(status) => Err(ReconcileError::Operation {
                        description: description.to_string(),
                        code: status.code,
                        message: status.message,
                    }),
                    None => {
                        debug!(op = %current.name, polls, "{} done", description);
                        Ok(())
                    }
                };
            }
            if polls >= self.policy.max_polls {
                return Err(ReconcileError::WaitTimeout { description: description.to_string(), attempts: polls });
            }
            self.clock.sleep(self.policy.interval).await;
            polls += 1;
            counter!("operation_polls_total", 1u64);
            match poller.poll(project_id, &current).await {
                Ok(next) => {
                    failures = 0;
                    debug!(op = %current.name, done = next.done, polls, "polled operation");
                    let name = if next.name.is_empty() { current.name.clone() } else { next.name.clone() };
                    current = Operation { name, ..next };
                }
                Err(e) => {
                    failures += 1;
                    warn!(op = %current.name, error = %e, failures, "operation poll failed");
                    if failures > self.policy.max_poll_failures {
                        return Err(ReconcileError::WaitTimeout {
                            description: description.to_string(),
                            attempts: polls,
                        });
                    }
                    self.clock.sleep(self.policy.failure_delay(failures)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCloud, RecordingClock};
    use plinth_core::{OperationStatus, RemoteError};

    fn waiter(clock: Arc<RecordingClock>) -> OperationWaiter {
        let policy = WaitPolicy {
            interval: Duration::from_millis(10),
            max_polls: 4,
            max_poll_failures: 2,
            backoff: Duration::from_millis(5),
        };
        OperationWaiter::new(clock, policy)
    }

    #[tokio::test]
    async fn done_operation_returns_without_polling() {
        let cloud = FakeCloud::new();
        let clock = Arc::new(RecordingClock::default());
        let w = waiter(clock.clone());
        w.wait(&*cloud, "p", Operation::completed("operations/1"), "noop").await.unwrap();
        assert!(clock.sleeps().is_empty());
        assert_eq!(cloud.polls(), 0);
    }

    #[tokio::test]
    async fn polls_until_done() {
        let cloud = FakeCloud::new();
        cloud.set_op_latency(3);
        let op = cloud.start_operation("test.op", None);
        let clock = Arc::new(RecordingClock::default());
        waiter(clock.clone()).wait(&*cloud, "p", op, "thing").await.unwrap();
        assert_eq!(cloud.polls(), 3);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10); 3]);
    }

    #[tokio::test]
    async fn embedded_error_is_operation_error() {
        let cloud = FakeCloud::new();
        let op = cloud.start_operation("test.op", Some(OperationStatus { code: 9, message: "precondition".into() }));
        let clock = Arc::new(RecordingClock::default());
        let err = waiter(clock).wait(&*cloud, "p", op, "thing to fail").await.unwrap_err();
        match err {
            ReconcileError::Operation { description, code, message } => {
                assert_eq!(description, "thing to fail");
                assert_eq!(code, 9);
                assert_eq!(message, "precondition");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn never_finishing_operation_times_out() {
        let cloud = FakeCloud::new();
        cloud.set_op_latency(100);
        let op = cloud.start_operation("test.op", None);
        let clock = Arc::new(RecordingClock::default());
        let err = waiter(clock).wait(&*cloud, "p", op, "slow").await.unwrap_err();
        assert!(matches!(err, ReconcileError::WaitTimeout { attempts: 4, .. }), "err={:?}", err);
    }

    #[tokio::test]
    async fn poll_failures_back_off_then_time_out() {
        let cloud = FakeCloud::new();
        cloud.set_op_latency(100);
        let op = cloud.start_operation("test.op", None);
        cloud.fail_always("ops.poll", RemoteError::Transport("reset".into()));
        let clock = Arc::new(RecordingClock::default());
        let err = waiter(clock.clone()).wait(&*cloud, "p", op, "flaky").await.unwrap_err();
        assert!(matches!(err, ReconcileError::WaitTimeout { .. }));
        // interval, backoff(1), interval, backoff(2), interval
        assert_eq!(
            clock.sleeps(),
            vec![
                Duration::from_millis(10),
                Duration::from_millis(5),
                Duration::from_millis(10),
                Duration::from_millis(10),
                Duration::from_millis(10),
            ]
        );
    }

    #[tokio::test]
    async fn transient_poll_failure_recovers() {
        let cloud = FakeCloud::new();
        cloud.set_op_latency(1);
        let op = cloud.start_operation("test.op", None);
        cloud.fail_next("ops.poll", RemoteError::Transport("blip".into()));
        let clock = Arc::new(RecordingClock::default());
        waiter(clock).wait(&*cloud, "p", op, "blippy").await.unwrap();
    }
}
