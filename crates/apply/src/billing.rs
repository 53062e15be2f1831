//! Billing link/unlink with bounded read-back until the remote converges.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use plinth_core::{parse_billing_account_name, prefixed_project, BillingInfo, ReconcileError, ReconcileResult};
use plinth_ops::{BillingAdmin, Clock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPolicy {
    /// Read-backs after a successful write (the write itself is never retried).
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self { attempts: 3, delay: Duration::from_millis(3_000) }
    }
}

impl BillingPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            attempts: std::env::var("PLINTH_BILLING_RETRIES")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(d.attempts),
            delay: std::env::var("PLINTH_BILLING_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(d.delay),
        }
    }
}

#[derive(Clone)]
pub struct BillingRetrier {
    billing: Arc<dyn BillingAdmin>,
    clock: Arc<dyn Clock>,
    policy: BillingPolicy,
}

impl BillingRetrier {
    /// At least one read-back always happens, whatever `policy.attempts` says.
    pub fn new(billing: Arc<dyn BillingAdmin>, clock: Arc<dyn Clock>, policy: BillingPolicy) -> Self {
        let policy = BillingPolicy { attempts: policy.attempts.max(1), ..policy };
        Self { billing, clock, policy }
    }

    /// Link `project_id` to `desired` (empty = unlink) and wait for the read-back to agree.
    ///
    /// `tracked` is the caller's cached billing field: it holds `desired` on success
    /// and is reset to empty on every failure path.
    pub async fn set_billing(&self, project_id: &str, desired: &str, tracked: &mut String) -> ReconcileResult<()> {
        let project_ref = prefixed_project(project_id);
        let info = BillingInfo::for_account(desired);
        if let Err(source) = self.billing.set_billing_info(&project_ref, &info).await {
            tracked.clear();
            counter!("billing_write_err", 1u64);
            return Err(ReconcileError::Billing {
                project: project_id.to_string(),
                account: desired.to_string(),
                source,
            });
        }
        info!(project = %project_id, account = %desired, "billing: write accepted");

        let mut got = String::new();
        for attempt in 1..=self.policy.attempts {
            counter!("billing_readback_total", 1u64);
            let read = self
                .billing
                .get_billing_info(&project_ref)
                .await
                .map_err(|e| ReconcileError::remote(format!("reading billing info for {}", project_ref), e))
                .and_then(|bi| parse_billing_account_name(project_id, bi.billing_account_name.as_deref()));
            got = match read {
                Ok(v) => v,
                Err(e) => {
                    tracked.clear();
                    return Err(e);
                }
            };
            if got == desired {
                debug!(project = %project_id, attempt, "billing: converged");
                *tracked = got;
                return Ok(());
            }
            debug!(project = %project_id, attempt, want = %desired, got = %got, "billing: not yet visible");
            if attempt < self.policy.attempts {
                self.clock.sleep(self.policy.delay).await;
            }
        }
        warn!(project = %project_id, want = %desired, got = %got, "billing: read-back never converged");
        tracked.clear();
        Err(ReconcileError::BillingTimeout { project: project_id.to_string(), wanted: desired.to_string(), got })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_ops::fake::{FakeCloud, RecordingClock};
    use plinth_core::RemoteError;

    fn retrier(cloud: &Arc<FakeCloud>, clock: &Arc<RecordingClock>) -> BillingRetrier {
        let policy = BillingPolicy { attempts: 3, delay: Duration::from_millis(7) };
        BillingRetrier::new(cloud.clone(), clock.clone(), policy)
    }

    #[tokio::test]
    async fn immediate_match_reads_once() {
        let cloud = FakeCloud::new();
        let clock = Arc::new(RecordingClock::default());
        let mut tracked = String::new();
        retrier(&cloud, &clock).set_billing("demo-project", "AB-12", &mut tracked).await.unwrap();
        assert_eq!(tracked, "AB-12");
        assert_eq!(cloud.billing_reads(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn write_failure_clears_tracked_without_reading() {
        let cloud = FakeCloud::new();
        cloud.fail_next("billing.set", RemoteError::Api { code: 403, message: "denied".into() });
        let clock = Arc::new(RecordingClock::default());
        let mut tracked = "OLD-1".to_string();
        let err = retrier(&cloud, &clock).set_billing("demo-project", "AB-12", &mut tracked).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Billing { .. }), "err={:?}", err);
        assert!(tracked.is_empty());
        assert_eq!(cloud.billing_reads(), 0);
    }

    #[tokio::test]
    async fn unexpected_prefix_is_data_integrity() {
        let cloud = FakeCloud::new();
        cloud.set_billing_lag(5);
        cloud.seed_billing("demo-project", Some("accounts/AB-12"));
        let clock = Arc::new(RecordingClock::default());
        let mut tracked = String::new();
        let err = retrier(&cloud, &clock).set_billing("demo-project", "AB-12", &mut tracked).await.unwrap_err();
        assert!(matches!(err, ReconcileError::DataIntegrity(_)));
        assert!(tracked.is_empty());
    }

    #[tokio::test]
    async fn zero_attempts_still_reads_back_once() {
        let cloud = FakeCloud::new();
        let clock = Arc::new(RecordingClock::default());
        let r = BillingRetrier::new(cloud.clone(), clock.clone(), BillingPolicy { attempts: 0, delay: Duration::from_millis(7) });
        let mut tracked = "OLD-1".to_string();
        r.set_billing("demo-project", "AB-12", &mut tracked).await.unwrap();
        assert_eq!(tracked, "AB-12");
        assert_eq!(cloud.billing_reads(), 1);
    }
}
