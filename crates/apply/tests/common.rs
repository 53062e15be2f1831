#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use plinth_apply::{BillingPolicy, Reconciler, Tuning};
use plinth_core::{DeclaredProject, LiveProject, Parent, ParentRef, LIFECYCLE_ACTIVE};
use plinth_ops::fake::{FakeCloud, RecordingClock};
use plinth_ops::{Clients, WaitPolicy};

pub const PID: &str = "demo-project";

pub fn tuning() -> Tuning {
    Tuning {
        wait: WaitPolicy {
            interval: Duration::from_millis(1),
            max_polls: 10,
            max_poll_failures: 2,
            backoff: Duration::from_millis(1),
        },
        billing: BillingPolicy { attempts: 3, delay: Duration::from_millis(5) },
    }
}

pub fn setup() -> (Arc<FakeCloud>, Arc<RecordingClock>, Reconciler) {
    let cloud = FakeCloud::new();
    let clock = Arc::new(RecordingClock::default());
    let r = plinth_apply::reconciler(Clients::uniform(cloud.clone()), clock.clone(), tuning());
    (cloud, clock, r)
}

pub fn declared() -> DeclaredProject {
    DeclaredProject {
        project_id: PID.into(),
        display_name: "Demo".into(),
        parent: Parent::Organization("1234".into()),
        labels: [("team".to_string(), "infra".to_string())].into_iter().collect(),
        billing_account_id: String::new(),
        skip_delete: false,
        auto_create_network: true,
        app_runtime: Vec::new(),
    }
}

pub fn live(project_id: &str) -> LiveProject {
    LiveProject {
        project_id: project_id.into(),
        project_number: "4242".into(),
        name: "Existing".into(),
        labels: [("env".to_string(), "prod".to_string())].into_iter().collect(),
        parent: Some(ParentRef { kind: "folder".into(), id: "42".into() }),
        lifecycle_state: LIFECYCLE_ACTIVE.into(),
    }
}

/// Calls from the fake's log whose text starts with one of `prefixes`.
pub fn calls_matching(cloud: &FakeCloud, prefixes: &[&str]) -> Vec<String> {
    cloud.calls().into_iter().filter(|c| prefixes.iter().any(|p| c.starts_with(p))).collect()
}
