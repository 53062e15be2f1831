//! Plinth Ops: capability-scoped remote clients the reconciler drives.
//! Each trait covers one remote API surface; implementations live in
//! `plinth-hub` (HTTP) and [`fake`] (in-memory).

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use plinth_core::{BillingInfo, FirewallPage, LiveProject, Operation, RemoteApp, RemoteError};

pub mod fake;
mod waiter;

pub use waiter::{OperationWaiter, WaitPolicy};

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Project lifecycle: create/get/update/delete. No partial patch exists; `update` sends the whole object.
#[async_trait::async_trait]
pub trait ProjectAdmin: Send + Sync {
    async fn create(&self, project: &LiveProject) -> RemoteResult<Operation>;
    async fn get(&self, project_id: &str) -> RemoteResult<LiveProject>;
    async fn update(&self, project_id: &str, project: &LiveProject) -> RemoteResult<LiveProject>;
    async fn delete(&self, project_id: &str) -> RemoteResult<Operation>;
}

/// Billing linkage. `project_ref` is the `projects/{id}` form.
#[async_trait::async_trait]
pub trait BillingAdmin: Send + Sync {
    async fn get_billing_info(&self, project_ref: &str) -> RemoteResult<BillingInfo>;
    async fn set_billing_info(&self, project_ref: &str, info: &BillingInfo) -> RemoteResult<()>;
}

#[async_trait::async_trait]
pub trait ComputeAdmin: Send + Sync {
    async fn list_firewalls(&self, project_id: &str, filter: &str, page_token: Option<&str>) -> RemoteResult<FirewallPage>;
    async fn delete_firewall(&self, project_id: &str, name: &str) -> RemoteResult<Operation>;
    async fn delete_network(&self, project_id: &str, name: &str) -> RemoteResult<Operation>;
}

#[async_trait::async_trait]
pub trait AppRuntimeAdmin: Send + Sync {
    async fn create(&self, app: &RemoteApp) -> RemoteResult<Operation>;
    async fn get(&self, app_id: &str) -> RemoteResult<RemoteApp>;
}

/// Turns on a remote API for a project. Callers must tolerate "already enabled".
#[async_trait::async_trait]
pub trait ServiceEnablement: Send + Sync {
    async fn enable(&self, service: &str, project_id: &str) -> RemoteResult<Operation>;
}

/// Status endpoint for operations of one capability domain.
#[async_trait::async_trait]
pub trait OperationPoller: Send + Sync {
    async fn poll(&self, project_id: &str, op: &Operation) -> RemoteResult<Operation>;
}

/// Source of delays. Swapped for an instantaneous recorder in tests.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, dur: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait::async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// The full set of remote collaborators for one reconciliation.
#[derive(Clone)]
pub struct Clients {
    pub projects: Arc<dyn ProjectAdmin>,
    pub project_ops: Arc<dyn OperationPoller>,
    pub billing: Arc<dyn BillingAdmin>,
    pub compute: Arc<dyn ComputeAdmin>,
    pub compute_ops: Arc<dyn OperationPoller>,
    pub apps: Arc<dyn AppRuntimeAdmin>,
    pub app_ops: Arc<dyn OperationPoller>,
    pub services: Arc<dyn ServiceEnablement>,
    pub service_ops: Arc<dyn OperationPoller>,
}

impl Clients {
    /// Wire every capability to one implementation, e.g. [`fake::FakeCloud`].
    pub fn uniform<T>(c: Arc<T>) -> Self
    where
        T: ProjectAdmin + BillingAdmin + ComputeAdmin + AppRuntimeAdmin + ServiceEnablement + OperationPoller + 'static,
    {
        Self {
            projects: c.clone(),
            project_ops: c.clone(),
            billing: c.clone(),
            compute: c.clone(),
            compute_ops: c.clone(),
            apps: c.clone(),
            app_ops: c.clone(),
            services: c.clone(),
            service_ops: c,
        }
    }
}
