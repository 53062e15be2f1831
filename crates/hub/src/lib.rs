//! Plinth hub: HTTP/JSON implementations of the `plinth_ops` capability traits
//! against the public REST endpoints. One struct per API surface, each sharing
//! one authenticated `reqwest` client.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use plinth_core::{BillingInfo, FirewallPage, LiveProject, Operation, RemoteApp};
use plinth_ops::{
    AppRuntimeAdmin, BillingAdmin, Clients, ComputeAdmin, OperationPoller, ProjectAdmin, RemoteResult,
    ServiceEnablement,
};
use tracing::info;

mod compute;
mod http;

use compute::ComputeOperation;
use http::Http;

/// Base URLs of the remote APIs, without a trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub resource_manager: String,
    pub billing: String,
    pub compute: String,
    pub app_engine: String,
    pub service_usage: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            resource_manager: "https://cloudresourcemanager.googleapis.com/v1".into(),
            billing: "https://cloudbilling.googleapis.com/v1".into(),
            compute: "https://compute.googleapis.com/compute/v1".into(),
            app_engine: "https://appengine.googleapis.com/v1".into(),
            service_usage: "https://serviceusage.googleapis.com/v1".into(),
        }
    }
}

fn request_timeout() -> Duration {
    std::env::var("PLINTH_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(60))
}

pub struct GcpHub {
    http: Arc<Http>,
    endpoints: Endpoints,
}

impl GcpHub {
    pub fn new(access_token: impl Into<String>, endpoints: Endpoints) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout())
            .user_agent(concat!("plinth/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building http client")?;
        Ok(Self { http: Arc::new(Http::new(client, access_token.into())), endpoints })
    }

    /// Token from `PLINTH_ACCESS_TOKEN`; default endpoints.
    pub fn from_env() -> Result<Self> {
        let token = std::env::var("PLINTH_ACCESS_TOKEN").context("PLINTH_ACCESS_TOKEN is not set")?;
        anyhow::ensure!(!token.trim().is_empty(), "PLINTH_ACCESS_TOKEN is empty");
        Self::new(token.trim(), Endpoints::default())
    }

    pub fn clients(&self) -> Clients {
        let projects = Arc::new(ResourceManager { http: self.http.clone(), base: self.endpoints.resource_manager.clone() });
        let compute = Arc::new(Compute { http: self.http.clone(), base: self.endpoints.compute.clone() });
        let apps = Arc::new(AppEngine { http: self.http.clone(), base: self.endpoints.app_engine.clone() });
        let services = Arc::new(ServiceUsage { http: self.http.clone(), base: self.endpoints.service_usage.clone() });
        info!(resource_manager = %self.endpoints.resource_manager, "hub: clients ready");
        Clients {
            projects: projects.clone(),
            project_ops: projects,
            billing: Arc::new(CloudBilling { http: self.http.clone(), base: self.endpoints.billing.clone() }),
            compute: compute.clone(),
            compute_ops: compute,
            apps: apps.clone(),
            app_ops: apps,
            services: services.clone(),
            service_ops: services,
        }
    }
}

pub struct ResourceManager {
    http: Arc<Http>,
    base: String,
}

#[async_trait::async_trait]
impl ProjectAdmin for ResourceManager {
    async fn create(&self, project: &LiveProject) -> RemoteResult<Operation> {
        self.http.post(&format!("{}/projects", self.base), project).await
    }

    async fn get(&self, project_id: &str) -> RemoteResult<LiveProject> {
        self.http.get(&format!("{}/projects/{}", self.base, project_id)).await
    }

    async fn update(&self, project_id: &str, project: &LiveProject) -> RemoteResult<LiveProject> {
        self.http.put(&format!("{}/projects/{}", self.base, project_id), project).await
    }

    async fn delete(&self, project_id: &str) -> RemoteResult<Operation> {
        // v1 delete is synchronous and answers with an empty message.
        let _: serde_json::Value = self.http.delete(&format!("{}/projects/{}", self.base, project_id)).await?;
        Ok(Operation::completed(format!("projects/{}:delete", project_id)))
    }
}

#[async_trait::async_trait]
impl OperationPoller for ResourceManager {
    async fn poll(&self, _project_id: &str, op: &Operation) -> RemoteResult<Operation> {
        self.http.get(&format!("{}/{}", self.base, op.name)).await
    }
}

pub struct CloudBilling {
    http: Arc<Http>,
    base: String,
}

#[async_trait::async_trait]
impl BillingAdmin for CloudBilling {
    async fn get_billing_info(&self, project_ref: &str) -> RemoteResult<BillingInfo> {
        self.http.get(&format!("{}/{}/billingInfo", self.base, project_ref)).await
    }

    async fn set_billing_info(&self, project_ref: &str, info: &BillingInfo) -> RemoteResult<()> {
        let _: serde_json::Value = self.http.put(&format!("{}/{}/billingInfo", self.base, project_ref), info).await?;
        Ok(())
    }
}

pub struct Compute {
    http: Arc<Http>,
    base: String,
}

impl Compute {
    fn global(&self, project_id: &str, rest: &str) -> String {
        format!("{}/projects/{}/global/{}", self.base, project_id, rest)
    }
}

#[async_trait::async_trait]
impl ComputeAdmin for Compute {
    async fn list_firewalls(&self, project_id: &str, filter: &str, page_token: Option<&str>) -> RemoteResult<FirewallPage> {
        let mut query = vec![("filter", filter)];
        if let Some(t) = page_token {
            query.push(("pageToken", t));
        }
        self.http.get_query(&self.global(project_id, "firewalls"), &query).await
    }

    async fn delete_firewall(&self, project_id: &str, name: &str) -> RemoteResult<Operation> {
        let op: ComputeOperation = self.http.delete(&self.global(project_id, &format!("firewalls/{}", name))).await?;
        Ok(op.into_operation())
    }

    async fn delete_network(&self, project_id: &str, name: &str) -> RemoteResult<Operation> {
        let op: ComputeOperation = self.http.delete(&self.global(project_id, &format!("networks/{}", name))).await?;
        Ok(op.into_operation())
    }
}

#[async_trait::async_trait]
impl OperationPoller for Compute {
    async fn poll(&self, project_id: &str, op: &Operation) -> RemoteResult<Operation> {
        let op: ComputeOperation = self.http.get(&self.global(project_id, &format!("operations/{}", op.name))).await?;
        Ok(op.into_operation())
    }
}

pub struct AppEngine {
    http: Arc<Http>,
    base: String,
}

#[async_trait::async_trait]
impl AppRuntimeAdmin for AppEngine {
    async fn create(&self, app: &RemoteApp) -> RemoteResult<Operation> {
        self.http.post(&format!("{}/apps", self.base), app).await
    }

    async fn get(&self, app_id: &str) -> RemoteResult<RemoteApp> {
        self.http.get(&format!("{}/apps/{}", self.base, app_id)).await
    }
}

#[async_trait::async_trait]
impl OperationPoller for AppEngine {
    async fn poll(&self, _project_id: &str, op: &Operation) -> RemoteResult<Operation> {
        self.http.get(&format!("{}/{}", self.base, op.name)).await
    }
}

pub struct ServiceUsage {
    http: Arc<Http>,
    base: String,
}

#[async_trait::async_trait]
impl ServiceEnablement for ServiceUsage {
    async fn enable(&self, service: &str, project_id: &str) -> RemoteResult<Operation> {
        let url = format!("{}/projects/{}/services/{}:enable", self.base, project_id, service);
        self.http.post(&url, &serde_json::json!({})).await
    }
}

#[async_trait::async_trait]
impl OperationPoller for ServiceUsage {
    async fn poll(&self, _project_id: &str, op: &Operation) -> RemoteResult<Operation> {
        self.http.get(&format!("{}/{}", self.base, op.name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_urls_are_project_global() {
        let hub = GcpHub::new("t", Endpoints::default()).unwrap();
        let c = Compute { http: hub.http.clone(), base: hub.endpoints.compute.clone() };
        assert_eq!(
            c.global("demo-project", "networks/default"),
            "https://compute.googleapis.com/compute/v1/projects/demo-project/global/networks/default"
        );
    }

    #[test]
    fn default_endpoints_have_no_trailing_slash() {
        let e = Endpoints::default();
        for base in [&e.resource_manager, &e.billing, &e.compute, &e.app_engine, &e.service_usage] {
            assert!(!base.ends_with('/'), "{}", base);
        }
    }

    #[test]
    fn operation_bodies_decode_into_handles() {
        let op: Operation = serde_json::from_str(
            r#"{"name":"operations/pc.123","done":true,"error":{"code":7,"message":"denied"}}"#,
        )
        .unwrap();
        assert!(op.done);
        assert_eq!(op.error.map(|e| e.code), Some(7));
        let pending: Operation = serde_json::from_str(r#"{"name":"apps/demo/operations/abc"}"#).unwrap();
        assert!(!pending.done);
    }
}
