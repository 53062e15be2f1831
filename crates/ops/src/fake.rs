//! In-memory implementation of every capability trait, for tests.
//!
//! Mutations take effect immediately and hand back a pending [`Operation`] that
//! completes after a configurable number of polls. Every call is appended to an
//! ordered log so tests can assert on sequencing.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use plinth_core::{
    network_link, BillingInfo, Firewall, FirewallPage, LiveProject, Operation, OperationStatus, RemoteApp,
    RemoteError, APP_RUNTIME_SERVICE, COMPUTE_SERVICE, DEFAULT_NETWORK, LIFECYCLE_ACTIVE,
};

use crate::{
    AppRuntimeAdmin, BillingAdmin, Clock, ComputeAdmin, OperationPoller, ProjectAdmin, RemoteResult,
    ServiceEnablement,
};

struct PendingOp {
    label: String,
    polls_left: u32,
    error: Option<OperationStatus>,
}

struct PendingBilling {
    value: Option<String>,
    stale_reads_left: u32,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<String>,
    next_op: u64,
    next_number: u64,
    op_latency: u32,
    page_size: usize,
    ops: HashMap<String, PendingOp>,
    fail_next: HashMap<String, Vec<RemoteError>>,
    fail_always: HashMap<String, RemoteError>,
    op_failures: HashMap<String, OperationStatus>,
    projects: BTreeMap<String, LiveProject>,
    billing: BTreeMap<String, Option<String>>,
    billing_lag: u32,
    billing_pending: BTreeMap<String, PendingBilling>,
    billing_writes: Vec<BillingInfo>,
    billing_reads: usize,
    networks: BTreeSet<(String, String)>,
    firewalls: BTreeMap<String, Vec<Firewall>>,
    apps: BTreeMap<String, RemoteApp>,
    services: BTreeSet<(String, String)>,
    polls: usize,
}

pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        let state = FakeState { op_latency: 1, page_size: 2, next_number: 100_000, ..Default::default() };
        Arc::new(Self { state: Mutex::new(state) })
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ---- knobs ----

    /// Number of polls before an operation reports done (0 = already done).
    pub fn set_op_latency(&self, polls: u32) { self.state().op_latency = polls; }

    pub fn set_page_size(&self, n: usize) { self.state().page_size = n.max(1); }

    /// Billing reads that keep returning the previous value after each write.
    pub fn set_billing_lag(&self, stale_reads: u32) { self.state().billing_lag = stale_reads; }

    pub fn fail_next(&self, call: &str, err: RemoteError) {
        self.state().fail_next.entry(call.to_string()).or_default().push(err);
    }

    pub fn fail_always(&self, call: &str, err: RemoteError) {
        self.state().fail_always.insert(call.to_string(), err);
    }

    /// The next operation started by `call` completes with `status` and has no effect.
    pub fn fail_operation(&self, call: &str, status: OperationStatus) {
        self.state().op_failures.insert(call.to_string(), status);
    }

    // ---- seeding ----

    pub fn seed_project(&self, p: LiveProject) {
        let mut st = self.state();
        st.networks.insert((p.project_id.clone(), DEFAULT_NETWORK.to_string()));
        st.projects.insert(p.project_id.clone(), p);
    }

    pub fn set_lifecycle(&self, project_id: &str, lifecycle: &str) {
        if let Some(p) = self.state().projects.get_mut(project_id) {
            p.lifecycle_state = lifecycle.to_string();
        }
    }

    pub fn seed_billing(&self, project_id: &str, name: Option<&str>) {
        self.state().billing.insert(plinth_core::prefixed_project(project_id), name.map(|s| s.to_string()));
    }

    pub fn seed_firewalls(&self, project_id: &str, network: &str, names: &[&str]) {
        let link = network_link(project_id, network);
        let mut st = self.state();
        st.networks.insert((project_id.to_string(), network.to_string()));
        let list = st.firewalls.entry(project_id.to_string()).or_default();
        for n in names {
            list.push(Firewall { name: n.to_string(), network: link.clone() });
        }
    }

    pub fn seed_app(&self, app: RemoteApp) {
        self.state().apps.insert(app.id.clone(), app);
    }

    pub fn enable_service_now(&self, project_id: &str, service: &str) {
        self.state().services.insert((project_id.to_string(), service.to_string()));
    }

    // ---- inspection ----

    pub fn calls(&self) -> Vec<String> { self.state().calls.clone() }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn polls(&self) -> usize { self.state().polls }

    pub fn project(&self, project_id: &str) -> Option<LiveProject> { self.state().projects.get(project_id).cloned() }

    pub fn app(&self, app_id: &str) -> Option<RemoteApp> { self.state().apps.get(app_id).cloned() }

    pub fn billing_of(&self, project_id: &str) -> Option<String> {
        self.state().billing.get(&plinth_core::prefixed_project(project_id)).cloned().flatten()
    }

    pub fn billing_writes(&self) -> Vec<BillingInfo> { self.state().billing_writes.clone() }

    pub fn billing_reads(&self) -> usize { self.state().billing_reads }

    pub fn networks(&self, project_id: &str) -> Vec<String> {
        self.state().networks.iter().filter(|(p, _)| p == project_id).map(|(_, n)| n.clone()).collect()
    }

    pub fn firewalls(&self, project_id: &str) -> Vec<Firewall> {
        self.state().firewalls.get(project_id).cloned().unwrap_or_default()
    }

    pub fn enabled_services(&self, project_id: &str) -> Vec<String> {
        self.state().services.iter().filter(|(p, _)| p == project_id).map(|(_, s)| s.clone()).collect()
    }

    /// Start a pending operation directly; used by waiter tests.
    pub fn start_operation(&self, label: &str, error: Option<OperationStatus>) -> Operation {
        let mut st = self.state();
        Self::new_op(&mut st, label.to_string(), error)
    }

    // ---- internals ----

    fn new_op(st: &mut FakeState, label: String, error: Option<OperationStatus>) -> Operation {
        st.next_op += 1;
        let name = format!("operations/{}", st.next_op);
        if st.op_latency == 0 {
            st.calls.push(format!("done {}", label));
            return Operation { name, done: true, error };
        }
        st.ops.insert(name.clone(), PendingOp { label, polls_left: st.op_latency, error });
        Operation::pending(name)
    }

    /// Record the call and return the scripted failure, if any.
    fn enter(st: &mut FakeState, call: &str, target: &str) -> RemoteResult<()> {
        st.calls.push(format!("{} {}", call, target));
        if let Some(queue) = st.fail_next.get_mut(call) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        if let Some(e) = st.fail_always.get(call) {
            return Err(e.clone());
        }
        Ok(())
    }

    fn require_service(st: &FakeState, project_id: &str, service: &str) -> RemoteResult<()> {
        if st.services.contains(&(project_id.to_string(), service.to_string())) {
            Ok(())
        } else {
            Err(RemoteError::Api { code: 403, message: format!("{} has not been enabled for project {}", service, project_id) })
        }
    }

    fn parse_network_filter(filter: &str) -> Option<&str> {
        filter.strip_prefix("network eq ").map(str::trim)
    }
}

#[async_trait::async_trait]
impl ProjectAdmin for FakeCloud {
    async fn create(&self, project: &LiveProject) -> RemoteResult<Operation> {
        let mut st = self.state();
        Self::enter(&mut st, "projects.create", &project.project_id)?;
        if st.projects.contains_key(&project.project_id) {
            return Err(RemoteError::AlreadyExists(format!("project {}", project.project_id)));
        }
        let label = format!("projects.create {}", project.project_id);
        if let Some(status) = st.op_failures.remove("projects.create") {
            return Ok(Self::new_op(&mut st, label, Some(status)));
        }
        st.next_number += 1;
        let stored = LiveProject {
            project_number: st.next_number.to_string(),
            lifecycle_state: LIFECYCLE_ACTIVE.to_string(),
            ..project.clone()
        };
        st.networks.insert((project.project_id.clone(), DEFAULT_NETWORK.to_string()));
        st.projects.insert(project.project_id.clone(), stored);
        Ok(Self::new_op(&mut st, label, None))
    }

    async fn get(&self, project_id: &str) -> RemoteResult<LiveProject> {
        let mut st = self.state();
        Self::enter(&mut st, "projects.get", project_id)?;
        st.projects.get(project_id).cloned().ok_or_else(|| RemoteError::NotFound(format!("project {}", project_id)))
    }

    async fn update(&self, project_id: &str, project: &LiveProject) -> RemoteResult<LiveProject> {
        let mut st = self.state();
        Self::enter(&mut st, "projects.update", project_id)?;
        let stored = st
            .projects
            .get_mut(project_id)
            .ok_or_else(|| RemoteError::NotFound(format!("project {}", project_id)))?;
        stored.name = project.name.clone();
        stored.labels = project.labels.clone();
        stored.parent = project.parent.clone();
        Ok(stored.clone())
    }

    async fn delete(&self, project_id: &str) -> RemoteResult<Operation> {
        let mut st = self.state();
        Self::enter(&mut st, "projects.delete", project_id)?;
        let stored = st
            .projects
            .get_mut(project_id)
            .ok_or_else(|| RemoteError::NotFound(format!("project {}", project_id)))?;
        stored.lifecycle_state = "DELETE_REQUESTED".to_string();
        Ok(Self::new_op(&mut st, format!("projects.delete {}", project_id), None))
    }
}

#[async_trait::async_trait]
impl BillingAdmin for FakeCloud {
    async fn get_billing_info(&self, project_ref: &str) -> RemoteResult<BillingInfo> {
        let mut st = self.state();
        Self::enter(&mut st, "billing.get", project_ref)?;
        st.billing_reads += 1;
        match st.billing_pending.get(project_ref).map(|p| p.stale_reads_left) {
            Some(n) if n > 0 => {
                if let Some(p) = st.billing_pending.get_mut(project_ref) {
                    p.stale_reads_left = n - 1;
                }
            }
            Some(_) => {
                if let Some(p) = st.billing_pending.remove(project_ref) {
                    st.billing.insert(project_ref.to_string(), p.value);
                }
            }
            None => {}
        }
        let name = st.billing.get(project_ref).cloned().flatten();
        Ok(BillingInfo { billing_account_name: name })
    }

    async fn set_billing_info(&self, project_ref: &str, info: &BillingInfo) -> RemoteResult<()> {
        let mut st = self.state();
        Self::enter(&mut st, "billing.set", project_ref)?;
        st.billing_writes.push(info.clone());
        let value = info.billing_account_name.clone();
        if st.billing_lag == 0 {
            st.billing.insert(project_ref.to_string(), value);
        } else {
            let lag = st.billing_lag;
            st.billing_pending.insert(project_ref.to_string(), PendingBilling { value, stale_reads_left: lag });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ComputeAdmin for FakeCloud {
    async fn list_firewalls(&self, project_id: &str, filter: &str, page_token: Option<&str>) -> RemoteResult<FirewallPage> {
        let mut st = self.state();
        Self::enter(&mut st, "compute.firewalls.list", project_id)?;
        Self::require_service(&st, project_id, COMPUTE_SERVICE)?;
        let network = Self::parse_network_filter(filter);
        let mut matching: Vec<Firewall> = st
            .firewalls
            .get(project_id)
            .map(|fws| fws.iter().filter(|f| network.map(|n| f.network == n).unwrap_or(true)).cloned().collect())
            .unwrap_or_default();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        // Offset token, like the real API: it goes stale when earlier rules are deleted.
        let offset = page_token.and_then(|t| t.parse::<usize>().ok()).unwrap_or(0);
        let end = offset.saturating_add(st.page_size);
        let items: Vec<Firewall> = matching.iter().skip(offset).take(st.page_size).cloned().collect();
        let next_page_token = if matching.len() > end { Some(end.to_string()) } else { None };
        Ok(FirewallPage { items, next_page_token })
    }

    async fn delete_firewall(&self, project_id: &str, name: &str) -> RemoteResult<Operation> {
        let mut st = self.state();
        Self::enter(&mut st, "compute.firewalls.delete", name)?;
        Self::require_service(&st, project_id, COMPUTE_SERVICE)?;
        let list = st.firewalls.entry(project_id.to_string()).or_default();
        let before = list.len();
        list.retain(|f| f.name != name);
        if list.len() == before {
            return Err(RemoteError::NotFound(format!("firewall {}", name)));
        }
        Ok(Self::new_op(&mut st, format!("compute.firewalls.delete {}", name), None))
    }

    async fn delete_network(&self, project_id: &str, name: &str) -> RemoteResult<Operation> {
        let mut st = self.state();
        Self::enter(&mut st, "compute.networks.delete", name)?;
        Self::require_service(&st, project_id, COMPUTE_SERVICE)?;
        let link = network_link(project_id, name);
        let in_use = st.firewalls.get(project_id).map(|fws| fws.iter().any(|f| f.network == link)).unwrap_or(false);
        if in_use {
            return Err(RemoteError::Api { code: 400, message: format!("network {} is in use by firewall rules", name) });
        }
        if !st.networks.remove(&(project_id.to_string(), name.to_string())) {
            return Err(RemoteError::NotFound(format!("network {}", name)));
        }
        Ok(Self::new_op(&mut st, format!("compute.networks.delete {}", name), None))
    }
}

#[async_trait::async_trait]
impl AppRuntimeAdmin for FakeCloud {
    async fn create(&self, app: &RemoteApp) -> RemoteResult<Operation> {
        let mut st = self.state();
        Self::enter(&mut st, "apps.create", &app.id)?;
        Self::require_service(&st, &app.id, APP_RUNTIME_SERVICE)?;
        if st.apps.contains_key(&app.id) {
            return Err(RemoteError::AlreadyExists(format!("app {}", app.id)));
        }
        let label = format!("apps.create {}", app.id);
        if let Some(status) = st.op_failures.remove("apps.create") {
            return Ok(Self::new_op(&mut st, label, Some(status)));
        }
        let stored = RemoteApp {
            name: format!("apps/{}", app.id),
            code_bucket: format!("staging.{}.appspot.com", app.id),
            default_bucket: format!("{}.appspot.com", app.id),
            default_hostname: format!("{}.appspot.com", app.id),
            gcr_domain: "us.gcr.io".to_string(),
            serving_status: if app.serving_status.is_empty() { "SERVING".to_string() } else { app.serving_status.clone() },
            ..app.clone()
        };
        st.apps.insert(app.id.clone(), stored);
        Ok(Self::new_op(&mut st, label, None))
    }

    async fn get(&self, app_id: &str) -> RemoteResult<RemoteApp> {
        let mut st = self.state();
        Self::enter(&mut st, "apps.get", app_id)?;
        st.apps.get(app_id).cloned().ok_or_else(|| RemoteError::NotFound(format!("app {}", app_id)))
    }
}

#[async_trait::async_trait]
impl ServiceEnablement for FakeCloud {
    async fn enable(&self, service: &str, project_id: &str) -> RemoteResult<Operation> {
        let mut st = self.state();
        Self::enter(&mut st, "services.enable", service)?;
        if !st.services.insert((project_id.to_string(), service.to_string())) {
            return Err(RemoteError::AlreadyExists(format!("service {} already enabled", service)));
        }
        Ok(Self::new_op(&mut st, format!("services.enable {}", service), None))
    }
}

#[async_trait::async_trait]
impl OperationPoller for FakeCloud {
    async fn poll(&self, _project_id: &str, op: &Operation) -> RemoteResult<Operation> {
        let mut st = self.state();
        if let Some(queue) = st.fail_next.get_mut("ops.poll") {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        if let Some(e) = st.fail_always.get("ops.poll") {
            return Err(e.clone());
        }
        st.polls += 1;
        let Some(pending) = st.ops.get_mut(&op.name) else {
            return Err(RemoteError::NotFound(format!("operation {}", op.name)));
        };
        pending.polls_left = pending.polls_left.saturating_sub(1);
        if pending.polls_left > 0 {
            return Ok(Operation::pending(op.name.clone()));
        }
        let finished = st.ops.remove(&op.name);
        match finished {
            Some(p) => {
                st.calls.push(format!("done {}", p.label));
                Ok(Operation { name: op.name.clone(), done: true, error: p.error })
            }
            None => Err(RemoteError::NotFound(format!("operation {}", op.name))),
        }
    }
}

/// Clock whose sleeps return immediately and are recorded.
#[derive(Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, dur: Duration) {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).push(dur);
    }
}
