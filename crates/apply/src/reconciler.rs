//! The project controller: create, read, update, delete and import over the
//! capability-scoped clients, one strictly sequential step at a time.

use std::time::Instant;

use metrics::{counter, histogram};
use plinth_core::{
    prefixed_project, ChangeSet, DeclaredProject, Field, LiveProject, Parent, ProjectState, ReconcileError,
    ReconcileResult, RemoteError, APP_RUNTIME_SERVICE, COMPUTE_SERVICE, DEFAULT_NETWORK,
};
use plinth_ops::{Clients, OperationWaiter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::billing::BillingRetrier;
use crate::{mapper, network};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum GroupOutcome {
    #[default]
    Unchanged,
    Succeeded,
    Failed(String),
}

impl GroupOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, GroupOutcome::Failed(_))
    }
}

/// Per-group result of an update. Groups are attempted independently, so one
/// failure never hides which other groups went through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    pub display_name: GroupOutcome,
    pub parent: GroupOutcome,
    pub labels: GroupOutcome,
    pub billing: GroupOutcome,
}

impl UpdateReport {
    pub fn groups(&self) -> [(&'static str, &GroupOutcome); 4] {
        [
            ("display_name", &self.display_name),
            ("parent", &self.parent),
            ("labels", &self.labels),
            ("billing", &self.billing),
        ]
    }

    pub fn is_success(&self) -> bool {
        self.groups().iter().all(|(_, o)| !o.is_failed())
    }

    pub fn failures(&self) -> Vec<(&'static str, &str)> {
        self.groups()
            .into_iter()
            .filter_map(|(g, o)| match o {
                GroupOutcome::Failed(reason) => Some((g, reason.as_str())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Step {
    fn record(self, t0: Instant, ok: bool) {
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        match self {
            Step::Create => {
                counter!("reconcile_create_total", 1u64);
                if !ok { counter!("reconcile_create_err", 1u64); }
                histogram!("reconcile_create_ms", ms);
            }
            Step::Read => {
                counter!("reconcile_read_total", 1u64);
                if !ok { counter!("reconcile_read_err", 1u64); }
                histogram!("reconcile_read_ms", ms);
            }
            Step::Update => {
                counter!("reconcile_update_total", 1u64);
                if !ok { counter!("reconcile_update_err", 1u64); }
                histogram!("reconcile_update_ms", ms);
            }
            Step::Delete => {
                counter!("reconcile_delete_total", 1u64);
                if !ok { counter!("reconcile_delete_err", 1u64); }
                histogram!("reconcile_delete_ms", ms);
            }
            Step::Import => {
                counter!("reconcile_import_total", 1u64);
                if !ok { counter!("reconcile_import_err", 1u64); }
                histogram!("reconcile_import_ms", ms);
            }
        }
    }
}

#[derive(Clone)]
pub struct Reconciler {
    clients: Clients,
    waiter: OperationWaiter,
    billing: BillingRetrier,
}

impl Reconciler {
    pub fn new(clients: Clients, waiter: OperationWaiter, billing: BillingRetrier) -> Self {
        Self { clients, waiter, billing }
    }

    /// Create the project and everything it declares. `state` is reset from the
    /// declaration; its identity is set only once the project create has been
    /// confirmed. Later steps failing leave the project in place and tracked.
    pub async fn create(&self, declared: &DeclaredProject, state: &mut ProjectState) -> ReconcileResult<()> {
        let t0 = Instant::now();
        info!(project = %declared.project_id, "reconcile: create start");
        let res = self.create_inner(declared, state).await;
        Step::Create.record(t0, res.is_ok());
        match &res {
            Ok(()) => info!(project = %declared.project_id, took_ms = %t0.elapsed().as_millis(), "reconcile: create ok"),
            Err(e) => warn!(project = %declared.project_id, error = %e, tracked = state.is_tracked(), "reconcile: create failed"),
        }
        res
    }

    async fn create_inner(&self, declared: &DeclaredProject, state: &mut ProjectState) -> ReconcileResult<()> {
        // Malformed blocks must fail before anything exists remotely.
        let app = mapper::expand(&declared.project_id, &declared.app_runtime)?;
        let pid = declared.project_id.clone();
        *state = ProjectState::from_declared(declared);

        let op = self
            .clients
            .projects
            .create(&LiveProject::from_declared(declared))
            .await
            .map_err(|e| ReconcileError::remote(format!("creating project {:?}", pid), e))?;
        state.id = Some(pid.clone());
        if let Err(e) = self.waiter.wait(&*self.clients.project_ops, &pid, op, &format!("creating project {:?}", pid)).await {
            state.clear_identity();
            return Err(e);
        }
        debug!(project = %pid, "project created");

        if !declared.billing_account_id.is_empty() {
            self.billing.set_billing(&pid, &declared.billing_account_id, &mut state.billing_account_id).await?;
        }

        if let Some(app) = app {
            let created = self.create_app(&pid, &app).await;
            if let Err(e) = created {
                state.app_runtime.clear();
                return Err(e);
            }
        }

        self.read_inner(state).await?;
        if !state.is_tracked() {
            return Err(ReconcileError::NotFound(format!("project {:?} vanished right after creation", pid)));
        }

        if !declared.auto_create_network {
            self.enable_service(&pid, COMPUTE_SERVICE).await?;
            network::force_delete_network(
                &*self.clients.compute,
                &*self.clients.compute_ops,
                &self.waiter,
                &pid,
                DEFAULT_NETWORK,
            )
            .await?;
        }
        Ok(())
    }

    async fn create_app(&self, project_id: &str, app: &plinth_core::RemoteApp) -> ReconcileResult<()> {
        self.enable_service(project_id, APP_RUNTIME_SERVICE).await?;
        let op = self
            .clients
            .apps
            .create(app)
            .await
            .map_err(|e| ReconcileError::remote(format!("creating app runtime for {:?}", project_id), e))?;
        self.waiter
            .wait(&*self.clients.app_ops, project_id, op, &format!("creating app runtime for {:?}", project_id))
            .await?;
        debug!(project = %project_id, location = %app.location_id, "app runtime created");
        Ok(())
    }

    /// Turn on a remote API for the project; an already-enabled service is fine.
    pub async fn enable_service(&self, project_id: &str, service: &str) -> ReconcileResult<()> {
        match self.clients.services.enable(service, project_id).await {
            Ok(op) => {
                self.waiter
                    .wait(&*self.clients.service_ops, project_id, op, &format!("enabling {} on {:?}", service, project_id))
                    .await
            }
            Err(RemoteError::AlreadyExists(_)) => {
                debug!(project = %project_id, service = %service, "service already enabled");
                Ok(())
            }
            Err(e) => Err(ReconcileError::remote(format!("enabling {} on {:?}", service, project_id), e)),
        }
    }

    /// Refresh `state` from the remote. A missing or inactive project clears the
    /// identity and is not an error; an untracked state is left alone.
    pub async fn read(&self, state: &mut ProjectState) -> ReconcileResult<()> {
        let t0 = Instant::now();
        let res = self.read_inner(state).await;
        Step::Read.record(t0, res.is_ok());
        if let Err(e) = &res {
            warn!(project = %state.project_id, error = %e, "reconcile: read failed");
        }
        res
    }

    async fn read_inner(&self, state: &mut ProjectState) -> ReconcileResult<()> {
        let Some(pid) = state.id.clone().filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        let live = match self.clients.projects.get(&pid).await {
            Ok(p) => p,
            Err(e) if e.is_not_found() => {
                warn!(project = %pid, "removing project from tracked state because it no longer exists");
                state.clear_identity();
                return Ok(());
            }
            Err(e) => return Err(ReconcileError::remote(format!("reading project {:?}", pid), e)),
        };
        if !live.is_active() {
            warn!(project = %pid, lifecycle = %live.lifecycle_state, "removing project from tracked state because its state is not active");
            state.clear_identity();
            return Ok(());
        }

        state.project_id = live.project_id.clone();
        state.number = live.project_number.clone();
        state.display_name = live.name.clone();
        state.labels = live.labels.clone();
        state.parent = Parent::from_ref(live.parent.as_ref());

        let project_ref = prefixed_project(&pid);
        let bi = self
            .clients
            .billing
            .get_billing_info(&project_ref)
            .await
            .map_err(|e| ReconcileError::remote(format!("reading billing info for {}", project_ref), e))?;
        state.billing_account_id = plinth_core::parse_billing_account_name(&pid, bi.billing_account_name.as_deref())?;

        state.app_runtime = match self.clients.apps.get(&pid).await {
            Ok(app) => vec![mapper::flatten(&app)],
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(ReconcileError::remote(format!("reading app runtime for {:?}", pid), e)),
        };
        debug!(project = %pid, number = %state.number, apps = state.app_runtime.len(), "project read");
        Ok(())
    }

    /// Push the changed groups of `declared` to the remote. Remote failures are
    /// reported per group; only a missing identity or an unreadable project is an `Err`.
    /// App runtime changes are ignored: they need a replacement, not an update.
    pub async fn update(
        &self,
        declared: &DeclaredProject,
        changes: &ChangeSet,
        state: &mut ProjectState,
    ) -> ReconcileResult<UpdateReport> {
        let t0 = Instant::now();
        info!(project = %declared.project_id, changes = ?changes.fields(), "reconcile: update start");
        let res = self.update_inner(declared, changes, state).await;
        let ok = res.as_ref().map(|r| r.is_success()).unwrap_or(false);
        Step::Update.record(t0, ok);
        match &res {
            Ok(r) if r.is_success() => {
                info!(project = %declared.project_id, took_ms = %t0.elapsed().as_millis(), "reconcile: update ok")
            }
            Ok(r) => warn!(project = %declared.project_id, failed = ?r.failures(), "reconcile: update partially failed"),
            Err(e) => warn!(project = %declared.project_id, error = %e, "reconcile: update failed"),
        }
        res
    }

    async fn update_inner(
        &self,
        declared: &DeclaredProject,
        changes: &ChangeSet,
        state: &mut ProjectState,
    ) -> ReconcileResult<UpdateReport> {
        let Some(pid) = state.id.clone().filter(|s| !s.is_empty()) else {
            return Err(ReconcileError::NotFound(format!("project {:?} is not tracked", declared.project_id)));
        };
        if changes.has(Field::AppRuntime) {
            debug!(project = %pid, "app runtime changes are not applied in place");
        }
        let mut report = UpdateReport::default();

        // An undeclared parent is never sent, so the remote one stays.
        let parent_change = changes.has(Field::Parent) && declared.parent != Parent::None;
        let needs_project = parent_change || changes.has(Field::DisplayName) || changes.has(Field::Labels);
        if needs_project {
            let mut confirmed = self.clients.projects.get(&pid).await.map_err(|e| match e {
                RemoteError::NotFound(m) => ReconcileError::NotFound(m),
                e => ReconcileError::remote(format!("reading project {:?} for update", pid), e),
            })?;

            if changes.has(Field::DisplayName) {
                let mut want = confirmed.clone();
                want.name = declared.display_name.clone();
                report.display_name = match self.push_project(&pid, &want, "display name").await {
                    Ok(updated) => {
                        state.display_name = updated.name.clone();
                        confirmed = updated;
                        GroupOutcome::Succeeded
                    }
                    Err(e) => GroupOutcome::Failed(e.to_string()),
                };
            }
            if parent_change {
                let mut want = confirmed.clone();
                want.parent = declared.parent.to_ref();
                report.parent = match self.push_project(&pid, &want, "parent").await {
                    Ok(updated) => {
                        state.parent = Parent::from_ref(updated.parent.as_ref());
                        confirmed = updated;
                        GroupOutcome::Succeeded
                    }
                    Err(e) => GroupOutcome::Failed(e.to_string()),
                };
            }
            if changes.has(Field::Labels) {
                let mut want = confirmed.clone();
                want.labels = declared.labels.clone();
                report.labels = match self.push_project(&pid, &want, "labels").await {
                    Ok(updated) => {
                        state.labels = updated.labels.clone();
                        GroupOutcome::Succeeded
                    }
                    Err(e) => GroupOutcome::Failed(e.to_string()),
                };
            }
        }

        if changes.has(Field::BillingAccountId) {
            report.billing =
                match self.billing.set_billing(&pid, &declared.billing_account_id, &mut state.billing_account_id).await {
                    Ok(()) => GroupOutcome::Succeeded,
                    Err(e) => GroupOutcome::Failed(e.to_string()),
                };
        }

        // Local-only flags.
        state.skip_delete = declared.skip_delete;
        state.auto_create_network = declared.auto_create_network;
        Ok(report)
    }

    async fn push_project(&self, pid: &str, want: &LiveProject, group: &str) -> ReconcileResult<LiveProject> {
        let updated = self
            .clients
            .projects
            .update(pid, want)
            .await
            .map_err(|e| ReconcileError::remote(format!("updating {} of project {:?}", group, pid), e))?;
        debug!(project = %pid, group, "project updated");
        Ok(updated)
    }

    /// Delete the project. With `skip_delete` nothing is sent remotely. The
    /// identity is cleared only after a confirmed delete.
    pub async fn delete(&self, state: &mut ProjectState) -> ReconcileResult<()> {
        let t0 = Instant::now();
        info!(project = %state.project_id, skip = state.skip_delete, "reconcile: delete start");
        let res = self.delete_inner(state).await;
        Step::Delete.record(t0, res.is_ok());
        match &res {
            Ok(()) => info!(project = %state.project_id, took_ms = %t0.elapsed().as_millis(), "reconcile: delete ok"),
            Err(e) => warn!(project = %state.project_id, error = %e, "reconcile: delete failed"),
        }
        res
    }

    async fn delete_inner(&self, state: &mut ProjectState) -> ReconcileResult<()> {
        let Some(pid) = state.id.clone().filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        if state.skip_delete {
            info!(project = %pid, "skip_delete set; forgetting project without deleting it");
            state.clear_identity();
            return Ok(());
        }
        let op = self
            .clients
            .projects
            .delete(&pid)
            .await
            .map_err(|e| ReconcileError::remote(format!("deleting project {:?}", pid), e))?;
        self.waiter.wait(&*self.clients.project_ops, &pid, op, &format!("deleting project {:?}", pid)).await?;
        state.clear_identity();
        Ok(())
    }

    /// Start tracking an existing project by id alone.
    pub async fn import(&self, project_id: &str) -> ReconcileResult<ProjectState> {
        let t0 = Instant::now();
        let mut state = ProjectState::for_import(project_id);
        let res = self.read_inner(&mut state).await.and_then(|()| {
            if state.is_tracked() {
                Ok(())
            } else {
                Err(ReconcileError::NotFound(format!("project {:?} does not exist or is not active", project_id)))
            }
        });
        Step::Import.record(t0, res.is_ok());
        res?;
        // Not discoverable remotely; true produces no follow-up diff.
        state.auto_create_network = true;
        info!(project = %project_id, took_ms = %t0.elapsed().as_millis(), "reconcile: import ok");
        Ok(state)
    }
}
