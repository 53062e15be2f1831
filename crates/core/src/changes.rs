//! Changed-field set between tracked state and a new declaration.

use serde::{Deserialize, Serialize};

use crate::{AppRuntimeBlock, DeclaredProject, Parent, ProjectState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    ProjectId,
    DisplayName,
    Parent,
    Labels,
    BillingAccountId,
    SkipDelete,
    AutoCreateNetwork,
    AppRuntime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    fields: Vec<Field>,
}

impl ChangeSet {
    pub fn of(fields: impl IntoIterator<Item = Field>) -> Self {
        let mut fields: Vec<Field> = fields.into_iter().collect();
        fields.sort();
        fields.dedup();
        Self { fields }
    }

    pub fn between(state: &ProjectState, declared: &DeclaredProject) -> Self {
        let mut out = Vec::new();
        if state.project_id != declared.project_id { out.push(Field::ProjectId); }
        if state.display_name != declared.display_name { out.push(Field::DisplayName); }
        // No declared parent leaves the remote one alone.
        if declared.parent != Parent::None && state.parent != declared.parent { out.push(Field::Parent); }
        if state.labels != declared.labels { out.push(Field::Labels); }
        if state.billing_account_id != declared.billing_account_id { out.push(Field::BillingAccountId); }
        if state.skip_delete != declared.skip_delete { out.push(Field::SkipDelete); }
        if state.auto_create_network != declared.auto_create_network { out.push(Field::AutoCreateNetwork); }
        if !app_runtime_matches(&state.app_runtime, &declared.app_runtime) { out.push(Field::AppRuntime); }
        Self::of(out)
    }

    pub fn has(&self, field: Field) -> bool {
        self.fields.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Changes that cannot be reconciled in place.
    pub fn requires_replacement(&self) -> bool {
        self.has(Field::ProjectId) || self.has(Field::AppRuntime)
    }
}

/// Remote-assigned fields never count as drift, and neither does anything the
/// declaration leaves empty: the remote picks those values itself.
fn app_runtime_matches(have: &[AppRuntimeBlock], want: &[AppRuntimeBlock]) -> bool {
    match (have, want) {
        (_, []) => true,
        ([h], [w]) => {
            (w.auth_domain.is_empty() || h.auth_domain == w.auth_domain)
                && (w.location_id.is_empty() || h.location_id == w.location_id)
                && (w.serving_status.is_empty() || h.serving_status == w.serving_status)
                && (w.feature_settings.is_empty() || h.feature_settings == w.feature_settings)
        }
        _ => false,
    }
}
