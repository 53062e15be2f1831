//! Plinth core types: declared project, live (remote) project, operations.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

mod changes;
mod error;

pub use changes::{ChangeSet, Field};
pub use error::{ReconcileError, ReconcileResult, RemoteError};

pub const BILLING_ACCOUNT_PREFIX: &str = "billingAccounts/";
pub const FOLDER_PREFIX: &str = "folders/";
pub const LIFECYCLE_ACTIVE: &str = "ACTIVE";
pub const APP_RUNTIME_SERVICE: &str = "appengine.googleapis.com";
pub const COMPUTE_SERVICE: &str = "compute.googleapis.com";
pub const DEFAULT_NETWORK: &str = "default";

pub const SUPPORTED_LOCATIONS: &[&str] = &[
    "northamerica-northeast1",
    "us-central",
    "us-east1",
    "us-east4",
    "southamerica-east1",
    "europe-west",
    "europe-west2",
    "europe-west3",
    "asia-northeast1",
    "asia-south1",
    "australia-southeast1",
];

pub const SERVING_STATUSES: &[&str] = &["UNSPECIFIED", "SERVING", "USER_DISABLED", "SYSTEM_DISABLED"];

pub type Labels = BTreeMap<String, String>;

pub mod prelude {
    pub use super::{
        AppRuntimeBlock, BillingInfo, ChangeSet, DeclaredConfig, DeclaredProject, DispatchRule, FeatureSettingsBlock,
        Field, Firewall, FirewallPage, Labels, LiveProject, Operation, OperationStatus, Parent, ParentRef,
        ProjectState, ReconcileError, ReconcileResult, RemoteApp, RemoteError, RemoteFeatureSettings,
        UrlDispatchRule,
    };
}

// ---- declared side ----

/// Where a project hangs in the resource hierarchy. At most one parent exists by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Parent {
    #[default]
    None,
    Organization(String),
    Folder(String),
}

impl Parent {
    /// Build from the flat `org_id` / `folder_id` pair; setting both is a validation error.
    pub fn from_ids(org_id: &str, folder_id: &str) -> ReconcileResult<Self> {
        match (org_id.is_empty(), folder_id.is_empty()) {
            (false, false) => Err(ReconcileError::Validation("'org_id' and 'folder_id' cannot be both set".into())),
            (false, true) => Ok(Parent::Organization(org_id.to_string())),
            (true, false) => Ok(Parent::Folder(parse_folder_id(folder_id).to_string())),
            (true, true) => Ok(Parent::None),
        }
    }

    pub fn org_id(&self) -> &str {
        match self { Parent::Organization(id) => id, _ => "" }
    }

    pub fn folder_id(&self) -> &str {
        match self { Parent::Folder(id) => id, _ => "" }
    }

    pub fn to_ref(&self) -> Option<ParentRef> {
        match self {
            Parent::None => None,
            Parent::Organization(id) => Some(ParentRef { kind: "organization".into(), id: id.clone() }),
            Parent::Folder(id) => Some(ParentRef { kind: "folder".into(), id: id.clone() }),
        }
    }

    /// Unknown parent kinds read back as `None`.
    pub fn from_ref(r: Option<&ParentRef>) -> Self {
        match r {
            Some(p) if p.kind == "organization" => Parent::Organization(p.id.clone()),
            Some(p) if p.kind == "folder" => Parent::Folder(p.id.clone()),
            _ => Parent::None,
        }
    }
}

/// Accepts both `123` and `folders/123`.
pub fn parse_folder_id(folder_id: &str) -> &str {
    folder_id.strip_prefix(FOLDER_PREFIX).unwrap_or(folder_id)
}

/// Strip the `billingAccounts/` prefix from a remote billing account name.
/// An empty name means "unlinked"; any other value without the prefix is rejected.
pub fn parse_billing_account_name(project_id: &str, name: Option<&str>) -> ReconcileResult<String> {
    match name {
        None | Some("") => Ok(String::new()),
        Some(n) => n.strip_prefix(BILLING_ACCOUNT_PREFIX).map(|s| s.to_string()).ok_or_else(|| {
            ReconcileError::DataIntegrity(format!(
                "billing account for project {:?}: expected value to begin with '{}' but got {}",
                prefixed_project(project_id),
                BILLING_ACCOUNT_PREFIX,
                n
            ))
        }),
    }
}

pub fn prefixed_project(project_id: &str) -> String {
    format!("projects/{}", project_id)
}

/// Fully-qualified compute network URL, as firewall rules reference it.
pub fn network_link(project_id: &str, network: &str) -> String {
    format!("https://www.googleapis.com/compute/v1/projects/{}/global/networks/{}", project_id, network)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSettingsBlock {
    #[serde(default)]
    pub split_health_checks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRule {
    pub domain: String,
    pub path: String,
    pub service: String,
}

/// Declared-shape app runtime block. The trailing fields are remote-assigned and
/// ignored on input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppRuntimeBlock {
    pub auth_domain: String,
    pub location_id: String,
    pub serving_status: String,
    pub feature_settings: Vec<FeatureSettingsBlock>,

    pub name: String,
    pub code_bucket: String,
    pub default_hostname: String,
    pub default_bucket: String,
    pub gcr_domain: String,
    #[serde(alias = "url_dispatch_rule")]
    pub dispatch_rules: Vec<DispatchRule>,
}

impl AppRuntimeBlock {
    /// Copy holding only the fields a caller may declare.
    pub fn mutable_part(&self) -> AppRuntimeBlock {
        AppRuntimeBlock {
            auth_domain: self.auth_domain.clone(),
            location_id: self.location_id.clone(),
            serving_status: self.serving_status.clone(),
            feature_settings: self.feature_settings.clone(),
            ..Default::default()
        }
    }
}

/// Declared configuration as written by a user (YAML/JSON), before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeclaredConfig {
    pub project_id: String,
    #[serde(default, alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default, alias = "billing_account")]
    pub billing_account_id: String,
    #[serde(default)]
    pub skip_delete: bool,
    #[serde(default = "default_true")]
    pub auto_create_network: bool,
    #[serde(default, alias = "app_engine")]
    pub app_runtime: Vec<AppRuntimeBlock>,
}

fn default_true() -> bool { true }

/// Validated desired state for one project, immutable for one apply cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredProject {
    pub project_id: String,
    pub display_name: String,
    pub parent: Parent,
    pub labels: Labels,
    pub billing_account_id: String,
    pub skip_delete: bool,
    pub auto_create_network: bool,
    /// At most one block is valid; the mapper enforces that before any remote call.
    pub app_runtime: Vec<AppRuntimeBlock>,
}

impl TryFrom<DeclaredConfig> for DeclaredProject {
    type Error = ReconcileError;

    fn try_from(c: DeclaredConfig) -> ReconcileResult<Self> {
        let parent = Parent::from_ids(&c.org_id, &c.folder_id)?;
        validate_project_id(&c.project_id)?;
        for block in &c.app_runtime {
            if !block.location_id.is_empty() && !SUPPORTED_LOCATIONS.contains(&block.location_id.as_str()) {
                return Err(ReconcileError::Validation(format!("unsupported location_id {:?}", block.location_id)));
            }
            if !block.serving_status.is_empty() && !SERVING_STATUSES.contains(&block.serving_status.as_str()) {
                return Err(ReconcileError::Validation(format!(
                    "serving_status must be one of {}, got {:?}",
                    SERVING_STATUSES.join(", "),
                    block.serving_status
                )));
            }
        }
        Ok(DeclaredProject {
            project_id: c.project_id,
            display_name: c.display_name,
            parent,
            labels: c.labels,
            billing_account_id: c.billing_account_id,
            skip_delete: c.skip_delete,
            auto_create_network: c.auto_create_network,
            app_runtime: c.app_runtime,
        })
    }
}

fn project_id_pattern() -> Option<&'static regex::Regex> {
    static RE: OnceLock<Option<regex::Regex>> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^[a-z][a-z0-9-]{4,28}[a-z0-9]$").ok()).as_ref()
}

fn validate_project_id(id: &str) -> ReconcileResult<()> {
    let re = project_id_pattern().ok_or_else(|| ReconcileError::Validation("project id pattern failed to compile".into()))?;
    if re.is_match(id) {
        Ok(())
    } else {
        Err(ReconcileError::Validation(format!(
            "project_id {:?} must be 6-30 lowercase letters, digits or hyphens, start with a letter and not end with a hyphen",
            id
        )))
    }
}

// ---- persisted local state ----

/// What the reconciler tracks locally for one project. `id == None` means the
/// resource is not (or no longer) tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectState {
    pub id: Option<String>,
    pub project_id: String,
    pub number: String,
    pub display_name: String,
    pub parent: Parent,
    pub labels: Labels,
    pub billing_account_id: String,
    pub skip_delete: bool,
    pub auto_create_network: bool,
    pub app_runtime: Vec<AppRuntimeBlock>,
}

impl ProjectState {
    /// Seed state from a declaration; nothing is tracked until create succeeds.
    pub fn from_declared(d: &DeclaredProject) -> Self {
        ProjectState {
            id: None,
            project_id: d.project_id.clone(),
            number: String::new(),
            display_name: d.display_name.clone(),
            parent: d.parent.clone(),
            labels: d.labels.clone(),
            billing_account_id: d.billing_account_id.clone(),
            skip_delete: d.skip_delete,
            auto_create_network: d.auto_create_network,
            app_runtime: d.app_runtime.clone(),
        }
    }

    /// State holding nothing but an identity, as used for import.
    pub fn for_import(project_id: &str) -> Self {
        ProjectState { id: Some(project_id.to_string()), project_id: project_id.to_string(), ..Default::default() }
    }

    pub fn is_tracked(&self) -> bool {
        self.id.as_deref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn clear_identity(&mut self) {
        self.id = None;
    }
}

// ---- remote side ----

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveProject {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_number: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: Labels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lifecycle_state: String,
}

impl LiveProject {
    /// Request body for a create call.
    pub fn from_declared(d: &DeclaredProject) -> Self {
        LiveProject {
            project_id: d.project_id.clone(),
            name: d.display_name.clone(),
            labels: d.labels.clone(),
            parent: d.parent.to_ref(),
            ..Default::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle_state == LIFECYCLE_ACTIVE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
}

/// Opaque handle for an asynchronous remote mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationStatus>,
}

impl Operation {
    pub fn completed(name: impl Into<String>) -> Self {
        Operation { name: name.into(), done: true, error: None }
    }

    pub fn pending(name: impl Into<String>) -> Self {
        Operation { name: name.into(), done: false, error: None }
    }
}

/// Billing linkage as the billing API reports it. `None` both reads as and
/// writes as "unlinked"; an unlink request carries no account name field at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_account_name: Option<String>,
}

impl BillingInfo {
    pub fn for_account(account_id: &str) -> Self {
        if account_id.is_empty() {
            BillingInfo { billing_account_name: None }
        } else {
            BillingInfo { billing_account_name: Some(format!("{}{}", BILLING_ACCOUNT_PREFIX, account_id)) }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firewall {
    pub name: String,
    #[serde(default)]
    pub network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallPage {
    #[serde(default)]
    pub items: Vec<Firewall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFeatureSettings {
    /// Sent even when false: the remote API tells "unset" apart from "false".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_health_checks: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlDispatchRule {
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub service: String,
}

/// Remote representation of the app runtime sub-resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteApp {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_domain: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub location_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serving_status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code_bucket: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_hostname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_bucket: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gcr_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_settings: Option<RemoteFeatureSettings>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dispatch_rules: Vec<UrlDispatchRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str) -> DeclaredConfig {
        DeclaredConfig { project_id: id.into(), display_name: "Demo".into(), auto_create_network: true, ..Default::default() }
    }

    #[test]
    fn org_and_folder_together_fail_validation() {
        let mut c = config("demo-project");
        c.org_id = "123".into();
        c.folder_id = "folders/456".into();
        let err = DeclaredProject::try_from(c).unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)), "err={}", err);
    }

    #[test]
    fn folder_prefix_is_stripped() {
        let mut c = config("demo-project");
        c.folder_id = "folders/456".into();
        let d = DeclaredProject::try_from(c).unwrap();
        assert_eq!(d.parent, Parent::Folder("456".into()));
        assert_eq!(d.parent.to_ref().unwrap().kind, "folder");
    }

    #[test]
    fn project_id_shape_is_checked() {
        assert!(DeclaredProject::try_from(config("Bad_ID")).is_err());
        assert!(DeclaredProject::try_from(config("short")).is_err());
        assert!(DeclaredProject::try_from(config("ends-with-")).is_err());
        assert!(DeclaredProject::try_from(config("fine-project-1")).is_ok());
        assert!(std::ptr::eq(project_id_pattern().unwrap(), project_id_pattern().unwrap()));
    }

    #[test]
    fn app_runtime_enums_are_checked() {
        let mut c = config("demo-project");
        c.app_runtime = vec![AppRuntimeBlock { location_id: "mars-north1".into(), ..Default::default() }];
        assert!(DeclaredProject::try_from(c.clone()).is_err());
        c.app_runtime = vec![AppRuntimeBlock { location_id: "us-central".into(), serving_status: "ON".into(), ..Default::default() }];
        assert!(DeclaredProject::try_from(c.clone()).is_err());
        c.app_runtime[0].serving_status = "SERVING".into();
        assert!(DeclaredProject::try_from(c).is_ok());
    }

    #[test]
    fn config_accepts_legacy_field_names() {
        let yaml = r#"{"project_id":"demo-project","name":"Demo","billing_account":"AB-12","app_engine":[{"location_id":"us-central"}]}"#;
        let c: DeclaredConfig = serde_json::from_str(yaml).unwrap();
        assert_eq!(c.display_name, "Demo");
        assert_eq!(c.billing_account_id, "AB-12");
        assert_eq!(c.app_runtime.len(), 1);
        assert!(c.auto_create_network);
    }

    #[test]
    fn billing_name_parsing_is_strict() {
        assert_eq!(parse_billing_account_name("p", Some("billingAccounts/AB-12")).unwrap(), "AB-12");
        assert_eq!(parse_billing_account_name("p", None).unwrap(), "");
        assert_eq!(parse_billing_account_name("p", Some("")).unwrap(), "");
        let err = parse_billing_account_name("p", Some("accounts/AB-12")).unwrap_err();
        assert!(matches!(err, ReconcileError::DataIntegrity(_)));
    }

    #[test]
    fn unlink_body_has_no_account_field() {
        let body = serde_json::to_value(BillingInfo::for_account("")).unwrap();
        assert_eq!(body, serde_json::json!({}));
        let body = serde_json::to_value(BillingInfo::for_account("AB-12")).unwrap();
        assert_eq!(body, serde_json::json!({"billingAccountName": "billingAccounts/AB-12"}));
    }

    #[test]
    fn parent_round_trips_through_remote_ref() {
        for p in [Parent::None, Parent::Organization("1".into()), Parent::Folder("2".into())] {
            assert_eq!(Parent::from_ref(p.to_ref().as_ref()), p);
        }
    }
}
