//! Value types shared by the lifecycle operations.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default field manager recorded on applied fields.
pub const DEFAULT_FIELD_MANAGER: &str = "kube-crd-provider";

/// Default `wait_for_delete` timeout, in seconds.
pub const DEFAULT_DELETE_TIMEOUT_SECS: u64 = 30;

/// Default `wait_for_delete` poll interval, in seconds.
pub const DEFAULT_DELETE_POLL_INTERVAL_SECS: u64 = 5;

/// Identifies a Kubernetes REST endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionResource {
    /// API group; empty for the core group.
    pub group: String,
    /// API version within the group.
    pub version: String,
    /// Plural resource name used in URLs.
    pub resource: String,
}

impl GroupVersionResource {
    /// Create a new group/version/resource triple.
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// The `apiVersion` string for objects served by this endpoint.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.resource)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.resource)
        }
    }
}

/// The write-once key of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Namespace of the object.
    pub namespace: String,
    /// Name of the object.
    pub name: String,
}

impl ResourceIdentity {
    /// Create an identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Formats as `<namespace>/<name>`, the computed `id` and import argument.
impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How dependents of a deleted object are garbage collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPropagation {
    /// Leave dependents in place.
    Orphan,
    /// Delete the owner now and dependents in the background.
    Background,
    /// Delete dependents before the owner.
    Foreground,
}

impl DeletionPropagation {
    /// Accepted attribute values.
    pub const VALUES: [&'static str; 3] = ["Orphan", "Background", "Foreground"];
}

impl From<DeletionPropagation> for kube::api::PropagationPolicy {
    fn from(policy: DeletionPropagation) -> Self {
        match policy {
            DeletionPropagation::Orphan => Self::Orphan,
            DeletionPropagation::Background => Self::Background,
            DeletionPropagation::Foreground => Self::Foreground,
        }
    }
}

/// Server-side apply settings for a single patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOptions {
    /// Field manager recorded as the owner of applied fields.
    pub field_manager: String,
    /// Take ownership of fields held by other managers instead of failing.
    pub force_conflicts: bool,
}

/// Provider-wide apply settings, overridden per resource when set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyDefaults {
    /// Field manager used when a resource does not set one.
    pub field_manager: String,
    /// Conflict forcing used when a resource does not set it.
    pub force_conflicts: bool,
}

impl Default for ApplyDefaults {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            force_conflicts: false,
        }
    }
}

impl ApplyDefaults {
    /// Resolve the options for one apply. Empty field managers fall back to the default.
    pub fn resolve(
        &self,
        field_manager: Option<&str>,
        force_conflicts: Option<bool>,
    ) -> ApplyOptions {
        ApplyOptions {
            field_manager: field_manager
                .filter(|m| !m.is_empty())
                .unwrap_or(&self.field_manager)
                .to_string(),
            force_conflicts: force_conflicts.unwrap_or(self.force_conflicts),
        }
    }
}

/// Bounds for a wait loop. A zero timeout checks once and never sleeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSpec {
    /// Total time to wait, in seconds.
    #[serde(rename = "timeout", default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Delay between checks, in seconds.
    #[serde(rename = "poll_interval", default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl WaitSpec {
    /// Create a wait spec from whole seconds.
    pub fn new(timeout_seconds: u64, poll_interval_seconds: u64) -> Self {
        Self {
            timeout_seconds,
            poll_interval_seconds,
        }
    }

    /// A spec that checks exactly once.
    pub fn once() -> Self {
        Self::new(0, 0)
    }

    /// Total wait as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Defaults to 30s timeout and 5s poll interval.
impl Default for WaitSpec {
    fn default() -> Self {
        Self::new(DEFAULT_DELETE_TIMEOUT_SECS, DEFAULT_DELETE_POLL_INTERVAL_SECS)
    }
}

/// A condition awaited after create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForUpsert {
    /// JSONPath into the observed object.
    pub jsonpath: String,
    /// Expected rendered value at `jsonpath`.
    pub value: String,
    /// Total time to wait, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Delay between checks, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_DELETE_TIMEOUT_SECS
}

fn default_poll_interval() -> u64 {
    DEFAULT_DELETE_POLL_INTERVAL_SECS
}

impl WaitForUpsert {
    /// The wait bounds of this condition.
    pub fn wait_spec(&self) -> WaitSpec {
        WaitSpec::new(self.timeout, self.poll_interval)
    }
}

/// A change to a single attribute during a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// The dotted path to the attribute that changed.
    pub path: String,
    /// The value before the change (None if creating).
    pub before: Option<serde_json::Value>,
    /// The value after the change (None if deleting).
    pub after: Option<serde_json::Value>,
}

impl AttributeChange {
    /// Create a new attribute change.
    pub fn new(
        path: impl Into<String>,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) -> Self {
        Self {
            path: path.into(),
            before,
            after,
        }
    }
}

/// The result of a plan operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// The planned state after the operation.
    pub planned_state: serde_json::Value,
    /// The list of attribute changes.
    pub changes: Vec<AttributeChange>,
    /// Whether the resource requires replacement.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Create a plan result with no changes.
    pub fn no_change(state: serde_json::Value) -> Self {
        Self {
            planned_state: state,
            changes: Vec::new(),
            requires_replace: false,
        }
    }

    /// Create a plan result with changes.
    pub fn with_changes(
        planned_state: serde_json::Value,
        changes: Vec<AttributeChange>,
        requires_replace: bool,
    ) -> Self {
        Self {
            planned_state,
            changes,
            requires_replace,
        }
    }
}

/// An object adopted into state by import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// The resource type.
    pub resource_type: String,
    /// The imported state.
    pub state: serde_json::Value,
}

impl ImportedResource {
    /// Create a new imported resource.
    pub fn new(resource_type: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Names of everything the provider serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// List of resource type names.
    pub resources: Vec<String>,
    /// List of data source type names.
    pub data_sources: Vec<String>,
}
