//! Testing utilities: an in-memory cluster and a provider harness.
//!
//! [`FakeApplyClient`] stands in for the API server. It keeps objects in
//! memory, records which field manager owns each applied field, rejects
//! conflicting applies with a 409 unless forced, and can keep deleted objects
//! visible for a number of reads to exercise delete waits.
//!
//! [`ProviderTester`] drives a [`ProviderService`] the way a host would.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use kube_crd_provider::kinds::Catalog;
//! use kube_crd_provider::provider::CrdProvider;
//! use kube_crd_provider::testing::{FakeApplyClient, ProviderTester};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let fake = FakeApplyClient::new();
//! let provider = CrdProvider::with_client(Catalog::builtin(), Arc::new(fake.clone()));
//! let tester = ProviderTester::new(provider);
//!
//! let state = tester
//!     .lifecycle_create(
//!         "k8s_cert_manager_io_certificate_v1",
//!         json!({
//!             "metadata": {"name": "web", "namespace": "default"},
//!             "spec": {"secretName": "web-tls", "issuerRef": {"name": "ca"}}
//!         }),
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(state["id"], "default/web");
//! assert_eq!(fake.apply_calls(), 1);
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::client::ApplyClient;
use crate::error::ProviderError;
use crate::provider::ProviderService;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{
    ApplyOptions, DeletionPropagation, GroupVersionResource, ImportedResource, PlanResult,
    ResourceIdentity,
};

type FieldPath = Vec<String>;
type ObjectKey = (GroupVersionResource, ResourceIdentity);

#[derive(Debug, Clone)]
struct StoredObject {
    object: Value,
    owners: BTreeMap<FieldPath, String>,
    /// Reads left before a deleted object disappears.
    terminating: Option<u32>,
}

#[derive(Debug, Default)]
struct FakeCluster {
    objects: HashMap<ObjectKey, StoredObject>,
    deletion_lag: u32,
    failures: VecDeque<(u16, String)>,
    last_propagation: Option<DeletionPropagation>,
    next_uid: u64,
    resource_version: u64,
    get_calls: u32,
    apply_calls: u32,
    delete_calls: u32,
}

impl FakeCluster {
    fn injected_failure(
        &mut self,
        operation: &str,
        identity: &ResourceIdentity,
    ) -> Result<(), ProviderError> {
        match self.failures.pop_front() {
            Some((code, message)) => Err(ProviderError::from_status(
                operation,
                &identity.to_string(),
                code,
                &message,
            )),
            None => Ok(()),
        }
    }

    fn bump_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

/// In-memory [`ApplyClient`] with server-side apply field ownership.
///
/// Clones share the same cluster.
#[derive(Debug, Clone, Default)]
pub struct FakeApplyClient {
    cluster: Arc<Mutex<FakeCluster>>,
}

impl FakeApplyClient {
    /// An empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeCluster> {
        self.cluster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `object` as-is, with no field owners. Identity comes from its metadata.
    ///
    /// # Panics
    ///
    /// Panics if `metadata.name` or `metadata.namespace` is missing.
    pub fn insert(&self, gvr: &GroupVersionResource, object: Value) {
        let identity =
            identity_of(&object).expect("object needs metadata.name and metadata.namespace");
        self.lock().objects.insert(
            (gvr.clone(), identity),
            StoredObject {
                object,
                owners: BTreeMap::new(),
                terminating: None,
            },
        );
    }

    /// Replace the `status` of a stored object, as a controller would.
    pub fn set_status(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        status: Value,
    ) {
        let mut cluster = self.lock();
        if let Some(stored) = cluster.objects.get_mut(&(gvr.clone(), identity.clone())) {
            if let Value::Object(map) = &mut stored.object {
                map.insert("status".to_string(), status);
            }
        }
    }

    /// Keep deleted objects visible for `reads` further `get` calls.
    pub fn set_deletion_lag(&self, reads: u32) {
        self.lock().deletion_lag = reads;
    }

    /// Fail the next call of any kind with an API status.
    pub fn fail_next(&self, code: u16, message: impl Into<String>) {
        self.lock().failures.push_back((code, message.into()));
    }

    /// The stored object, if present.
    pub fn object(&self, gvr: &GroupVersionResource, identity: &ResourceIdentity) -> Option<Value> {
        self.lock()
            .objects
            .get(&(gvr.clone(), identity.clone()))
            .map(|stored| stored.object.clone())
    }

    /// Whether the object is stored, including while it is terminating.
    pub fn contains(&self, gvr: &GroupVersionResource, identity: &ResourceIdentity) -> bool {
        self.lock().objects.contains_key(&(gvr.clone(), identity.clone()))
    }

    /// The field manager owning the field at `path`.
    pub fn field_owner(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        path: &[&str],
    ) -> Option<String> {
        let path: FieldPath = path.iter().map(|s| s.to_string()).collect();
        self.lock()
            .objects
            .get(&(gvr.clone(), identity.clone()))
            .and_then(|stored| stored.owners.get(&path).cloned())
    }

    /// Propagation policy of the most recent delete.
    pub fn last_propagation(&self) -> Option<DeletionPropagation> {
        self.lock().last_propagation
    }

    /// Number of `get` calls so far.
    pub fn get_calls(&self) -> u32 {
        self.lock().get_calls
    }

    /// Number of `apply` calls so far.
    pub fn apply_calls(&self) -> u32 {
        self.lock().apply_calls
    }

    /// Number of `delete` calls so far.
    pub fn delete_calls(&self) -> u32 {
        self.lock().delete_calls
    }
}

#[async_trait]
impl ApplyClient for FakeApplyClient {
    async fn apply(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        document: &Value,
        options: &ApplyOptions,
    ) -> Result<Value, ProviderError> {
        let mut cluster = self.lock();
        cluster.apply_calls += 1;
        cluster.injected_failure("apply", identity)?;

        let target = identity.to_string();
        if identity_of(document).as_ref() != Some(identity) {
            return Err(ProviderError::from_status(
                "apply",
                &target,
                400,
                "metadata.name and metadata.namespace must match the request",
            ));
        }

        let key = (gvr.clone(), identity.clone());
        let mut applied = Vec::new();
        collect_leaves(document, &mut Vec::new(), &mut applied);
        applied.retain(|(path, _)| !is_identity_path(path));

        let mut stored = match cluster.objects.get(&key) {
            Some(existing) => existing.clone(),
            None => StoredObject {
                object: Value::Object(Map::new()),
                owners: BTreeMap::new(),
                terminating: None,
            },
        };

        let conflicts: Vec<String> = applied
            .iter()
            .filter_map(|(path, value)| {
                let owner = stored.owners.get(path)?;
                let current = lookup(&stored.object, path);
                (owner != &options.field_manager && current != Some(*value))
                    .then(|| format!("conflict with {:?}: .{}", owner, path.join(".")))
            })
            .collect();
        if !conflicts.is_empty() && !options.force_conflicts {
            return Err(ProviderError::from_status(
                "apply",
                &target,
                409,
                &format!(
                    "Apply failed with {} conflict(s): {}",
                    conflicts.len(),
                    conflicts.join(", ")
                ),
            ));
        }

        // Fields this manager applied before but no longer sets are removed.
        let released: Vec<FieldPath> = stored
            .owners
            .iter()
            .filter(|(path, owner)| {
                *owner == &options.field_manager && !applied.iter().any(|(p, _)| p == *path)
            })
            .map(|(path, _)| path.clone())
            .collect();
        for path in released {
            stored.owners.remove(&path);
            remove_path(&mut stored.object, &path);
        }

        for (path, value) in applied {
            set_path(&mut stored.object, &path, value.clone());
            stored.owners.insert(path, options.field_manager.clone());
        }

        for field in ["apiVersion", "kind"] {
            if let Some(value) = document.get(field) {
                set_path(&mut stored.object, &[field.to_string()], value.clone());
            }
        }
        set_path(&mut stored.object, &meta("name"), Value::String(identity.name.clone()));
        set_path(&mut stored.object, &meta("namespace"), Value::String(identity.namespace.clone()));
        if lookup(&stored.object, &meta("uid")).is_none() {
            cluster.next_uid += 1;
            let uid = format!("00000000-0000-0000-0000-{:012}", cluster.next_uid);
            set_path(&mut stored.object, &meta("uid"), Value::String(uid));
        }
        let version = cluster.bump_version();
        set_path(&mut stored.object, &meta("resourceVersion"), Value::String(version));

        let observed = stored.object.clone();
        cluster.objects.insert(key, stored);
        Ok(observed)
    }

    async fn get(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
    ) -> Result<Value, ProviderError> {
        let mut cluster = self.lock();
        cluster.get_calls += 1;
        cluster.injected_failure("get", identity)?;

        let key = (gvr.clone(), identity.clone());
        let not_found = || {
            ProviderError::from_status(
                "get",
                &identity.to_string(),
                404,
                &format!("{} {:?} not found", gvr.resource, identity.name),
            )
        };

        let Some(stored) = cluster.objects.get_mut(&key) else {
            return Err(not_found());
        };
        match stored.terminating {
            Some(0) => {
                cluster.objects.remove(&key);
                Err(not_found())
            },
            Some(reads) => {
                stored.terminating = Some(reads - 1);
                Ok(stored.object.clone())
            },
            None => Ok(stored.object.clone()),
        }
    }

    async fn delete(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        propagation: Option<DeletionPropagation>,
    ) -> Result<(), ProviderError> {
        let mut cluster = self.lock();
        cluster.delete_calls += 1;
        cluster.injected_failure("delete", identity)?;
        cluster.last_propagation = propagation;

        let key = (gvr.clone(), identity.clone());
        let lag = cluster.deletion_lag;
        if lag == 0 {
            cluster.objects.remove(&key);
        } else if let Some(stored) = cluster.objects.get_mut(&key) {
            if stored.terminating.is_none() {
                stored.terminating = Some(lag);
                set_path(
                    &mut stored.object,
                    &meta("deletionTimestamp"),
                    Value::String("1970-01-01T00:00:00Z".to_string()),
                );
            }
        }
        Ok(())
    }
}

fn meta(field: &str) -> FieldPath {
    vec!["metadata".to_string(), field.to_string()]
}

fn is_identity_path(path: &[String]) -> bool {
    matches!(path, [first] if first == "apiVersion" || first == "kind")
        || (path.len() == 2
            && path[0] == "metadata"
            && (path[1] == "name" || path[1] == "namespace"))
}

fn identity_of(object: &Value) -> Option<ResourceIdentity> {
    let metadata = object.get("metadata")?;
    Some(ResourceIdentity::new(
        metadata.get("namespace")?.as_str()?,
        metadata.get("name")?.as_str()?,
    ))
}

/// Every scalar or list in `value` with its path. Lists are owned whole.
fn collect_leaves<'a>(
    value: &'a Value,
    path: &mut FieldPath,
    out: &mut Vec<(FieldPath, &'a Value)>,
) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                path.push(key.clone());
                collect_leaves(child, path, out);
                path.pop();
            }
        },
        Value::Null => {},
        other if !path.is_empty() => out.push((path.clone(), other)),
        _ => {},
    }
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

fn set_path(value: &mut Value, path: &[String], leaf: Value) {
    let mut current = value;
    for key in path {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Some(map) = current.as_object_mut() else {
            return;
        };
        current = map.entry(key.clone()).or_insert(Value::Null);
    }
    *current = leaf;
}

/// Remove the field at `path`, then any objects left empty along the way.
fn remove_path(value: &mut Value, path: &[String]) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    let Value::Object(map) = value else {
        return;
    };
    if rest.is_empty() {
        map.remove(first);
        return;
    }
    if let Some(child) = map.get_mut(first) {
        remove_path(child, rest);
        if child.as_object().is_some_and(Map::is_empty) {
            map.remove(first);
        }
    }
}

/// Drives a [`ProviderService`] the way a host does, without a wire protocol.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Get the list of data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate provider configuration, failing on error diagnostics.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration, failing on error diagnostics.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update a resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing object.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Validate a data source configuration, failing on error diagnostics.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_data_source_config(data_source_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Read a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Plan, create, then read back. Returns the state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Plan, update, then read back. Returns the state after read.
    ///
    /// A plan that requires replacement is refused with a validation error.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        if plan.requires_replace {
            return Err(ProviderError::Validation(format!(
                "plan for {} requires replacement",
                resource_type
            )));
        }
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Plan a delete, then delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, ProviderError> {
        let created = self.lifecycle_create(resource_type, initial_config).await?;
        let updated = self
            .lifecycle_update(resource_type, created, updated_config)
            .await?;
        self.lifecycle_delete(resource_type, updated.clone())
            .await?;
        Ok(updated)
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// Assert that a plan creates: it has changes and is not a replacement.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan has no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        changed_paths(plan)
    );
}

/// Assert that a plan requires replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not. Changed attributes: {:?}",
        changed_paths(plan)
    );
}

/// Assert that a plan updates in place.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan changes the attribute at `path`.
///
/// # Panics
///
/// Panics if no change has the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        changed_paths(plan)
    );
}

/// Assert that a plan leaves the attribute at `path` alone.
///
/// # Panics
///
/// Panics if a change has the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics.iter().filter(|d| d.is_error()).collect();
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that an error diagnostic is attached to `attribute`.
///
/// # Panics
///
/// Panics if no error diagnostic names the attribute.
pub fn assert_error_at(diagnostics: &[Diagnostic], attribute: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.attribute.as_deref() == Some(attribute)),
        "Expected an error at '{}', got errors at {:?}",
        attribute,
        diagnostics
            .iter()
            .filter(|d| d.is_error())
            .map(|d| &d.attribute)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinds::Catalog;
    use crate::provider::CrdProvider;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn gvr() -> GroupVersionResource {
        GroupVersionResource::new("example.com", "v1", "widgets")
    }

    fn id() -> ResourceIdentity {
        ResourceIdentity::new("default", "w")
    }

    fn options(manager: &str, force: bool) -> ApplyOptions {
        ApplyOptions {
            field_manager: manager.to_string(),
            force_conflicts: force,
        }
    }

    fn widget(size: i64) -> Value {
        json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "w", "namespace": "default"},
            "spec": {"size": size, "color": "blue"}
        })
    }

    #[tokio::test]
    async fn test_apply_creates_and_records_owners() {
        let fake = FakeApplyClient::new();
        let observed =
            assert_ok!(fake.apply(&gvr(), &id(), &widget(1), &options("a", false)).await);

        assert_eq!(observed["spec"]["size"], 1);
        assert!(observed["metadata"]["uid"].is_string());
        assert_eq!(observed["metadata"]["resourceVersion"], "1");
        assert_eq!(fake.field_owner(&gvr(), &id(), &["spec", "size"]), Some("a".to_string()));
        assert_eq!(fake.field_owner(&gvr(), &id(), &["metadata", "name"]), None);
    }

    #[tokio::test]
    async fn test_apply_conflict_without_force() {
        let fake = FakeApplyClient::new();
        assert_ok!(fake.apply(&gvr(), &id(), &widget(1), &options("other", false)).await);

        let err = assert_err!(fake.apply(&gvr(), &id(), &widget(2), &options("mine", false)).await);
        assert!(matches!(err, ProviderError::Conflict(_)));
        assert!(err.message().contains(".spec.size"));
        assert_eq!(fake.object(&gvr(), &id()).unwrap()["spec"]["size"], 1);
    }

    #[tokio::test]
    async fn test_apply_same_value_shares_ownership_without_conflict() {
        let fake = FakeApplyClient::new();
        assert_ok!(fake.apply(&gvr(), &id(), &widget(1), &options("other", false)).await);
        assert_ok!(fake.apply(&gvr(), &id(), &widget(1), &options("mine", false)).await);
    }

    #[tokio::test]
    async fn test_forced_apply_takes_ownership() {
        let fake = FakeApplyClient::new();
        assert_ok!(fake.apply(&gvr(), &id(), &widget(1), &options("other", false)).await);

        let observed =
            assert_ok!(fake.apply(&gvr(), &id(), &widget(2), &options("mine", true)).await);
        assert_eq!(observed["spec"]["size"], 2);
        assert_eq!(fake.field_owner(&gvr(), &id(), &["spec", "size"]), Some("mine".to_string()));
    }

    #[tokio::test]
    async fn test_apply_removes_fields_dropped_by_their_manager() {
        let fake = FakeApplyClient::new();
        assert_ok!(fake.apply(&gvr(), &id(), &widget(1), &options("a", false)).await);
        fake.set_status(&gvr(), &id(), json!({"phase": "Ready"}));

        let mut smaller = widget(1);
        smaller["spec"].as_object_mut().unwrap().remove("color");
        let observed = assert_ok!(fake.apply(&gvr(), &id(), &smaller, &options("a", false)).await);

        assert!(observed["spec"].get("color").is_none());
        assert_eq!(observed["status"]["phase"], "Ready");
        assert_eq!(observed["metadata"]["resourceVersion"], "2");
    }

    #[tokio::test]
    async fn test_get_and_delete() {
        let fake = FakeApplyClient::new();
        let err = assert_err!(fake.get(&gvr(), &id()).await);
        assert!(err.is_not_found());

        fake.insert(&gvr(), widget(3));
        assert_eq!(assert_ok!(fake.get(&gvr(), &id()).await)["spec"]["size"], 3);

        assert_ok!(fake.delete(&gvr(), &id(), Some(DeletionPropagation::Orphan)).await);
        assert_ok!(fake.delete(&gvr(), &id(), None).await);
        assert!(!fake.contains(&gvr(), &id()));
        assert_eq!(fake.delete_calls(), 2);
        assert_eq!(fake.last_propagation(), None);
    }

    #[tokio::test]
    async fn test_deletion_lag() {
        let fake = FakeApplyClient::new();
        fake.insert(&gvr(), widget(1));
        fake.set_deletion_lag(1);
        assert_ok!(fake.delete(&gvr(), &id(), None).await);

        let terminating = assert_ok!(fake.get(&gvr(), &id()).await);
        assert!(terminating["metadata"]["deletionTimestamp"].is_string());
        assert!(assert_err!(fake.get(&gvr(), &id()).await).is_not_found());
    }

    #[tokio::test]
    async fn test_fail_next() {
        let fake = FakeApplyClient::new();
        fake.fail_next(503, "etcdserver: leader changed");

        let err = assert_err!(fake.get(&gvr(), &id()).await);
        assert!(err.is_retryable());
        assert!(assert_err!(fake.get(&gvr(), &id()).await).is_not_found());
        assert_eq!(fake.get_calls(), 2);
    }

    fn tester() -> (ProviderTester<CrdProvider>, FakeApplyClient) {
        let fake = FakeApplyClient::new();
        let provider = CrdProvider::with_client(Catalog::builtin(), Arc::new(fake.clone()));
        (ProviderTester::new(provider), fake)
    }

    const MONITOR: &str = "k8s_monitoring_coreos_com_service_monitor_v1";

    fn monitor(interval: &str) -> Value {
        json!({
            "metadata": {"name": "api", "namespace": "monitoring"},
            "spec": {
                "selector": {"matchLabels": {"app": "api"}},
                "endpoints": [{"port": "metrics", "interval": interval}]
            }
        })
    }

    #[tokio::test]
    async fn test_tester_configure_and_validate() {
        let (tester, _) = tester();
        assert_ok!(tester.validate_provider_config(json!({"force_conflicts": true})).await);
        assert_ok!(tester.configure(json!({})).await);

        let err = assert_err!(tester.validate_resource_config(MONITOR, json!({"spec": {}})).await);
        match err {
            TestError::Diagnostics(diags) => {
                assert_error_at(&diags, "metadata");
                assert_error_at(&diags, "spec.selector");
            },
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_tester_resource_types() {
        let (tester, _) = tester();
        assert!(tester.resource_types().contains(&MONITOR.to_string()));
        assert!(tester.data_source_types().contains(&format!("{}_manifest", MONITOR)));
        assert!(tester.schema().resources.contains_key(MONITOR));
    }

    #[tokio::test]
    async fn test_tester_lifecycle_crud() {
        let (tester, fake) = tester();
        let updated = assert_ok!(
            tester
                .lifecycle_crud(MONITOR, monitor("30s"), monitor("15s"))
                .await
        );

        assert_eq!(updated["spec"]["endpoints"][0]["interval"], "15s");
        assert_eq!(fake.apply_calls(), 2);
        assert_eq!(fake.delete_calls(), 1);
        assert!(!fake.contains(
            &GroupVersionResource::new("monitoring.coreos.com", "v1", "servicemonitors"),
            &ResourceIdentity::new("monitoring", "api")
        ));
    }

    #[tokio::test]
    async fn test_tester_refuses_replacement_in_update() {
        let (tester, _) = tester();
        let created = assert_ok!(tester.lifecycle_create(MONITOR, monitor("30s")).await);

        let mut renamed = monitor("30s");
        renamed["metadata"]["name"] = json!("api-v2");
        let err = assert_err!(tester.lifecycle_update(MONITOR, created, renamed).await);
        assert!(err.message().contains("requires replacement"));
    }

    #[test]
    fn test_assert_no_errors() {
        assert_no_errors(&[Diagnostic::warning("Just a warning")]);
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("metadata.name"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);

        let display = format!("{}", err);
        assert!(display.contains("First error"));
        assert!(display.contains("Second error"));
        assert!(display.contains("metadata.name"));
        assert!(display.contains("More info"));
    }
}
