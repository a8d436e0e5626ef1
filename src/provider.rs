//! The provider surface and the custom resource provider behind it.
//!
//! [`ProviderService`] is the interface a host drives: schema, configuration,
//! validation, planning, the resource lifecycle, import and data sources.
//! [`CrdProvider`] implements it for every kind in a [`Catalog`], talking to
//! the cluster through an [`ApplyClient`].

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{ApplyClient, KubeApplyClient};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::import::parse_import_id;
use crate::kinds::{Catalog, ResourceKind};
use crate::plan::{plan_create, plan_delete, plan_update};
use crate::resource::ResourceModel;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::types::{ApplyDefaults, ImportedResource, PlanResult, ProviderMetadata, ResourceIdentity};
use crate::validation::validate;
use crate::wait::{wait_for_absence, wait_for_upsert, WaitOutcome};

/// Operations a host calls on a provider.
///
/// States and configurations are JSON documents shaped by the schemas
/// returned from [`ProviderService::schema`].
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Return the provider's schema including all resources and data sources.
    fn schema(&self) -> ProviderSchema;

    /// Names of the served resources and data sources, derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
        }
    }

    /// Validate the provider configuration before configuring.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Configure the provider. Problems are returned as error diagnostics.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Validate a resource's configuration before planning.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Plan changes for a resource. A null `proposed_state` plans a delete.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a resource and return its new state.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Read the current state of a resource.
    ///
    /// Returns [`ProviderError::NotFound`] when the object is gone so the
    /// host can drop it from state.
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Update a resource in place and return its new state.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Adopt an existing object into state.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::UnknownResource(format!(
            "import not supported for resource type: {}",
            resource_type
        )))
    }

    /// Validate a data source's configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Read a data source.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "unknown data source type: {}",
            data_source_type
        )))
    }
}

#[derive(Default)]
struct Connection {
    client: Option<Arc<dyn ApplyClient>>,
    defaults: ApplyDefaults,
}

/// Serves custom resource kinds from a [`Catalog`].
///
/// Until [`ProviderService::configure`] succeeds, resource operations fail
/// with [`ProviderError::NotConfigured`]. A client passed to
/// [`CrdProvider::with_client`] is kept across `configure` calls; otherwise
/// `configure` connects with [`KubeApplyClient::connect`].
pub struct CrdProvider {
    catalog: Catalog,
    injected: bool,
    connection: RwLock<Connection>,
}

impl CrdProvider {
    /// A provider that connects to the cluster on `configure`.
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            injected: false,
            connection: RwLock::new(Connection::default()),
        }
    }

    /// A provider that uses `client` for every call.
    pub fn with_client(catalog: Catalog, client: Arc<dyn ApplyClient>) -> Self {
        Self {
            catalog,
            injected: true,
            connection: RwLock::new(Connection {
                client: Some(client),
                defaults: ApplyDefaults::default(),
            }),
        }
    }

    /// The kinds this provider serves.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn kind(&self, resource_type: &str) -> Result<&ResourceKind, ProviderError> {
        self.catalog
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    async fn client(&self) -> Result<(Arc<dyn ApplyClient>, ApplyDefaults), ProviderError> {
        let connection = self.connection.read().await;
        match &connection.client {
            Some(client) => Ok((client.clone(), connection.defaults.clone())),
            None => Err(ProviderError::NotConfigured(
                "configure must succeed before resources are managed".to_string(),
            )),
        }
    }

    /// Apply `model`, refresh it from the response and run its upsert waits.
    async fn apply(
        &self,
        kind: &ResourceKind,
        mut model: ResourceModel,
    ) -> Result<Value, ProviderError> {
        let (client, defaults) = self.client().await?;
        let identity = model.identity();
        let options = defaults.resolve(model.field_manager.as_deref(), model.force_conflicts);
        let manifest = model.manifest(kind)?;

        debug!(
            field_manager = %options.field_manager,
            force = options.force_conflicts,
            "Applying manifest"
        );
        let observed = client.apply(&kind.gvr, &identity, &manifest, &options).await?;
        model.refresh(kind, &observed)?;

        if let Some(conditions) = model.wait_for_upsert.as_deref() {
            wait_for_upsert(client.as_ref(), &kind.gvr, &identity, conditions).await?;
        }
        model.to_state()
    }

    async fn read_object(
        &self,
        kind: &ResourceKind,
        identity: &ResourceIdentity,
    ) -> Result<ResourceModel, ProviderError> {
        let (client, _) = self.client().await?;
        let observed = client.get(&kind.gvr, identity).await?;
        ResourceModel::from_observed(kind, &observed)
    }

    fn render_manifest(kind: &ResourceKind, mut config: Value) -> Result<Value, ProviderError> {
        if let Value::Object(map) = &mut config {
            map.remove("yaml");
        }
        let mut model = ResourceModel::from_state(config)?;
        model.id = Some(model.identity().to_string());
        let yaml = serde_yaml::to_string(&model.manifest(kind)?)?;

        let mut state = model.to_state()?;
        if let Value::Object(map) = &mut state {
            map.insert("yaml".to_string(), Value::String(yaml));
        }
        Ok(state)
    }

    fn data_source_identity(config: &Value) -> Result<ResourceIdentity, ProviderError> {
        let field = |name: &str| {
            config
                .get("metadata")
                .and_then(|m| m.get(name))
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProviderError::Validation(format!("metadata.{} is required", name)))
        };
        Ok(ResourceIdentity::new(field("namespace")?, field("name")?))
    }
}

fn log_outcome<T>(operation: &str, result: &Result<T, ProviderError>) {
    match result {
        Ok(_) => info!("{} completed", operation),
        Err(e) if e.is_not_found() => info!(error = %e, "{} found no object", operation),
        Err(e) => error!(error = %e, retryable = e.is_retryable(), "{} failed", operation),
    }
}

#[async_trait::async_trait]
impl ProviderService for CrdProvider {
    fn schema(&self) -> ProviderSchema {
        self.catalog.iter().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, kind| {
                schema
                    .with_resource(kind.type_name.clone(), kind.resource_schema())
                    .with_data_source(kind.type_name.clone(), kind.data_source_schema())
                    .with_data_source(kind.manifest_type_name(), kind.manifest_schema())
            },
        )
    }

    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validate(&ProviderConfig::schema(), &config))
    }

    #[instrument(skip_all, name = "provider.configure")]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validate(&ProviderConfig::schema(), &config);
        if !diagnostics.is_empty() {
            warn!(diagnostics = diagnostics.len(), "Configure rejected");
            return Ok(diagnostics);
        }

        let settings = match ProviderConfig::load(&config) {
            Ok(settings) => settings,
            Err(e) => {
                error!(error = %e, "Configure failed");
                return Ok(vec![e.to_diagnostic()]);
            },
        };

        let client: Option<Arc<dyn ApplyClient>> = if self.injected {
            None
        } else {
            let connected = KubeApplyClient::connect(
                settings.kubeconfig.as_deref(),
                settings.context.as_deref(),
            )
            .await;
            match connected {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    error!(error = %e, "Configure failed");
                    return Ok(vec![e.to_diagnostic()]);
                },
            }
        };

        let mut connection = self.connection.write().await;
        if let Some(client) = client {
            connection.client = Some(client);
        }
        connection.defaults = settings.apply_defaults();
        info!(
            field_manager = %settings.field_manager,
            force_conflicts = settings.force_conflicts,
            kinds = self.catalog.len(),
            "Configure completed"
        );
        Ok(vec![])
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let kind = self.kind(resource_type)?;
        let diagnostics = validate(&kind.resource_schema(), &config);
        if !diagnostics.is_empty() {
            warn!(
                resource_type,
                diagnostics = diagnostics.len(),
                "Resource configuration is invalid"
            );
        }
        Ok(diagnostics)
    }

    #[instrument(skip_all, name = "provider.plan", fields(resource_type = %resource_type))]
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let kind = self.kind(resource_type)?;
        let plan = match prior_state {
            None => plan_create(proposed_state),
            Some(prior) if proposed_state.is_null() => plan_delete(&prior),
            Some(prior) => plan_update(&kind.resource_schema(), &prior, proposed_state),
        };
        debug!(
            changes = plan.changes.len(),
            requires_replace = plan.requires_replace,
            "Plan completed"
        );
        Ok(plan)
    }

    #[instrument(skip_all, name = "provider.create", fields(resource_type = %resource_type))]
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = self.kind(resource_type)?;
        let model = ResourceModel::from_state(planned_state)?;
        debug!(id = %model.identity(), "Create called");

        let result = self.apply(kind, model).await;
        log_outcome("Create", &result);
        result
    }

    #[instrument(skip_all, name = "provider.read", fields(resource_type = %resource_type))]
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = self.kind(resource_type)?;
        let mut model = ResourceModel::from_state(current_state)?;
        let identity = model.identity();
        debug!(id = %identity, "Read called");

        let result: Result<_, ProviderError> = async {
            let (client, _) = self.client().await?;
            let observed = client.get(&kind.gvr, &identity).await?;
            model.refresh(kind, &observed)?;
            model.to_state()
        }
        .await;
        log_outcome("Read", &result);
        result
    }

    #[instrument(skip_all, name = "provider.update", fields(resource_type = %resource_type))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let kind = self.kind(resource_type)?;
        let prior = ResourceModel::from_state(prior_state)?;
        let planned = ResourceModel::from_state(planned_state)?;
        debug!(id = %prior.identity(), "Update called");

        if prior.identity() != planned.identity() {
            return Err(ProviderError::Validation(format!(
                "cannot change identity of {} to {} in place; the object must be replaced",
                prior.identity(),
                planned.identity()
            )));
        }

        let result = self.apply(kind, planned).await;
        log_outcome("Update", &result);
        result
    }

    #[instrument(skip_all, name = "provider.delete", fields(resource_type = %resource_type))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let kind = self.kind(resource_type)?;
        let model = ResourceModel::from_state(current_state)?;
        let identity = model.identity();
        let wait = model.wait_for_delete.unwrap_or_default();
        debug!(id = %identity, propagation = ?model.deletion_propagation, "Delete called");

        let result: Result<_, ProviderError> = async {
            let (client, _) = self.client().await?;
            client
                .delete(&kind.gvr, &identity, model.deletion_propagation)
                .await?;
            let outcome = wait_for_absence(client.as_ref(), &kind.gvr, &identity, &wait).await?;
            if outcome == WaitOutcome::NotMet {
                warn!(id = %identity, "Object still present after delete; not waiting");
            }
            Ok(())
        }
        .await;
        log_outcome("Delete", &result);
        result
    }

    #[instrument(
        skip_all,
        name = "provider.import",
        fields(resource_type = %resource_type, id = %id)
    )]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let kind = self.kind(resource_type)?;
        let identity = parse_import_id(id)?;

        let result: Result<_, ProviderError> = async {
            let model = self.read_object(kind, &identity).await?;
            Ok(vec![ImportedResource::new(resource_type, model.to_state()?)])
        }
        .await;
        log_outcome("Import", &result);
        result
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let schema = if let Some(kind) = self.catalog.get_manifest(data_source_type) {
            kind.manifest_schema()
        } else {
            self.kind(data_source_type)?.data_source_schema()
        };
        Ok(validate(&schema, &config))
    }

    #[instrument(
        skip_all,
        name = "provider.read_data_source",
        fields(data_source_type = %data_source_type)
    )]
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        if let Some(kind) = self.catalog.get_manifest(data_source_type) {
            return Self::render_manifest(kind, config);
        }

        let kind = self.kind(data_source_type)?;
        let identity = Self::data_source_identity(&config)?;
        let result: Result<_, ProviderError> =
            async { self.read_object(kind, &identity).await?.to_state() }.await;
        log_outcome("ReadDataSource", &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApplyClient;
    use crate::types::{DeletionPropagation, GroupVersionResource};
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    const CERT: &str = "k8s_cert_manager_io_certificate_v1";

    fn gvr() -> GroupVersionResource {
        GroupVersionResource::new("cert-manager.io", "v1", "certificates")
    }

    fn web() -> ResourceIdentity {
        ResourceIdentity::new("default", "web")
    }

    fn provider() -> (CrdProvider, FakeApplyClient) {
        let fake = FakeApplyClient::new();
        let provider = CrdProvider::with_client(Catalog::builtin(), Arc::new(fake.clone()));
        (provider, fake)
    }

    fn planned(name: &str) -> Value {
        json!({
            "id": format!("default/{}", name),
            "metadata": {"name": name, "namespace": "default", "labels": {"app": name}},
            "spec": {
                "secretName": format!("{}-tls", name),
                "issuerRef": {"name": "ca", "kind": "ClusterIssuer"}
            }
        })
    }

    #[tokio::test]
    async fn test_schema_lists_every_kind() {
        let (provider, _) = provider();
        let metadata = provider.metadata();
        assert_eq!(metadata.resources.len(), 3);
        assert_eq!(metadata.data_sources.len(), 6);
        assert!(metadata.data_sources.contains(&format!("{}_manifest", CERT)));
        assert!(provider.schema().provider.block.attributes.contains_key("field_manager"));
    }

    #[tokio::test]
    async fn test_unconfigured_provider() {
        let provider = CrdProvider::new(Catalog::builtin());
        let err = assert_err!(provider.create(CERT, planned("web")).await);
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let (provider, _) = provider();
        let err = assert_err!(provider.read("k8s_example_com_widget_v1", planned("web")).await);
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_configure_sets_apply_defaults() {
        let (provider, fake) = provider();
        let diagnostics =
            assert_ok!(provider.configure(json!({"field_manager": "platform"})).await);
        assert!(diagnostics.is_empty());

        assert_ok!(provider.create(CERT, planned("web")).await);
        assert_eq!(
            fake.field_owner(&gvr(), &web(), &["spec", "secretName"]),
            Some("platform".to_string())
        );
    }

    #[tokio::test]
    async fn test_configure_reports_invalid_config() {
        let (provider, _) = provider();
        let diagnostics = assert_ok!(provider.configure(json!({"field_manager": ""})).await);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("field_manager"));
    }

    #[tokio::test]
    async fn test_create_returns_refreshed_state() {
        let (provider, fake) = provider();
        let state = assert_ok!(provider.create(CERT, planned("web")).await);

        assert_eq!(state["id"], "default/web");
        assert_eq!(state["spec"]["secretName"], "web-tls");
        assert!(state.get("status").is_none());
        assert_eq!(fake.apply_calls(), 1);
    }

    #[tokio::test]
    async fn test_resource_field_manager_overrides_default() {
        let (provider, fake) = provider();
        let mut state = planned("web");
        state["field_manager"] = json!("team-a");

        let state = assert_ok!(provider.create(CERT, state).await);
        assert_eq!(state["field_manager"], "team-a");
        assert_eq!(
            fake.field_owner(&gvr(), &web(), &["metadata", "labels", "app"]),
            Some("team-a".to_string())
        );
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let (provider, _) = provider();
        let err = assert_err!(provider.read(CERT, planned("gone")).await);
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_rejects_identity_change() {
        let (provider, fake) = provider();
        let err = assert_err!(provider.update(CERT, planned("web"), planned("api")).await);
        assert!(matches!(err, ProviderError::Validation(_)));
        assert_eq!(fake.apply_calls(), 0);
    }

    #[tokio::test]
    async fn test_delete_sends_propagation_and_waits() {
        let (provider, fake) = provider();
        let mut state = assert_ok!(provider.create(CERT, planned("web")).await);
        state["deletion_propagation"] = json!("Foreground");
        state["wait_for_delete"] = json!({"timeout": 0, "poll_interval": 0});

        assert_ok!(provider.delete(CERT, state).await);
        assert_eq!(fake.last_propagation(), Some(DeletionPropagation::Foreground));
        assert!(!fake.contains(&gvr(), &web()));
        assert_eq!(fake.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_import_checks_id_before_calling_the_cluster() {
        let (provider, fake) = provider();
        let err = assert_err!(provider.import_resource(CERT, "web").await);
        assert!(matches!(err, ProviderError::InvalidImportId(_)));
        assert_eq!(fake.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_manifest_data_source_renders_yaml() {
        let (provider, fake) = provider();
        let mut config = planned("web");
        config["id"] = Value::Null;
        config["yaml"] = Value::Null;

        let manifest_type = format!("{}_manifest", CERT);
        let diagnostics = assert_ok!(
            provider
                .validate_data_source_config(&manifest_type, config.clone())
                .await
        );
        assert!(diagnostics.is_empty());

        let state = assert_ok!(provider.read_data_source(&manifest_type, config).await);
        let yaml = state["yaml"].as_str().unwrap();
        assert!(yaml.contains("apiVersion: cert-manager.io/v1"));
        assert!(yaml.contains("kind: Certificate"));
        assert!(yaml.contains("secretName: web-tls"));
        assert_eq!(state["id"], "default/web");
        assert_eq!(fake.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_data_source_reads_existing_object() {
        let (provider, _) = provider();
        assert_ok!(provider.create(CERT, planned("web")).await);

        let state = assert_ok!(
            provider
                .read_data_source(
                    CERT,
                    json!({"metadata": {"name": "web", "namespace": "default"}})
                )
                .await
        );
        assert_eq!(state["spec"]["secretName"], "web-tls");
        assert_eq!(state["metadata"]["labels"]["app"], "web");

        let config = json!({"metadata": {"name": "web"}});
        let err = assert_err!(provider.read_data_source(CERT, config).await);
        assert!(err.message().contains("metadata.namespace"));
    }
}
