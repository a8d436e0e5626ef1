//! Kubernetes access for the resource lifecycle.
//!
//! [`ApplyClient`] is the seam between lifecycle logic and the API server:
//! server-side apply, get and delete against a dynamic group/version/resource.
//! [`KubeApplyClient`] implements it on top of `kube`'s dynamic API;
//! [`crate::testing::FakeApplyClient`] implements it in memory.

use std::path::Path;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::ProviderError;
use crate::types::{ApplyOptions, DeletionPropagation, GroupVersionResource, ResourceIdentity};

/// Operations the lifecycle needs from the Kubernetes API.
///
/// Implementations never retry: every failure is returned to the caller,
/// classified as a [`ProviderError`]. Not-found is reported as
/// [`ProviderError::NotFound`] by `get` and swallowed by `delete`.
#[async_trait]
pub trait ApplyClient: Send + Sync {
    /// Server-side apply `document` and return the server's observed object.
    async fn apply(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        document: &Value,
        options: &ApplyOptions,
    ) -> Result<Value, ProviderError>;

    /// Fetch the observed object.
    async fn get(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
    ) -> Result<Value, ProviderError>;

    /// Request deletion. Succeeds if the object is already gone.
    async fn delete(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        propagation: Option<DeletionPropagation>,
    ) -> Result<(), ProviderError>;
}

/// [`ApplyClient`] backed by a `kube` client.
#[derive(Clone)]
pub struct KubeApplyClient {
    client: Client,
}

impl KubeApplyClient {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig and/or context, or infer
    /// one from the environment (in-cluster service account, `KUBECONFIG`,
    /// `~/.kube/config`).
    pub async fn connect(
        kubeconfig: Option<&Path>,
        context: Option<&str>,
    ) -> Result<Self, ProviderError> {
        let options = KubeConfigOptions {
            context: context.map(str::to_string),
            ..KubeConfigOptions::default()
        };

        let config = match (kubeconfig, context) {
            (Some(path), _) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    ProviderError::Configuration(format!(
                        "cannot read kubeconfig {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| ProviderError::Configuration(e.to_string()))?
            },
            (None, Some(_)) => kube::Config::from_kubeconfig(&options)
                .await
                .map_err(|e| ProviderError::Configuration(e.to_string()))?,
            (None, None) => kube::Config::infer()
                .await
                .map_err(|e| ProviderError::Configuration(e.to_string()))?,
        };

        debug!(cluster_url = %config.cluster_url, "Connecting to Kubernetes");
        let client = Client::try_from(config)
            .map_err(|e| ProviderError::from_kube("connect", "cluster", e))?;
        Ok(Self::new(client))
    }

    fn api(&self, gvr: &GroupVersionResource, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            api_version: gvr.api_version(),
            kind: String::new(),
            plural: gvr.resource.clone(),
        };
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

#[async_trait]
impl ApplyClient for KubeApplyClient {
    #[instrument(
        skip_all,
        fields(gvr = %gvr, id = %identity, field_manager = %options.field_manager)
    )]
    async fn apply(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        document: &Value,
        options: &ApplyOptions,
    ) -> Result<Value, ProviderError> {
        let mut params = PatchParams::apply(&options.field_manager);
        if options.force_conflicts {
            params = params.force();
        }

        let observed = self
            .api(gvr, &identity.namespace)
            .patch(&identity.name, &params, &Patch::Apply(document))
            .await
            .map_err(|e| ProviderError::from_kube("apply", &identity.to_string(), e))?;
        Ok(serde_json::to_value(observed)?)
    }

    #[instrument(skip_all, fields(gvr = %gvr, id = %identity))]
    async fn get(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
    ) -> Result<Value, ProviderError> {
        let observed = self
            .api(gvr, &identity.namespace)
            .get(&identity.name)
            .await
            .map_err(|e| ProviderError::from_kube("get", &identity.to_string(), e))?;
        Ok(serde_json::to_value(observed)?)
    }

    #[instrument(skip_all, fields(gvr = %gvr, id = %identity))]
    async fn delete(
        &self,
        gvr: &GroupVersionResource,
        identity: &ResourceIdentity,
        propagation: Option<DeletionPropagation>,
    ) -> Result<(), ProviderError> {
        let params = DeleteParams {
            propagation_policy: propagation.map(Into::into),
            ..DeleteParams::default()
        };

        match self
            .api(gvr, &identity.namespace)
            .delete(&identity.name, &params)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => match ProviderError::from_kube("delete", &identity.to_string(), e) {
                err if err.is_not_found() => {
                    debug!("Object already absent");
                    Ok(())
                },
                err => Err(err),
            },
        }
    }
}
