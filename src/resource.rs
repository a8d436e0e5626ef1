//! The generic resource model carried through every lifecycle operation.
//!
//! A [`ResourceModel`] is the state stored by the host for one object: its
//! identity and labels, the per-resource lifecycle knobs, and the kind's
//! payload (`spec` and friends) as an opaque JSON document. The model turns
//! into a Kubernetes manifest for apply and is refreshed from whatever the
//! server returns.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::kinds::ResourceKind;
use crate::types::{DeletionPropagation, ResourceIdentity, WaitForUpsert, WaitSpec};

/// Identity plus labels and annotations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// Object name; write-once.
    pub name: String,
    /// Object namespace; write-once.
    pub namespace: String,
    /// Labels, or `None` when unmanaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    /// Annotations, or `None` when unmanaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ResourceMetadata {
    /// Metadata with only an identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: None,
            annotations: None,
        }
    }

    /// The identity of the object.
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::new(self.namespace.clone(), self.name.clone())
    }

    fn to_object_meta(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: self.labels.clone().filter(|m| !m.is_empty()),
            annotations: self.annotations.clone().filter(|m| !m.is_empty()),
            ..ObjectMeta::default()
        }
    }

    /// Take identity, labels and annotations from the server's metadata.
    ///
    /// Empty observed maps stay `None` when they were never set, so an
    /// unmanaged `labels` attribute does not flip between null and `{}`.
    fn refresh(&mut self, observed: ObjectMeta) -> Result<(), ProviderError> {
        let missing = |field: &str| {
            ProviderError::Validation(format!("observed object has no metadata.{}", field))
        };
        self.name = observed.name.ok_or_else(|| missing("name"))?;
        self.namespace = observed.namespace.ok_or_else(|| missing("namespace"))?;
        self.labels = merge_map(self.labels.take(), observed.labels);
        self.annotations = merge_map(self.annotations.take(), observed.annotations);
        Ok(())
    }
}

fn merge_map(
    prior: Option<BTreeMap<String, String>>,
    observed: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match observed {
        Some(map) if !map.is_empty() => Some(map),
        _ => prior.map(|_| BTreeMap::new()),
    }
}

/// State of one custom resource as stored by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceModel {
    /// Computed `namespace/name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Identity, labels and annotations.
    pub metadata: ResourceMetadata,
    /// Per-resource field manager override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_manager: Option<String>,
    /// Per-resource conflict forcing override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_conflicts: Option<bool>,
    /// Propagation policy sent with delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_propagation: Option<DeletionPropagation>,
    /// Conditions awaited after create and update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_upsert: Option<Vec<WaitForUpsert>>,
    /// Bounds of the wait after delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_delete: Option<WaitSpec>,
    /// Kind-specific top-level fields, e.g. `spec`.
    #[serde(flatten)]
    pub payload: BTreeMap<String, Value>,
}

impl ResourceModel {
    /// A model with only metadata.
    pub fn new(metadata: ResourceMetadata) -> Self {
        Self {
            id: None,
            metadata,
            field_manager: None,
            force_conflicts: None,
            deletion_propagation: None,
            wait_for_upsert: None,
            wait_for_delete: None,
            payload: BTreeMap::new(),
        }
    }

    /// Decode host state.
    ///
    /// Null object fields are dropped first, so an unset optional attribute
    /// decodes exactly like an absent one and picks up its default.
    pub fn from_state(state: Value) -> Result<Self, ProviderError> {
        let state = prune_nulls(&state).unwrap_or(Value::Null);
        Ok(serde_json::from_value(state)?)
    }

    /// Encode as host state.
    pub fn to_state(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Build a model for an existing object, as done on import.
    pub fn from_observed(kind: &ResourceKind, observed: &Value) -> Result<Self, ProviderError> {
        let mut model = Self::new(ResourceMetadata::new("", ""));
        model.refresh(kind, observed)?;
        Ok(model)
    }

    /// The object's identity.
    pub fn identity(&self) -> ResourceIdentity {
        self.metadata.identity()
    }

    /// Set a payload field.
    pub fn with_payload(mut self, field: impl Into<String>, value: Value) -> Self {
        self.payload.insert(field.into(), value);
        self
    }

    /// The apply document: `apiVersion`, `kind`, `metadata` and payload with nulls removed.
    pub fn manifest(&self, kind: &ResourceKind) -> Result<Value, ProviderError> {
        let mut doc = Map::new();
        doc.insert("apiVersion".into(), Value::String(kind.gvr.api_version()));
        doc.insert("kind".into(), Value::String(kind.kind.clone()));
        doc.insert(
            "metadata".into(),
            serde_json::to_value(self.metadata.to_object_meta())?,
        );
        for (field, value) in &self.payload {
            if let Some(value) = prune_nulls(value) {
                doc.insert(field.clone(), value);
            }
        }
        Ok(Value::Object(doc))
    }

    /// Replace identity, labels, annotations and payload with the server's view.
    ///
    /// The payload is projected through the kind's schema, so server-only
    /// fields such as `status` never reach state. Lifecycle knobs are kept.
    pub fn refresh(&mut self, kind: &ResourceKind, observed: &Value) -> Result<(), ProviderError> {
        let meta = observed.get("metadata").cloned().unwrap_or(Value::Null);
        let meta: ObjectMeta = serde_json::from_value(meta)?;
        self.metadata.refresh(meta)?;

        self.payload = kind
            .payload
            .iter()
            .filter_map(|(field, block)| {
                observed
                    .get(field)
                    .filter(|v| !v.is_null())
                    .map(|v| (field.clone(), block.project(v)))
            })
            .collect();
        self.id = Some(self.identity().to_string());
        Ok(())
    }
}

/// Remove null object fields at any depth; `None` if `value` itself is null.
///
/// Array elements keep their positions: a null element stays null and only
/// the objects inside arrays are pruned.
pub fn prune_nulls(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(prune_fields(other)),
    }
}

fn prune_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), prune_fields(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(prune_fields).collect()),
        other => other.clone(),
    }
}
