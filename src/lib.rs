//! Kubernetes custom resources as managed resources and data sources.
//!
//! Every custom resource kind follows one pattern: a schema describing the
//! object's identity, labels and payload; a generic [`resource::ResourceModel`]
//! carrying that document; and a lifecycle that applies it with server-side
//! apply, reads it back, and deletes it with an optional bounded wait.
//!
//! # Overview
//!
//! - **Kinds** ([`kinds`]): per-kind descriptors and the built-in catalog
//! - **Apply client** ([`client`]): server-side apply, get and delete over a
//!   dynamic group/version/resource
//! - **Wait loop** ([`wait`]): fixed-interval polling for deletion and for
//!   JSONPath conditions after create or update
//! - **Import** ([`import`]): `namespace/name` identifiers
//! - **Provider** ([`provider`]): the [`ProviderService`] surface and
//!   [`CrdProvider`], which composes all of the above
//! - **Testing** ([`testing`]): an in-memory cluster and a provider harness
//!
//! # Quick Start
//!
//! ```no_run
//! use kube_crd_provider::{init_logging, CrdProvider, ProviderService};
//! use kube_crd_provider::kinds::{Catalog, ResourceKind};
//! use kube_crd_provider::schema::{Attribute, Block};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     init_logging();
//!
//!     let catalog = Catalog::builtin().register(
//!         ResourceKind::new("example.com", "v1", "Widget", "widgets")
//!             .with_payload(
//!                 "spec",
//!                 Block::new().with_attribute("size", Attribute::optional_int64()),
//!             ),
//!     );
//!     let provider = CrdProvider::new(catalog);
//!     provider.configure(json!({"field_manager": "platform"})).await?;
//!
//!     let state = provider
//!         .create(
//!             "k8s_example_com_widget_v1",
//!             json!({
//!                 "metadata": {"name": "w", "namespace": "default"},
//!                 "spec": {"size": 3},
//!                 "wait_for_upsert": [
//!                     {"jsonpath": ".status.phase", "value": "Ready", "timeout": 120}
//!                 ]
//!             }),
//!         )
//!         .await?;
//!     println!("created {}", state["id"]);
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle
//!
//! - **Create / Update**: render `apiVersion`, `kind`, `metadata` and payload,
//!   server-side apply it with the resolved field manager, refresh state from
//!   the response, then wait for every `wait_for_upsert` condition
//! - **Read**: get the object; a missing object is [`ProviderError::NotFound`]
//! - **Delete**: delete with the configured propagation policy, then poll until
//!   the object is gone or `wait_for_delete.timeout` elapses (default 30s)
//! - **Import**: parse `namespace/name` and adopt the observed object

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod import;
pub mod jsonpath;
pub mod kinds;
pub mod logging;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod testing;
pub mod types;
pub mod validation;
pub mod wait;

// Re-export main types at crate root
pub use client::{ApplyClient, KubeApplyClient};
pub use config::ProviderConfig;
pub use error::ProviderError;
pub use import::parse_import_id;
pub use kinds::{Catalog, ResourceKind};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{CrdProvider, ProviderService};
pub use resource::{ResourceMetadata, ResourceModel};
pub use schema::ProviderSchema;
pub use types::{
    ApplyDefaults, ApplyOptions, AttributeChange, DeletionPropagation, GroupVersionResource,
    ImportedResource, PlanResult, ProviderMetadata, ResourceIdentity, WaitForUpsert, WaitSpec,
};
pub use validation::{is_valid, validate, validate_result};
pub use wait::{wait_for_absence, wait_for_upsert, WaitOutcome};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tracing;
