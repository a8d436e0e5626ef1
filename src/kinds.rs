//! Custom resource kinds served by the provider.
//!
//! A [`ResourceKind`] pairs an API endpoint with the schema of the kind's
//! payload. Each kind yields three host-facing types:
//!
//! - `<type_name>`: the managed resource,
//! - `<type_name>` as a data source: reads an existing object,
//! - `<type_name>_manifest`: renders the object as YAML without applying it.
//!
//! [`Catalog::builtin`] ships a few widely deployed CRDs; additional kinds
//! are added with [`Catalog::register`].

use std::collections::BTreeMap;

use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, NestedBlock, Schema, Validator,
};
use crate::types::{DeletionPropagation, GroupVersionResource};

/// Suffix of the YAML-rendering data source of a kind.
pub const MANIFEST_SUFFIX: &str = "_manifest";

/// One custom resource kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceKind {
    /// Host-facing type name, e.g. `k8s_cert_manager_io_certificate_v1`.
    pub type_name: String,
    /// REST endpoint of the kind.
    pub gvr: GroupVersionResource,
    /// `kind` field of the objects.
    pub kind: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// Top-level payload fields and their schemas.
    pub payload: BTreeMap<String, NestedBlock>,
}

impl ResourceKind {
    /// Describe a kind served at `group/version/plural`.
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            type_name: type_name(group, version, kind),
            gvr: GroupVersionResource::new(group, version, plural),
            kind: kind.to_string(),
            description: None,
            payload: BTreeMap::new(),
        }
    }

    /// Add a top-level payload block such as `spec`.
    pub fn with_payload(mut self, field: impl Into<String>, block: Block) -> Self {
        self.payload.insert(field.into(), NestedBlock::single(block));
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Type name of the YAML-rendering data source.
    pub fn manifest_type_name(&self) -> String {
        format!("{}{}", self.type_name, MANIFEST_SUFFIX)
    }

    fn with_payload_blocks(&self, mut schema: Schema) -> Schema {
        for (field, block) in &self.payload {
            schema = schema.with_block(field.clone(), block.clone());
        }
        match &self.description {
            Some(description) => schema.with_description(description.clone()),
            None => schema,
        }
    }

    /// Schema of the managed resource.
    pub fn resource_schema(&self) -> Schema {
        let schema = Schema::v0()
            .with_attribute(
                "id",
                Attribute::computed_string().with_description("`namespace/name` of the object."),
            )
            .with_block("metadata", metadata_block(false))
            .with_attribute(
                "field_manager",
                Attribute::optional_string()
                    .with_description("Field manager recorded by server-side apply.")
                    .with_validator(Validator::NotEmpty),
            )
            .with_attribute(
                "force_conflicts",
                Attribute::optional_bool()
                    .with_description("Take ownership of fields managed by others."),
            )
            .with_attribute(
                "deletion_propagation",
                Attribute::optional_string()
                    .with_description("Garbage collection policy for dependents on delete.")
                    .with_validator(Validator::OneOf(
                        DeletionPropagation::VALUES
                            .iter()
                            .map(|v| v.to_string())
                            .collect(),
                    )),
            )
            .with_block(
                "wait_for_upsert",
                NestedBlock::list(
                    wait_block()
                        .with_attribute(
                            "jsonpath",
                            Attribute::required_string().with_validator(Validator::JsonPath),
                        )
                        .with_attribute("value", Attribute::required_string()),
                ),
            )
            .with_block("wait_for_delete", NestedBlock::single(wait_block()));
        self.with_payload_blocks(schema)
    }

    /// Schema of the data source reading an existing object.
    pub fn data_source_schema(&self) -> Schema {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_block("metadata", metadata_block(true));
        self.with_payload_blocks(schema)
    }

    /// Schema of the manifest-rendering data source.
    pub fn manifest_schema(&self) -> Schema {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "yaml",
                Attribute::computed_string().with_description("The rendered manifest."),
            )
            .with_block("metadata", metadata_block(false));
        self.with_payload_blocks(schema)
    }
}

fn metadata_block(read_only_maps: bool) -> NestedBlock {
    let (labels, annotations) = if read_only_maps {
        let computed = || {
            Attribute::new(
                AttributeType::map(AttributeType::String),
                AttributeFlags::computed(),
            )
        };
        (computed(), computed())
    } else {
        (
            Attribute::optional_string_map(),
            Attribute::optional_string_map(),
        )
    };

    NestedBlock::single(
        Block::new()
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_requires_replace()
                    .with_validator(Validator::Dns1123Subdomain),
            )
            .with_attribute(
                "namespace",
                Attribute::required_string()
                    .with_requires_replace()
                    .with_validator(Validator::Dns1123Label),
            )
            .with_attribute("labels", labels)
            .with_attribute("annotations", annotations),
    )
    .with_min_items(1)
}

fn wait_block() -> Block {
    Block::new()
        .with_attribute(
            "timeout",
            Attribute::optional_int64()
                .with_description("Seconds to wait; 0 checks once.")
                .with_validator(Validator::NonNegative),
        )
        .with_attribute(
            "poll_interval",
            Attribute::optional_int64()
                .with_description("Seconds between checks.")
                .with_validator(Validator::NonNegative),
        )
}

/// `k8s_<group>_<kind>_<version>` with dots and dashes as underscores and the kind in snake case.
fn type_name(group: &str, version: &str, kind: &str) -> String {
    let mut snake = String::with_capacity(kind.len() + 4);
    let mut prev_lower = false;
    for c in kind.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                snake.push('_');
            }
            snake.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            snake.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }

    let mut name = String::from("k8s");
    if !group.is_empty() {
        name.push('_');
        name.push_str(&group.replace(['.', '-'], "_"));
    }
    format!("{}_{}_{}", name, snake, version)
}

/// The set of kinds a provider serves, keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    kinds: BTreeMap<String, ResourceKind>,
}

impl Catalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A catalog with the built-in kinds.
    pub fn builtin() -> Self {
        Self::new()
            .register(certificate())
            .register(service_monitor())
            .register(external_secret())
    }

    /// Add a kind, replacing any kind with the same type name.
    pub fn register(mut self, kind: ResourceKind) -> Self {
        self.kinds.insert(kind.type_name.clone(), kind);
        self
    }

    /// Look up a kind by resource or data source type name.
    pub fn get(&self, type_name: &str) -> Option<&ResourceKind> {
        self.kinds.get(type_name)
    }

    /// Look up the kind behind a `_manifest` data source type name.
    pub fn get_manifest(&self, type_name: &str) -> Option<&ResourceKind> {
        type_name
            .strip_suffix(MANIFEST_SUFFIX)
            .and_then(|base| self.get(base))
    }

    /// Iterate kinds in type name order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceKind> {
        self.kinds.values()
    }

    /// Number of kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

fn string_list() -> Attribute {
    Attribute::new(
        AttributeType::list(AttributeType::String),
        AttributeFlags::optional(),
    )
}

fn one_of(values: &[&str]) -> Validator {
    Validator::OneOf(values.iter().map(|v| v.to_string()).collect())
}

fn object_reference(kinds: &[&str]) -> NestedBlock {
    NestedBlock::single(
        Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "kind",
                Attribute::optional_string().with_validator(one_of(kinds)),
            )
            .with_attribute("group", Attribute::optional_string()),
    )
    .with_min_items(1)
}

/// `cert-manager.io/v1` Certificate.
pub fn certificate() -> ResourceKind {
    ResourceKind::new("cert-manager.io", "v1", "Certificate", "certificates")
        .with_description("A desired X.509 certificate issued by cert-manager.")
        .with_payload(
            "spec",
            Block::new()
                .with_attribute("secretName", Attribute::required_string())
                .with_attribute("commonName", Attribute::optional_string())
                .with_attribute("dnsNames", string_list())
                .with_attribute("ipAddresses", string_list())
                .with_attribute("duration", Attribute::optional_string())
                .with_attribute("renewBefore", Attribute::optional_string())
                .with_attribute("isCA", Attribute::optional_bool())
                .with_attribute("usages", string_list())
                .with_block("issuerRef", object_reference(&["Issuer", "ClusterIssuer"]))
                .with_block(
                    "privateKey",
                    NestedBlock::single(
                        Block::new()
                            .with_attribute(
                                "algorithm",
                                Attribute::optional_string()
                                    .with_validator(one_of(&["RSA", "ECDSA", "Ed25519"])),
                            )
                            .with_attribute("size", Attribute::optional_int64())
                            .with_attribute(
                                "rotationPolicy",
                                Attribute::optional_string()
                                    .with_validator(one_of(&["Never", "Always"])),
                            ),
                    ),
                ),
        )
}

/// `monitoring.coreos.com/v1` ServiceMonitor.
pub fn service_monitor() -> ResourceKind {
    ResourceKind::new("monitoring.coreos.com", "v1", "ServiceMonitor", "servicemonitors")
        .with_description("Declarative scrape configuration for Prometheus Operator.")
        .with_payload(
            "spec",
            Block::new()
                .with_attribute("jobLabel", Attribute::optional_string())
                .with_attribute("targetLabels", string_list())
                .with_block(
                    "selector",
                    NestedBlock::single(
                        Block::new()
                            .with_attribute("matchLabels", Attribute::optional_string_map())
                            .with_attribute(
                                "matchExpressions",
                                Attribute::new(
                                    AttributeType::list(AttributeType::Dynamic),
                                    AttributeFlags::optional(),
                                ),
                            ),
                    )
                    .with_min_items(1),
                )
                .with_block(
                    "namespaceSelector",
                    NestedBlock::single(
                        Block::new()
                            .with_attribute("any", Attribute::optional_bool())
                            .with_attribute("matchNames", string_list()),
                    ),
                )
                .with_block(
                    "endpoints",
                    NestedBlock::list(
                        Block::new()
                            .with_attribute("port", Attribute::optional_string())
                            .with_attribute("path", Attribute::optional_string())
                            .with_attribute(
                                "scheme",
                                Attribute::optional_string()
                                    .with_validator(one_of(&["http", "https"])),
                            )
                            .with_attribute("interval", Attribute::optional_string())
                            .with_attribute("scrapeTimeout", Attribute::optional_string())
                            .with_attribute("honorLabels", Attribute::optional_bool())
                            .with_attribute("relabelings", Attribute::optional_dynamic()),
                    ),
                ),
        )
}

/// `external-secrets.io/v1beta1` ExternalSecret.
pub fn external_secret() -> ResourceKind {
    ResourceKind::new("external-secrets.io", "v1beta1", "ExternalSecret", "externalsecrets")
        .with_description("Synchronizes a Kubernetes Secret from an external secret store.")
        .with_payload(
            "spec",
            Block::new()
                .with_attribute("refreshInterval", Attribute::optional_string())
                .with_attribute(
                    "dataFrom",
                    Attribute::new(
                        AttributeType::list(AttributeType::Dynamic),
                        AttributeFlags::optional(),
                    ),
                )
                .with_block(
                    "secretStoreRef",
                    object_reference(&["SecretStore", "ClusterSecretStore"]),
                )
                .with_block(
                    "target",
                    NestedBlock::single(
                        Block::new()
                            .with_attribute("name", Attribute::optional_string())
                            .with_attribute(
                                "creationPolicy",
                                Attribute::optional_string()
                                    .with_validator(one_of(&["Owner", "Orphan", "Merge", "None"])),
                            )
                            .with_attribute("template", Attribute::optional_dynamic()),
                    ),
                )
                .with_block(
                    "data",
                    NestedBlock::list(
                        Block::new()
                            .with_attribute("secretKey", Attribute::required_string())
                            .with_block(
                                "remoteRef",
                                NestedBlock::single(
                                    Block::new()
                                        .with_attribute("key", Attribute::required_string())
                                        .with_attribute("property", Attribute::optional_string())
                                        .with_attribute("version", Attribute::optional_string()),
                                )
                                .with_min_items(1),
                            ),
                    ),
                ),
        )
}
