//! Parsing of `namespace/name` import identifiers.

use crate::error::ProviderError;
use crate::types::ResourceIdentity;

/// Split an import ID into its namespace and name.
///
/// The ID must contain exactly one `/` with a non-empty value on each side.
/// No network call is made; callers should run this before contacting the
/// API server so a typo surfaces as input validation.
///
/// ```
/// use kube_crd_provider::import::parse_import_id;
///
/// let id = parse_import_id("cert-manager/web-tls").unwrap();
/// assert_eq!(id.namespace, "cert-manager");
/// assert_eq!(id.name, "web-tls");
///
/// assert!(parse_import_id("web-tls").is_err());
/// ```
pub fn parse_import_id(raw: &str) -> Result<ResourceIdentity, ProviderError> {
    let mut parts = raw.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
            Ok(ResourceIdentity::new(namespace, name))
        },
        _ => Err(ProviderError::InvalidImportId(format!(
            "expected an import ID of the form 'namespace/name', got {:?}",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        let id = parse_import_id("default/web").unwrap();
        assert_eq!(id, ResourceIdentity::new("default", "web"));

        let id = parse_import_id("kube-system/coredns.v1").unwrap();
        assert_eq!(id.namespace, "kube-system");
        assert_eq!(id.name, "coredns.v1");
    }

    #[test]
    fn test_round_trips_display() {
        for raw in ["default/web", "a/b", "monitoring/prometheus-k8s"] {
            assert_eq!(parse_import_id(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn test_invalid_ids() {
        for raw in ["", "/", "web", "default/", "/web", "a/b/c", "default//web"] {
            let err = parse_import_id(raw).unwrap_err();
            assert!(
                matches!(err, ProviderError::InvalidImportId(_)),
                "{:?} should be rejected",
                raw
            );
            assert!(err.message().contains("namespace/name"));
        }
    }
}
