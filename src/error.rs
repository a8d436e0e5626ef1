//! Error types for Kubernetes custom resource lifecycle operations.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors that can occur while managing a custom resource.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested object does not exist on the server.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Input or a server-side admission check rejected the document.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another field manager owns a field this apply tried to change.
    #[error("Apply conflict: {0}")]
    Conflict(String),

    /// Authentication or authorization failed.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The API server is overloaded or failing; the call may succeed later.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The request never produced an API response (connection, TLS, auth plugin).
    #[error("Transport error: {0}")]
    Transport(String),

    /// A JSON document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A YAML manifest could not be rendered.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A wait condition was not met before its timeout.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// An import identifier did not have the `namespace/name` shape.
    #[error("Invalid import ID: {0}")]
    InvalidImportId(String),

    /// The provider configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A resource operation ran before `configure` supplied a client.
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// The requested resource or data source type is not registered.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// Any other failure reported by the API server.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Classify a Kubernetes client error, tagging it with the operation and target object.
    pub fn from_kube(operation: &str, target: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => {
                Self::from_status(operation, target, response.code, &response.message)
            },
            kube::Error::SerdeError(err) => Self::Serialization(err),
            other => Self::Transport(format!("{} {}: {}", operation, target, other)),
        }
    }

    /// Classify an API status code returned for `operation` on `target`.
    pub fn from_status(operation: &str, target: &str, code: u16, message: &str) -> Self {
        let msg = format!("{} {}: {}", operation, target, message);
        match code {
            404 | 410 => Self::NotFound(msg),
            409 => Self::Conflict(msg),
            400 | 422 => Self::Validation(msg),
            401 | 403 => Self::PermissionDenied(msg),
            408 | 429 | 500..=599 => Self::Unavailable(msg),
            _ => Self::Internal(format!("{} (HTTP {})", msg, code)),
        }
    }

    /// Whether the object was reported absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether repeating the same call could succeed without changing the input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Transport(_))
    }

    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Conflict(msg)
            | Self::PermissionDenied(msg)
            | Self::Unavailable(msg)
            | Self::Transport(msg)
            | Self::DeadlineExceeded(msg)
            | Self::InvalidImportId(msg)
            | Self::Configuration(msg)
            | Self::NotConfigured(msg)
            | Self::UnknownResource(msg)
            | Self::Internal(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Yaml(_err) => "yaml error (see Debug output)",
        }
    }

    /// Render this error as an error diagnostic for the host.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let summary = match self {
            Self::NotFound(_) => "Resource not found",
            Self::Validation(_) => "Invalid resource",
            Self::Conflict(_) => "Field manager conflict",
            Self::PermissionDenied(_) => "Permission denied",
            Self::Unavailable(_) | Self::Transport(_) => "Kubernetes API unreachable",
            Self::Serialization(_) | Self::Yaml(_) => "Cannot serialize resource",
            Self::DeadlineExceeded(_) => "Timed out waiting for resource",
            Self::InvalidImportId(_) => "Invalid import ID",
            Self::Configuration(_) | Self::NotConfigured(_) => "Provider misconfigured",
            Self::UnknownResource(_) => "Unknown resource type",
            Self::Internal(_) => "Unexpected API error",
        };
        Diagnostic::error(summary).with_detail(self.to_string())
    }
}

impl From<config::ConfigError> for ProviderError {
    fn from(err: config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DiagnosticSeverity;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("default/web".to_string());
        assert_eq!(format!("{}", err), "Resource not found: default/web");

        let err = ProviderError::Conflict("spec.replicas".to_string());
        assert_eq!(format!("{}", err), "Apply conflict: spec.replicas");

        let err = ProviderError::InvalidImportId("expected namespace/name".to_string());
        assert_eq!(
            format!("{}", err),
            "Invalid import ID: expected namespace/name"
        );
    }

    #[test]
    fn test_status_classification() {
        let err = ProviderError::from_status("get", "default/web", 404, "not found");
        assert!(err.is_not_found());
        assert_eq!(err.message(), "get default/web: not found");

        let err = ProviderError::from_status("apply", "default/web", 409, "conflict");
        assert!(matches!(err, ProviderError::Conflict(_)));
        assert!(!err.is_retryable());

        let err = ProviderError::from_status("apply", "default/web", 422, "invalid");
        assert!(matches!(err, ProviderError::Validation(_)));
        assert!(!err.is_retryable());

        let err = ProviderError::from_status("apply", "default/web", 403, "forbidden");
        assert!(matches!(err, ProviderError::PermissionDenied(_)));

        let err = ProviderError::from_status("get", "default/web", 503, "unavailable");
        assert!(err.is_retryable());

        let err = ProviderError::from_status("get", "default/web", 418, "teapot");
        assert!(matches!(err, ProviderError::Internal(_)));
        assert!(err.message().contains("HTTP 418"));
    }

    #[test]
    fn test_transport_is_retryable() {
        let err = ProviderError::Transport("connection refused".to_string());
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_to_diagnostic() {
        let diag = ProviderError::DeadlineExceeded("default/web still present".to_string())
            .to_diagnostic();
        assert_eq!(diag.severity, DiagnosticSeverity::Error);
        assert_eq!(diag.summary, "Timed out waiting for resource");
        assert_eq!(
            diag.detail.as_deref(),
            Some("Deadline exceeded: default/web still present")
        );
    }

    #[test]
    fn test_serialization_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ProviderError = json_err.into();
        assert!(matches!(err, ProviderError::Serialization(_)));
        assert_eq!(err.message(), "serialization error (see Debug output)");
    }
}
