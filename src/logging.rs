//! Structured logging for provider processes.
//!
//! Logs go to **stderr**; stdout belongs to the host process that launched the
//! provider. Filtering follows `RUST_LOG`, falling back to a default directive
//! that keeps the chatty `kube` client and its HTTP stack at `warn`.
//!
//! ```bash
//! # Lifecycle operations at info, Kubernetes client at warn (default)
//! ./kube-crd-provider
//!
//! # Trace every poll of the wait loop
//! RUST_LOG=kube_crd_provider::wait=trace ./kube-crd-provider
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Directives appended to the default level when `RUST_LOG` is unset.
const QUIET_DEPENDENCIES: &str = "kube=warn,hyper=warn,tower=warn";

fn default_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},{}", default_level, QUIET_DEPENDENCIES))
    })
}

fn subscriber(
    default_level: &str,
) -> impl tracing::Subscriber + Send + Sync + for<'a> tracing_subscriber::registry::LookupSpan<'a>
{
    tracing_subscriber::registry().with(default_filter(default_level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Initialize the default logging subscriber at `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level used when `RUST_LOG` is not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Try to initialize logging, returning false if a subscriber was already set.
pub fn try_init_logging() -> bool {
    subscriber("info").try_init().is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so only the
    // filter construction is exercised here.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new(format!("info,{}", QUIET_DEPENDENCIES)).is_ok());
        assert!(EnvFilter::try_new("kube_crd_provider::wait=trace").is_ok());
        assert!(EnvFilter::try_new("warn,kube_crd_provider=debug").is_ok());
    }

    #[test]
    fn test_try_init_is_idempotent() {
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
