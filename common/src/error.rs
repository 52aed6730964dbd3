//! Shared error types for the resource-store adapter and its callers.

use snafu::Snafu;

/// Errors returned by the resource-store adapter (`crate::resource_store`).
///
/// Every variant carries enough context to log a useful message; callers in the
/// gateway binary translate the ones that matter into HTTP responses and log the
/// rest, per the propagation policy: background loops never unwind on these, they
/// match, log, and move on to the next claim.
#[derive(Debug, Snafu)]
#[snafu(visibility = "pub(crate)")]
pub enum Error {
    #[snafu(display("Kubernetes API error on {}: {}", resource, source))]
    Kube { resource: String, source: kube::Error },

    #[snafu(display("optimistic update of {} conflicted", resource))]
    Conflict { resource: String },

    #[snafu(display("{} '{}' not found", kind, name))]
    NotFound { kind: String, name: String },

    #[snafu(display("{} '{}' has no bound cluster id yet", kind, name))]
    Unbound { kind: String, name: String },

    #[snafu(display("secret '{}' is missing key '{}'", name, key))]
    MissingKey { name: String, key: String },

    #[snafu(display("failed to decode secret '{}' key '{}': {}", name, key, source))]
    Decode {
        name: String,
        key: String,
        source: base64::DecodeError,
    },

    #[snafu(display("failed to (de)serialise {}: {}", what, source))]
    Serde {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("failed to (de)serialise {} as YAML: {}", what, source))]
    Yaml {
        what: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("invalid duration '{}': {}", input, reason))]
    Duration { input: String, reason: String },

    #[snafu(display("{}: {}", context, detail))]
    External { context: String, detail: String },
}

/// Convenience alias used throughout the `common` crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
