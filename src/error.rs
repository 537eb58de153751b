//! Error types for configuration loading and for the per-cycle configuration mismatches.
//!
//! Collaborator I/O failures stay `anyhow::Error` and are flattened into the
//! transient outcome of a cycle.

use serde::Serialize;
use thiserror::Error;

/// A reconciliation cycle could not find what it was configured to track.
/// These recur every cycle until an operator fixes the registry tags or the workload.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Mismatch {
    #[error("no image in repository {repository} is tagged \"{channel_tag}\"")]
    ChannelTagNotFound {
        repository: String,
        channel_tag: String,
    },

    #[error(
        "image {digest} only carries the tag \"{channel_tag}\"; images must also be tagged with a unique build tag, like a commit hash or an incrementing version number"
    )]
    NoBuildTag { channel_tag: String, digest: String },

    #[error("could not find a container in {workload} with an image which starts with \"{prefix}\"")]
    ContainerNotFound { workload: String, prefix: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value {0}")]
    Missing(&'static str),

    #[error("configuration value {key} must not be empty")]
    Empty { key: &'static str },

    #[error("configuration value {key} is invalid: {value}")]
    Invalid { key: &'static str, value: String },

    #[error(
        "resource type \"{0}\" isn't supported, only \"deployment\" and \"statefulset\" can be handled"
    )]
    UnsupportedResourceKind(String),

    #[error("missing environment variable {0} referenced in config file")]
    MissingEnvVar(String),
}
