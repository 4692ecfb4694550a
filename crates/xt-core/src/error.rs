//! Error taxonomy for the xt engine.
//!
//! `FlowError` is what a flow run (or any other core operation) surfaces to the
//! CLI. The narrower enums below are produced by the individual components and
//! wrapped with the step number once the engine knows which step failed.
//!
//! Step numbers in messages are 1-based, the way operators count them.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Step {step}: command failed on {host}: {message}")]
    Execution {
        step: usize,
        host: String,
        message: String,
    },

    #[error("Step {step}: no host succeeded ({})", .hosts.join(", "))]
    NoSuccessfulHosts { step: usize, hosts: Vec<String> },

    #[error("Step {step}: {host} did not answer within {timeout:?}")]
    Timeout {
        step: usize,
        host: String,
        timeout: Duration,
    },

    #[error("Step {step}: {source}")]
    Parse {
        step: usize,
        #[source]
        source: ParseError,
    },

    #[error("Step {step}: {source}")]
    Selection {
        step: usize,
        #[source]
        source: SelectionError,
    },

    #[error("Step {step}: {source}")]
    Bind {
        step: usize,
        #[source]
        source: BindError,
    },

    #[error("{0}")]
    Cancelled(String),
}

/// Malformed configuration, caught before anything runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no config file given and no home directory to look in")]
    NoHome,

    #[error("flow '{0}' not found")]
    FlowNotFound(String),

    #[error("flow '{0}' has no steps")]
    EmptyFlow(String),

    #[error("profile '{0}' not found in config file")]
    ProfileNotFound(String),

    #[error("no default profile set in config file")]
    NoDefaultProfile,

    #[error("{0} must be set")]
    Missing(String),

    #[error("flow '{flow}' step {step}: {reason}")]
    InvalidStep {
        flow: String,
        step: usize,
        reason: String,
    },
}

/// Failure to turn a step's raw output into records.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("output is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("`{0}` is not a list, root must point to a list")]
    NotAnArray(String),

    #[error("key `{0}` not found")]
    FieldNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no candidates for `{field}`")]
    NoCandidates { field: String },

    #[error("selection `{0}` not found: lookup error")]
    SelectionNotFound(String),

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("selection cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("placeholder `{{{{{0}}}}}` has no value in the selected record")]
    UnboundPlaceholder(String),
}

/// A remote process that could not be run at all (as opposed to one that
/// ran and exited non-zero).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{program} on {host}: {message}")]
pub struct TransportError {
    pub host: String,
    pub program: String,
    pub message: String,
}
