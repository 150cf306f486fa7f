use std::io;
use std::path::PathBuf;

use stratus_domain::{CloudType, DomainValidationError, NodeName};
use thiserror::Error;

/// Malformed input. Aborts the whole translation pass; nothing is committed.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Name(#[from] DomainValidationError),
    #[error("node {node} is declared more than once")]
    DuplicateNode { node: NodeName },
    #[error("node {node}: missing required property \"{property}\"")]
    MissingProperty {
        node: NodeName,
        property: &'static str,
    },
    #[error("node {node}: property \"{property}\" must be {expected}")]
    InvalidProperty {
        node: NodeName,
        property: &'static str,
        expected: &'static str,
    },
    #[error("multiple different AWS regions unsupported ({existing} vs {requested} on node {node})")]
    MultipleRegions {
        node: NodeName,
        existing: String,
        requested: String,
    },
    #[error(
        "provider {provider} is already configured with {field}={existing}, node {node} requests {requested}"
    )]
    ConflictingProviderScope {
        node: NodeName,
        provider: String,
        field: String,
        existing: String,
        requested: String,
    },
    #[error("no credentials configured for cloud type {cloud}")]
    MissingCredential { cloud: CloudType },
    #[error("credentials for cloud type {cloud} are missing \"{field}\"")]
    MissingCredentialField {
        cloud: CloudType,
        field: &'static str,
    },
    #[error("no provider mapper registered for cloud type {cloud}")]
    UnsupportedCloud { cloud: CloudType },
    #[error("node {node}: append requested without config")]
    AppendWithoutConfig { node: NodeName },
    #[error("node {node}: bootstrap config is not valid YAML")]
    InvalidBootstrapConfig {
        node: NodeName,
        #[source]
        source: serde_yaml::Error,
    },
}

/// An existing provider entry disagrees with a new one on a scope field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("provider {provider} scope conflict on {field}: {existing} vs {requested}")]
pub struct ScopeConflict {
    pub provider: String,
    pub field: String,
    pub existing: String,
    pub requested: String,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to read bootstrap input {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to render bootstrap template for node {node}")]
    Render {
        node: NodeName,
        #[source]
        source: tera::Error,
    },
    #[error("default bootstrap template for node {node} is not valid YAML")]
    DefaultTemplate {
        node: NodeName,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize bootstrap document for node {node}")]
    Serialize {
        node: NodeName,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode {path}")]
    JsonEncode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {path}")]
    JsonDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("phase record {path} has version {found}, newer than supported version {supported}")]
    PhaseRecordVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },
}

/// The external apply/init/destroy did not succeed. The raw backend output is
/// part of the message.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("execution context \"{label}\" is unavailable; apply-class operations are disabled")]
    Unavailable { label: String },
    #[error("failed to run {command}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} failed (exit: {exit_code}):\n{output}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        output: String,
    },
    #[error("{command} did not report \"{marker}\":\n{output}")]
    MissingSuccessMarker {
        command: String,
        marker: &'static str,
        output: String,
    },
    #[error("{command} gave up waiting for the state lock:\n{output}")]
    LockTimeout { command: String, output: String },
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("execution context \"{label}\" not found: {detail}")]
    NotFound { label: String, detail: String },
    #[error("execution context \"{label}\" not found after {attempts} attempt(s)")]
    Exhausted { label: String, attempts: u32 },
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse YAML descriptor {path}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to parse JSON descriptor {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to read credential file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse credential file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The single critical signal every fatal condition surfaces as.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}
