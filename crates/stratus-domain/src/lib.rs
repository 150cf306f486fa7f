use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PHASE_RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainValidationError {
    #[error("node name must not be empty")]
    EmptyNodeName,
    #[error("underscores in node {name} not allowed")]
    NodeNameUnderscore { name: String },
    #[error("node name {name} must start with a letter and contain only letters, digits and '-'")]
    NodeNameInvalid { name: String },
    #[error("deployment id must not be empty")]
    EmptyDeploymentId,
    #[error("deployment id must be a single path segment: {id}")]
    DeploymentIdNotSegment { id: String },
}

/// Name of a node as it appears in the generated resource graph.
///
/// Provider resource names cannot carry underscores through the graph's
/// naming scheme, so they are rejected here. The name also becomes part of
/// artifact file names, which restricts it to ASCII letters, digits and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName(String);

impl NodeName {
    /// Create a node name, rejecting blank names, underscores and anything
    /// that is not a plain identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is empty after trimming, contains `_`,
    /// does not start with an ASCII letter or holds characters other than
    /// ASCII letters, digits and `-`.
    pub fn new(name: String) -> Result<Self, DomainValidationError> {
        if name.trim().is_empty() {
            return Err(DomainValidationError::EmptyNodeName);
        }
        if name.contains('_') {
            return Err(DomainValidationError::NodeNameUnderscore { name });
        }
        let starts_with_letter = name.starts_with(|c: char| c.is_ascii_alphabetic());
        let identifier_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if starts_with_letter && identifier_chars {
            Ok(Self(name))
        } else {
            Err(DomainValidationError::NodeNameInvalid { name })
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NodeName {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for NodeName {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for NodeName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<NodeName> for String {
    fn from(value: NodeName) -> Self {
        value.0
    }
}

/// Identifier of one deployment; every artifact file name is derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Create a deployment id wrapper.
    ///
    /// # Errors
    ///
    /// Returns an error when `id` is blank or could escape the artifact
    /// directory (path separators, `.` or `..`).
    pub fn new(id: String) -> Result<Self, DomainValidationError> {
        if id.trim().is_empty() {
            return Err(DomainValidationError::EmptyDeploymentId);
        }
        if id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(DomainValidationError::DeploymentIdNotSegment { id });
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeploymentId {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for DeploymentId {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl Deref for DeploymentId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<DeploymentId> for String {
    fn from(value: DeploymentId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum CloudType {
    #[serde(rename = "ec2")]
    Aws,
    #[serde(rename = "nova")]
    OpenStack,
    #[serde(rename = "azure")]
    Azure,
    #[serde(rename = "gce")]
    Gce,
}

impl CloudType {
    pub const ALL: [Self; 4] = [Self::Aws, Self::OpenStack, Self::Azure, Self::Gce];

    /// Tag used by descriptors and credential records.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Aws => "ec2",
            Self::OpenStack => "nova",
            Self::Azure => "azure",
            Self::Gce => "gce",
        }
    }

    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|cloud| cloud.tag().eq_ignore_ascii_case(tag))
    }
}

impl fmt::Display for CloudType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.tag())
    }
}

/// Resolved node properties. Indirections are already resolved by the
/// descriptor collaborator.
pub type Properties = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub min_instances: u32,
    pub max_instances: u32,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapMode {
    #[default]
    Default,
    Append,
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BootstrapContext {
    #[serde(default)]
    pub cloud_config: Option<String>,
    #[serde(default)]
    pub mode: BootstrapMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    /// Infrastructure interface; nodes without one are not handled here.
    #[serde(default)]
    pub cloud: Option<CloudType>,
    #[serde(default)]
    pub properties: Properties,
    /// Node-level scaling capability.
    #[serde(default)]
    pub scalable: Option<ScalingPolicy>,
    #[serde(default)]
    pub context: Option<BootstrapContext>,
}

impl NodeSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, cloud: Option<CloudType>) -> Self {
        Self {
            name: name.into(),
            cloud,
            properties: Properties::new(),
            scalable: None,
            context: None,
        }
    }
}

/// Scaling policy block that applies to the nodes named in `targets`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySpec {
    pub name: String,
    #[serde(default)]
    pub targets: Vec<String>,
    pub min_instances: u32,
    pub max_instances: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Descriptor {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslateMode {
    /// Write committed artifacts directly.
    Build,
    /// Stage artifacts next to the committed ones for reconciliation.
    Update,
    /// Compute everything, write nothing.
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    #[default]
    NotDeployed,
    Staged,
    Committed,
    Applying,
    Applied,
    Destroying,
    Destroyed,
}

impl DeploymentPhase {
    /// Committed artifacts stay on disk after a destroy until cleanup removes
    /// them, so a destroyed deployment can be applied again.
    #[must_use]
    pub const fn has_committed_artifacts(self) -> bool {
        matches!(
            self,
            Self::Committed | Self::Applying | Self::Applied | Self::Destroying | Self::Destroyed
        )
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotDeployed => "not-deployed",
            Self::Staged => "staged",
            Self::Committed => "committed",
            Self::Applying => "applying",
            Self::Applied => "applied",
            Self::Destroying => "destroying",
            Self::Destroyed => "destroyed",
        };
        formatter.write_str(label)
    }
}

/// Persisted record of a deployment's phase and the content hashes of its
/// committed artifacts. `bootstrap` doubles as the manifest of bootstrap
/// documents owned by the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub version: u32,
    pub deployment: DeploymentId,
    pub phase: DeploymentPhase,
    #[serde(default)]
    pub graph_hash: Option<String>,
    #[serde(default)]
    pub vars_hash: Option<String>,
    #[serde(default)]
    pub bootstrap: BTreeMap<NodeName, String>,
    #[serde(default)]
    pub service_account: bool,
}

impl PhaseRecord {
    #[must_use]
    pub const fn new(deployment: DeploymentId) -> Self {
        Self {
            version: PHASE_RECORD_VERSION,
            deployment,
            phase: DeploymentPhase::NotDeployed,
            graph_hash: None,
            vars_hash: None,
            bootstrap: BTreeMap::new(),
            service_account: false,
        }
    }

    #[must_use]
    pub const fn has_committed_artifacts(&self) -> bool {
        self.phase.has_committed_artifacts()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Translate,
    Execute,
    Undeploy,
    Update,
    Cleanup,
}

impl fmt::Display for Operation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Translate => "translate",
            Self::Execute => "execute",
            Self::Undeploy => "undeploy",
            Self::Update => "update",
            Self::Cleanup => "cleanup",
        };
        formatter.write_str(label)
    }
}

/// Coarse status reported after each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Init,
    Skipped,
    Translated,
    Executing,
    Executed,
    Undeploying,
    Undeployed,
    UpdatedUndeployed,
    UpdatedGraph,
    UpdatedBootstrap,
    UpdatedNothing,
    DryRun,
}

impl Status {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Skipped => "Skipped",
            Self::Translated => "Translated",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Undeploying => "undeploying",
            Self::Undeployed => "undeployed",
            Self::UpdatedUndeployed => "Updated (undeployed)",
            Self::UpdatedGraph => "Updated (Terraform file)",
            Self::UpdatedBootstrap => "Updated (bootstrap files)",
            Self::UpdatedNothing => "Updated (nothing to update)",
            Self::DryRun => "DRY-RUN Deployment",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactKind {
    Graph,
    Variables,
    Bootstrap { node: NodeName },
    ServiceAccount,
    BackendState,
    PhaseRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactAction {
    Written,
    Staged,
    Promoted,
    Discarded,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChange {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub action: ArtifactAction,
}

/// Outcome of one caller-facing operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub deployment: DeploymentId,
    pub operation: Operation,
    pub status: Status,
    pub phase: DeploymentPhase,
    pub artifacts: Vec<ArtifactChange>,
    pub warnings: Vec<String>,
    /// Raw backend output of the last command, when one ran.
    pub output: Option<String>,
}

impl RunReport {
    #[must_use]
    pub const fn new(deployment: DeploymentId, operation: Operation) -> Self {
        Self {
            deployment,
            operation,
            status: Status::Init,
            phase: DeploymentPhase::NotDeployed,
            artifacts: Vec::new(),
            warnings: Vec::new(),
            output: None,
        }
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        self.artifacts.iter().any(|change| {
            matches!(
                change.action,
                ArtifactAction::Written | ArtifactAction::Promoted | ArtifactAction::Removed
            )
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::{CloudType, DeploymentId, DeploymentPhase, DomainValidationError, NodeName, Status};

    #[test]
    fn node_name_rejects_underscores() {
        let error = NodeName::try_from("worker_1").expect_err("underscores must be rejected");
        assert!(matches!(
            error,
            DomainValidationError::NodeNameUnderscore { .. }
        ));
    }

    #[test]
    fn node_name_rejects_path_like_values() {
        for name in ["../escape", "a/b", "a\\b", "..", ".hidden", "1st", "web node"] {
            let error = NodeName::try_from(name).expect_err("path-like names must be rejected");
            assert!(
                matches!(error, DomainValidationError::NodeNameInvalid { .. }),
                "{name}: {error}"
            );
        }
        assert!(NodeName::try_from("web-01").is_ok());
    }

    #[test]
    fn node_name_rejects_blank_values() {
        let error = NodeName::try_from("  ").expect_err("blank names must be rejected");
        assert!(matches!(error, DomainValidationError::EmptyNodeName));
    }

    #[test]
    fn deployment_id_rejects_path_segments() {
        let error = DeploymentId::try_from("../etc").expect_err("separators must be rejected");
        assert!(matches!(
            error,
            DomainValidationError::DeploymentIdNotSegment { .. }
        ));
    }

    #[test]
    fn cloud_type_round_trips_tags() {
        for cloud in CloudType::ALL {
            assert_eq!(CloudType::from_tag(cloud.tag()), Some(cloud));
        }
        assert_eq!(CloudType::from_tag("EC2"), Some(CloudType::Aws));
        assert_eq!(CloudType::from_tag("lambda"), None);
    }

    #[test]
    fn cloud_type_deserializes_from_descriptor_tag() {
        let cloud: CloudType = serde_json::from_str("\"nova\"").expect("deserialize");
        assert_eq!(cloud, CloudType::OpenStack);
    }

    #[test]
    fn committed_phases() {
        assert!(!DeploymentPhase::NotDeployed.has_committed_artifacts());
        assert!(!DeploymentPhase::Staged.has_committed_artifacts());
        assert!(DeploymentPhase::Applied.has_committed_artifacts());
        assert!(DeploymentPhase::Destroyed.has_committed_artifacts());
    }

    #[test]
    fn status_labels_match_reported_strings() {
        assert_eq!(Status::UpdatedNothing.to_string(), "Updated (nothing to update)");
        assert_eq!(Status::DryRun.to_string(), "DRY-RUN Deployment");
    }
}
