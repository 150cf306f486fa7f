use std::path::{Path, PathBuf};

use stratus_domain::{DeploymentId, NodeName};

use crate::providers::SERVICE_ACCOUNT_FILE;

const STAGED_SUFFIX: &str = ".tmp";
const VARS_FILE: &str = "terraform.tfvars.json";
const BACKEND_STATE_FILE: &str = "terraform.tfstate";
const BACKEND_STATE_BACKUP_FILE: &str = "terraform.tfstate.backup";

/// File names of one deployment's artifacts inside the artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
    deployment: DeploymentId,
}

impl ArtifactLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, deployment: DeploymentId) -> Self {
        Self {
            root: root.into(),
            deployment,
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn deployment(&self) -> &DeploymentId {
        &self.deployment
    }

    #[must_use]
    pub fn graph(&self) -> PathBuf {
        self.root.join(format!("{}.tf.json", self.deployment))
    }

    #[must_use]
    pub fn vars(&self) -> PathBuf {
        self.root.join(VARS_FILE)
    }

    /// Name the graph uses to reference a node's bootstrap document.
    #[must_use]
    pub fn bootstrap_file_name(node: &NodeName) -> String {
        format!("{node}-cloud-init.yaml")
    }

    #[must_use]
    pub fn bootstrap(&self, node: &NodeName) -> PathBuf {
        self.root.join(Self::bootstrap_file_name(node))
    }

    #[must_use]
    pub fn service_account(&self) -> PathBuf {
        self.root.join(SERVICE_ACCOUNT_FILE)
    }

    #[must_use]
    pub fn phase_record(&self) -> PathBuf {
        self.root.join(format!("{}.state.json", self.deployment))
    }

    #[must_use]
    pub fn backend_state(&self) -> [PathBuf; 2] {
        [
            self.root.join(BACKEND_STATE_FILE),
            self.root.join(BACKEND_STATE_BACKUP_FILE),
        ]
    }

    /// Staged counterpart of a committed artifact path.
    #[must_use]
    pub fn staged(committed: &Path) -> PathBuf {
        let mut staged = committed.as_os_str().to_owned();
        staged.push(STAGED_SUFFIX);
        PathBuf::from(staged)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::path::Path;

    use stratus_domain::{DeploymentId, NodeName};

    use super::ArtifactLayout;

    #[test]
    fn artifact_paths_are_derived_from_deployment_and_node() {
        let layout = ArtifactLayout::new(
            "/srv/artifacts",
            DeploymentId::try_from("demo").expect("id"),
        );
        let node = NodeName::try_from("worker").expect("node");

        assert_eq!(layout.graph(), Path::new("/srv/artifacts/demo.tf.json"));
        assert_eq!(
            layout.vars(),
            Path::new("/srv/artifacts/terraform.tfvars.json")
        );
        assert_eq!(
            layout.bootstrap(&node),
            Path::new("/srv/artifacts/worker-cloud-init.yaml")
        );
        assert_eq!(
            layout.phase_record(),
            Path::new("/srv/artifacts/demo.state.json")
        );
        assert_eq!(
            layout.service_account(),
            Path::new("/srv/artifacts/accounts.json")
        );
    }

    #[test]
    fn staged_path_appends_suffix() {
        assert_eq!(
            ArtifactLayout::staged(Path::new("/a/demo.tf.json")),
            Path::new("/a/demo.tf.json.tmp")
        );
    }
}
