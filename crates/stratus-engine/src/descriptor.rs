use std::path::Path;

use stratus_domain::Descriptor;
use tracing::debug;

use crate::error::DescriptorError;

/// Load a descriptor from a `.json` file, or from YAML for any other extension.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed.
pub fn load_descriptor(path: &Path) -> Result<Descriptor, DescriptorError> {
    let source = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));

    let descriptor: Descriptor = if is_json {
        serde_json::from_str(&source).map_err(|source| DescriptorError::Json {
            path: path.to_path_buf(),
            source,
        })?
    } else {
        serde_yaml::from_str(&source).map_err(|source| DescriptorError::Yaml {
            path: path.to_path_buf(),
            source,
        })?
    };

    debug!(
        path = %path.display(),
        nodes = descriptor.nodes.len(),
        policies = descriptor.policies.len(),
        "loaded descriptor"
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;

    use stratus_domain::{BootstrapMode, CloudType};

    use super::load_descriptor;
    use crate::error::DescriptorError;

    #[test]
    fn loads_yaml_descriptor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("app.yaml");
        fs::write(
            &path,
            r"
nodes:
  - name: worker
    cloud: ec2
    properties:
      region_name: us-east-1
      instance_type: t2.micro
    context:
      mode: append
      cloud_config: |
        runcmd:
          - echo hi
  - name: database
policies:
  - name: scale
    targets: [worker]
    min_instances: 2
    max_instances: 5
",
        )
        .expect("write");

        let descriptor = load_descriptor(&path).expect("load");
        assert_eq!(descriptor.nodes.len(), 2);
        assert_eq!(descriptor.nodes[0].cloud, Some(CloudType::Aws));
        assert_eq!(descriptor.nodes[1].cloud, None);
        let context = descriptor.nodes[0].context.as_ref().expect("context");
        assert_eq!(context.mode, BootstrapMode::Append);
        assert_eq!(descriptor.policies[0].min_instances, 2);
    }

    #[test]
    fn loads_json_descriptor() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("app.json");
        fs::write(
            &path,
            r#"{"nodes": [{"name": "vm", "cloud": "azure", "scalable": {"min_instances": 3, "max_instances": 3}}]}"#,
        )
        .expect("write");

        let descriptor = load_descriptor(&path).expect("load");
        let scaling = descriptor.nodes[0].scalable.expect("scalable");
        assert_eq!(scaling.min_instances, 3);
        assert!(descriptor.policies.is_empty());
    }

    #[test]
    fn reports_parse_errors_with_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("broken.yaml");
        fs::write(&path, "nodes: [").expect("write");

        let error = load_descriptor(&path).expect_err("must fail");
        assert!(matches!(error, DescriptorError::Yaml { .. }));
        assert!(error.to_string().contains("broken.yaml"));
    }
}
