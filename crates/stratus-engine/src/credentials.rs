use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use stratus_domain::CloudType;
use tracing::{debug, warn};

use crate::error::CredentialError;

/// Field name to value for one cloud type.
pub type CredentialRecord = BTreeMap<String, String>;

/// Source of per-cloud credential records.
pub trait CredentialStore {
    fn lookup(&self, cloud: CloudType) -> Option<&CredentialRecord>;
}

/// In-memory credential records keyed by cloud type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticCredentials {
    records: BTreeMap<CloudType, CredentialRecord>,
}

impl StaticCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the record for `cloud`.
    #[must_use]
    pub fn with(mut self, cloud: CloudType, record: CredentialRecord) -> Self {
        self.records.insert(cloud, record);
        self
    }

    pub fn insert(&mut self, cloud: CloudType, record: CredentialRecord) {
        self.records.insert(cloud, record);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Values of every credential field, for redaction.
    #[must_use]
    pub fn secret_values(&self) -> Vec<String> {
        self.records
            .values()
            .flat_map(BTreeMap::values)
            .filter(|value| !value.is_empty())
            .cloned()
            .collect()
    }

    /// Load the auth-data file:
    ///
    /// ```yaml
    /// resource:
    ///   - type: ec2
    ///     auth_data:
    ///       accesskey: ...
    ///       secretkey: ...
    /// ```
    ///
    /// Entries with an unknown `type` are skipped with a warning. Scalar
    /// values are kept as text; nested values are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or is not valid YAML.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let source = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&source).map_err(|source| CredentialError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse auth-data YAML, see [`StaticCredentials::load`].
    ///
    /// # Errors
    ///
    /// Returns an error when `source` is not a valid auth-data document.
    pub fn parse(source: &str) -> Result<Self, serde_yaml::Error> {
        let file: AuthDataFile = serde_yaml::from_str(source)?;
        let mut credentials = Self::new();
        for entry in file.resource {
            let Some(cloud) = CloudType::from_tag(&entry.kind) else {
                warn!(kind = %entry.kind, "skipping credentials for unknown cloud type");
                continue;
            };
            let record: CredentialRecord = entry
                .auth_data
                .into_iter()
                .filter_map(|(field, value)| scalar_text(&value).map(|text| (field, text)))
                .collect();
            debug!(%cloud, fields = record.len(), "loaded credential record");
            credentials.insert(cloud, record);
        }
        Ok(credentials)
    }
}

impl CredentialStore for StaticCredentials {
    fn lookup(&self, cloud: CloudType) -> Option<&CredentialRecord> {
        self.records.get(&cloud)
    }
}

#[derive(Debug, Deserialize)]
struct AuthDataFile {
    #[serde(default)]
    resource: Vec<AuthDataEntry>,
}

#[derive(Debug, Deserialize)]
struct AuthDataEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    auth_data: BTreeMap<String, serde_yaml::Value>,
}

fn scalar_text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Bool(flag) => Some(flag.to_string()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use stratus_domain::CloudType;

    use super::{CredentialStore, StaticCredentials};

    #[test]
    fn parses_auth_data_records_by_cloud_tag() {
        let credentials = StaticCredentials::parse(
            r"
resource:
  - type: ec2
    auth_data:
      accesskey: AKIA
      secretkey: s3cr3t
  - type: azure
    auth_data:
      subscription_id: sub
      use_msi: true
",
        )
        .expect("parse");

        let aws = credentials.lookup(CloudType::Aws).expect("aws record");
        assert_eq!(aws.get("accesskey").map(String::as_str), Some("AKIA"));
        let azure = credentials.lookup(CloudType::Azure).expect("azure record");
        assert_eq!(azure.get("use_msi").map(String::as_str), Some("true"));
        assert!(credentials.lookup(CloudType::Gce).is_none());
    }

    #[test]
    fn unknown_cloud_types_are_skipped() {
        let credentials = StaticCredentials::parse(
            r"
resource:
  - type: lambda
    auth_data:
      token: abc
",
        )
        .expect("parse");
        assert!(credentials.is_empty());
    }

    #[test]
    fn secret_values_collects_non_empty_fields() {
        let credentials = StaticCredentials::parse(
            r"
resource:
  - type: nova
    auth_data:
      username: admin
      password: hunter2
      domain:
",
        )
        .expect("parse");
        let mut values = credentials.secret_values();
        values.sort();
        assert_eq!(values, vec!["admin".to_string(), "hunter2".to_string()]);
    }

    #[test]
    fn load_reports_missing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = StaticCredentials::load(&temp.path().join("missing.yaml"))
            .expect_err("missing file must fail");
        assert!(error.to_string().contains("failed to read credential file"));
    }
}
