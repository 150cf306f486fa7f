use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use stratus_domain::{CloudType, NodeName, Properties, ScalingPolicy};

use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::ValidationError;
use crate::graph::ResourceGraph;

mod aws;
mod azure;
mod gce;
mod openstack;


pub use aws::AwsMapper;
pub use azure::AzureMapper;
pub use gce::{GceMapper, SERVICE_ACCOUNT_FILE};
pub use openstack::OpenStackMapper;

/// Everything a mapper needs to know about the node it is mapping.
///
/// A fresh context is built for every node, so nothing leaks from one node
/// into the next.
#[derive(Debug, Clone, Copy)]
pub struct NodeContext<'a> {
    pub name: &'a NodeName,
    pub properties: &'a Properties,
    pub scaling: ScalingPolicy,
    /// File name of the node's bootstrap document inside the artifact directory.
    pub bootstrap_file: &'a str,
}

impl NodeContext<'_> {
    /// Required scalar property rendered as text.
    ///
    /// # Errors
    ///
    /// Returns an error when the property is absent, blank, or not a scalar.
    pub fn required(&self, property: &'static str) -> Result<String, ValidationError> {
        match self.optional(property)? {
            Some(value) => Ok(value),
            None => Err(ValidationError::MissingProperty {
                node: self.name.clone(),
                property,
            }),
        }
    }

    /// Optional scalar property rendered as text. Blank strings count as absent.
    ///
    /// # Errors
    ///
    /// Returns an error when the property is present but not a scalar.
    pub fn optional(&self, property: &'static str) -> Result<Option<String>, ValidationError> {
        let Some(value) = self.properties.get(property) else {
            return Ok(None);
        };
        match value {
            Value::Null => Ok(None),
            Value::String(text) if text.trim().is_empty() => Ok(None),
            Value::String(text) => Ok(Some(text.clone())),
            Value::Number(number) => Ok(Some(number.to_string())),
            Value::Bool(flag) => Ok(Some(flag.to_string())),
            Value::Array(_) | Value::Object(_) => Err(ValidationError::InvalidProperty {
                node: self.name.clone(),
                property,
                expected: "a scalar value",
            }),
        }
    }

    #[must_use]
    pub fn raw(&self, property: &str) -> Option<&Value> {
        self.properties.get(property).filter(|value| !value.is_null())
    }

    /// Boolean flag; accepts `true`/`false` or their string spellings.
    ///
    /// # Errors
    ///
    /// Returns an error when the property is present but not boolean-like.
    pub fn flag(&self, property: &'static str) -> Result<bool, ValidationError> {
        match self.raw(property) {
            None => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(Value::String(text)) => Ok(text.eq_ignore_ascii_case("true")),
            Some(_) => Err(ValidationError::InvalidProperty {
                node: self.name.clone(),
                property,
                expected: "a boolean",
            }),
        }
    }

    /// `for_each` expression driving replica count from the instance variable.
    #[must_use]
    pub fn for_each(&self) -> String {
        format!("${{toset(var.{})}}", self.name)
    }

    /// Expression that reads the node's bootstrap document at apply time.
    #[must_use]
    pub fn bootstrap_file_expr(&self) -> String {
        format!("${{file(\"${{path.module}}/{}\")}}", self.bootstrap_file)
    }

    /// Name of one replica: the node name suffixed by its instance token.
    #[must_use]
    pub fn instance_name(&self, base: &str) -> String {
        format!("{base}${{each.key}}")
    }
}

/// Side effects a mapper asks the translator to perform for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapOutcome {
    /// Copy the external service-account credential into the artifact directory.
    pub stage_service_account: bool,
    /// Credential values written into the graph.
    pub sensitive_values: BTreeSet<String>,
}

pub trait CloudMapper {
    fn cloud(&self) -> CloudType;

    /// Insert the node's provider, resource, data and output fragments.
    ///
    /// # Errors
    ///
    /// Returns an error when a required property or credential is missing or
    /// the node's provider scope conflicts with the one already in `graph`.
    fn map(
        &self,
        node: &NodeContext<'_>,
        credentials: &dyn CredentialStore,
        graph: &mut ResourceGraph,
    ) -> Result<MapOutcome, ValidationError>;
}

/// Lookup table from cloud type to its mapper.
#[derive(Default)]
pub struct MapperRegistry {
    mappers: BTreeMap<CloudType, Box<dyn CloudMapper>>,
}

impl MapperRegistry {
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_mappers(vec![
            Box::new(AwsMapper),
            Box::new(OpenStackMapper),
            Box::new(AzureMapper),
            Box::new(GceMapper),
        ])
    }

    #[must_use]
    pub fn from_mappers(mappers: Vec<Box<dyn CloudMapper>>) -> Self {
        Self {
            mappers: mappers
                .into_iter()
                .map(|mapper| (mapper.cloud(), mapper))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, cloud: CloudType) -> Option<&dyn CloudMapper> {
        self.mappers.get(&cloud).map(std::ops::Deref::deref)
    }

    #[must_use]
    pub fn supported(&self) -> Vec<CloudType> {
        self.mappers.keys().copied().collect()
    }
}

fn credential_record(
    credentials: &dyn CredentialStore,
    cloud: CloudType,
) -> Result<&CredentialRecord, ValidationError> {
    credentials
        .lookup(cloud)
        .ok_or(ValidationError::MissingCredential { cloud })
}

fn credential_field<'a>(
    record: &'a CredentialRecord,
    cloud: CloudType,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    record
        .get(field)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or(ValidationError::MissingCredentialField { cloud, field })
}

fn scope_conflict(
    node: &NodeName,
    conflict: crate::error::ScopeConflict,
) -> ValidationError {
    ValidationError::ConflictingProviderScope {
        node: node.clone(),
        provider: conflict.provider,
        field: conflict.field,
        existing: conflict.existing,
        requested: conflict.requested,
    }
}
