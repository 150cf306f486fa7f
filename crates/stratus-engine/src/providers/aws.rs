use serde_json::{Map, Value, json};
use stratus_domain::CloudType;

use super::{CloudMapper, MapOutcome, NodeContext, credential_field, credential_record};
use crate::credentials::CredentialStore;
use crate::error::ValidationError;
use crate::graph::ResourceGraph;

const PROVIDER: &str = "aws";
const INSTANCE: &str = "aws_instance";

/// EC2 instances. Every AWS node in a pass must share one region.
pub struct AwsMapper;

impl CloudMapper for AwsMapper {
    fn cloud(&self) -> CloudType {
        CloudType::Aws
    }

    fn map(
        &self,
        node: &NodeContext<'_>,
        credentials: &dyn CredentialStore,
        graph: &mut ResourceGraph,
    ) -> Result<MapOutcome, ValidationError> {
        let region = node.required("region_name")?;
        let image = node.required("image_id")?;
        let instance_type = node.required("instance_type")?;
        let key_name = node.optional("key_name")?;
        let security_groups = node.raw("security_group_ids").cloned();
        let mut tags = match node.raw("tags") {
            None => Map::new(),
            Some(Value::Object(tags)) => tags.clone(),
            Some(_) => {
                return Err(ValidationError::InvalidProperty {
                    node: node.name.clone(),
                    property: "tags",
                    expected: "a mapping",
                });
            }
        };

        let record = credential_record(credentials, CloudType::Aws)?;
        let access_key = credential_field(record, CloudType::Aws, "accesskey")?;
        let secret_key = credential_field(record, CloudType::Aws, "secretkey")?;

        let provider = json!({
            "region": region,
            "access_key": access_key,
            "secret_key": secret_key,
        });
        graph
            .add_scoped_provider(PROVIDER, provider, &["region"])
            .map_err(|conflict| ValidationError::MultipleRegions {
                node: node.name.clone(),
                existing: conflict.existing,
                requested: conflict.requested,
            })?;

        graph.add_instance_variable(node.name, node.scaling.min_instances);

        let base_name = tags
            .get("Name")
            .and_then(Value::as_str)
            .unwrap_or(node.name.as_str())
            .to_string();
        tags.insert("Name".to_string(), Value::String(node.instance_name(&base_name)));

        let mut instance = Map::new();
        instance.insert("ami".to_string(), Value::String(image));
        instance.insert("instance_type".to_string(), Value::String(instance_type));
        if let Some(key_name) = key_name {
            instance.insert("key_name".to_string(), Value::String(key_name));
        }
        if let Some(security_groups) = security_groups {
            instance.insert("vpc_security_group_ids".to_string(), security_groups);
        }
        instance.insert(
            "user_data".to_string(),
            Value::String(node.bootstrap_file_expr()),
        );
        instance.insert(
            "instance_initiated_shutdown_behavior".to_string(),
            Value::String("terminate".to_string()),
        );
        instance.insert("for_each".to_string(), Value::String(node.for_each()));
        instance.insert("tags".to_string(), Value::Object(tags));

        let _ = graph.add_resource(INSTANCE, json!({ node.name.as_str(): instance }));
        let _ = graph.add_output(
            node.name,
            json!({
                "private_ips": format!("${{[for i in {INSTANCE}.{} : i.private_ip]}}", node.name),
                "public_ips": format!("${{[for i in {INSTANCE}.{} : i.public_ip]}}", node.name),
            }),
        );

        Ok(MapOutcome {
            stage_service_account: false,
            sensitive_values: [access_key.to_string(), secret_key.to_string()]
                .into_iter()
                .collect(),
        })
    }
}
