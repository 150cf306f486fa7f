use serde_json::{Value, json};
use stratus_domain::CloudType;

use super::{
    CloudMapper, MapOutcome, NodeContext, credential_field, credential_record, scope_conflict,
};
use crate::credentials::CredentialStore;
use crate::error::ValidationError;
use crate::graph::ResourceGraph;

const PROVIDER: &str = "openstack";
const INSTANCE: &str = "openstack_compute_instance_v2";

pub struct OpenStackMapper;

impl CloudMapper for OpenStackMapper {
    fn cloud(&self) -> CloudType {
        CloudType::OpenStack
    }

    fn map(
        &self,
        node: &NodeContext<'_>,
        credentials: &dyn CredentialStore,
        graph: &mut ResourceGraph,
    ) -> Result<MapOutcome, ValidationError> {
        let auth_url = node.required("auth_url")?;
        let tenant_id = node.required("project_id")?;
        let image_id = node.required("image_id")?;
        let flavor_id = node.required("flavor_id")?;
        let network_name = node.required("network_name")?;
        let network_id = node.required("network_id")?;
        let key_pair = node.required("key_name")?;
        let security_groups = match node.raw("security_groups") {
            None => {
                return Err(ValidationError::MissingProperty {
                    node: node.name.clone(),
                    property: "security_groups",
                });
            }
            Some(Value::Array(groups)) => Value::Array(groups.clone()),
            Some(_) => Value::Array(vec![Value::String(node.required("security_groups")?)]),
        };

        let record = credential_record(credentials, CloudType::OpenStack)?;
        let user_name = credential_field(record, CloudType::OpenStack, "username")?;
        let password = credential_field(record, CloudType::OpenStack, "password")?;

        let provider = json!({
            "auth_url": auth_url,
            "tenant_id": tenant_id,
            "user_name": user_name,
            "password": password,
        });
        graph
            .add_scoped_provider(PROVIDER, provider, &["auth_url", "tenant_id"])
            .map_err(|conflict| scope_conflict(node.name, conflict))?;

        graph.add_instance_variable(node.name, node.scaling.min_instances);

        let _ = graph.add_resource(
            INSTANCE,
            json!({
                node.name.as_str(): {
                    "name": node.instance_name(node.name),
                    "image_id": image_id,
                    "flavor_id": flavor_id,
                    "key_pair": key_pair,
                    "security_groups": security_groups,
                    "user_data": node.bootstrap_file_expr(),
                    "for_each": node.for_each(),
                    "network": {
                        "name": network_name,
                        "uuid": network_id,
                    },
                }
            }),
        );
        let _ = graph.add_output(
            node.name,
            json!({
                "private_ips": format!("${{[for i in {INSTANCE}.{} : i.access_ip_v4]}}", node.name),
            }),
        );

        Ok(MapOutcome {
            stage_service_account: false,
            sensitive_values: std::iter::once(password.to_string()).collect(),
        })
    }
}
