use serde_json::json;
use stratus_domain::CloudType;

use super::{CloudMapper, MapOutcome, NodeContext, scope_conflict};
use crate::credentials::CredentialStore;
use crate::error::ValidationError;
use crate::graph::ResourceGraph;

const PROVIDER: &str = "google";
const INSTANCE: &str = "google_compute_instance";

/// File name the provider reads its service-account credential from.
pub const SERVICE_ACCOUNT_FILE: &str = "accounts.json";

/// Compute Engine instances. Credentials come from a service-account file
/// that the translator stages next to the graph, not from the credential store.
pub struct GceMapper;

impl CloudMapper for GceMapper {
    fn cloud(&self) -> CloudType {
        CloudType::Gce
    }

    fn map(
        &self,
        node: &NodeContext<'_>,
        _credentials: &dyn CredentialStore,
        graph: &mut ResourceGraph,
    ) -> Result<MapOutcome, ValidationError> {
        let project = node.required("project")?;
        let region = node.required("region")?;
        let zone = node.required("zone")?;
        let machine_type = node.required("machine_type")?;
        let image = node.required("image")?;
        let network = node.required("network")?;
        let ssh_keys = node.required("ssh-keys")?;

        let provider = json!({
            "credentials": format!("${{file(\"{SERVICE_ACCOUNT_FILE}\")}}"),
            "project": project,
            "region": region,
        });
        graph
            .add_scoped_provider(PROVIDER, provider, &["project", "region"])
            .map_err(|conflict| scope_conflict(node.name, conflict))?;

        graph.add_instance_variable(node.name, node.scaling.min_instances);

        let _ = graph.add_resource(
            INSTANCE,
            json!({
                node.name.as_str(): {
                    "name": node.instance_name(node.name),
                    "machine_type": machine_type,
                    "zone": zone,
                    "for_each": node.for_each(),
                    "boot_disk": { "initialize_params": { "image": image } },
                    "network_interface": { "network": network, "access_config": {} },
                    "metadata": {
                        "ssh-keys": format!("ubuntu:{ssh_keys}"),
                        "user-data": node.bootstrap_file_expr(),
                    },
                }
            }),
        );
        let _ = graph.add_output(
            node.name,
            json!({
                "private_ips": format!(
                    "${{[for i in {INSTANCE}.{} : i.network_interface[0].network_ip]}}",
                    node.name
                ),
            }),
        );

        Ok(MapOutcome {
            stage_service_account: true,
            sensitive_values: std::collections::BTreeSet::new(),
        })
    }
}
