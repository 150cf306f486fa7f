use std::collections::BTreeSet;

use serde_json::{Map, Value, json};
use stratus_domain::CloudType;

use super::{
    CloudMapper, MapOutcome, NodeContext, credential_field, credential_record, scope_conflict,
};
use crate::credentials::{CredentialRecord, CredentialStore};
use crate::error::ValidationError;
use crate::graph::ResourceGraph;

const PROVIDER: &str = "azurerm";
const LINUX_VM: &str = "azurerm_linux_virtual_machine";
const WINDOWS_VM: &str = "azurerm_windows_virtual_machine";
const NETWORK_INTERFACE: &str = "azurerm_network_interface";
const PUBLIC_IP: &str = "azurerm_public_ip";
const NSG_ASSOCIATION: &str = "azurerm_network_interface_security_group_association";

const LINUX_ADMIN_USER: &str = "ubuntu";
const WINDOWS_ADMIN_USER: &str = "stratusadmin";
const WINDOWS_ADMIN_PASSWORD: &str = "Stratus-Worker-01!";

/// Azure virtual machines attached to an existing resource group, network,
/// subnet and network security group.
pub struct AzureMapper;

impl CloudMapper for AzureMapper {
    fn cloud(&self) -> CloudType {
        CloudType::Azure
    }

    fn map(
        &self,
        node: &NodeContext<'_>,
        credentials: &dyn CredentialStore,
        graph: &mut ResourceGraph,
    ) -> Result<MapOutcome, ValidationError> {
        let resource_group = node.required("resource_group")?;
        let virtual_network = node.required("virtual_network")?;
        let subnet = node.required("subnet")?;
        let security_group = node.required("network_security_group")?;
        let vm_size = node.required("vm_size")?;
        let image = node.required("image")?;
        let ssh_key = node.optional("key_data")?;
        let public_ip = node.flag("public_ip")?;
        let node_msi = node.flag("use_msi")?;

        let record = credential_record(credentials, CloudType::Azure)?;
        let subscription_id = credential_field(record, CloudType::Azure, "subscription_id")?;
        let mut sensitive_values = BTreeSet::new();

        let provider = if use_managed_identity(record, node_msi) {
            json!({
                "features": {},
                "subscription_id": subscription_id,
                "use_msi": true,
            })
        } else {
            let tenant_id = credential_field(record, CloudType::Azure, "tenant_id")?;
            let client_id = credential_field(record, CloudType::Azure, "client_id")?;
            let client_secret = credential_field(record, CloudType::Azure, "client_secret")?;
            sensitive_values.insert(client_secret.to_string());
            json!({
                "features": {},
                "subscription_id": subscription_id,
                "tenant_id": tenant_id,
                "client_id": client_id,
                "client_secret": client_secret,
            })
        };
        graph
            .add_scoped_provider(PROVIDER, provider, &["subscription_id"])
            .map_err(|conflict| scope_conflict(node.name, conflict))?;

        graph.add_instance_variable(node.name, node.scaling.min_instances);

        let group_ref = format!("${{data.azurerm_resource_group.{resource_group}.name}}");
        let location_ref = format!("${{data.azurerm_resource_group.{resource_group}.location}}");

        let _ = graph.add_data(
            "azurerm_resource_group",
            json!({ resource_group.as_str(): { "name": resource_group } }),
        );
        let _ = graph.add_data(
            "azurerm_virtual_network",
            json!({
                virtual_network.as_str(): {
                    "name": virtual_network,
                    "resource_group_name": group_ref,
                }
            }),
        );
        let _ = graph.add_data(
            "azurerm_subnet",
            json!({
                subnet.as_str(): {
                    "name": subnet,
                    "resource_group_name": group_ref,
                    "virtual_network_name": format!("${{data.azurerm_virtual_network.{virtual_network}.name}}"),
                }
            }),
        );
        let _ = graph.add_data(
            "azurerm_network_security_group",
            json!({
                security_group.as_str(): {
                    "name": security_group,
                    "resource_group_name": group_ref,
                }
            }),
        );

        let nic_name = format!("{}-nic", node.name);
        let ip_name = format!("{}-ip", node.name);

        let mut ip_configuration = Map::new();
        ip_configuration.insert(
            "name".to_string(),
            Value::String(node.instance_name(&format!("{}-nic-config", node.name))),
        );
        ip_configuration.insert(
            "subnet_id".to_string(),
            Value::String(format!("${{data.azurerm_subnet.{subnet}.id}}")),
        );
        ip_configuration.insert(
            "private_ip_address_allocation".to_string(),
            Value::String("Dynamic".to_string()),
        );

        if public_ip {
            let _ = graph.add_resource(
                PUBLIC_IP,
                json!({
                    ip_name.as_str(): {
                        "name": node.instance_name(&ip_name),
                        "location": location_ref,
                        "resource_group_name": group_ref,
                        "allocation_method": "Static",
                        "for_each": node.for_each(),
                    }
                }),
            );
            ip_configuration.insert(
                "public_ip_address_id".to_string(),
                Value::String(format!("${{{PUBLIC_IP}.{ip_name}[each.key].id}}")),
            );
        }

        let _ = graph.add_resource(
            NETWORK_INTERFACE,
            json!({
                nic_name.as_str(): {
                    "name": node.instance_name(&nic_name),
                    "location": location_ref,
                    "resource_group_name": group_ref,
                    "for_each": node.for_each(),
                    "ip_configuration": ip_configuration,
                }
            }),
        );
        let _ = graph.add_resource(
            NSG_ASSOCIATION,
            json!({
                format!("{}-nsg", node.name): {
                    "for_each": node.for_each(),
                    "network_interface_id": format!("${{{NETWORK_INTERFACE}.{nic_name}[each.key].id}}"),
                    "network_security_group_id": format!("${{data.azurerm_network_security_group.{security_group}.id}}"),
                }
            }),
        );

        let mut machine = Map::new();
        machine.insert("name".to_string(), Value::String(node.instance_name(node.name)));
        machine.insert("location".to_string(), Value::String(location_ref));
        machine.insert("resource_group_name".to_string(), Value::String(group_ref));
        machine.insert("size".to_string(), Value::String(vm_size));
        machine.insert("for_each".to_string(), Value::String(node.for_each()));
        machine.insert(
            "network_interface_ids".to_string(),
            json!([format!("${{{NETWORK_INTERFACE}.{nic_name}[each.key].id}}")]),
        );
        machine.insert(
            "custom_data".to_string(),
            Value::String(format!(
                "${{filebase64(\"${{path.module}}/{}\")}}",
                node.bootstrap_file
            )),
        );
        machine.insert(
            "os_disk".to_string(),
            json!({
                "name": node.instance_name(&format!("{}-disk", node.name)),
                "caching": "ReadWrite",
                "storage_account_type": "Standard_LRS",
            }),
        );

        let machine_kind = if let Some(ssh_key) = ssh_key {
            let admin = node
                .optional("admin_username")?
                .unwrap_or_else(|| LINUX_ADMIN_USER.to_string());
            machine.insert("admin_username".to_string(), Value::String(admin.clone()));
            machine.insert(
                "disable_password_authentication".to_string(),
                Value::Bool(true),
            );
            machine.insert(
                "admin_ssh_key".to_string(),
                json!({ "username": admin, "public_key": ssh_key }),
            );
            machine.insert(
                "source_image_reference".to_string(),
                json!({
                    "publisher": "Canonical",
                    "offer": "UbuntuServer",
                    "sku": image,
                    "version": "latest",
                }),
            );
            LINUX_VM
        } else {
            let admin = node
                .optional("admin_username")?
                .unwrap_or_else(|| WINDOWS_ADMIN_USER.to_string());
            let password = node
                .optional("admin_password")?
                .unwrap_or_else(|| WINDOWS_ADMIN_PASSWORD.to_string());
            sensitive_values.insert(password.clone());
            machine.insert("admin_username".to_string(), Value::String(admin));
            machine.insert("admin_password".to_string(), Value::String(password));
            machine.insert(
                "source_image_reference".to_string(),
                json!({
                    "publisher": "MicrosoftWindowsServer",
                    "offer": "WindowsServer",
                    "sku": image,
                    "version": "latest",
                }),
            );
            WINDOWS_VM
        };
        let _ = graph.add_resource(machine_kind, json!({ node.name.as_str(): machine }));

        let mut output = Map::new();
        output.insert(
            "private_ips".to_string(),
            Value::String(format!(
                "${{[for i in {NETWORK_INTERFACE}.{nic_name} : i.private_ip_address]}}"
            )),
        );
        if public_ip {
            output.insert(
                "public_ips".to_string(),
                Value::String(format!("${{[for i in {PUBLIC_IP}.{ip_name} : i.ip_address]}}")),
            );
        }
        let _ = graph.add_output(node.name, Value::Object(output));

        Ok(MapOutcome {
            stage_service_account: false,
            sensitive_values,
        })
    }
}

/// Managed identity is used when the record has no client secret, or either
/// the record or the node asks for it.
fn use_managed_identity(record: &CredentialRecord, node_msi: bool) -> bool {
    let no_secret = record
        .get("client_secret")
        .is_none_or(|secret| secret.is_empty());
    let record_msi = record
        .get("use_msi")
        .is_some_and(|flag| flag.eq_ignore_ascii_case("true"));
    no_secret || record_msi || node_msi
}
