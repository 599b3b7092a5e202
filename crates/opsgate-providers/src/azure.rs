//! Azure Resource Manager adapter

use std::sync::Arc;

use async_trait::async_trait;
use opsgate_core::{
    ArgKind, ArgSpec, BackendError, BackendId, BackendResult, CanonicalArgs, OperationSpec,
    ProviderAdapter, ProviderOutput,
};
use serde_json::{json, Value};

use crate::shape::{items, select};
use crate::transport::{encode_segment, RestTransport};

const SUBSCRIPTIONS_API: &str = "2020-01-01";
const COMPUTE_API: &str = "2023-03-01";
const CONTAINER_SERVICE_API: &str = "2023-08-01";

const SUBSCRIPTION_ID: ArgSpec = ArgSpec::required("subscription_id", ArgKind::String);

pub static OPERATIONS: &[OperationSpec] = &[
    OperationSpec {
        name: "get_subscriptions",
        description: "Subscriptions visible to the caller",
        args: &[],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "list_virtual_machines",
        description: "Virtual machines in a subscription",
        args: &[SUBSCRIPTION_ID],
        default_ttl_secs: 300,
    },
    OperationSpec {
        name: "list_aks_clusters",
        description: "Managed Kubernetes clusters in a subscription",
        args: &[SUBSCRIPTION_ID],
        default_ttl_secs: 300,
    },
];

/// Adapter for Azure Resource Manager
pub struct AzureAdapter {
    transport: Arc<dyn RestTransport>,
}

impl AzureAdapter {
    pub fn new(transport: Arc<dyn RestTransport>) -> Self {
        Self { transport }
    }

    async fn list(&self, path: &str, api_version: &str) -> BackendResult<Value> {
        self.transport
            .get_json(path, &[("api-version", api_version.to_string())])
            .await
    }

    fn provider_path(args: &CanonicalArgs, provider: &str) -> BackendResult<String> {
        Ok(format!(
            "/subscriptions/{}/providers/{}",
            encode_segment(args.require("subscription_id")?),
            provider
        ))
    }

    async fn get_subscriptions(&self) -> BackendResult<ProviderOutput> {
        let page = self.list("/subscriptions", SUBSCRIPTIONS_API).await?;
        Ok(ProviderOutput::from_list(
            items(&page, "/value")
                .iter()
                .map(|sub| {
                    select(
                        sub,
                        &[
                            ("subscription_id", "/subscriptionId"),
                            ("display_name", "/displayName"),
                            ("state", "/state"),
                        ],
                    )
                })
                .collect(),
        ))
    }

    async fn list_virtual_machines(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let path = Self::provider_path(args, "Microsoft.Compute/virtualMachines")?;
        let page = self.list(&path, COMPUTE_API).await?;
        Ok(ProviderOutput::from_list(
            items(&page, "/value")
                .iter()
                .map(|vm| {
                    with_resource_group(
                        vm,
                        select(
                            vm,
                            &[
                                ("name", "/name"),
                                ("id", "/id"),
                                ("location", "/location"),
                                ("vm_size", "/properties/hardwareProfile/vmSize"),
                                ("os_type", "/properties/storageProfile/osDisk/osType"),
                                ("provisioning_state", "/properties/provisioningState"),
                            ],
                        ),
                    )
                })
                .collect(),
        ))
    }

    async fn list_aks_clusters(&self, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        let path = Self::provider_path(args, "Microsoft.ContainerService/managedClusters")?;
        let page = self.list(&path, CONTAINER_SERVICE_API).await?;
        Ok(ProviderOutput::from_list(
            items(&page, "/value")
                .iter()
                .map(|cluster| {
                    with_resource_group(
                        cluster,
                        select(
                            cluster,
                            &[
                                ("name", "/name"),
                                ("id", "/id"),
                                ("location", "/location"),
                                ("kubernetes_version", "/properties/kubernetesVersion"),
                                ("provisioning_state", "/properties/provisioningState"),
                                ("fqdn", "/properties/fqdn"),
                                ("node_resource_group", "/properties/nodeResourceGroup"),
                            ],
                        ),
                    )
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl ProviderAdapter for AzureAdapter {
    fn backend(&self) -> BackendId {
        BackendId::Azure
    }

    fn operations(&self) -> &'static [OperationSpec] {
        OPERATIONS
    }

    async fn invoke(&self, operation: &str, args: &CanonicalArgs) -> BackendResult<ProviderOutput> {
        match operation {
            "get_subscriptions" => self.get_subscriptions().await,
            "list_virtual_machines" => self.list_virtual_machines(args).await,
            "list_aks_clusters" => self.list_aks_clusters(args).await,
            other => Err(BackendError::UnknownOperation(format!("azure.{}", other))),
        }
    }
}

fn with_resource_group(resource: &Value, mut shaped: Value) -> Value {
    let group = resource
        .get("id")
        .and_then(Value::as_str)
        .and_then(resource_group);
    shaped["resource_group"] = json!(group);
    shaped
}

/// Resource group named in an ARM resource id
fn resource_group(id: &str) -> Option<&str> {
    let mut segments = id.split('/');
    segments
        .by_ref()
        .find(|s| s.eq_ignore_ascii_case("resourceGroups"))?;
    segments.next().filter(|s| !s.is_empty())
}
