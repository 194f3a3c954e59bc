// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for Azure resources.
//!
//! This module defines all Kubernetes Custom Resource Definitions used by
//! stack-azure to manage Azure resources declaratively.
//!
//! # Resource Types
//!
//! ## Databases
//!
//! - [`MysqlServer`] - Azure Database for MySQL server
//! - [`PostgresqlServer`] - Azure Database for PostgreSQL server
//!
//! ## Cache
//!
//! - [`Redis`] - Azure Cache for Redis instance
//!
//! ## Networking
//!
//! - [`VirtualNetwork`] - Azure virtual network
//! - [`MysqlServerVirtualNetworkRule`] - Subnet admitted to a MySQL server
//!
//! ## Credentials
//!
//! - [`Provider`] - Points at a Secret holding Azure service principal credentials
//!
//! # Example: Creating a MySQL server
//!
//! ```rust,no_run
//! use stack_azure::crd::{
//!     MysqlServerSpec, PricingTierSpec, ProviderReference, SqlServerParameters,
//!     StorageProfileSpec,
//! };
//!
//! let spec = MysqlServerSpec {
//!     provider_ref: ProviderReference {
//!         name: "azure-provider".to_string(),
//!         namespace: None,
//!     },
//!     write_connection_secret_to_ref: None,
//!     parameters: SqlServerParameters {
//!         resource_group_name: "my-group".to_string(),
//!         location: "westus2".to_string(),
//!         pricing_tier: PricingTierSpec {
//!             tier: "GeneralPurpose".to_string(),
//!             v_cores: 2,
//!             family: "Gen5".to_string(),
//!         },
//!         storage_profile: StorageProfileSpec {
//!             storage_gb: 25,
//!             backup_retention_days: Some(7),
//!             geo_redundant_backup: false,
//!         },
//!         admin_login_name: "myadmin".to_string(),
//!         version: "5.7".to_string(),
//!         ssl_enforced: true,
//!     },
//! };
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Condition represents an observation of a resource's current state.
///
/// Conditions are used in status subresources to communicate the state of
/// a resource to users and controllers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition. Either `Ready` or `Synced`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

// ============================================================================
// References
// ============================================================================

/// Reference to the `Provider` whose credentials are used to talk to Azure.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReference {
    /// Name of the `Provider`.
    pub name: String,

    /// Namespace of the `Provider`. Defaults to the namespace of the referencing resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to a Secret.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Name of the Secret.
    pub name: String,

    /// Namespace of the Secret. Defaults to the namespace of the referencing resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to a single key of a Secret.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    /// Name of the Secret.
    pub name: String,

    /// Namespace of the Secret. Defaults to the namespace of the `Provider`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key within the Secret data.
    pub key: String,
}

/// What happens to the external resource when its Kubernetes object is deleted.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Default, PartialEq, Eq, JsonSchema)]
pub enum ReclaimPolicy {
    /// Leave the external resource in place.
    #[default]
    Retain,

    /// Delete the external resource.
    Delete,
}

// ============================================================================
// Provider
// ============================================================================

/// `Provider` holds the location of the Azure credentials used by managed resources.
///
/// The referenced Secret key must contain the service principal JSON produced by
/// `az ad sp create-for-rbac --sdk-auth`.
///
/// # Example
///
/// ```yaml
/// apiVersion: azure.firestoned.io/v1alpha1
/// kind: Provider
/// metadata:
///   name: azure-provider
///   namespace: crossplane-system
/// spec:
///   credentialsSecretRef:
///     name: azure-credentials
///     key: credentials
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.firestoned.io",
    version = "v1alpha1",
    kind = "Provider",
    namespaced,
    doc = "Provider configures how stack-azure authenticates to Azure. It points at a Secret key holding service principal credentials."
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Secret key holding the Azure credentials JSON.
    pub credentials_secret_ref: SecretKeySelector,
}

// ============================================================================
// SQL Servers
// ============================================================================

/// Pricing tier of a SQL server.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PricingTierSpec {
    /// Tier: `Basic`, `GeneralPurpose` or `MemoryOptimized`.
    pub tier: String,

    /// Number of virtual cores.
    #[serde(rename = "vcores")]
    #[schemars(range(min = 1))]
    pub v_cores: i32,

    /// Hardware generation, e.g. `Gen4` or `Gen5`.
    pub family: String,
}

/// Storage settings of a SQL server.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileSpec {
    /// Maximum storage in gigabytes.
    #[serde(rename = "storageGB")]
    #[schemars(range(min = 5))]
    pub storage_gb: i32,

    /// Backup retention in days.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_retention_days: Option<i32>,

    /// Enable geo-redundant backups.
    #[serde(default)]
    pub geo_redundant_backup: bool,
}

/// Desired configuration shared by MySQL and PostgreSQL servers.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlServerParameters {
    /// Resource group the server lives in.
    pub resource_group_name: String,

    /// Azure region, e.g. `westus2`.
    pub location: String,

    /// Pricing tier (SKU) of the server.
    pub pricing_tier: PricingTierSpec,

    /// Storage settings of the server.
    pub storage_profile: StorageProfileSpec,

    /// Administrator login name. The connection secret username is `login@server`.
    pub admin_login_name: String,

    /// Engine version, e.g. `5.7` for MySQL or `10` for PostgreSQL.
    pub version: String,

    /// Require SSL for client connections.
    #[serde(default)]
    pub ssl_enforced: bool,
}

/// Kind of asynchronous Azure operation a SQL server can have in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationType {
    CreateServer,
    CreateFirewallRules,
}

impl OperationType {
    /// The tag stored in `status.runningOperation.type`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateServer => "createServer",
            Self::CreateFirewallRules => "createFirewallRules",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createServer" => Ok(Self::CreateServer),
            "createFirewallRules" => Ok(Self::CreateFirewallRules),
            other => Err(other.to_string()),
        }
    }
}

/// An asynchronous Azure operation that spans reconcile passes.
///
/// The type tag and the token always travel together, so a status either has
/// no running operation or has both.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunningOperation {
    /// Which operation the token belongs to (`createServer`, `createFirewallRules`).
    ///
    /// Kept as a string so that a tag this version does not know still loads
    /// and can be reported on the resource.
    pub r#type: String,

    /// Base64 encoding of the opaque provider handle used to poll the operation.
    pub token: String,
}

impl RunningOperation {
    #[must_use]
    pub fn new(operation_type: OperationType, token: &[u8]) -> Self {
        Self {
            r#type: operation_type.as_str().to_string(),
            token: BASE64.encode(token),
        }
    }

    /// The operation type, or `None` if the tag is not recognized.
    #[must_use]
    pub fn operation_type(&self) -> Option<OperationType> {
        self.r#type.parse().ok()
    }

    /// Decode the opaque provider handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored token is not valid base64.
    pub fn token_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.token)
    }
}

/// Observed state of a MySQL or PostgreSQL server.
///
/// Optional fields serialize as `null` so a status merge patch clears them.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SqlServerStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Server state reported by Azure, e.g. `Ready`.
    #[serde(default)]
    pub state: Option<String>,

    /// Human-readable summary of the server state.
    #[serde(default)]
    pub message: Option<String>,

    /// Fully qualified Azure resource ID.
    #[serde(default, rename = "providerID")]
    pub provider_id: Option<String>,

    /// Fully qualified domain name of the server.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Asynchronous operation currently in flight, if any.
    #[serde(default)]
    pub running_operation: Option<RunningOperation>,
}

/// `MysqlServer` is an Azure Database for MySQL server.
///
/// # Example
///
/// ```yaml
/// apiVersion: azure.firestoned.io/v1alpha1
/// kind: MysqlServer
/// metadata:
///   name: app-db
///   namespace: default
/// spec:
///   providerRef:
///     name: azure-provider
///     namespace: crossplane-system
///   writeConnectionSecretToRef:
///     name: app-db-connection
///   resourceGroupName: my-group
///   location: westus2
///   pricingTier:
///     tier: GeneralPurpose
///     vcores: 2
///     family: Gen5
///   storageProfile:
///     storageGB: 25
///   adminLoginName: myadmin
///   version: "5.7"
///   sslEnforced: true
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.firestoned.io",
    version = "v1alpha1",
    kind = "MysqlServer",
    namespaced,
    doc = "MysqlServer is a managed Azure Database for MySQL server. Credentials for the administrator are written to the referenced connection secret."
)]
#[kube(status = "SqlServerStatus")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MysqlServerSpec {
    /// Provider holding the Azure credentials.
    pub provider_ref: ProviderReference,

    /// Secret to write connection details to. Defaults to a Secret named after the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,

    #[serde(flatten)]
    pub parameters: SqlServerParameters,
}

/// `PostgresqlServer` is an Azure Database for PostgreSQL server.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.firestoned.io",
    version = "v1alpha1",
    kind = "PostgresqlServer",
    namespaced,
    doc = "PostgresqlServer is a managed Azure Database for PostgreSQL server. Credentials for the administrator are written to the referenced connection secret."
)]
#[kube(status = "SqlServerStatus")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#)]
#[serde(rename_all = "camelCase")]
pub struct PostgresqlServerSpec {
    /// Provider holding the Azure credentials.
    pub provider_ref: ProviderReference,

    /// Secret to write connection details to. Defaults to a Secret named after the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,

    #[serde(flatten)]
    pub parameters: SqlServerParameters,
}

// ============================================================================
// Redis
// ============================================================================

/// Azure Cache for Redis SKU.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkuSpec {
    /// SKU name: `Basic`, `Standard` or `Premium`.
    pub name: String,

    /// SKU family: `C` (Basic/Standard) or `P` (Premium).
    pub family: String,

    /// Cache size within the family.
    #[schemars(range(min = 0, max = 6))]
    pub capacity: i32,
}

/// `Redis` is an Azure Cache for Redis instance.
///
/// # Example
///
/// ```yaml
/// apiVersion: azure.firestoned.io/v1alpha1
/// kind: Redis
/// metadata:
///   name: app-cache
///   namespace: default
/// spec:
///   providerRef:
///     name: azure-provider
///   reclaimPolicy: Delete
///   resourceGroupName: my-group
///   location: westus2
///   sku:
///     name: Basic
///     family: C
///     capacity: 0
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.firestoned.io",
    version = "v1alpha1",
    kind = "Redis",
    plural = "redises",
    namespaced,
    doc = "Redis is a managed Azure Cache for Redis instance. The primary access key is written to the referenced connection secret."
)]
#[kube(status = "RedisStatus")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.endpoint"}"#)]
#[serde(rename_all = "camelCase")]
pub struct RedisSpec {
    /// Provider holding the Azure credentials.
    pub provider_ref: ProviderReference,

    /// Secret to write connection details to. Defaults to a Secret named after the cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,

    /// Whether the Azure cache is deleted with this resource.
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    /// Resource group the cache lives in.
    pub resource_group_name: String,

    /// Azure region, e.g. `westus2`.
    pub location: String,

    /// Cache SKU.
    pub sku: SkuSpec,

    /// Enable the non-TLS port (6379).
    #[serde(default)]
    pub enable_non_ssl_port: bool,

    /// Number of shards on a Premium clustered cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<i32>,

    /// Redis server settings, e.g. `maxmemory-policy`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub redis_configuration: BTreeMap<String, String>,

    /// Subnet to deploy a Premium cache into.
    #[serde(rename = "subnetID", skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    /// Static IP address within the subnet.
    #[serde(rename = "staticIP", skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<String>,
}

/// Observed state of an Azure Cache for Redis instance.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RedisStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Provisioning state reported by Azure.
    #[serde(default)]
    pub state: Option<String>,

    /// Name of the cache in Azure (`redis-<uid>`).
    #[serde(default)]
    pub resource_name: Option<String>,

    /// Fully qualified Azure resource ID.
    #[serde(default, rename = "providerID")]
    pub provider_id: Option<String>,

    /// Host name of the cache.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Non-TLS port.
    #[serde(default)]
    pub port: Option<i32>,

    /// TLS port.
    #[serde(default)]
    pub ssl_port: Option<i32>,
}

// ============================================================================
// Networking
// ============================================================================

/// Address prefixes of a virtual network.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpaceSpec {
    /// CIDR blocks, e.g. `10.0.0.0/16`.
    pub address_prefixes: Vec<String>,
}

/// `VirtualNetwork` is an Azure virtual network.
///
/// # Example
///
/// ```yaml
/// apiVersion: azure.firestoned.io/v1alpha1
/// kind: VirtualNetwork
/// metadata:
///   name: app-vnet
///   namespace: default
/// spec:
///   providerRef:
///     name: azure-provider
///   reclaimPolicy: Delete
///   name: app-vnet
///   resourceGroupName: my-group
///   location: westus2
///   addressSpace:
///     addressPrefixes:
///       - 10.0.0.0/16
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.firestoned.io",
    version = "v1alpha1",
    kind = "VirtualNetwork",
    namespaced,
    doc = "VirtualNetwork is a managed Azure virtual network."
)]
#[kube(status = "VirtualNetworkStatus")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Location","type":"string","jsonPath":".spec.location"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkSpec {
    /// Provider holding the Azure credentials.
    pub provider_ref: ProviderReference,

    /// Whether the Azure virtual network is deleted with this resource.
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    /// Name of the virtual network in Azure.
    pub name: String,

    /// Resource group the virtual network lives in.
    pub resource_group_name: String,

    /// Azure region, e.g. `westus2`.
    pub location: String,

    /// Address prefixes available to subnets.
    pub address_space: AddressSpaceSpec,

    /// Enable DDoS protection for all protected resources in the network.
    #[serde(default, rename = "enableDDOSProtection")]
    pub enable_ddos_protection: bool,

    /// Enable VM protection for all subnets in the network.
    #[serde(default, rename = "enableVMProtection")]
    pub enable_vm_protection: bool,

    /// Azure resource tags.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Observed state of an Azure virtual network.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Provisioning state reported by Azure.
    #[serde(default)]
    pub state: Option<String>,

    /// Fully qualified Azure resource ID.
    #[serde(default, rename = "providerID")]
    pub provider_id: Option<String>,

    /// Entity tag of the last observed revision.
    #[serde(default)]
    pub etag: Option<String>,

    /// Unique, immutable ID Azure assigned to the network.
    #[serde(default, rename = "resourceGUID")]
    pub resource_guid: Option<String>,
}

/// Subnet admitted by a MySQL virtual network rule.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRuleProperties {
    /// Fully qualified ID of the subnet.
    #[serde(rename = "virtualNetworkSubnetID")]
    pub virtual_network_subnet_id: String,

    /// Create the rule before the subnet has the `Microsoft.Sql` service endpoint.
    #[serde(default)]
    pub ignore_missing_vnet_service_endpoint: bool,
}

/// `MysqlServerVirtualNetworkRule` admits a subnet to an Azure Database for MySQL server.
///
/// # Example
///
/// ```yaml
/// apiVersion: azure.firestoned.io/v1alpha1
/// kind: MysqlServerVirtualNetworkRule
/// metadata:
///   name: app-db-vnet
///   namespace: default
/// spec:
///   providerRef:
///     name: azure-provider
///   name: app-db-vnet
///   serverName: mysql-3e1b0f4c
///   resourceGroupName: my-group
///   properties:
///     virtualNetworkSubnetID: /subscriptions/.../subnets/default
/// ```
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "azure.firestoned.io",
    version = "v1alpha1",
    kind = "MysqlServerVirtualNetworkRule",
    namespaced,
    doc = "MysqlServerVirtualNetworkRule is a managed virtual network rule of an Azure Database for MySQL server."
)]
#[kube(status = "VirtualNetworkRuleStatus")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Server","type":"string","jsonPath":".spec.serverName"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MysqlServerVirtualNetworkRuleSpec {
    /// Provider holding the Azure credentials.
    pub provider_ref: ProviderReference,

    /// Whether the Azure rule is deleted with this resource.
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,

    /// Name of the rule in Azure.
    pub name: String,

    /// Azure name of the MySQL server the rule applies to.
    pub server_name: String,

    /// Resource group of the server.
    pub resource_group_name: String,

    pub properties: VirtualNetworkRuleProperties,
}

/// Observed state of a virtual network rule.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRuleStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Rule state reported by Azure, e.g. `Ready` or `InProgress`.
    #[serde(default)]
    pub state: Option<String>,

    /// Fully qualified Azure resource ID.
    #[serde(default, rename = "providerID")]
    pub provider_id: Option<String>,
}
