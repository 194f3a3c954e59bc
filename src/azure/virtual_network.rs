// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure virtual networks.
//!
//! Creation and update are the same idempotent `PUT`, which Azure applies
//! synchronously enough that the next `get` reports the network.

use super::{ArmClient, AzureError};
use crate::constants::ARM_API_VERSION_NETWORK;
use crate::crd::VirtualNetworkSpec;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpace {
    #[serde(default)]
    pub address_prefixes: Vec<String>,
}

/// Properties of a virtual network as reported by ARM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkProperties {
    #[serde(default)]
    pub address_space: Option<AddressSpace>,
    #[serde(default)]
    pub enable_ddos_protection: Option<bool>,
    #[serde(default)]
    pub enable_vm_protection: Option<bool>,
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub resource_guid: Option<String>,
}

/// A virtual network as reported by ARM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub properties: Option<VirtualNetworkProperties>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkParameterProperties {
    pub address_space: AddressSpace,
    pub enable_ddos_protection: bool,
    pub enable_vm_protection: bool,
}

/// Request body for creating or updating a virtual network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkParameters {
    pub location: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub properties: VirtualNetworkParameterProperties,
}

#[must_use]
pub fn new_parameters(spec: &VirtualNetworkSpec) -> VirtualNetworkParameters {
    VirtualNetworkParameters {
        location: spec.location.clone(),
        tags: spec.tags.clone(),
        properties: VirtualNetworkParameterProperties {
            address_space: AddressSpace {
                address_prefixes: spec.address_space.address_prefixes.clone(),
            },
            enable_ddos_protection: spec.enable_ddos_protection,
            enable_vm_protection: spec.enable_vm_protection,
        },
    }
}

/// Whether the network diverges from `spec`.
///
/// Address prefixes are compared as a set; Azure does not keep their order.
#[must_use]
pub fn needs_update(spec: &VirtualNetworkSpec, observed: &VirtualNetworkResource) -> bool {
    let Some(props) = observed.properties.as_ref() else {
        return true;
    };

    let wanted: BTreeSet<&String> = spec.address_space.address_prefixes.iter().collect();
    let actual: BTreeSet<&String> = props
        .address_space
        .iter()
        .flat_map(|a| a.address_prefixes.iter())
        .collect();
    if wanted != actual {
        return true;
    }
    if props.enable_ddos_protection.unwrap_or(false) != spec.enable_ddos_protection {
        return true;
    }
    if props.enable_vm_protection.unwrap_or(false) != spec.enable_vm_protection {
        return true;
    }

    observed.tags.clone().unwrap_or_default() != spec.tags
}

/// Operations on Azure virtual networks.
#[async_trait]
pub trait VirtualNetworkApi: Send + Sync {
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetworkResource, AzureError>;

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        params: &VirtualNetworkParameters,
    ) -> Result<(), AzureError>;

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError>;
}

/// Build a [`VirtualNetworkApi`] over ARM from the raw credentials JSON.
///
/// # Errors
///
/// Returns an error if the credentials cannot be parsed.
pub fn new_virtual_networks_client(
    credentials: &[u8],
) -> Result<Arc<dyn VirtualNetworkApi>, AzureError> {
    Ok(Arc::new(ArmVirtualNetworkClient::new(
        ArmClient::from_credentials_json(credentials)?,
    )))
}

/// [`VirtualNetworkApi`] over the ARM REST API.
pub struct ArmVirtualNetworkClient {
    arm: ArmClient,
}

impl ArmVirtualNetworkClient {
    #[must_use]
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    fn network_url(&self, resource_group: &str, name: &str) -> Result<Url, AzureError> {
        self.arm.resource_url(
            &format!(
                "/resourceGroups/{resource_group}/providers/Microsoft.Network/virtualNetworks/{name}"
            ),
            ARM_API_VERSION_NETWORK,
        )
    }
}

#[async_trait]
impl VirtualNetworkApi for ArmVirtualNetworkClient {
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<VirtualNetworkResource, AzureError> {
        let url = self.network_url(resource_group, name)?;
        self.arm.send(Method::GET, &url, None).await?.json()
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        params: &VirtualNetworkParameters,
    ) -> Result<(), AzureError> {
        let url = self.network_url(resource_group, name)?;
        let body = serde_json::to_value(params)
            .map_err(|e| AzureError::InvalidParameters(e.to_string()))?;
        let response = self.arm.send(Method::PUT, &url, Some(&body)).await?;
        info!(
            network = %name,
            resource_group = %resource_group,
            status = %response.status,
            "Applied virtual network"
        );
        Ok(())
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError> {
        let url = self.network_url(resource_group, name)?;
        self.arm.send(Method::DELETE, &url, None).await?;
        info!(network = %name, resource_group = %resource_group, "Started virtual network deletion");
        Ok(())
    }
}

#[cfg(test)]
#[path = "virtual_network_tests.rs"]
mod virtual_network_tests;
