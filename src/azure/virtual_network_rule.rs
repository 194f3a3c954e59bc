// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Virtual network rules of Azure Database for MySQL servers.

use super::{ArmClient, AzureError};
use crate::constants::ARM_API_VERSION_SQL;
use crate::crd::MysqlServerVirtualNetworkRuleSpec;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Properties of a rule as reported by ARM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRuleResourceProperties {
    #[serde(default)]
    pub virtual_network_subnet_id: Option<String>,
    #[serde(default)]
    pub ignore_missing_vnet_service_endpoint: Option<bool>,
    #[serde(default)]
    pub state: Option<String>,
}

/// A rule as reported by ARM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRuleResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: Option<VirtualNetworkRuleResourceProperties>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRuleParameterProperties {
    pub virtual_network_subnet_id: String,
    pub ignore_missing_vnet_service_endpoint: bool,
}

/// Request body for creating or updating a rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VirtualNetworkRuleParameters {
    pub properties: VirtualNetworkRuleParameterProperties,
}

#[must_use]
pub fn new_parameters(spec: &MysqlServerVirtualNetworkRuleSpec) -> VirtualNetworkRuleParameters {
    VirtualNetworkRuleParameters {
        properties: VirtualNetworkRuleParameterProperties {
            virtual_network_subnet_id: spec.properties.virtual_network_subnet_id.clone(),
            ignore_missing_vnet_service_endpoint: spec
                .properties
                .ignore_missing_vnet_service_endpoint,
        },
    }
}

/// Whether the rule diverges from `spec`.
#[must_use]
pub fn needs_update(
    spec: &MysqlServerVirtualNetworkRuleSpec,
    observed: &VirtualNetworkRuleResource,
) -> bool {
    let Some(props) = observed.properties.as_ref() else {
        return true;
    };

    props.virtual_network_subnet_id.as_deref()
        != Some(spec.properties.virtual_network_subnet_id.as_str())
        || props.ignore_missing_vnet_service_endpoint.unwrap_or(false)
            != spec.properties.ignore_missing_vnet_service_endpoint
}

/// Operations on MySQL virtual network rules.
#[async_trait]
pub trait MysqlVirtualNetworkRuleApi: Send + Sync {
    async fn get(
        &self,
        resource_group: &str,
        server: &str,
        name: &str,
    ) -> Result<VirtualNetworkRuleResource, AzureError>;

    async fn create_or_update(
        &self,
        resource_group: &str,
        server: &str,
        name: &str,
        params: &VirtualNetworkRuleParameters,
    ) -> Result<(), AzureError>;

    async fn delete(&self, resource_group: &str, server: &str, name: &str)
        -> Result<(), AzureError>;
}

/// Build a [`MysqlVirtualNetworkRuleApi`] over ARM from the raw credentials JSON.
///
/// # Errors
///
/// Returns an error if the credentials cannot be parsed.
pub fn new_mysql_virtual_network_rules_client(
    credentials: &[u8],
) -> Result<Arc<dyn MysqlVirtualNetworkRuleApi>, AzureError> {
    Ok(Arc::new(ArmMysqlVirtualNetworkRuleClient::new(
        ArmClient::from_credentials_json(credentials)?,
    )))
}

/// [`MysqlVirtualNetworkRuleApi`] over the ARM REST API.
pub struct ArmMysqlVirtualNetworkRuleClient {
    arm: ArmClient,
}

impl ArmMysqlVirtualNetworkRuleClient {
    #[must_use]
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    fn rule_url(&self, resource_group: &str, server: &str, name: &str) -> Result<Url, AzureError> {
        self.arm.resource_url(
            &format!(
                "/resourceGroups/{resource_group}/providers/Microsoft.DBforMySQL/servers/{server}/virtualNetworkRules/{name}"
            ),
            ARM_API_VERSION_SQL,
        )
    }
}

#[async_trait]
impl MysqlVirtualNetworkRuleApi for ArmMysqlVirtualNetworkRuleClient {
    async fn get(
        &self,
        resource_group: &str,
        server: &str,
        name: &str,
    ) -> Result<VirtualNetworkRuleResource, AzureError> {
        let url = self.rule_url(resource_group, server, name)?;
        self.arm.send(Method::GET, &url, None).await?.json()
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        server: &str,
        name: &str,
        params: &VirtualNetworkRuleParameters,
    ) -> Result<(), AzureError> {
        let url = self.rule_url(resource_group, server, name)?;
        let body = serde_json::to_value(params)
            .map_err(|e| AzureError::InvalidParameters(e.to_string()))?;
        let response = self.arm.send(Method::PUT, &url, Some(&body)).await?;
        info!(
            server = %server,
            rule = %name,
            status = %response.status,
            "Applied MySQL virtual network rule"
        );
        Ok(())
    }

    async fn delete(
        &self,
        resource_group: &str,
        server: &str,
        name: &str,
    ) -> Result<(), AzureError> {
        let url = self.rule_url(resource_group, server, name)?;
        self.arm.send(Method::DELETE, &url, None).await?;
        info!(server = %server, rule = %name, "Started MySQL virtual network rule deletion");
        Ok(())
    }
}

#[cfg(test)]
#[path = "virtual_network_rule_tests.rs"]
mod virtual_network_rule_tests;
