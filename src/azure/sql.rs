// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure Database for MySQL and PostgreSQL servers.
//!
//! [`SqlServerApi`] is the capability set the SQL server reconciler drives.
//! Creating a server and creating its firewall rule are long-running
//! operations: `*_begin` returns an opaque token and `*_end` polls it.

use super::operation::{self, OperationState};
use super::{ArmClient, AzureError};
use crate::constants::{
    ARM_API_VERSION_SQL, SQL_SERVER_STATE_DISABLED, SQL_SERVER_STATE_DROPPING,
    SQL_SERVER_STATE_READY,
};
use crate::crd::{Condition, PricingTierSpec, SqlServerParameters};
use crate::reconcilers::status;
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Supported tiers and the prefix each one contributes to a SKU name.
const SKU_TIERS: [(&str, &str); 3] = [
    ("Basic", "B"),
    ("GeneralPurpose", "GP"),
    ("MemoryOptimized", "MO"),
];

/// Database engine behind a SQL server resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlVendor {
    Mysql,
    Postgresql,
}

impl SqlVendor {
    /// ARM resource provider namespace.
    #[must_use]
    pub fn provider_namespace(self) -> &'static str {
        match self {
            Self::Mysql => "Microsoft.DBforMySQL",
            Self::Postgresql => "Microsoft.DBforPostgreSQL",
        }
    }
}

/// Observed state of a SQL server.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SqlServer {
    pub id: String,
    pub state: String,
    pub fqdn: String,
}

/// A server-level firewall rule.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FirewallRule {
    pub name: String,
    pub start_ip_address: String,
    pub end_ip_address: String,
}

/// Operations on one vendor's SQL servers.
#[async_trait]
pub trait SqlServerApi: Send + Sync {
    /// Fetch a server. A missing server is an error for which
    /// [`AzureError::is_not_found`] holds.
    async fn get_server(
        &self,
        name: &str,
        params: &SqlServerParameters,
    ) -> Result<SqlServer, AzureError>;

    /// Start creating a server and return the operation token.
    async fn create_server_begin(
        &self,
        name: &str,
        params: &SqlServerParameters,
        admin_password: &str,
    ) -> Result<Vec<u8>, AzureError>;

    /// Poll a create-server operation.
    async fn create_server_end(&self, token: &[u8]) -> Result<OperationState, AzureError>;

    /// Start deleting a server. Completion is not tracked.
    async fn delete_server(&self, name: &str, params: &SqlServerParameters)
        -> Result<(), AzureError>;

    /// Fetch a firewall rule of a server.
    async fn get_firewall_rule(
        &self,
        name: &str,
        params: &SqlServerParameters,
        rule_name: &str,
    ) -> Result<FirewallRule, AzureError>;

    /// Start creating a firewall rule and return the operation token.
    async fn create_firewall_rules_begin(
        &self,
        name: &str,
        params: &SqlServerParameters,
        rule: &FirewallRule,
    ) -> Result<Vec<u8>, AzureError>;

    /// Poll a create-firewall-rule operation.
    async fn create_firewall_rules_end(&self, token: &[u8])
        -> Result<OperationState, AzureError>;
}

/// Builds a [`SqlServerApi`] from the credentials found in a `Provider` Secret.
pub trait SqlServerApiFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the credentials are unusable.
    fn create_api(
        &self,
        vendor: SqlVendor,
        credentials: &[u8],
    ) -> Result<Arc<dyn SqlServerApi>, AzureError>;
}

/// Factory producing [`ArmSqlServerClient`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct ArmSqlServerApiFactory;

impl SqlServerApiFactory for ArmSqlServerApiFactory {
    fn create_api(
        &self,
        vendor: SqlVendor,
        credentials: &[u8],
    ) -> Result<Arc<dyn SqlServerApi>, AzureError> {
        let arm = ArmClient::from_credentials_json(credentials)?;
        Ok(Arc::new(ArmSqlServerClient::new(arm, vendor)))
    }
}

/// Translate a pricing tier into an Azure SKU name such as `GP_Gen5_2`.
///
/// # Errors
///
/// Returns an error if the tier is not one of the supported values.
pub fn sql_server_sku_name(tier: &PricingTierSpec) -> Result<String, AzureError> {
    let prefix = SKU_TIERS
        .iter()
        .find(|(name, _)| *name == tier.tier)
        .map(|(_, prefix)| *prefix)
        .ok_or_else(|| {
            let supported: Vec<&str> = SKU_TIERS.iter().map(|(name, _)| *name).collect();
            AzureError::InvalidParameters(format!(
                "tier '{}' is not one of the supported values: [{}]",
                tier.tier,
                supported.join(" ")
            ))
        })?;
    Ok(format!("{prefix}_{}_{}", tier.family, tier.v_cores))
}

/// Human-readable summary of a server state, e.g. `SQL Server instance db is ready`.
#[must_use]
pub fn sql_server_status_message(name: &str, state: &str) -> String {
    if state == SQL_SERVER_STATE_READY {
        format!("SQL Server instance {name} is ready")
    } else {
        format!("SQL Server instance {name} is {state}")
    }
}

/// `Ready` condition describing a server in `state`.
#[must_use]
pub fn sql_server_condition(state: &str) -> Condition {
    match state {
        SQL_SERVER_STATE_READY => status::available(),
        SQL_SERVER_STATE_DROPPING => status::deleting(),
        SQL_SERVER_STATE_DISABLED => status::unavailable(),
        _ => status::creating(),
    }
}

#[must_use]
pub fn to_ssl_enforcement(ssl_enforced: bool) -> &'static str {
    if ssl_enforced {
        "Enabled"
    } else {
        "Disabled"
    }
}

#[must_use]
pub fn to_geo_redundant_backup(enabled: bool) -> &'static str {
    if enabled {
        "Enabled"
    } else {
        "Disabled"
    }
}

/// Request body for creating a server.
///
/// # Errors
///
/// Returns an error if the pricing tier is invalid.
pub fn new_server_parameters(
    params: &SqlServerParameters,
    admin_password: &str,
) -> Result<serde_json::Value, AzureError> {
    let sku_name = sql_server_sku_name(&params.pricing_tier)?;
    let mut storage = json!({
        "storageMB": i64::from(params.storage_profile.storage_gb) * 1024,
        "geoRedundantBackup": to_geo_redundant_backup(params.storage_profile.geo_redundant_backup),
    });
    if let Some(days) = params.storage_profile.backup_retention_days {
        storage["backupRetentionDays"] = json!(days);
    }

    Ok(json!({
        "location": params.location,
        "sku": {
            "name": sku_name,
            "tier": params.pricing_tier.tier,
            "capacity": params.pricing_tier.v_cores,
            "family": params.pricing_tier.family,
        },
        "properties": {
            "createMode": "Default",
            "administratorLogin": params.admin_login_name,
            "administratorLoginPassword": admin_password,
            "version": params.version,
            "sslEnforcement": to_ssl_enforcement(params.ssl_enforced),
            "storageProfile": storage,
        },
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerResource {
    #[serde(default)]
    id: String,
    #[serde(default)]
    properties: ServerProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerProperties {
    #[serde(default)]
    user_visible_state: String,
    #[serde(default)]
    fully_qualified_domain_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirewallRuleResource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    properties: FirewallRuleProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct FirewallRuleProperties {
    #[serde(default)]
    start_ip_address: String,
    #[serde(default)]
    end_ip_address: String,
}

/// [`SqlServerApi`] over the ARM REST API.
pub struct ArmSqlServerClient {
    arm: ArmClient,
    vendor: SqlVendor,
}

impl ArmSqlServerClient {
    #[must_use]
    pub fn new(arm: ArmClient, vendor: SqlVendor) -> Self {
        Self { arm, vendor }
    }

    fn server_url(&self, name: &str, params: &SqlServerParameters) -> Result<Url, AzureError> {
        self.arm.resource_url(
            &format!(
                "/resourceGroups/{}/providers/{}/servers/{name}",
                params.resource_group_name,
                self.vendor.provider_namespace()
            ),
            ARM_API_VERSION_SQL,
        )
    }

    fn firewall_rule_url(
        &self,
        name: &str,
        params: &SqlServerParameters,
        rule_name: &str,
    ) -> Result<Url, AzureError> {
        self.arm.resource_url(
            &format!(
                "/resourceGroups/{}/providers/{}/servers/{name}/firewallRules/{rule_name}",
                params.resource_group_name,
                self.vendor.provider_namespace()
            ),
            ARM_API_VERSION_SQL,
        )
    }
}

#[async_trait]
impl SqlServerApi for ArmSqlServerClient {
    async fn get_server(
        &self,
        name: &str,
        params: &SqlServerParameters,
    ) -> Result<SqlServer, AzureError> {
        let url = self.server_url(name, params)?;
        let server: ServerResource = self.arm.send(Method::GET, &url, None).await?.json()?;
        Ok(SqlServer {
            id: server.id,
            state: server.properties.user_visible_state,
            fqdn: server.properties.fully_qualified_domain_name,
        })
    }

    async fn create_server_begin(
        &self,
        name: &str,
        params: &SqlServerParameters,
        admin_password: &str,
    ) -> Result<Vec<u8>, AzureError> {
        let url = self.server_url(name, params)?;
        let body = new_server_parameters(params, admin_password)?;
        let response = self.arm.send(Method::PUT, &url, Some(&body)).await?;
        info!(
            server = %name,
            vendor = ?self.vendor,
            status = %response.status,
            "Started SQL server creation"
        );
        operation::begin_token(&response, &url)
    }

    async fn create_server_end(&self, token: &[u8]) -> Result<OperationState, AzureError> {
        operation::poll(&self.arm, token).await
    }

    async fn delete_server(
        &self,
        name: &str,
        params: &SqlServerParameters,
    ) -> Result<(), AzureError> {
        let url = self.server_url(name, params)?;
        let response = self.arm.send(Method::DELETE, &url, None).await?;
        info!(
            server = %name,
            vendor = ?self.vendor,
            status = %response.status,
            "Started SQL server deletion"
        );
        Ok(())
    }

    async fn get_firewall_rule(
        &self,
        name: &str,
        params: &SqlServerParameters,
        rule_name: &str,
    ) -> Result<FirewallRule, AzureError> {
        let url = self.firewall_rule_url(name, params, rule_name)?;
        let rule: FirewallRuleResource = self.arm.send(Method::GET, &url, None).await?.json()?;
        Ok(FirewallRule {
            name: rule.name,
            start_ip_address: rule.properties.start_ip_address,
            end_ip_address: rule.properties.end_ip_address,
        })
    }

    async fn create_firewall_rules_begin(
        &self,
        name: &str,
        params: &SqlServerParameters,
        rule: &FirewallRule,
    ) -> Result<Vec<u8>, AzureError> {
        let url = self.firewall_rule_url(name, params, &rule.name)?;
        let body = json!({
            "properties": {
                "startIpAddress": rule.start_ip_address,
                "endIpAddress": rule.end_ip_address,
            }
        });
        let response = self.arm.send(Method::PUT, &url, Some(&body)).await?;
        info!(
            server = %name,
            rule = %rule.name,
            status = %response.status,
            "Started firewall rule creation"
        );
        operation::begin_token(&response, &url)
    }

    async fn create_firewall_rules_end(
        &self,
        token: &[u8],
    ) -> Result<OperationState, AzureError> {
        operation::poll(&self.arm, token).await
    }
}

#[cfg(test)]
#[path = "sql_tests.rs"]
mod sql_tests;
