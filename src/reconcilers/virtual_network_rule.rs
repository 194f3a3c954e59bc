// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `MysqlServerVirtualNetworkRule` reconciliation through [`ManagedReconciler`].

use super::managed::{ExternalClient, ManagedReconciler, ManagedResource, Observation};
use crate::azure::virtual_network_rule::{
    needs_update, new_mysql_virtual_network_rules_client, new_parameters,
    MysqlVirtualNetworkRuleApi,
};
use crate::azure::AzureError;
use crate::constants::{
    FINALIZER_MYSQL_SERVER_VIRTUAL_NETWORK_RULE, KIND_MYSQL_SERVER_VIRTUAL_NETWORK_RULE,
};
use crate::crd::{
    Condition, MysqlServerVirtualNetworkRule, ProviderReference, ReclaimPolicy,
    VirtualNetworkRuleStatus,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Reconciler for `MysqlServerVirtualNetworkRule` resources.
pub type MysqlServerVirtualNetworkRuleReconciler<S> =
    ManagedReconciler<MysqlServerVirtualNetworkRule, S>;

impl ManagedResource for MysqlServerVirtualNetworkRule {
    const KIND: &'static str = KIND_MYSQL_SERVER_VIRTUAL_NETWORK_RULE;
    const FINALIZER: &'static str = FINALIZER_MYSQL_SERVER_VIRTUAL_NETWORK_RULE;

    fn provider_ref(&self) -> &ProviderReference {
        &self.spec.provider_ref
    }

    fn reclaim_policy(&self) -> ReclaimPolicy {
        self.spec.reclaim_policy
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self
            .status
            .get_or_insert_with(VirtualNetworkRuleStatus::default)
            .conditions
    }
}

/// [`ExternalClient`] backed by the MySQL virtual network rules API.
pub struct AzureMysqlVirtualNetworkRule {
    client: Arc<dyn MysqlVirtualNetworkRuleApi>,
}

impl AzureMysqlVirtualNetworkRule {
    #[must_use]
    pub fn new(client: Arc<dyn MysqlVirtualNetworkRuleApi>) -> Self {
        Self { client }
    }

    async fn apply(&self, rule: &MysqlServerVirtualNetworkRule) -> Result<(), AzureError> {
        let spec = &rule.spec;
        self.client
            .create_or_update(
                &spec.resource_group_name,
                &spec.server_name,
                &spec.name,
                &new_parameters(spec),
            )
            .await
    }
}

#[async_trait]
impl ExternalClient<MysqlServerVirtualNetworkRule> for AzureMysqlVirtualNetworkRule {
    async fn observe(
        &self,
        rule: &mut MysqlServerVirtualNetworkRule,
    ) -> Result<Observation, AzureError> {
        let spec = &rule.spec;
        let observed = match self
            .client
            .get(&spec.resource_group_name, &spec.server_name, &spec.name)
            .await
        {
            Ok(observed) => observed,
            Err(e) if e.is_not_found() => return Ok(Observation::Missing),
            Err(e) => return Err(e),
        };

        let up_to_date = !needs_update(spec, &observed);
        let status = rule
            .status
            .get_or_insert_with(VirtualNetworkRuleStatus::default);
        status.provider_id = observed.id.clone();
        status.state = observed.properties.as_ref().and_then(|p| p.state.clone());
        Ok(Observation::Exists { up_to_date })
    }

    async fn create(&self, rule: &MysqlServerVirtualNetworkRule) -> Result<(), AzureError> {
        self.apply(rule).await
    }

    async fn update(&self, rule: &MysqlServerVirtualNetworkRule) -> Result<(), AzureError> {
        self.apply(rule).await
    }

    async fn delete(&self, rule: &MysqlServerVirtualNetworkRule) -> Result<(), AzureError> {
        let spec = &rule.spec;
        self.client
            .delete(&spec.resource_group_name, &spec.server_name, &spec.name)
            .await
    }
}

/// Build the [`ExternalClient`] for MySQL virtual network rules from raw credentials.
///
/// # Errors
///
/// Returns an error if the credentials cannot be parsed.
pub fn new_mysql_virtual_network_rule_client(
    credentials: &[u8],
) -> Result<Box<dyn ExternalClient<MysqlServerVirtualNetworkRule>>, AzureError> {
    Ok(Box::new(AzureMysqlVirtualNetworkRule::new(
        new_mysql_virtual_network_rules_client(credentials)?,
    )))
}

#[cfg(test)]
#[path = "virtual_network_rule_tests.rs"]
mod virtual_network_rule_tests;
