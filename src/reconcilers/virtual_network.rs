// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `VirtualNetwork` reconciliation through [`ManagedReconciler`].

use super::managed::{ExternalClient, ManagedReconciler, ManagedResource, Observation};
use crate::azure::virtual_network::{
    needs_update, new_parameters, new_virtual_networks_client, VirtualNetworkApi,
    VirtualNetworkResource,
};
use crate::azure::AzureError;
use crate::constants::{FINALIZER_VIRTUAL_NETWORK, KIND_VIRTUAL_NETWORK};
use crate::crd::{Condition, ProviderReference, ReclaimPolicy, VirtualNetwork, VirtualNetworkStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Reconciler for `VirtualNetwork` resources.
pub type VirtualNetworkReconciler<S> = ManagedReconciler<VirtualNetwork, S>;

impl ManagedResource for VirtualNetwork {
    const KIND: &'static str = KIND_VIRTUAL_NETWORK;
    const FINALIZER: &'static str = FINALIZER_VIRTUAL_NETWORK;

    fn provider_ref(&self) -> &ProviderReference {
        &self.spec.provider_ref
    }

    fn reclaim_policy(&self) -> ReclaimPolicy {
        self.spec.reclaim_policy
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self
            .status
            .get_or_insert_with(VirtualNetworkStatus::default)
            .conditions
    }
}

/// Copy what Azure reports about a network into its status.
pub fn observe_virtual_network(vnet: &mut VirtualNetwork, observed: &VirtualNetworkResource) {
    let status = vnet.status.get_or_insert_with(VirtualNetworkStatus::default);
    status.provider_id = observed.id.clone();
    status.etag = observed.etag.clone();
    if let Some(props) = observed.properties.as_ref() {
        status.state = props.provisioning_state.clone();
        status.resource_guid = props.resource_guid.clone();
    }
}

/// [`ExternalClient`] backed by the Azure virtual networks API.
pub struct AzureVirtualNetwork {
    client: Arc<dyn VirtualNetworkApi>,
}

impl AzureVirtualNetwork {
    #[must_use]
    pub fn new(client: Arc<dyn VirtualNetworkApi>) -> Self {
        Self { client }
    }

    async fn apply(&self, vnet: &VirtualNetwork) -> Result<(), AzureError> {
        self.client
            .create_or_update(
                &vnet.spec.resource_group_name,
                &vnet.spec.name,
                &new_parameters(&vnet.spec),
            )
            .await
    }
}

#[async_trait]
impl ExternalClient<VirtualNetwork> for AzureVirtualNetwork {
    async fn observe(&self, vnet: &mut VirtualNetwork) -> Result<Observation, AzureError> {
        let observed = match self
            .client
            .get(&vnet.spec.resource_group_name, &vnet.spec.name)
            .await
        {
            Ok(observed) => observed,
            Err(e) if e.is_not_found() => return Ok(Observation::Missing),
            Err(e) => return Err(e),
        };

        observe_virtual_network(vnet, &observed);
        Ok(Observation::Exists {
            up_to_date: !needs_update(&vnet.spec, &observed),
        })
    }

    async fn create(&self, vnet: &VirtualNetwork) -> Result<(), AzureError> {
        self.apply(vnet).await
    }

    async fn update(&self, vnet: &VirtualNetwork) -> Result<(), AzureError> {
        self.apply(vnet).await
    }

    async fn delete(&self, vnet: &VirtualNetwork) -> Result<(), AzureError> {
        self.client
            .delete(&vnet.spec.resource_group_name, &vnet.spec.name)
            .await
    }
}

/// Build the [`ExternalClient`] for virtual networks from raw credentials.
///
/// # Errors
///
/// Returns an error if the credentials cannot be parsed.
pub fn new_virtual_network_client(
    credentials: &[u8],
) -> Result<Box<dyn ExternalClient<VirtualNetwork>>, AzureError> {
    Ok(Box::new(AzureVirtualNetwork::new(
        new_virtual_networks_client(credentials)?,
    )))
}

#[cfg(test)]
#[path = "virtual_network_tests.rs"]
mod virtual_network_tests;
