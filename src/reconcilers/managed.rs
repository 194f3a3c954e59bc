// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Observe/create/update/delete reconciliation.
//!
//! Kinds whose Azure API applies changes with a plain idempotent `PUT`
//! (virtual networks, MySQL virtual network rules) need neither operation
//! tokens nor provisioning-state tracking. One [`ManagedReconciler`] serves
//! them all:
//!
//! 1. Deletion requested: delete the external resource (unless the reclaim
//!    policy retains it) and release the finalizer. A 404 counts as deleted.
//! 2. Observe. Absent: add the finalizer and create it, then requeue.
//! 3. Present: mark it available, update it if it diverges from `spec`, and
//!    poll again after a long wait.
//!
//! Failures set a `ReconcileError` condition and requeue.

use super::finalizers::{add_finalizer, has_finalizer, is_being_deleted, remove_finalizer};
use super::provider::load_credentials;
use super::status::{
    available, creating, deleting, reconcile_error, reconcile_success, set_condition,
};
use super::ReconcileOutcome;
use crate::azure::AzureError;
use crate::constants::LONG_WAIT;
use crate::crd::{Condition, ProviderReference, ReclaimPolicy};
use crate::metrics;
use crate::store::{ObjectStore, StoredObject};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A resource kind reconciled through an [`ExternalClient`].
pub trait ManagedResource: StoredObject {
    /// Kind name used in logs, metrics and error messages.
    const KIND: &'static str;

    /// Finalizer guarding deletion of the external resource.
    const FINALIZER: &'static str;

    fn provider_ref(&self) -> &ProviderReference;

    fn reclaim_policy(&self) -> ReclaimPolicy;

    /// Status conditions, with the status created empty if absent.
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;
}

/// What [`ExternalClient::observe`] found in Azure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    Missing,
    /// `up_to_date` is false when the resource diverges from `spec`.
    Exists { up_to_date: bool },
}

/// Operations on the external resource behind a `K`.
#[async_trait]
pub trait ExternalClient<K>: Send + Sync {
    /// Read the external resource and record its observed fields in the status.
    async fn observe(&self, resource: &mut K) -> Result<Observation, AzureError>;

    async fn create(&self, resource: &K) -> Result<(), AzureError>;

    async fn update(&self, resource: &K) -> Result<(), AzureError>;

    async fn delete(&self, resource: &K) -> Result<(), AzureError>;
}

/// Produces an [`ExternalClient`] for a resource.
#[async_trait]
pub trait ExternalConnecter<K>: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the resource's credentials cannot be loaded or used.
    async fn connect(&self, resource: &K) -> Result<Box<dyn ExternalClient<K>>>;
}

/// Builds an [`ExternalClient`] from raw credentials.
pub type ExternalClientBuilder<K> = fn(&[u8]) -> Result<Box<dyn ExternalClient<K>>, AzureError>;

/// Connects resources to Azure through their `Provider`.
pub struct ProviderConnecter<K, S> {
    store: Arc<S>,
    new_client: ExternalClientBuilder<K>,
}

impl<K, S> ProviderConnecter<K, S> {
    #[must_use]
    pub fn new(store: Arc<S>, new_client: ExternalClientBuilder<K>) -> Self {
        Self { store, new_client }
    }
}

#[async_trait]
impl<K, S> ExternalConnecter<K> for ProviderConnecter<K, S>
where
    K: ManagedResource,
    S: ObjectStore + 'static,
{
    async fn connect(&self, resource: &K) -> Result<Box<dyn ExternalClient<K>>> {
        let namespace = resource.namespace().unwrap_or_default();
        let credentials =
            load_credentials(self.store.as_ref(), resource.provider_ref(), &namespace).await?;
        (self.new_client)(&credentials)
            .with_context(|| format!("cannot create new {} client", K::KIND))
    }
}

/// Reconciler for one [`ManagedResource`] kind.
pub struct ManagedReconciler<K, S> {
    store: Arc<S>,
    connecter: Arc<dyn ExternalConnecter<K>>,
}

impl<K, S> ManagedReconciler<K, S>
where
    K: ManagedResource,
    S: ObjectStore,
{
    #[must_use]
    pub fn new(store: Arc<S>, connecter: Arc<dyn ExternalConnecter<K>>) -> Self {
        Self { store, connecter }
    }

    /// Run one reconcile pass for the resource named `namespace/name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be read or written back.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        debug!(kind = K::KIND, namespace = %namespace, name = %name, "Reconciling");

        let mut resource: K = match self.store.get(namespace, name).await {
            Ok(resource) => resource,
            Err(e) if e.is_not_found() => return Ok(ReconcileOutcome::done()),
            Err(e) => {
                return Err(anyhow::Error::from(e))
                    .with_context(|| format!("cannot get resource {namespace}/{name}"));
            }
        };

        let outcome = match self.connecter.connect(&resource).await {
            Ok(client) => run(client.as_ref(), &mut resource).await,
            Err(e) => {
                warn!(kind = K::KIND, name = %name, error = %format!("{e:#}"), "Failed to connect to Azure");
                metrics::record_error(K::KIND, "reconcile_error");
                set_condition(resource.conditions_mut(), reconcile_error(&format!("{e:#}")));
                ReconcileOutcome::requeue()
            }
        };

        self.store
            .update(&mut resource)
            .await
            .with_context(|| format!("cannot update resource {namespace}/{name}"))?;

        Ok(outcome)
    }
}

async fn run<K: ManagedResource>(
    client: &dyn ExternalClient<K>,
    resource: &mut K,
) -> ReconcileOutcome {
    if is_being_deleted(&*resource) {
        return delete(client, resource).await;
    }

    let observation = match client.observe(resource).await {
        Ok(observation) => observation,
        Err(e) => return fail(resource, "get", &e),
    };

    match observation {
        Observation::Missing => {
            add_finalizer(resource, K::FINALIZER);
            set_condition(resource.conditions_mut(), creating());
            if let Err(e) = client.create(resource).await {
                return fail(resource, "create", &e);
            }
            info!(kind = K::KIND, name = %resource.name_any(), "Created external resource");
            metrics::record_resource_created(K::KIND);
            set_condition(resource.conditions_mut(), reconcile_success());
            ReconcileOutcome::requeue()
        }
        Observation::Exists { up_to_date } => {
            add_finalizer(resource, K::FINALIZER);
            set_condition(resource.conditions_mut(), available());
            if !up_to_date {
                if let Err(e) = client.update(resource).await {
                    return fail(resource, "update", &e);
                }
                info!(kind = K::KIND, name = %resource.name_any(), "Updated external resource");
            }
            set_condition(resource.conditions_mut(), reconcile_success());
            ReconcileOutcome::requeue_after(LONG_WAIT)
        }
    }
}

async fn delete<K: ManagedResource>(
    client: &dyn ExternalClient<K>,
    resource: &mut K,
) -> ReconcileOutcome {
    if !has_finalizer(&*resource, K::FINALIZER) {
        return ReconcileOutcome::done();
    }

    set_condition(resource.conditions_mut(), deleting());

    if resource.reclaim_policy() == ReclaimPolicy::Delete {
        match client.delete(resource).await {
            Ok(()) => {
                info!(kind = K::KIND, name = %resource.name_any(), "Deleted external resource");
                metrics::record_resource_deleted(K::KIND);
            }
            Err(e) if e.is_not_found() => {
                debug!(kind = K::KIND, name = %resource.name_any(), "External resource is already gone");
            }
            Err(e) => return fail(resource, "delete", &e),
        }
    }

    remove_finalizer(resource, K::FINALIZER);
    set_condition(resource.conditions_mut(), reconcile_success());
    ReconcileOutcome::done()
}

fn fail<K: ManagedResource>(resource: &mut K, action: &str, err: &AzureError) -> ReconcileOutcome {
    warn!(kind = K::KIND, name = %resource.name_any(), error = %err, "Failed to {action} external resource");
    metrics::record_error(K::KIND, "reconcile_error");
    set_condition(
        resource.conditions_mut(),
        reconcile_error(&format!("cannot {action} {}: {err}", K::KIND)),
    );
    ReconcileOutcome::requeue()
}

#[cfg(test)]
#[path = "managed_tests.rs"]
mod managed_tests;
