// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `Redis` reconciliation.
//!
//! Azure reports a provisioning state for caches while they are created,
//! updated and deleted, so unlike SQL servers no operation token is kept: each
//! pass reads the cache and acts on the state Azure reports.
//!
//! The work is split along two seams:
//!
//! - [`RedisConnecter`] builds a [`CreateSyncDeleteKeyer`] for a resource from
//!   the credentials of its `Provider`
//! - [`CreateSyncDeleteKeyer`] performs one step against Azure and records the
//!   result in the resource status, returning whether to requeue
//!
//! [`RedisReconciler`] picks the step, publishes the connection secret once the
//! cache settles and writes the resource back.

use super::connection::{publish_connection_secret, ConnectionDetails, Password};
use super::finalizers::{add_finalizer, is_being_deleted, remove_finalizer};
use super::provider::load_credentials;
use super::status::{
    available, creating, deleting, reconcile_error, reconcile_success, set_condition,
};
use super::ReconcileOutcome;
use crate::azure::redis::{
    needs_update, new_create_parameters, new_redis_client, new_update_parameters, RedisApi,
};
use crate::azure::AzureError;
use crate::constants::{
    FINALIZER_REDIS, KIND_REDIS, REDIS_NAME_PREFIX, REDIS_STATE_CREATING, REDIS_STATE_DELETING,
    REDIS_STATE_SUCCEEDED,
};
use crate::crd::{Condition, ReclaimPolicy, Redis, RedisStatus};
use crate::metrics;
use crate::store::ObjectStore;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds [`RedisApi`] clients from raw credentials.
pub type RedisClientBuilder = fn(&[u8]) -> Result<Arc<dyn RedisApi>, AzureError>;

/// One step of `Redis` reconciliation against Azure.
///
/// Each step records its outcome in the resource status and returns whether
/// the resource should be reconciled again soon.
#[async_trait]
pub trait CreateSyncDeleteKeyer: Send + Sync {
    /// Start creating the cache.
    async fn create(&self, redis: &mut Redis) -> bool;

    /// Observe the cache and bring it in line with `spec`.
    async fn sync(&self, redis: &mut Redis) -> bool;

    /// Delete the cache (subject to the reclaim policy) and release the finalizer.
    async fn delete(&self, redis: &mut Redis) -> bool;

    /// Fetch the primary access key. `None` if it could not be read.
    async fn key(&self, redis: &mut Redis) -> Option<String>;
}

/// Produces a [`CreateSyncDeleteKeyer`] for a resource.
#[async_trait]
pub trait RedisConnecter: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the resource's credentials cannot be loaded or used.
    async fn connect(&self, redis: &Redis) -> Result<Box<dyn CreateSyncDeleteKeyer>>;
}

/// Azure resource name of the cache backing `redis`.
#[must_use]
pub fn resource_name(redis: &Redis) -> String {
    format!("{REDIS_NAME_PREFIX}-{}", redis.uid().unwrap_or_default())
}

fn status_mut(redis: &mut Redis) -> &mut RedisStatus {
    redis.status.get_or_insert_with(RedisStatus::default)
}

fn set_redis_condition(redis: &mut Redis, condition: Condition) {
    set_condition(&mut status_mut(redis).conditions, condition);
}

fn stored_resource_name(redis: &Redis) -> Option<String> {
    redis
        .status
        .as_ref()
        .and_then(|s| s.resource_name.clone())
        .filter(|n| !n.is_empty())
}

/// [`CreateSyncDeleteKeyer`] backed by Azure Cache for Redis.
pub struct AzureRedisCache {
    client: Arc<dyn RedisApi>,
}

impl AzureRedisCache {
    #[must_use]
    pub fn new(client: Arc<dyn RedisApi>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CreateSyncDeleteKeyer for AzureRedisCache {
    async fn create(&self, redis: &mut Redis) -> bool {
        set_redis_condition(redis, creating());

        let name = resource_name(redis);
        let params = new_create_parameters(&redis.spec);
        if let Err(e) = self
            .client
            .create(&redis.spec.resource_group_name, &name, &params)
            .await
        {
            warn!(redis = %redis.name_any(), cache = %name, error = %e, "Failed to create Redis cache");
            set_redis_condition(redis, reconcile_error(&e));
            return true;
        }

        info!(redis = %redis.name_any(), cache = %name, "Started creation of Redis cache");
        metrics::record_resource_created(KIND_REDIS);
        status_mut(redis).resource_name = Some(name);
        add_finalizer(redis, FINALIZER_REDIS);
        set_redis_condition(redis, reconcile_success());
        true
    }

    async fn sync(&self, redis: &mut Redis) -> bool {
        let name = stored_resource_name(redis).unwrap_or_else(|| resource_name(redis));
        let observed = match self
            .client
            .get(&redis.spec.resource_group_name, &name)
            .await
        {
            Ok(observed) => observed,
            Err(e) => {
                warn!(redis = %redis.name_any(), cache = %name, error = %e, "Failed to get Redis cache");
                set_redis_condition(redis, reconcile_error(&e));
                return true;
            }
        };

        let state = observed
            .properties
            .as_ref()
            .and_then(|p| p.provisioning_state.clone())
            .unwrap_or_default();
        status_mut(redis).state = Some(state.clone());

        match state.as_str() {
            REDIS_STATE_CREATING => {
                set_redis_condition(redis, creating());
                set_redis_condition(redis, reconcile_success());
                true
            }
            REDIS_STATE_DELETING => {
                set_redis_condition(redis, deleting());
                set_redis_condition(redis, reconcile_success());
                false
            }
            REDIS_STATE_SUCCEEDED => {
                let status = status_mut(redis);
                status.provider_id = observed.id.clone();
                if let Some(props) = observed.properties.as_ref() {
                    status.endpoint = props.host_name.clone();
                    status.port = props.port;
                    status.ssl_port = props.ssl_port;
                }
                set_condition(&mut status.conditions, available());

                if needs_update(&redis.spec, &observed) {
                    let params = new_update_parameters(&redis.spec);
                    if let Err(e) = self
                        .client
                        .update(&redis.spec.resource_group_name, &name, &params)
                        .await
                    {
                        warn!(redis = %redis.name_any(), cache = %name, error = %e, "Failed to update Redis cache");
                        set_redis_condition(redis, reconcile_error(&e));
                        return true;
                    }
                    info!(redis = %redis.name_any(), cache = %name, "Updated Redis cache");
                }

                set_redis_condition(redis, reconcile_success());
                false
            }
            _ => {
                debug!(redis = %redis.name_any(), cache = %name, state = %state, "Redis cache is busy");
                set_redis_condition(redis, reconcile_success());
                true
            }
        }
    }

    async fn delete(&self, redis: &mut Redis) -> bool {
        set_redis_condition(redis, deleting());

        if redis.spec.reclaim_policy == ReclaimPolicy::Delete {
            if let Some(name) = stored_resource_name(redis) {
                match self
                    .client
                    .delete(&redis.spec.resource_group_name, &name)
                    .await
                {
                    Ok(()) => {
                        info!(redis = %redis.name_any(), cache = %name, "Started deletion of Redis cache");
                        metrics::record_resource_deleted(KIND_REDIS);
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(redis = %redis.name_any(), cache = %name, "Redis cache is already gone");
                    }
                    Err(e) => {
                        warn!(redis = %redis.name_any(), cache = %name, error = %e, "Failed to delete Redis cache");
                        set_redis_condition(redis, reconcile_error(&e));
                        return true;
                    }
                }
            }
        }

        remove_finalizer(redis, FINALIZER_REDIS);
        set_redis_condition(redis, reconcile_success());
        false
    }

    async fn key(&self, redis: &mut Redis) -> Option<String> {
        let name = stored_resource_name(redis).unwrap_or_else(|| resource_name(redis));
        match self
            .client
            .list_keys(&redis.spec.resource_group_name, &name)
            .await
        {
            Ok(keys) => keys.primary_key,
            Err(e) => {
                warn!(redis = %redis.name_any(), cache = %name, error = %e, "Failed to list Redis cache keys");
                set_redis_condition(redis, reconcile_error(&e));
                None
            }
        }
    }
}

/// Connects `Redis` resources to Azure through their `Provider`.
pub struct ProviderRedisConnecter<S> {
    store: Arc<S>,
    new_client: RedisClientBuilder,
}

impl<S: ObjectStore> ProviderRedisConnecter<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_client_builder(store, new_redis_client)
    }

    #[must_use]
    pub fn with_client_builder(store: Arc<S>, new_client: RedisClientBuilder) -> Self {
        Self { store, new_client }
    }
}

#[async_trait]
impl<S: ObjectStore + 'static> RedisConnecter for ProviderRedisConnecter<S> {
    async fn connect(&self, redis: &Redis) -> Result<Box<dyn CreateSyncDeleteKeyer>> {
        let namespace = redis.namespace().unwrap_or_default();
        let credentials =
            load_credentials(self.store.as_ref(), &redis.spec.provider_ref, &namespace).await?;
        let client =
            (self.new_client)(&credentials).context("cannot create new Azure Cache client")?;
        Ok(Box::new(AzureRedisCache::new(client)))
    }
}

/// Reconciler for `Redis` resources.
pub struct RedisReconciler<S> {
    store: Arc<S>,
    connecter: Arc<dyn RedisConnecter>,
}

impl<S: ObjectStore> RedisReconciler<S> {
    #[must_use]
    pub fn new(store: Arc<S>, connecter: Arc<dyn RedisConnecter>) -> Self {
        Self { store, connecter }
    }

    /// Run one reconcile pass for the `Redis` named `namespace/name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be read or written back.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        debug!(namespace = %namespace, name = %name, "Reconciling Redis");

        let mut redis: Redis = match self.store.get(namespace, name).await {
            Ok(redis) => redis,
            Err(e) if e.is_not_found() => return Ok(ReconcileOutcome::done()),
            Err(e) => {
                return Err(anyhow::Error::from(e))
                    .with_context(|| format!("cannot get resource {namespace}/{name}"));
            }
        };

        let requeue = match self.connecter.connect(&redis).await {
            Ok(csdk) => self.run(csdk.as_ref(), &mut redis).await,
            Err(e) => {
                warn!(redis = %name, error = %format!("{e:#}"), "Failed to connect to Azure");
                metrics::record_error(KIND_REDIS, "reconcile_error");
                set_redis_condition(&mut redis, reconcile_error(&format!("{e:#}")));
                true
            }
        };

        self.store
            .update(&mut redis)
            .await
            .with_context(|| format!("cannot update resource {namespace}/{name}"))?;

        Ok(if requeue {
            ReconcileOutcome::requeue()
        } else {
            ReconcileOutcome::done()
        })
    }

    async fn run(&self, csdk: &dyn CreateSyncDeleteKeyer, redis: &mut Redis) -> bool {
        if is_being_deleted(&*redis) {
            return csdk.delete(redis).await;
        }

        if stored_resource_name(redis).is_none() {
            return csdk.create(redis).await;
        }

        if csdk.sync(redis).await {
            return true;
        }

        let key = csdk.key(redis).await;
        let key_missing = key.is_none();
        let status = redis.status.clone().unwrap_or_default();
        let details = ConnectionDetails {
            endpoint: status.endpoint,
            username: None,
            port: status.ssl_port.or(status.port).map(|p| p.to_string()),
            password: key.map_or(Password::Unchanged, Password::Current),
        };

        if let Err(e) = publish_connection_secret(
            self.store.as_ref(),
            &*redis,
            redis.spec.write_connection_secret_to_ref.as_ref(),
            &details,
        )
        .await
        {
            warn!(redis = %redis.name_any(), error = %format!("{e:#}"), "Failed to publish connection secret");
            set_redis_condition(redis, reconcile_error(&format!("{e:#}")));
            return true;
        }

        key_missing
    }
}

#[cfg(test)]
#[path = "redis_tests.rs"]
mod redis_tests;
