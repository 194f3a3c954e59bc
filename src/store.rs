// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Persisted-object store used by the reconcilers.
//!
//! Reconcilers never talk to `kube::Api` directly. They go through
//! [`ObjectStore`], which offers the three operations a reconcile pass needs:
//! read an object, write it back with optimistic concurrency, and create a
//! Secret. [`KubeStore`] is the production implementation.

use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::fmt::Debug;
use thiserror::Error;
use tracing::debug;

/// Objects the store can persist: namespaced, serializable Kubernetes resources.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> StoredObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Errors returned by an [`ObjectStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// The object does not exist.
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    /// The write was based on a stale resourceVersion.
    #[error("conflict writing {kind} {namespace}/{name}: {reason}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        reason: String,
    },

    /// Create was called for an object that already exists.
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    /// Any other Kubernetes API failure.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The object could not be converted to or from JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Read, write and create namespaced Kubernetes objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the object does not exist.
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError>;

    /// Write an object back, including its status.
    ///
    /// The write is rejected with [`StoreError::Conflict`] if the object changed
    /// since it was read. On success the object's resourceVersion is refreshed so
    /// a subsequent update in the same pass is accepted.
    ///
    /// # Errors
    ///
    /// Returns an error if the object is stale or the API call fails.
    async fn update<K: StoredObject>(&self, obj: &mut K) -> Result<(), StoreError>;

    /// Create a new object.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if an object with the same name exists.
    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoredObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate a kube error into a [`StoreError`] for the object at hand.
fn map_kube_error<K: StoredObject>(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(ref api_err) if api_err.code == 404 => StoreError::NotFound {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ref api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind: K::kind(&()).to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(ref api_err) if api_err.code == 409 => StoreError::Conflict {
            kind: K::kind(&()).to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: api_err.message.clone(),
        },
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error::<K>(e, namespace, name))
    }

    async fn update<K: StoredObject>(&self, obj: &mut K) -> Result<(), StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let api = self.api::<K>(&namespace);

        // The main resource endpoint ignores status, so metadata/spec and status
        // are written separately.
        let status = serde_json::to_value(&*obj)?.get("status").cloned();

        let replaced = api
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error::<K>(e, &namespace, &name))?;
        obj.meta_mut().resource_version = replaced.meta().resource_version.clone();

        let Some(status) = status else {
            return Ok(());
        };

        let patch = json!({ "status": status });
        match api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(patched) => {
                obj.meta_mut().resource_version = patched.meta().resource_version.clone();
                Ok(())
            }
            // Removing the last finalizer of a deleted object lets the API server
            // drop it before the status write lands.
            Err(kube::Error::Api(ref api_err))
                if api_err.code == 404 && replaced.meta().deletion_timestamp.is_some() =>
            {
                debug!(
                    kind = %K::kind(&()),
                    namespace = %namespace,
                    name = %name,
                    "Object was finalized before its status was written"
                );
                Ok(())
            }
            Err(e) => Err(map_kube_error::<K>(e, &namespace, &name)),
        }
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| map_kube_error::<K>(e, &namespace, &name))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
