// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for managed Azure resources.
//!
//! These helpers only edit the in-memory object. The reconciler persists the
//! change through [`ObjectStore::update`] at the end of the pass, which writes
//! the object and then its status. The two writes are separate, so a failure
//! between them can leave the finalizer change stored without its conditions.
//!
//! # Example
//!
//! ```rust
//! use stack_azure::crd::{Redis, RedisSpec};
//! use stack_azure::reconcilers::finalizers::{add_finalizer, has_finalizer, remove_finalizer};
//!
//! const FINALIZER: &str = "redis.azure.firestoned.io/finalizer";
//!
//! let mut redis = Redis::new("cache", RedisSpec::default());
//! add_finalizer(&mut redis, FINALIZER);
//! assert!(has_finalizer(&redis, FINALIZER));
//!
//! remove_finalizer(&mut redis, FINALIZER);
//! assert!(!has_finalizer(&redis, FINALIZER));
//! ```
//!
//! [`ObjectStore::update`]: crate::store::ObjectStore::update

use kube::{Resource, ResourceExt};
use tracing::info;

/// True if the resource carries `finalizer`.
#[must_use]
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// True if deletion of the resource has been requested.
#[must_use]
pub fn is_being_deleted<T: Resource>(resource: &T) -> bool {
    resource.meta().deletion_timestamp.is_some()
}

/// Add a finalizer to a resource if not already present.
///
/// Returns `true` if the resource was changed and must be persisted.
pub fn add_finalizer<T>(resource: &mut T, finalizer: &str) -> bool
where
    T: Resource<DynamicType = ()> + ResourceExt,
{
    if has_finalizer(resource, finalizer) {
        return false;
    }

    info!(
        "Adding finalizer {} to {}/{} {}",
        finalizer,
        resource.namespace().unwrap_or_default(),
        resource.name_any(),
        T::kind(&())
    );

    resource
        .meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    true
}

/// Remove a finalizer from a resource.
///
/// The operation is idempotent. Returns `true` if the resource was changed.
pub fn remove_finalizer<T>(resource: &mut T, finalizer: &str) -> bool
where
    T: Resource<DynamicType = ()> + ResourceExt,
{
    if !has_finalizer(resource, finalizer) {
        return false;
    }

    info!(
        "Removing finalizer {} from {}/{} {}",
        finalizer,
        resource.namespace().unwrap_or_default(),
        resource.name_any(),
        T::kind(&())
    );

    if let Some(finalizers) = resource.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    true
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
