// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure credential lookup through a `Provider`.

use crate::crd::{Provider, ProviderReference};
use crate::store::ObjectStore;
use anyhow::{anyhow, Context as _, Result};
use k8s_openapi::api::core::v1::Secret;
use tracing::debug;

/// Load the raw credentials JSON a `Provider` points at.
///
/// The provider defaults to `default_namespace`, and its Secret defaults to the
/// provider's namespace.
///
/// # Errors
///
/// Returns an error if the `Provider` or its Secret cannot be read, or the Secret
/// lacks the referenced key.
pub async fn load_credentials<S: ObjectStore>(
    store: &S,
    provider_ref: &ProviderReference,
    default_namespace: &str,
) -> Result<Vec<u8>> {
    let provider_namespace = provider_ref
        .namespace
        .as_deref()
        .unwrap_or(default_namespace);
    let provider: Provider = store
        .get(provider_namespace, &provider_ref.name)
        .await
        .with_context(|| {
            format!(
                "cannot get provider {provider_namespace}/{}",
                provider_ref.name
            )
        })?;

    let selector = &provider.spec.credentials_secret_ref;
    let secret_namespace = selector.namespace.as_deref().unwrap_or(provider_namespace);
    let secret: Secret = store
        .get(secret_namespace, &selector.name)
        .await
        .with_context(|| {
            format!(
                "cannot get provider secret {secret_namespace}/{}",
                selector.name
            )
        })?;

    debug!(
        provider = %provider_ref.name,
        secret = %selector.name,
        "Loaded Azure credentials"
    );

    secret
        .data
        .and_then(|mut data| data.remove(&selector.key))
        .map(|value| value.0)
        .ok_or_else(|| {
            anyhow!(
                "provider secret {secret_namespace}/{} has no key {}",
                selector.name,
                selector.key
            )
        })
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod provider_tests;
