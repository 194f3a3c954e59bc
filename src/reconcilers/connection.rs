// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Connection secrets for managed resources.
//!
//! Every managed resource publishes how to reach it (endpoint, username,
//! password, port) into a Secret. A Secret in the resource's own namespace is
//! owned by the resource and garbage collected with it. Owner references
//! cannot cross namespaces, so a Secret written elsewhere has no owner and
//! outlives the resource.

use crate::constants::{
    SECRET_KEY_ENDPOINT, SECRET_KEY_PASSWORD, SECRET_KEY_PORT, SECRET_KEY_USERNAME,
};
use crate::crd::SecretReference;
use crate::store::{ObjectStore, StoredObject};
use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// How a publish treats the `password` key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Password {
    /// Leave the stored password alone.
    #[default]
    Unchanged,
    /// Store this password only if none is stored yet.
    Initial(String),
    /// Store this password, replacing any stored one.
    Current(String),
}

/// Values to publish. `None` fields keep whatever the Secret holds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionDetails {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub port: Option<String>,
    pub password: Password,
}

/// Username of a SQL server administrator as Azure expects it in connection strings.
#[must_use]
pub fn sql_username(admin_login_name: &str, server_name: &str) -> String {
    format!("{admin_login_name}@{server_name}")
}

/// Namespace and name of the connection Secret for `owner`.
///
/// Defaults to a Secret named after the owner, in the owner's namespace.
#[must_use]
pub fn secret_key<K: Resource>(owner: &K, secret_ref: Option<&SecretReference>) -> (String, String) {
    let owner_namespace = owner.namespace().unwrap_or_default();
    match secret_ref {
        Some(r) => (
            r.namespace.clone().unwrap_or(owner_namespace),
            r.name.clone(),
        ),
        None => (owner_namespace, owner.name_any()),
    }
}

fn apply_details(data: &mut BTreeMap<String, ByteString>, details: &ConnectionDetails) {
    let fields = [
        (SECRET_KEY_ENDPOINT, &details.endpoint),
        (SECRET_KEY_USERNAME, &details.username),
        (SECRET_KEY_PORT, &details.port),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            data.insert(key.to_string(), ByteString(value.clone().into_bytes()));
        }
    }

    match &details.password {
        Password::Unchanged => {}
        Password::Initial(password) => {
            data.entry(SECRET_KEY_PASSWORD.to_string())
                .or_insert_with(|| ByteString(password.clone().into_bytes()));
        }
        Password::Current(password) => {
            data.insert(
                SECRET_KEY_PASSWORD.to_string(),
                ByteString(password.clone().into_bytes()),
            );
        }
    }
}

fn stored_password(data: &BTreeMap<String, ByteString>) -> Option<String> {
    data.get(SECRET_KEY_PASSWORD)
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

/// Create or update the connection Secret of `owner`.
///
/// Returns the password the Secret holds afterwards, which differs from an
/// [`Password::Initial`] value when an earlier pass already stored one.
///
/// # Errors
///
/// Returns an error if the Secret cannot be read, created or updated.
pub async fn publish_connection_secret<K, S>(
    store: &S,
    owner: &K,
    secret_ref: Option<&SecretReference>,
    details: &ConnectionDetails,
) -> Result<Option<String>>
where
    K: StoredObject,
    S: ObjectStore,
{
    let (namespace, name) = secret_key(owner, secret_ref);

    match store.get::<Secret>(&namespace, &name).await {
        Ok(mut secret) => {
            let data = secret.data.get_or_insert_with(BTreeMap::new);
            apply_details(data, details);
            let password = stored_password(data);

            store
                .update(&mut secret)
                .await
                .with_context(|| format!("could not update connection secret {namespace}/{name}"))?;
            debug!(secret = %name, namespace = %namespace, "Updated connection secret");
            Ok(password)
        }
        Err(e) if e.is_not_found() => {
            let mut data = BTreeMap::new();
            apply_details(&mut data, details);
            let password = stored_password(&data);
            let owner_references = if owner.namespace().as_deref() == Some(namespace.as_str()) {
                owner.controller_owner_ref(&()).map(|r| vec![r])
            } else {
                None
            };

            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.clone()),
                    owner_references,
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            store
                .create(&secret)
                .await
                .with_context(|| format!("could not create connection secret {namespace}/{name}"))?;
            info!(
                secret = %name,
                namespace = %namespace,
                owner = %owner.name_any(),
                "Created connection secret"
            );
            Ok(password)
        }
        Err(e) => Err(anyhow::Error::from(e))
            .with_context(|| format!("could not get connection secret {namespace}/{name}")),
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod connection_tests;
