// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Azure Cache for Redis.
//!
//! Unlike SQL servers, a Redis cache reports its own `provisioningState`, so
//! creation is fire-and-forget and progress is observed through [`RedisApi::get`].

use super::{ArmClient, AzureError};
use crate::constants::ARM_API_VERSION_REDIS;
use crate::crd::{RedisSpec, SkuSpec};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// SKU as ARM reports and accepts it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sku {
    pub name: String,
    pub family: String,
    pub capacity: i32,
}

impl From<&SkuSpec> for Sku {
    fn from(spec: &SkuSpec) -> Self {
        Self {
            name: spec.name.clone(),
            family: spec.family.clone(),
            capacity: spec.capacity,
        }
    }
}

/// Properties of a cache as reported by ARM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub port: Option<i32>,
    #[serde(default)]
    pub ssl_port: Option<i32>,
    #[serde(default)]
    pub sku: Option<Sku>,
    #[serde(default)]
    pub enable_non_ssl_port: Option<bool>,
    #[serde(default)]
    pub shard_count: Option<i32>,
    #[serde(default)]
    pub redis_configuration: Option<BTreeMap<String, String>>,
}

/// A cache as reported by ARM.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisResource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub properties: Option<RedisProperties>,
}

/// Access keys of a cache.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeys {
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub secondary_key: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisCreateProperties {
    pub sku: Sku,
    pub enable_non_ssl_port: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub redis_configuration: BTreeMap<String, String>,
    #[serde(rename = "subnetId", skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(rename = "staticIP", skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<String>,
}

/// Request body for creating a cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisCreateParameters {
    pub location: String,
    pub properties: RedisCreateProperties,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisUpdateProperties {
    pub sku: Sku,
    pub enable_non_ssl_port: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_count: Option<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub redis_configuration: BTreeMap<String, String>,
}

/// Request body for updating a cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedisUpdateParameters {
    pub properties: RedisUpdateProperties,
}

#[must_use]
pub fn new_create_parameters(spec: &RedisSpec) -> RedisCreateParameters {
    RedisCreateParameters {
        location: spec.location.clone(),
        properties: RedisCreateProperties {
            sku: Sku::from(&spec.sku),
            enable_non_ssl_port: spec.enable_non_ssl_port,
            shard_count: spec.shard_count,
            redis_configuration: spec.redis_configuration.clone(),
            subnet_id: spec.subnet_id.clone(),
            static_ip: spec.static_ip.clone(),
        },
    }
}

#[must_use]
pub fn new_update_parameters(spec: &RedisSpec) -> RedisUpdateParameters {
    RedisUpdateParameters {
        properties: RedisUpdateProperties {
            sku: Sku::from(&spec.sku),
            enable_non_ssl_port: spec.enable_non_ssl_port,
            shard_count: spec.shard_count,
            redis_configuration: spec.redis_configuration.clone(),
        },
    }
}

/// Whether the cache diverges from `spec` in a field an update can change.
///
/// Azure adds its own defaults to `redisConfiguration`, so only the keys set in
/// `spec` are compared.
#[must_use]
pub fn needs_update(spec: &RedisSpec, observed: &RedisResource) -> bool {
    let Some(props) = observed.properties.as_ref() else {
        return true;
    };

    if props.sku.as_ref() != Some(&Sku::from(&spec.sku)) {
        return true;
    }
    if props.enable_non_ssl_port.unwrap_or(false) != spec.enable_non_ssl_port {
        return true;
    }
    if spec.shard_count.is_some() && props.shard_count != spec.shard_count {
        return true;
    }

    let observed_config = props.redis_configuration.clone().unwrap_or_default();
    spec.redis_configuration
        .iter()
        .any(|(k, v)| observed_config.get(k) != Some(v))
}

/// Operations on Azure caches.
#[async_trait]
pub trait RedisApi: Send + Sync {
    async fn get(&self, resource_group: &str, name: &str) -> Result<RedisResource, AzureError>;

    /// Start creating a cache. Progress is observed through `get`.
    async fn create(
        &self,
        resource_group: &str,
        name: &str,
        params: &RedisCreateParameters,
    ) -> Result<(), AzureError>;

    async fn update(
        &self,
        resource_group: &str,
        name: &str,
        params: &RedisUpdateParameters,
    ) -> Result<(), AzureError>;

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError>;

    async fn list_keys(&self, resource_group: &str, name: &str)
        -> Result<AccessKeys, AzureError>;
}

/// Build a [`RedisApi`] over ARM from the raw credentials JSON.
///
/// # Errors
///
/// Returns an error if the credentials cannot be parsed.
pub fn new_redis_client(credentials: &[u8]) -> Result<Arc<dyn RedisApi>, AzureError> {
    Ok(Arc::new(ArmRedisClient::new(ArmClient::from_credentials_json(
        credentials,
    )?)))
}

/// [`RedisApi`] over the ARM REST API.
pub struct ArmRedisClient {
    arm: ArmClient,
}

impl ArmRedisClient {
    #[must_use]
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    fn cache_url(&self, resource_group: &str, name: &str, suffix: &str) -> Result<Url, AzureError> {
        self.arm.resource_url(
            &format!("/resourceGroups/{resource_group}/providers/Microsoft.Cache/Redis/{name}{suffix}"),
            ARM_API_VERSION_REDIS,
        )
    }

    async fn send_json<T: Serialize + Sync>(
        &self,
        method: Method,
        url: &Url,
        body: &T,
    ) -> Result<(), AzureError> {
        let body =
            serde_json::to_value(body).map_err(|e| AzureError::InvalidParameters(e.to_string()))?;
        self.arm.send(method, url, Some(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl RedisApi for ArmRedisClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<RedisResource, AzureError> {
        let url = self.cache_url(resource_group, name, "")?;
        self.arm.send(Method::GET, &url, None).await?.json()
    }

    async fn create(
        &self,
        resource_group: &str,
        name: &str,
        params: &RedisCreateParameters,
    ) -> Result<(), AzureError> {
        let url = self.cache_url(resource_group, name, "")?;
        self.send_json(Method::PUT, &url, params).await?;
        info!(cache = %name, resource_group = %resource_group, "Started Redis cache creation");
        Ok(())
    }

    async fn update(
        &self,
        resource_group: &str,
        name: &str,
        params: &RedisUpdateParameters,
    ) -> Result<(), AzureError> {
        let url = self.cache_url(resource_group, name, "")?;
        self.send_json(Method::PATCH, &url, params).await?;
        info!(cache = %name, resource_group = %resource_group, "Updated Redis cache");
        Ok(())
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError> {
        let url = self.cache_url(resource_group, name, "")?;
        self.arm.send(Method::DELETE, &url, None).await?;
        info!(cache = %name, resource_group = %resource_group, "Started Redis cache deletion");
        Ok(())
    }

    async fn list_keys(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<AccessKeys, AzureError> {
        let url = self.cache_url(resource_group, name, "/listKeys")?;
        self.arm.send(Method::POST, &url, None).await?.json()
    }
}

#[cfg(test)]
#[path = "redis_tests.rs"]
mod redis_tests;
