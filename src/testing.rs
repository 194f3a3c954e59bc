// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared test support: an in-memory [`ObjectStore`] and common fixtures.

use crate::crd::{Provider, ProviderSpec, SecretKeySelector};
use crate::store::{ObjectStore, StoreError, StoredObject};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

pub const TEST_NAMESPACE: &str = "cool-namespace";
pub const TEST_UID: &str = "definitely-a-uuid";
pub const TEST_PROVIDER_NAME: &str = "cool-azure";
pub const TEST_PROVIDER_SECRET_NAME: &str = "cool-azure-secret";
pub const TEST_PROVIDER_SECRET_KEY: &str = "credentials";
pub const TEST_PROVIDER_SECRET_DATA: &str = "definitelyjson";
pub const TEST_CONNECTION_SECRET_NAME: &str = "cool-connection-secret";

type ObjectKey = (String, String, String);

/// Object store that keeps objects as JSON in memory.
///
/// Mirrors the API server behaviors the reconcilers rely on: resourceVersion
/// checks on update, AlreadyExists on create, and removal of a deleted object
/// once its last finalizer is gone.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<ObjectKey, serde_json::Value>>,
    next_version: AtomicU64,
    updates: AtomicUsize,
    fail_get: AtomicBool,
    fail_update: AtomicBool,
    fail_create: AtomicBool,
}

fn key_of<K: StoredObject>(namespace: &str, name: &str) -> ObjectKey {
    (
        K::kind(&()).to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Seed an object, returning it with the resourceVersion it was stored under.
    pub fn insert<K: StoredObject>(&self, obj: &K) -> K {
        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(self.bump_version());
        let key = key_of::<K>(&stored.namespace().unwrap_or_default(), &stored.name_any());
        let value = serde_json::to_value(&stored).expect("fixture serializes");
        self.objects.lock().unwrap().insert(key, value);
        stored
    }

    /// Read an object without going through the trait (and its failure switches).
    pub fn stored<K: StoredObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&key_of::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).expect("stored object deserializes"))
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<K, StoreError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("boom".to_string()));
        }
        let objects = self.objects.lock().unwrap();
        match objects.get(&key_of::<K>(namespace, name)) {
            Some(value) => Ok(serde_json::from_value(value.clone())?),
            None => Err(StoreError::NotFound {
                kind: K::kind(&()).to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
        }
    }

    async fn update<K: StoredObject>(&self, obj: &mut K) -> Result<(), StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("boom".to_string()));
        }

        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = key_of::<K>(&namespace, &name);
        let mut objects = self.objects.lock().unwrap();

        let Some(current) = objects.get(&key) else {
            return Err(StoreError::NotFound {
                kind: K::kind(&()).to_string(),
                namespace,
                name,
            });
        };
        let current_version = current["metadata"]["resourceVersion"].as_str();
        if obj.meta().resource_version.as_deref() != current_version {
            return Err(StoreError::Conflict {
                kind: K::kind(&()).to_string(),
                namespace,
                name,
                reason: "the object has been modified".to_string(),
            });
        }

        obj.meta_mut().resource_version = Some(self.bump_version());
        if obj.meta().deletion_timestamp.is_some() && obj.finalizers().is_empty() {
            objects.remove(&key);
        } else {
            objects.insert(key, serde_json::to_value(&*obj)?);
        }
        Ok(())
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K, StoreError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("boom".to_string()));
        }
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let key = key_of::<K>(&namespace, &name);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: K::kind(&()).to_string(),
                namespace,
                name,
            });
        }
        let mut created = obj.clone();
        created.meta_mut().resource_version = Some(self.bump_version());
        objects.insert(key, serde_json::to_value(&created)?);
        Ok(created)
    }
}

/// A `Provider` pointing at [`provider_secret`].
pub fn provider() -> Provider {
    let mut provider = Provider::new(
        TEST_PROVIDER_NAME,
        ProviderSpec {
            credentials_secret_ref: SecretKeySelector {
                name: TEST_PROVIDER_SECRET_NAME.to_string(),
                namespace: Some(TEST_NAMESPACE.to_string()),
                key: TEST_PROVIDER_SECRET_KEY.to_string(),
            },
        },
    );
    provider.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    provider
}

/// The credentials Secret referenced by [`provider`].
pub fn provider_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(TEST_PROVIDER_SECRET_NAME.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            TEST_PROVIDER_SECRET_KEY.to_string(),
            ByteString(TEST_PROVIDER_SECRET_DATA.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// Read a string value out of a Secret's data.
pub fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
}

pub const TEST_TENANT_ID: &str = "cool-tenant";
pub const TEST_SUBSCRIPTION_ID: &str = "cool-subscription";
pub const TEST_ACCESS_TOKEN: &str = "cool-token";

/// Credentials JSON whose AAD and ARM endpoints both point at `base_url`.
pub fn arm_credentials(base_url: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "clientId": "cool-client",
        "clientSecret": "cool-secret",
        "tenantId": TEST_TENANT_ID,
        "subscriptionId": TEST_SUBSCRIPTION_ID,
        "activeDirectoryEndpointUrl": base_url,
        "resourceManagerEndpointUrl": base_url,
    }))
    .expect("credentials serialize")
}

/// Start a mock ARM server that already hands out access tokens.
pub async fn arm_server() -> wiremock::MockServer {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/{TEST_TENANT_ID}/oauth2/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": TEST_ACCESS_TOKEN,
            "expires_in": "3600",
        })))
        .mount(&server)
        .await;
    server
}

/// ARM client for a server started with [`arm_server`].
pub fn arm_client(server: &wiremock::MockServer) -> crate::azure::ArmClient {
    crate::azure::ArmClient::from_credentials_json(&arm_credentials(&server.uri()))
        .expect("test credentials are valid")
}

pub const TEST_RESOURCE_GROUP: &str = "cool-rg";
pub const TEST_LOCATION: &str = "cool-location";
pub const TEST_ADMIN_LOGIN: &str = "cooladmin";

/// Server parameters that produce the SKU `GP_Gen5_2`.
pub fn sql_parameters() -> crate::crd::SqlServerParameters {
    crate::crd::SqlServerParameters {
        resource_group_name: TEST_RESOURCE_GROUP.to_string(),
        location: TEST_LOCATION.to_string(),
        pricing_tier: crate::crd::PricingTierSpec {
            tier: "GeneralPurpose".to_string(),
            v_cores: 2,
            family: "Gen5".to_string(),
        },
        storage_profile: crate::crd::StorageProfileSpec {
            storage_gb: 25,
            backup_retention_days: Some(7),
            geo_redundant_backup: false,
        },
        admin_login_name: TEST_ADMIN_LOGIN.to_string(),
        version: "5.7".to_string(),
        ssl_enforced: true,
    }
}

pub const TEST_REDIS_NAME: &str = "cool-redis";

/// A `Redis` resource with a uid, so its Azure name is `redis-definitely-a-uuid`.
pub fn redis() -> crate::crd::Redis {
    let mut redis = crate::crd::Redis::new(
        TEST_REDIS_NAME,
        crate::crd::RedisSpec {
            provider_ref: crate::crd::ProviderReference {
                name: TEST_PROVIDER_NAME.to_string(),
                namespace: None,
            },
            write_connection_secret_to_ref: Some(crate::crd::SecretReference {
                name: TEST_CONNECTION_SECRET_NAME.to_string(),
                namespace: None,
            }),
            reclaim_policy: crate::crd::ReclaimPolicy::Delete,
            resource_group_name: TEST_RESOURCE_GROUP.to_string(),
            location: TEST_LOCATION.to_string(),
            sku: crate::crd::SkuSpec {
                name: "Basic".to_string(),
                family: "C".to_string(),
                capacity: 0,
            },
            enable_non_ssl_port: true,
            shard_count: None,
            redis_configuration: BTreeMap::from([(
                "maxmemory-policy".to_string(),
                "allkeys-lru".to_string(),
            )]),
            subnet_id: None,
            static_ip: None,
        },
    );
    redis.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    redis.metadata.uid = Some(TEST_UID.to_string());
    redis
}

type Respond<T> = Box<dyn Fn() -> Result<T, crate::azure::AzureError> + Send + Sync>;

/// A canned mock response that a test can replace between passes.
pub struct Script<T>(Mutex<Respond<T>>);

impl<T> Script<T> {
    pub fn new(
        f: impl Fn() -> Result<T, crate::azure::AzureError> + Send + Sync + 'static,
    ) -> Self {
        Self(Mutex::new(Box::new(f)))
    }

    pub fn set(&self, f: impl Fn() -> Result<T, crate::azure::AzureError> + Send + Sync + 'static) {
        *self.0.lock().unwrap() = Box::new(f);
    }

    pub fn call(&self) -> Result<T, crate::azure::AzureError> {
        (*self.0.lock().unwrap())()
    }
}

/// The error ARM returns for a missing resource.
pub fn azure_not_found() -> crate::azure::AzureError {
    crate::azure::AzureError::Api {
        status: 404,
        code: "ResourceNotFound".to_string(),
        message: "The Resource was not found.".to_string(),
    }
}

/// A generic ARM failure whose message is `boom`.
pub fn azure_boom() -> crate::azure::AzureError {
    crate::azure::AzureError::Api {
        status: 500,
        code: "InternalServerError".to_string(),
        message: "boom".to_string(),
    }
}

pub const TEST_VIRTUAL_NETWORK_NAME: &str = "cool-vnet";
pub const TEST_SUBNET_ID: &str = "a/very/important/subnet";

/// A `VirtualNetwork` whose Azure name matches its own.
pub fn virtual_network() -> crate::crd::VirtualNetwork {
    let mut vnet = crate::crd::VirtualNetwork::new(
        TEST_VIRTUAL_NETWORK_NAME,
        crate::crd::VirtualNetworkSpec {
            provider_ref: crate::crd::ProviderReference {
                name: TEST_PROVIDER_NAME.to_string(),
                namespace: None,
            },
            reclaim_policy: crate::crd::ReclaimPolicy::Delete,
            name: TEST_VIRTUAL_NETWORK_NAME.to_string(),
            resource_group_name: TEST_RESOURCE_GROUP.to_string(),
            location: TEST_LOCATION.to_string(),
            address_space: crate::crd::AddressSpaceSpec {
                address_prefixes: vec!["10.0.0.0/16".to_string(), "10.1.0.0/16".to_string()],
            },
            enable_ddos_protection: false,
            enable_vm_protection: true,
            tags: BTreeMap::from([("team".to_string(), "cool".to_string())]),
        },
    );
    vnet.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    vnet.metadata.uid = Some(TEST_UID.to_string());
    vnet
}

pub const TEST_VNET_RULE_NAME: &str = "myvnetrule";
pub const TEST_SERVER_NAME: &str = "cool-server";

/// A `MysqlServerVirtualNetworkRule` admitting [`TEST_SUBNET_ID`].
pub fn vnet_rule() -> crate::crd::MysqlServerVirtualNetworkRule {
    let mut rule = crate::crd::MysqlServerVirtualNetworkRule::new(
        TEST_VNET_RULE_NAME,
        crate::crd::MysqlServerVirtualNetworkRuleSpec {
            provider_ref: crate::crd::ProviderReference {
                name: TEST_PROVIDER_NAME.to_string(),
                namespace: None,
            },
            reclaim_policy: crate::crd::ReclaimPolicy::Delete,
            name: TEST_VNET_RULE_NAME.to_string(),
            server_name: TEST_SERVER_NAME.to_string(),
            resource_group_name: TEST_RESOURCE_GROUP.to_string(),
            properties: crate::crd::VirtualNetworkRuleProperties {
                virtual_network_subnet_id: TEST_SUBNET_ID.to_string(),
                ignore_missing_vnet_service_endpoint: true,
            },
        },
    );
    rule.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    rule.metadata.uid = Some(TEST_UID.to_string());
    rule
}
