// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the stack-azure operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// API Constants
// ============================================================================

/// API group for all stack-azure CRDs
pub const API_GROUP: &str = "azure.firestoned.io";

/// API version for all stack-azure CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "azure.firestoned.io/v1alpha1";

/// Kind name for `MysqlServer` resource
pub const KIND_MYSQL_SERVER: &str = "MysqlServer";

/// Kind name for `PostgresqlServer` resource
pub const KIND_POSTGRESQL_SERVER: &str = "PostgresqlServer";

/// Kind name for `Redis` resource
pub const KIND_REDIS: &str = "Redis";

/// Kind name for `VirtualNetwork` resource
pub const KIND_VIRTUAL_NETWORK: &str = "VirtualNetwork";

/// Kind name for `MysqlServerVirtualNetworkRule` resource
pub const KIND_MYSQL_SERVER_VIRTUAL_NETWORK_RULE: &str = "MysqlServerVirtualNetworkRule";

/// Kind name for `Provider` resource
pub const KIND_PROVIDER: &str = "Provider";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer guarding deletion of `MysqlServer` resources
pub const FINALIZER_MYSQL_SERVER: &str = "mysqlserver.azure.firestoned.io/finalizer";

/// Finalizer guarding deletion of `PostgresqlServer` resources
pub const FINALIZER_POSTGRESQL_SERVER: &str = "postgresqlserver.azure.firestoned.io/finalizer";

/// Finalizer guarding deletion of `Redis` resources
pub const FINALIZER_REDIS: &str = "redis.azure.firestoned.io/finalizer";

/// Finalizer guarding deletion of `VirtualNetwork` resources
pub const FINALIZER_VIRTUAL_NETWORK: &str = "virtualnetwork.azure.firestoned.io/finalizer";

/// Finalizer guarding deletion of `MysqlServerVirtualNetworkRule` resources
pub const FINALIZER_MYSQL_SERVER_VIRTUAL_NETWORK_RULE: &str =
    "mysqlservervirtualnetworkrule.azure.firestoned.io/finalizer";

// ============================================================================
// Reconciliation Timing
// ============================================================================

/// Requeue delay used when a pass asks to be run again as soon as practical
pub const REQUEUE_SHORT_SECS: u64 = 10;

/// Idle poll interval for resources that are ready (1 minute)
pub const REQUEUE_LONG_WAIT_SECS: u64 = 60;

/// Requeue delay applied by the controller error policy
pub const ERROR_REQUEUE_SECS: u64 = 30;

/// Short requeue as a `Duration`
pub const REQUEUE_SHORT: Duration = Duration::from_secs(REQUEUE_SHORT_SECS);

/// Long idle wait as a `Duration`
pub const LONG_WAIT: Duration = Duration::from_secs(REQUEUE_LONG_WAIT_SECS);

// ============================================================================
// SQL Server Constants
// ============================================================================

/// Length of the generated administrator password
pub const PASSWORD_LEN: usize = 20;

/// Name of the firewall rule created on every SQL server
pub const FIREWALL_RULE_NAME: &str = "AllowAzureServices";

/// Start address of the firewall rule. `0.0.0.0` to `0.0.0.0` admits Azure services only.
pub const FIREWALL_RULE_START_IP: &str = "0.0.0.0";

/// End address of the firewall rule
pub const FIREWALL_RULE_END_IP: &str = "0.0.0.0";

/// Server state reported by Azure once a SQL server can accept connections
pub const SQL_SERVER_STATE_READY: &str = "Ready";

/// Server state reported while a SQL server is being dropped
pub const SQL_SERVER_STATE_DROPPING: &str = "Dropping";

/// Server state reported for a disabled SQL server
pub const SQL_SERVER_STATE_DISABLED: &str = "Disabled";

// ============================================================================
// Redis Constants
// ============================================================================

/// Prefix of the Azure resource name given to each Redis cache
pub const REDIS_NAME_PREFIX: &str = "redis";

/// Redis provisioning state: creation in progress
pub const REDIS_STATE_CREATING: &str = "Creating";

/// Redis provisioning state: deletion in progress
pub const REDIS_STATE_DELETING: &str = "Deleting";

/// Redis provisioning state: update in progress
pub const REDIS_STATE_UPDATING: &str = "Updating";

/// Redis provisioning state: resource is provisioned
pub const REDIS_STATE_SUCCEEDED: &str = "Succeeded";

// ============================================================================
// Azure Resource Manager Constants
// ============================================================================

/// API version of the MySQL and PostgreSQL management APIs
pub const ARM_API_VERSION_SQL: &str = "2017-12-01";

/// API version of the Azure Cache for Redis management API
pub const ARM_API_VERSION_REDIS: &str = "2018-03-01";

/// API version of the virtual network management API
pub const ARM_API_VERSION_NETWORK: &str = "2019-06-01";

/// Default Azure Active Directory endpoint
pub const DEFAULT_AAD_ENDPOINT: &str = "https://login.microsoftonline.com/";

/// Default Azure Resource Manager endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com/";

/// Seconds subtracted from a token lifetime before it is refreshed
pub const TOKEN_REFRESH_SKEW_SECS: i64 = 300;

/// Token lifetime assumed when the token endpoint does not report one
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

// ============================================================================
// Connection Secret Keys
// ============================================================================

/// Connection secret key holding the service endpoint
pub const SECRET_KEY_ENDPOINT: &str = "endpoint";

/// Connection secret key holding the login name
pub const SECRET_KEY_USERNAME: &str = "username";

/// Connection secret key holding the password or access key
pub const SECRET_KEY_PASSWORD: &str = "password";

/// Connection secret key holding the service port
pub const SECRET_KEY_PORT: &str = "port";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of Tokio worker threads
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default bind address of the metrics and health HTTP server
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";
