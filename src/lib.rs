// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # stack-azure - Azure resource operator for Kubernetes
//!
//! stack-azure manages Azure Database for MySQL, Azure Database for PostgreSQL,
//! Azure Cache for Redis and Azure virtual networks through Custom Resource
//! Definitions (CRDs).
//!
//! ## Overview
//!
//! Each managed resource references a `Provider` holding Azure service principal
//! credentials. The operator creates the Azure resource, mirrors its state into the
//! resource status, writes connection details to a Secret and deletes the Azure
//! resource when the Kubernetes object goes away.
//!
//! SQL server creation is asynchronous in Azure. The operation token is persisted in
//! the resource status so that polling resumes across reconcile passes and operator
//! restarts.
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types
//! - [`azure`] - Azure Resource Manager clients for SQL servers, Redis caches and
//!   virtual networks
//! - [`reconcilers`] - Reconciliation logic for each resource type
//! - [`controller`] - `kube::runtime` controllers driving the reconcilers
//! - [`store`] - Read/write access to Kubernetes objects
//! - [`metrics`] - Prometheus metrics
//! - [`server`] - Metrics and health check HTTP server
//!
//! ## Example
//!
//! ```rust,no_run
//! use stack_azure::crd::{ProviderReference, ReclaimPolicy, RedisSpec, SkuSpec};
//!
//! let spec = RedisSpec {
//!     provider_ref: ProviderReference {
//!         name: "azure-provider".to_string(),
//!         namespace: None,
//!     },
//!     reclaim_policy: ReclaimPolicy::Delete,
//!     resource_group_name: "my-group".to_string(),
//!     location: "westus2".to_string(),
//!     sku: SkuSpec {
//!         name: "Basic".to_string(),
//!         family: "C".to_string(),
//!         capacity: 0,
//!     },
//!     ..Default::default()
//! };
//! ```

pub mod azure;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod metrics;
pub mod reconcilers;
pub mod server;
pub mod status_reasons;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
