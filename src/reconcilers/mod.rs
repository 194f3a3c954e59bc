// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation logic for managed Azure resources.
//!
//! Each reconciler runs one pass for one resource: it reads the resource's
//! persisted status, talks to Azure, writes the status back and tells the
//! controller whether and when to run again. No state survives a pass except
//! what is written to the resource.
//!
//! # Reconciliation Architecture
//!
//! 1. **Connect** - Load Azure credentials through the resource's `Provider`
//! 2. **Dispatch** - Pick a handler from the resource's deletion timestamp,
//!    finalizer, running operation and the observed Azure state
//! 3. **Act** - Create, poll, update or delete the Azure resource
//! 4. **Status** - Record conditions and observed fields on the resource
//!
//! # Available Reconcilers
//!
//! - [`SqlServerReconciler`] - `MysqlServer` and `PostgresqlServer`, tracking
//!   long-running Azure operations through a persisted token
//! - [`RedisReconciler`] - `Redis`, following the provisioning state Azure reports
//! - [`ManagedReconciler`] - kinds applied with a plain idempotent `PUT`:
//!   [`VirtualNetworkReconciler`] and [`MysqlServerVirtualNetworkRuleReconciler`]
//!
//! # Example: Running a pass
//!
//! ```rust,no_run
//! use stack_azure::azure::sql::ArmSqlServerApiFactory;
//! use stack_azure::crd::MysqlServer;
//! use stack_azure::reconcilers::SqlServerReconciler;
//! use stack_azure::store::KubeStore;
//! use std::sync::Arc;
//!
//! async fn reconcile(client: kube::Client, server: MysqlServer) -> anyhow::Result<()> {
//!     let reconciler: SqlServerReconciler<MysqlServer, KubeStore> =
//!         SqlServerReconciler::new(Arc::new(KubeStore::new(client)), Arc::new(ArmSqlServerApiFactory));
//!     let outcome = reconciler.reconcile(server).await?;
//!     println!("requeue: {}", outcome.requeue);
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod finalizers;
pub mod managed;
pub mod provider;
pub mod redis;
pub mod retry;
pub mod sqlserver;
pub mod status;
pub mod virtual_network;
pub mod virtual_network_rule;

pub use managed::{
    ExternalClient, ExternalConnecter, ManagedReconciler, ManagedResource, Observation,
    ProviderConnecter,
};
pub use redis::{
    AzureRedisCache, CreateSyncDeleteKeyer, ProviderRedisConnecter, RedisConnecter,
    RedisReconciler,
};
pub use sqlserver::{SqlServerReconciler, SqlServerResource};
pub use virtual_network::{AzureVirtualNetwork, VirtualNetworkReconciler};
pub use virtual_network_rule::{
    AzureMysqlVirtualNetworkRule, MysqlServerVirtualNetworkRuleReconciler,
};

use crate::constants::REQUEUE_SHORT;
use kube::runtime::controller::Action;
use std::time::Duration;

/// What a reconcile pass asks of the controller.
///
/// `requeue_after` wins over `requeue`. A pass that asks for neither waits for
/// the next change to the resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Run another pass soon.
    pub requeue: bool,
    /// Run another pass after this delay.
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// Nothing left to do until the resource changes.
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// Run another pass soon.
    #[must_use]
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    /// Run another pass after `delay`.
    #[must_use]
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }

    /// Translate into a controller [`Action`].
    #[must_use]
    pub fn into_action(self) -> Action {
        match (self.requeue_after, self.requeue) {
            (Some(delay), _) => Action::requeue(delay),
            (None, true) => Action::requeue(REQUEUE_SHORT),
            (None, false) => Action::await_change(),
        }
    }
}
