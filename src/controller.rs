// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller wiring for the managed resource kinds.
//!
//! Each kind gets its own `kube::runtime::Controller`. The wrappers here hand
//! the watched object to the matching reconciler, record reconciliation
//! metrics and translate the [`ReconcileOutcome`](crate::reconcilers::ReconcileOutcome)
//! into a requeue [`Action`].

use crate::constants::{ERROR_REQUEUE_SECS, KIND_REDIS};
use crate::crd::Redis;
use crate::metrics;
use crate::reconcilers::{
    ManagedReconciler, ManagedResource, RedisReconciler, SqlServerReconciler, SqlServerResource,
};
use crate::store::{ObjectStore, StoredObject};
use anyhow::Result;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Reconciliation error wrapper
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] anyhow::Error);

/// Error policy shared by all controllers.
///
/// Returns an action to requeue the resource after a delay when reconciliation fails.
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
pub(crate) fn error_policy<K, C>(resource: Arc<K>, err: &ReconcileError, _ctx: Arc<C>) -> Action
where
    K: ResourceExt,
{
    error!(
        error = %format!("{:#}", err.0),
        namespace = %resource.namespace().unwrap_or_default(),
        name = %resource.name_any(),
        "Reconciliation error - will retry in {ERROR_REQUEUE_SECS}s"
    );
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECS))
}

fn watched_api<K: StoredObject>(client: Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

pub(crate) async fn reconcile_sql_server<K, S>(
    instance: Arc<K>,
    reconciler: Arc<SqlServerReconciler<K, S>>,
) -> Result<Action, ReconcileError>
where
    K: SqlServerResource,
    S: ObjectStore + 'static,
{
    let start = Instant::now();
    match reconciler.reconcile((*instance).clone()).await {
        Ok(outcome) => {
            metrics::record_reconciliation_success(K::KIND, start.elapsed());
            debug!(kind = K::KIND, name = %instance.name_any(), ?outcome, "Reconciled");
            Ok(outcome.into_action())
        }
        Err(e) => {
            metrics::record_reconciliation_error(K::KIND, start.elapsed());
            Err(e.into())
        }
    }
}

pub(crate) async fn reconcile_redis<S>(
    redis: Arc<Redis>,
    reconciler: Arc<RedisReconciler<S>>,
) -> Result<Action, ReconcileError>
where
    S: ObjectStore + 'static,
{
    let start = Instant::now();
    let namespace = redis.namespace().unwrap_or_default();
    match reconciler.reconcile(&namespace, &redis.name_any()).await {
        Ok(outcome) => {
            metrics::record_reconciliation_success(KIND_REDIS, start.elapsed());
            debug!(kind = KIND_REDIS, name = %redis.name_any(), ?outcome, "Reconciled");
            Ok(outcome.into_action())
        }
        Err(e) => {
            metrics::record_reconciliation_error(KIND_REDIS, start.elapsed());
            Err(e.into())
        }
    }
}

pub(crate) async fn reconcile_managed<K, S>(
    resource: Arc<K>,
    reconciler: Arc<ManagedReconciler<K, S>>,
) -> Result<Action, ReconcileError>
where
    K: ManagedResource,
    S: ObjectStore + 'static,
{
    let start = Instant::now();
    let namespace = resource.namespace().unwrap_or_default();
    match reconciler.reconcile(&namespace, &resource.name_any()).await {
        Ok(outcome) => {
            metrics::record_reconciliation_success(K::KIND, start.elapsed());
            debug!(kind = K::KIND, name = %resource.name_any(), ?outcome, "Reconciled");
            Ok(outcome.into_action())
        }
        Err(e) => {
            metrics::record_reconciliation_error(K::KIND, start.elapsed());
            Err(e.into())
        }
    }
}

/// Run the controller for one SQL server kind.
///
/// Watches all namespaces unless `namespace` is given.
///
/// # Errors
///
/// Returns an error if the controller stream terminates abnormally.
pub async fn run_sql_server_controller<K, S>(
    client: Client,
    reconciler: Arc<SqlServerReconciler<K, S>>,
    namespace: Option<String>,
) -> Result<()>
where
    K: SqlServerResource,
    S: ObjectStore + 'static,
{
    info!(kind = K::KIND, namespace = ?namespace, "Starting controller");

    let api = watched_api::<K>(client, namespace.as_deref());

    Controller::new(api, WatcherConfig::default())
        .run(reconcile_sql_server, error_policy, reconciler)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `Redis` controller.
///
/// # Errors
///
/// Returns an error if the controller stream terminates abnormally.
pub async fn run_redis_controller<S>(
    client: Client,
    reconciler: Arc<RedisReconciler<S>>,
    namespace: Option<String>,
) -> Result<()>
where
    S: ObjectStore + 'static,
{
    info!(kind = KIND_REDIS, namespace = ?namespace, "Starting controller");

    let api = watched_api::<Redis>(client, namespace.as_deref());

    Controller::new(api, WatcherConfig::default())
        .run(reconcile_redis, error_policy, reconciler)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the controller for one kind reconciled by a [`ManagedReconciler`].
///
/// # Errors
///
/// Returns an error if the controller stream terminates abnormally.
pub async fn run_managed_controller<K, S>(
    client: Client,
    reconciler: Arc<ManagedReconciler<K, S>>,
    namespace: Option<String>,
) -> Result<()>
where
    K: ManagedResource,
    S: ObjectStore + 'static,
{
    info!(kind = K::KIND, namespace = ?namespace, "Starting controller");

    let api = watched_api::<K>(client, namespace.as_deref());

    Controller::new(api, WatcherConfig::default())
        .run(reconcile_managed, error_policy, reconciler)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
