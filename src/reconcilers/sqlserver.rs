// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `MysqlServer` and `PostgresqlServer` reconciliation.
//!
//! Azure reports a server that is still being created as not found, so the
//! reconciler tracks its own long-running operations: the token returned when
//! an operation starts is stored in `status.runningOperation` and polled on
//! later passes until it resolves.
//!
//! Each pass takes the first branch that applies:
//!
//! 1. Deletion requested: delete the server and release the finalizer
//! 2. Finalizer absent: add it and requeue
//! 3. Operation running: poll it
//! 4. Server not found: generate a password, publish it and start creation
//! 5. Server not ready: mirror its state and requeue
//! 6. Server ready: ensure the firewall rule, publish the connection secret
//!    and poll again after a long wait
//!
//! Any other failure sets a `ReconcileError` condition and requeues.

use super::connection::{publish_connection_secret, sql_username, ConnectionDetails, Password};
use super::finalizers::{add_finalizer, is_being_deleted, remove_finalizer};
use super::provider::load_credentials;
use super::retry::consistency_backoff;
use super::status::{creating, deleting, reconcile_error, reconcile_success, set_condition};
use super::ReconcileOutcome;
use crate::azure::operation::OperationState;
use crate::azure::sql::{
    sql_server_condition, sql_server_status_message, FirewallRule, SqlServer, SqlServerApi,
    SqlServerApiFactory, SqlVendor,
};
use crate::constants::{
    FINALIZER_MYSQL_SERVER, FINALIZER_POSTGRESQL_SERVER, FIREWALL_RULE_END_IP, FIREWALL_RULE_NAME,
    FIREWALL_RULE_START_IP, KIND_MYSQL_SERVER, KIND_POSTGRESQL_SERVER, LONG_WAIT, PASSWORD_LEN,
    SQL_SERVER_STATE_READY,
};
use crate::crd::{
    MysqlServer, OperationType, PostgresqlServer, ProviderReference, RunningOperation,
    SecretReference, SqlServerParameters, SqlServerStatus,
};
use crate::metrics;
use crate::store::{ObjectStore, StoredObject};
use anyhow::{anyhow, bail, Context as _, Result};
use kube::ResourceExt;
use rand::distr::Alphanumeric;
use rand::Rng;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A resource kind reconciled as an Azure SQL server.
pub trait SqlServerResource: StoredObject {
    /// Kind name used in logs and metrics.
    const KIND: &'static str;

    /// Database engine the kind provisions.
    const VENDOR: SqlVendor;

    /// Finalizer guarding deletion of the Azure server.
    const FINALIZER: &'static str;

    fn parameters(&self) -> &SqlServerParameters;

    fn provider_ref(&self) -> &ProviderReference;

    fn connection_secret_ref(&self) -> Option<&SecretReference>;

    fn sql_status(&self) -> Option<&SqlServerStatus>;

    /// The status, created empty if absent.
    fn sql_status_mut(&mut self) -> &mut SqlServerStatus;

    fn running_operation(&self) -> Option<&RunningOperation> {
        self.sql_status().and_then(|s| s.running_operation.as_ref())
    }
}

impl SqlServerResource for MysqlServer {
    const KIND: &'static str = KIND_MYSQL_SERVER;
    const VENDOR: SqlVendor = SqlVendor::Mysql;
    const FINALIZER: &'static str = FINALIZER_MYSQL_SERVER;

    fn parameters(&self) -> &SqlServerParameters {
        &self.spec.parameters
    }

    fn provider_ref(&self) -> &ProviderReference {
        &self.spec.provider_ref
    }

    fn connection_secret_ref(&self) -> Option<&SecretReference> {
        self.spec.write_connection_secret_to_ref.as_ref()
    }

    fn sql_status(&self) -> Option<&SqlServerStatus> {
        self.status.as_ref()
    }

    fn sql_status_mut(&mut self) -> &mut SqlServerStatus {
        self.status.get_or_insert_with(SqlServerStatus::default)
    }
}

impl SqlServerResource for PostgresqlServer {
    const KIND: &'static str = KIND_POSTGRESQL_SERVER;
    const VENDOR: SqlVendor = SqlVendor::Postgresql;
    const FINALIZER: &'static str = FINALIZER_POSTGRESQL_SERVER;

    fn parameters(&self) -> &SqlServerParameters {
        &self.spec.parameters
    }

    fn provider_ref(&self) -> &ProviderReference {
        &self.spec.provider_ref
    }

    fn connection_secret_ref(&self) -> Option<&SecretReference> {
        self.spec.write_connection_secret_to_ref.as_ref()
    }

    fn sql_status(&self) -> Option<&SqlServerStatus> {
        self.status.as_ref()
    }

    fn sql_status_mut(&mut self) -> &mut SqlServerStatus {
        self.status.get_or_insert_with(SqlServerStatus::default)
    }
}

/// Reconciler for one SQL server kind.
pub struct SqlServerReconciler<K, S> {
    store: Arc<S>,
    factory: Arc<dyn SqlServerApiFactory>,
    _kind: PhantomData<fn() -> K>,
}

impl<K, S> SqlServerReconciler<K, S>
where
    K: SqlServerResource,
    S: ObjectStore,
{
    #[must_use]
    pub fn new(store: Arc<S>, factory: Arc<dyn SqlServerApiFactory>) -> Self {
        Self {
            store,
            factory,
            _kind: PhantomData,
        }
    }

    /// Run one reconcile pass for `instance`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the resulting status cannot be persisted, or
    /// the status written after starting creation never became visible.
    pub async fn reconcile(&self, mut instance: K) -> Result<ReconcileOutcome> {
        debug!(
            kind = K::KIND,
            namespace = %instance.namespace().unwrap_or_default(),
            name = %instance.name_any(),
            "Reconciling SQL server"
        );

        let api = match self.connect(&instance).await {
            Ok(api) => api,
            Err(e) => return self.fail(&mut instance, e).await,
        };

        if is_being_deleted(&instance) {
            return self.handle_deletion(api.as_ref(), &mut instance).await;
        }

        if add_finalizer(&mut instance, K::FINALIZER) {
            self.persist(&mut instance).await?;
            return Ok(ReconcileOutcome::requeue());
        }

        if let Some(operation) = instance.running_operation().cloned() {
            return self
                .handle_running_operation(api.as_ref(), &mut instance, &operation)
                .await;
        }

        let name = instance.name_any();
        let server = match api.get_server(&name, instance.parameters()).await {
            Ok(server) => server,
            Err(e) if e.is_not_found() => {
                return self.handle_creation(api.as_ref(), &mut instance).await;
            }
            Err(e) => {
                let err = anyhow::Error::from(e)
                    .context(format!("failed to get SQL Server instance {name}"));
                return self.fail(&mut instance, err).await;
            }
        };

        observe_server(&mut instance, &server);

        if server.state != SQL_SERVER_STATE_READY {
            debug!(server = %name, state = %server.state, "SQL Server instance is not ready");
            set_condition(&mut instance.sql_status_mut().conditions, reconcile_success());
            self.persist(&mut instance).await?;
            metrics::record_reconciliation_requeue(K::KIND, "not_ready");
            return Ok(ReconcileOutcome::requeue());
        }

        match api
            .get_firewall_rule(&name, instance.parameters(), FIREWALL_RULE_NAME)
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return self.begin_firewall_rules(api.as_ref(), &mut instance).await;
            }
            Err(e) => {
                let err = anyhow::Error::from(e).context(format!(
                    "failed to get firewall rule {FIREWALL_RULE_NAME} of SQL Server instance {name}"
                ));
                return self.fail(&mut instance, err).await;
            }
        }

        let details = ConnectionDetails {
            endpoint: Some(server.fqdn.clone()),
            username: Some(sql_username(&instance.parameters().admin_login_name, &name)),
            port: None,
            password: Password::Unchanged,
        };
        if let Err(e) = publish_connection_secret(
            self.store.as_ref(),
            &instance,
            instance.connection_secret_ref(),
            &details,
        )
        .await
        {
            let err = e.context(format!(
                "failed to set connection secret for SQL Server instance {name}"
            ));
            return self.fail(&mut instance, err).await;
        }

        set_condition(&mut instance.sql_status_mut().conditions, reconcile_success());
        self.persist(&mut instance).await?;
        metrics::record_reconciliation_requeue(K::KIND, "idle");
        Ok(ReconcileOutcome::requeue_after(LONG_WAIT))
    }

    async fn connect(&self, instance: &K) -> Result<Arc<dyn SqlServerApi>> {
        let namespace = instance.namespace().unwrap_or_default();
        let credentials =
            load_credentials(self.store.as_ref(), instance.provider_ref(), &namespace).await?;
        self.factory
            .create_api(K::VENDOR, &credentials)
            .with_context(|| {
                format!(
                    "failed to connect to Azure for SQL Server instance {}",
                    instance.name_any()
                )
            })
    }

    async fn handle_deletion(
        &self,
        api: &dyn SqlServerApi,
        instance: &mut K,
    ) -> Result<ReconcileOutcome> {
        let name = instance.name_any();
        set_condition(&mut instance.sql_status_mut().conditions, deleting());

        match api.get_server(&name, instance.parameters()).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(server = %name, "SQL Server instance is already gone");
                return self.finalize(instance).await;
            }
            Err(e) => {
                let err = anyhow::Error::from(e)
                    .context(format!("failed to get SQL Server instance {name} for deletion"));
                return self.fail(instance, err).await;
            }
        }

        if let Err(e) = api.delete_server(&name, instance.parameters()).await {
            let err = anyhow::Error::from(e)
                .context(format!("failed to start delete operation for SQL Server instance {name}"));
            return self.fail(instance, err).await;
        }

        info!(server = %name, "Started deletion of SQL Server instance");
        metrics::record_resource_deleted(K::KIND);
        self.finalize(instance).await
    }

    async fn finalize(&self, instance: &mut K) -> Result<ReconcileOutcome> {
        remove_finalizer(instance, K::FINALIZER);
        set_condition(&mut instance.sql_status_mut().conditions, reconcile_success());
        self.persist(instance).await?;
        Ok(ReconcileOutcome::done())
    }

    async fn handle_running_operation(
        &self,
        api: &dyn SqlServerApi,
        instance: &mut K,
        operation: &RunningOperation,
    ) -> Result<ReconcileOutcome> {
        let name = instance.name_any();

        let Some(operation_type) = operation.operation_type() else {
            let err = anyhow!(
                "unknown running operation type for SQL Server instance {name}: {}",
                operation.r#type
            );
            return self.fail(instance, err).await;
        };
        let token = match operation.token_bytes() {
            Ok(token) => token,
            Err(e) => {
                let err = anyhow::Error::from(e).context(format!(
                    "invalid {operation_type} operation token for SQL Server instance {name}"
                ));
                return self.fail(instance, err).await;
            }
        };

        let polled = match operation_type {
            OperationType::CreateServer => api.create_server_end(&token).await,
            OperationType::CreateFirewallRules => api.create_firewall_rules_end(&token).await,
        };

        let state = match polled {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    server = %name,
                    operation = %operation_type,
                    error = %e,
                    "Failed to poll running operation, will poll again"
                );
                let err = anyhow::Error::from(e).context(format!(
                    "failed to poll {operation_type} operation for SQL Server instance {name}"
                ));
                set_condition(
                    &mut instance.sql_status_mut().conditions,
                    reconcile_error(&format!("{err:#}")),
                );
                self.persist(instance).await?;
                metrics::record_error(K::KIND, "azure_error");
                return Ok(ReconcileOutcome::requeue());
            }
        };

        if !state.is_done() {
            debug!(server = %name, operation = %operation_type, "Operation is still running");
            metrics::record_reconciliation_requeue(K::KIND, "in_progress");
            return Ok(ReconcileOutcome::requeue());
        }

        instance.sql_status_mut().running_operation = None;
        let succeeded = state == OperationState::Succeeded;
        metrics::record_operation_resolved(K::KIND, operation_type.as_str(), succeeded);

        if let OperationState::Failed(message) = state {
            let err = anyhow!(
                "failure result returned from {operation_type} operation for SQL Server instance {name}: {message}"
            );
            metrics::record_error(K::KIND, "operation_failed");
            return self.fail(instance, err).await;
        }

        info!(server = %name, operation = %operation_type, "Operation completed");
        set_condition(&mut instance.sql_status_mut().conditions, reconcile_success());
        self.persist(instance).await?;
        Ok(ReconcileOutcome::requeue())
    }

    async fn handle_creation(
        &self,
        api: &dyn SqlServerApi,
        instance: &mut K,
    ) -> Result<ReconcileOutcome> {
        let name = instance.name_any();
        set_condition(&mut instance.sql_status_mut().conditions, creating());

        let generated = generate_password();
        let details = ConnectionDetails {
            endpoint: instance.sql_status().and_then(|s| s.endpoint.clone()),
            username: Some(sql_username(&instance.parameters().admin_login_name, &name)),
            port: None,
            password: Password::Initial(generated.clone()),
        };
        let password = match publish_connection_secret(
            self.store.as_ref(),
            &*instance,
            instance.connection_secret_ref(),
            &details,
        )
        .await
        {
            Ok(stored) => stored.unwrap_or(generated),
            Err(e) => {
                let err = e.context(format!(
                    "failed to set connection secret for SQL Server instance {name}"
                ));
                return self.fail(instance, err).await;
            }
        };

        let token = match api
            .create_server_begin(&name, instance.parameters(), &password)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                let err = anyhow::Error::from(e)
                    .context(format!("failed to start create operation for SQL Server instance {name}"));
                return self.fail(instance, err).await;
            }
        };

        info!(server = %name, kind = K::KIND, "Started creation of SQL Server instance");
        metrics::record_operation_started(K::KIND, OperationType::CreateServer.as_str());
        metrics::record_resource_created(K::KIND);

        self.store_running_operation(instance, OperationType::CreateServer, &token)
            .await?;
        Ok(ReconcileOutcome::requeue())
    }

    async fn begin_firewall_rules(
        &self,
        api: &dyn SqlServerApi,
        instance: &mut K,
    ) -> Result<ReconcileOutcome> {
        let name = instance.name_any();
        let rule = FirewallRule {
            name: FIREWALL_RULE_NAME.to_string(),
            start_ip_address: FIREWALL_RULE_START_IP.to_string(),
            end_ip_address: FIREWALL_RULE_END_IP.to_string(),
        };

        let token = match api
            .create_firewall_rules_begin(&name, instance.parameters(), &rule)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                let err = anyhow::Error::from(e).context(format!(
                    "failed to start create firewall rules operation for SQL Server instance {name}"
                ));
                return self.fail(instance, err).await;
            }
        };

        info!(server = %name, rule = FIREWALL_RULE_NAME, "Started creation of firewall rule");
        metrics::record_operation_started(K::KIND, OperationType::CreateFirewallRules.as_str());

        self.store_running_operation(instance, OperationType::CreateFirewallRules, &token)
            .await?;
        Ok(ReconcileOutcome::requeue())
    }

    /// Record a started operation and wait until the write is visible.
    ///
    /// The operation is already running in Azure, so the token is never rolled
    /// back, even when the wait gives up.
    async fn store_running_operation(
        &self,
        instance: &mut K,
        operation_type: OperationType,
        token: &[u8],
    ) -> Result<()> {
        let status = instance.sql_status_mut();
        status.running_operation = Some(RunningOperation::new(operation_type, token));
        set_condition(&mut status.conditions, reconcile_success());

        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();
        let mut backoff = consistency_backoff();

        loop {
            match self.persist_and_verify(instance, &namespace, &name).await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    debug!(server = %name, "Running operation is not visible yet");
                }
                Err(e) => {
                    debug!(server = %name, error = %format!("{e:#}"), "Failed to store running operation");
                }
            }

            match backoff.next_backoff() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => bail!(
                    "{operation_type} operation for SQL Server instance {namespace}/{name} was started but could not be recorded"
                ),
            }
        }
    }

    async fn persist_and_verify(&self, instance: &mut K, namespace: &str, name: &str) -> Result<bool> {
        self.persist(instance).await?;
        let current: K = self
            .store
            .get(namespace, name)
            .await
            .with_context(|| format!("failed to get {} {namespace}/{name}", K::KIND))?;
        Ok(current.running_operation().is_some())
    }

    async fn persist(&self, instance: &mut K) -> Result<()> {
        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();
        self.store
            .update(instance)
            .await
            .with_context(|| format!("failed to update {} {namespace}/{name}", K::KIND))
    }

    async fn fail(&self, instance: &mut K, err: anyhow::Error) -> Result<ReconcileOutcome> {
        warn!(
            kind = K::KIND,
            name = %instance.name_any(),
            error = %format!("{err:#}"),
            "Reconcile failed"
        );
        metrics::record_error(K::KIND, "reconcile_error");
        set_condition(
            &mut instance.sql_status_mut().conditions,
            reconcile_error(&format!("{err:#}")),
        );
        self.persist(instance).await?;
        Ok(ReconcileOutcome::requeue())
    }
}

/// Mirror the observed server into the resource status.
fn observe_server<K: SqlServerResource>(instance: &mut K, server: &SqlServer) {
    let name = instance.name_any();
    let status = instance.sql_status_mut();
    status.state = Some(server.state.clone());
    status.message = Some(sql_server_status_message(&name, &server.state));
    status.provider_id = Some(server.id.clone());
    status.endpoint = Some(server.fqdn.clone());
    set_condition(&mut status.conditions, sql_server_condition(&server.state));
}

fn generate_password() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(PASSWORD_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[path = "sqlserver_tests.rs"]
mod sqlserver_tests;
