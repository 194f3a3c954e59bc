// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `sqlserver.rs`

#[cfg(test)]
mod tests {
    use super::super::{SqlServerReconciler, SqlServerResource};
    use crate::azure::operation::OperationState;
    use crate::azure::sql::{FirewallRule, SqlServer, SqlServerApi, SqlServerApiFactory, SqlVendor};
    use crate::azure::AzureError;
    use crate::constants::{
        FINALIZER_MYSQL_SERVER, FINALIZER_POSTGRESQL_SERVER, FIREWALL_RULE_NAME, LONG_WAIT,
        PASSWORD_LEN,
    };
    use crate::crd::{
        Condition, MysqlServer, MysqlServerSpec, PostgresqlServer, PostgresqlServerSpec,
        OperationType, ProviderReference, RunningOperation, SecretReference, SqlServerParameters,
        SqlServerStatus,
    };
    use crate::reconcilers::status::find_condition;
    use crate::reconcilers::ReconcileOutcome;
    use crate::status_reasons::{
        CONDITION_TYPE_READY, CONDITION_TYPE_SYNCED, REASON_AVAILABLE, REASON_CREATING,
        REASON_DELETING, REASON_RECONCILE_ERROR, REASON_RECONCILE_SUCCESS, REASON_UNAVAILABLE,
    };
    use crate::testing::{
        azure_boom, azure_not_found, provider, provider_secret, secret_value, sql_parameters,
        MemoryStore, Script, TEST_ADMIN_LOGIN, TEST_CONNECTION_SECRET_NAME, TEST_NAMESPACE,
        TEST_PROVIDER_NAME, TEST_PROVIDER_SECRET_DATA, TEST_UID,
    };
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use std::sync::{Arc, Mutex};

    const TEST_SERVER_NAME: &str = "cool-server";
    const TEST_ENDPOINT: &str = "host.example.com";
    const TEST_SERVER_ID: &str =
        "/subscriptions/cool-subscription/resourceGroups/cool-rg/providers/Microsoft.DBforMySQL/servers/cool-server";
    const TEST_OTHER_FINALIZER: &str = "example.com/keep";

    fn server(state: &str) -> SqlServer {
        SqlServer {
            id: TEST_SERVER_ID.to_string(),
            state: state.to_string(),
            fqdn: TEST_ENDPOINT.to_string(),
        }
    }

    /// Records every call and answers from per-method scripts.
    struct MockSqlServerApi {
        get_server: Script<SqlServer>,
        create_server_begin: Script<Vec<u8>>,
        create_server_end: Script<OperationState>,
        delete_server: Script<()>,
        get_firewall_rule: Script<FirewallRule>,
        create_firewall_rules_begin: Script<Vec<u8>>,
        create_firewall_rules_end: Script<OperationState>,
        calls: Mutex<Vec<String>>,
        passwords: Mutex<Vec<String>>,
    }

    impl Default for MockSqlServerApi {
        fn default() -> Self {
            Self {
                get_server: Script::new(|| Err(azure_not_found())),
                create_server_begin: Script::new(|| Ok(b"token-1".to_vec())),
                create_server_end: Script::new(|| Ok(OperationState::Succeeded)),
                delete_server: Script::new(|| Ok(())),
                get_firewall_rule: Script::new(|| {
                    Ok(FirewallRule {
                        name: FIREWALL_RULE_NAME.to_string(),
                        start_ip_address: "0.0.0.0".to_string(),
                        end_ip_address: "0.0.0.0".to_string(),
                    })
                }),
                create_firewall_rules_begin: Script::new(|| Ok(b"token-2".to_vec())),
                create_firewall_rules_end: Script::new(|| Ok(OperationState::Succeeded)),
                calls: Mutex::new(Vec::new()),
                passwords: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockSqlServerApi {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| c.as_str() == call).count()
        }

        fn passwords(&self) -> Vec<String> {
            self.passwords.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlServerApi for MockSqlServerApi {
        async fn get_server(
            &self,
            name: &str,
            _params: &SqlServerParameters,
        ) -> Result<SqlServer, AzureError> {
            assert_eq!(name, TEST_SERVER_NAME);
            self.record("get_server".to_string());
            self.get_server.call()
        }

        async fn create_server_begin(
            &self,
            _name: &str,
            _params: &SqlServerParameters,
            admin_password: &str,
        ) -> Result<Vec<u8>, AzureError> {
            self.record("create_server_begin".to_string());
            self.passwords
                .lock()
                .unwrap()
                .push(admin_password.to_string());
            self.create_server_begin.call()
        }

        async fn create_server_end(&self, token: &[u8]) -> Result<OperationState, AzureError> {
            self.record(format!("create_server_end:{}", String::from_utf8_lossy(token)));
            self.create_server_end.call()
        }

        async fn delete_server(
            &self,
            _name: &str,
            _params: &SqlServerParameters,
        ) -> Result<(), AzureError> {
            self.record("delete_server".to_string());
            self.delete_server.call()
        }

        async fn get_firewall_rule(
            &self,
            _name: &str,
            _params: &SqlServerParameters,
            rule_name: &str,
        ) -> Result<FirewallRule, AzureError> {
            self.record(format!("get_firewall_rule:{rule_name}"));
            self.get_firewall_rule.call()
        }

        async fn create_firewall_rules_begin(
            &self,
            _name: &str,
            _params: &SqlServerParameters,
            rule: &FirewallRule,
        ) -> Result<Vec<u8>, AzureError> {
            self.record(format!("create_firewall_rules_begin:{}", rule.name));
            self.create_firewall_rules_begin.call()
        }

        async fn create_firewall_rules_end(
            &self,
            token: &[u8],
        ) -> Result<OperationState, AzureError> {
            self.record(format!(
                "create_firewall_rules_end:{}",
                String::from_utf8_lossy(token)
            ));
            self.create_firewall_rules_end.call()
        }
    }

    struct MockFactory {
        api: Arc<MockSqlServerApi>,
        fail: bool,
        requests: Mutex<Vec<(SqlVendor, Vec<u8>)>>,
    }

    impl SqlServerApiFactory for MockFactory {
        fn create_api(
            &self,
            vendor: SqlVendor,
            credentials: &[u8],
        ) -> Result<Arc<dyn SqlServerApi>, AzureError> {
            self.requests
                .lock()
                .unwrap()
                .push((vendor, credentials.to_vec()));
            if self.fail {
                return Err(AzureError::InvalidCredentials("boom".to_string()));
            }
            Ok(self.api.clone())
        }
    }

    fn mysql_server() -> MysqlServer {
        let mut server = MysqlServer::new(
            TEST_SERVER_NAME,
            MysqlServerSpec {
                provider_ref: ProviderReference {
                    name: TEST_PROVIDER_NAME.to_string(),
                    namespace: None,
                },
                write_connection_secret_to_ref: Some(SecretReference {
                    name: TEST_CONNECTION_SECRET_NAME.to_string(),
                    namespace: None,
                }),
                parameters: sql_parameters(),
            },
        );
        server.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        server.metadata.uid = Some(TEST_UID.to_string());
        server
    }

    fn with_finalizer(mut server: MysqlServer) -> MysqlServer {
        server.metadata.finalizers = Some(vec![FINALIZER_MYSQL_SERVER.to_string()]);
        server
    }

    fn with_running_operation(mut server: MysqlServer, r#type: &str, token: &str) -> MysqlServer {
        server.status = Some(SqlServerStatus {
            running_operation: Some(RunningOperation {
                r#type: r#type.to_string(),
                token: token.to_string(),
            }),
            ..Default::default()
        });
        server
    }

    fn being_deleted(mut server: MysqlServer) -> MysqlServer {
        server.metadata.finalizers = Some(vec![
            FINALIZER_MYSQL_SERVER.to_string(),
            TEST_OTHER_FINALIZER.to_string(),
        ]);
        server.metadata.deletion_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
        server
    }

    struct Harness {
        store: Arc<MemoryStore>,
        api: Arc<MockSqlServerApi>,
        factory: Arc<MockFactory>,
        reconciler: SqlServerReconciler<MysqlServer, MemoryStore>,
    }

    impl Harness {
        fn new(server: MysqlServer) -> Self {
            Self::build(server, false)
        }

        fn build(server: MysqlServer, fail_connect: bool) -> Self {
            let store = Arc::new(MemoryStore::new());
            store.insert(&provider());
            store.insert(&provider_secret());
            store.insert(&server);

            let api = Arc::new(MockSqlServerApi::default());
            let factory = Arc::new(MockFactory {
                api: api.clone(),
                fail: fail_connect,
                requests: Mutex::new(Vec::new()),
            });
            let reconciler = SqlServerReconciler::new(store.clone(), factory.clone());
            Self {
                store,
                api,
                factory,
                reconciler,
            }
        }

        fn current(&self) -> MysqlServer {
            self.store
                .stored(TEST_NAMESPACE, TEST_SERVER_NAME)
                .expect("server should be stored")
        }

        fn secret(&self) -> Option<Secret> {
            self.store
                .stored(TEST_NAMESPACE, TEST_CONNECTION_SECRET_NAME)
        }

        async fn pass(&self) -> ReconcileOutcome {
            self.reconciler
                .reconcile(self.current())
                .await
                .expect("reconcile pass should not error")
        }
    }

    fn conditions(server: &MysqlServer) -> Vec<Condition> {
        server
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default()
    }

    fn reason(server: &MysqlServer, condition_type: &str) -> Option<String> {
        find_condition(&conditions(server), condition_type).and_then(|c| c.reason.clone())
    }

    fn message(server: &MysqlServer, condition_type: &str) -> String {
        find_condition(&conditions(server), condition_type)
            .and_then(|c| c.message.clone())
            .unwrap_or_default()
    }

    // ========== Dispatch ==========

    #[test]
    fn test_resource_kinds() {
        assert_eq!(MysqlServer::VENDOR, SqlVendor::Mysql);
        assert_eq!(MysqlServer::FINALIZER, FINALIZER_MYSQL_SERVER);
        assert_eq!(PostgresqlServer::VENDOR, SqlVendor::Postgresql);
        assert_eq!(PostgresqlServer::FINALIZER, FINALIZER_POSTGRESQL_SERVER);
    }

    #[tokio::test]
    async fn test_first_pass_only_adds_finalizer() {
        let h = Harness::new(mysql_server());

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        assert_eq!(
            server.metadata.finalizers,
            Some(vec![FINALIZER_MYSQL_SERVER.to_string()])
        );
        assert!(h.api.calls().is_empty(), "no Azure call before the finalizer is stored");
        assert!(server.running_operation().is_none());
    }

    #[tokio::test]
    async fn test_connect_uses_provider_credentials() {
        let h = Harness::new(with_finalizer(mysql_server()));

        h.pass().await;

        let requests = h.factory.requests.lock().unwrap().clone();
        assert_eq!(
            requests,
            vec![(SqlVendor::Mysql, TEST_PROVIDER_SECRET_DATA.as_bytes().to_vec())]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let h = Harness::build(with_finalizer(mysql_server()), true);

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        assert_eq!(
            reason(&server, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_ERROR)
        );
        assert!(message(&server, CONDITION_TYPE_SYNCED).contains("failed to connect to Azure"));
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_provider_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.insert(&with_finalizer(mysql_server()));
        let api = Arc::new(MockSqlServerApi::default());
        let factory = Arc::new(MockFactory {
            api: api.clone(),
            fail: false,
            requests: Mutex::new(Vec::new()),
        });
        let reconciler: SqlServerReconciler<MysqlServer, MemoryStore> =
            SqlServerReconciler::new(store.clone(), factory);

        let current = store.stored(TEST_NAMESPACE, TEST_SERVER_NAME).unwrap();
        let outcome = reconciler.reconcile(current).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server: MysqlServer = store.stored(TEST_NAMESPACE, TEST_SERVER_NAME).unwrap();
        assert!(message(&server, CONDITION_TYPE_SYNCED)
            .starts_with(&format!("cannot get provider {TEST_NAMESPACE}/{TEST_PROVIDER_NAME}")));
        assert!(api.calls().is_empty());
    }

    // ========== Creation ==========

    #[tokio::test]
    async fn test_second_pass_starts_creation() {
        let h = Harness::new(mysql_server());
        h.pass().await;

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        let operation = server.running_operation().expect("operation should be stored");
        assert_eq!(operation.operation_type(), Some(OperationType::CreateServer));
        assert_eq!(operation.token_bytes().unwrap(), b"token-1");
        assert_eq!(reason(&server, CONDITION_TYPE_READY).as_deref(), Some(REASON_CREATING));
        assert_eq!(
            reason(&server, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_SUCCESS)
        );
        assert_eq!(h.api.calls(), vec!["get_server", "create_server_begin"]);
    }

    #[tokio::test]
    async fn test_creation_publishes_generated_password() {
        let h = Harness::new(with_finalizer(mysql_server()));

        h.pass().await;

        let passwords = h.api.passwords();
        assert_eq!(passwords.len(), 1);
        assert_eq!(passwords[0].len(), PASSWORD_LEN);
        assert!(passwords[0].chars().all(|c| c.is_ascii_alphanumeric()));

        let secret = h.secret().expect("connection secret should exist");
        assert_eq!(secret_value(&secret, "password"), Some(passwords[0].clone()));
        assert_eq!(
            secret_value(&secret, "username"),
            Some(format!("{TEST_ADMIN_LOGIN}@{TEST_SERVER_NAME}"))
        );
        let owners = secret.metadata.owner_references.unwrap();
        assert_eq!(owners[0].uid, TEST_UID);
    }

    #[tokio::test]
    async fn test_failed_create_begin_keeps_password_for_retry() {
        let h = Harness::new(with_finalizer(mysql_server()));
        h.api.create_server_begin.set(|| Err(azure_boom()));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        assert!(server.running_operation().is_none());
        assert_eq!(
            reason(&server, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_ERROR)
        );
        assert!(message(&server, CONDITION_TYPE_SYNCED)
            .starts_with("failed to start create operation for SQL Server instance cool-server"));

        h.api.create_server_begin.set(|| Ok(b"token-1".to_vec()));
        h.pass().await;

        let passwords = h.api.passwords();
        assert_eq!(passwords.len(), 2);
        assert_eq!(passwords[0], passwords[1], "the stored password is reused");
        assert_eq!(
            secret_value(&h.secret().unwrap(), "password"),
            Some(passwords[0].clone())
        );
        assert!(h.current().running_operation().is_some());
    }

    #[tokio::test]
    async fn test_consistency_wait_gives_up() {
        let h = Harness::new(with_finalizer(mysql_server()));
        h.store.fail_updates(true);

        let err = h
            .reconciler
            .reconcile(h.current())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("was started but could not be recorded"));
        assert_eq!(h.api.count("create_server_begin"), 1, "creation is not retried in the pass");
        assert!(h.store.update_count() > 1);
    }

    // ========== Running operations ==========

    #[tokio::test]
    async fn test_third_pass_clears_token_on_success() {
        let h = Harness::new(mysql_server());
        h.pass().await;
        h.pass().await;

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        assert!(server.running_operation().is_none());
        assert_eq!(
            reason(&server, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_SUCCESS)
        );
        assert_eq!(
            h.api.calls(),
            vec!["get_server", "create_server_begin", "create_server_end:token-1"]
        );
    }

    #[tokio::test]
    async fn test_running_operation_is_polled_instead_of_creating() {
        let h = Harness::new(with_running_operation(
            with_finalizer(mysql_server()),
            "createServer",
            "dG9rZW4tMQ==",
        ));
        h.api.create_server_end.set(|| Ok(OperationState::InProgress));

        for _ in 0..3 {
            assert_eq!(h.pass().await, ReconcileOutcome::requeue());
        }

        assert_eq!(h.api.count("create_server_end:token-1"), 3);
        assert_eq!(h.api.count("get_server"), 0);
        assert_eq!(h.api.count("create_server_begin"), 0);
    }

    #[tokio::test]
    async fn test_in_progress_operation_is_not_written() {
        let h = Harness::new(with_running_operation(
            with_finalizer(mysql_server()),
            "createServer",
            "dG9rZW4tMQ==",
        ));
        h.api.create_server_end.set(|| Ok(OperationState::InProgress));

        h.pass().await;

        assert_eq!(h.store.update_count(), 0);
        assert!(h.current().running_operation().is_some());
    }

    #[tokio::test]
    async fn test_resolved_failure_clears_token() {
        let h = Harness::new(with_running_operation(
            with_finalizer(mysql_server()),
            "createServer",
            "dG9rZW4tMQ==",
        ));
        h.api
            .create_server_end
            .set(|| Ok(OperationState::Failed("QuotaExceeded: no more servers".to_string())));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        assert!(server.running_operation().is_none());
        assert_eq!(
            reason(&server, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_ERROR)
        );
        assert!(message(&server, CONDITION_TYPE_SYNCED).contains("QuotaExceeded: no more servers"));

        h.pass().await;
        assert_eq!(
            h.api.count("create_server_begin"),
            1,
            "a failed creation falls back to starting a new one"
        );
    }

    #[tokio::test]
    async fn test_transient_poll_error_keeps_token() {
        let h = Harness::new(with_running_operation(
            with_finalizer(mysql_server()),
            "createServer",
            "dG9rZW4tMQ==",
        ));
        h.api.create_server_end.set(|| {
            Err(AzureError::Transport {
                url: "https://management.azure.com/".to_string(),
                reason: "connection reset".to_string(),
            })
        });

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        let operation = server.running_operation().expect("token is kept");
        assert_eq!(operation.token_bytes().unwrap(), b"token-1");
        assert_eq!(
            reason(&server, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_ERROR)
        );
        assert!(message(&server, CONDITION_TYPE_SYNCED).contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unknown_operation_type_fails() {
        let h = Harness::new(with_running_operation(
            with_finalizer(mysql_server()),
            "dropEverything",
            "dG9rZW4tMQ==",
        ));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let server = h.current();
        assert!(server.running_operation().is_some());
        assert_eq!(
            message(&server, CONDITION_TYPE_SYNCED),
            "unknown running operation type for SQL Server instance cool-server: dropEverything"
        );
        assert!(h.api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_token_fails() {
        let h = Harness::new(with_running_operation(
            with_finalizer(mysql_server()),
            "createServer",
            "!!not base64!!",
        ));

        h.pass().await;

        let server = h.current();
        assert_eq!(
            reason(&server, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_ERROR)
        );
        assert!(message(&server, CONDITION_TYPE_SYNCED).starts_with("invalid createServer operation token"));
        assert!(h.api.calls().is_empty());
    }

    // ========== Observation ==========

    #[tokio::test]
    async fn test_fourth_pass_ready_server_is_available() {
        let h = Harness::new(mysql_server());
        h.pass().await;
        h.pass().await;
        h.pass().await;
        h.api.get_server.set(|| Ok(server("Ready")));

        let outcome = h.pass().await;

        assert!(!outcome.requeue);
        assert_eq!(outcome.requeue_after, Some(LONG_WAIT));

        let current = h.current();
        let status = current.status.clone().unwrap();
        assert_eq!(status.state.as_deref(), Some("Ready"));
        assert_eq!(status.endpoint.as_deref(), Some(TEST_ENDPOINT));
        assert_eq!(status.provider_id.as_deref(), Some(TEST_SERVER_ID));
        assert_eq!(
            status.message.as_deref(),
            Some("SQL Server instance cool-server is ready")
        );
        assert_eq!(reason(&current, CONDITION_TYPE_READY).as_deref(), Some(REASON_AVAILABLE));
        assert_eq!(
            reason(&current, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_SUCCESS)
        );

        let secret = h.secret().unwrap();
        assert_eq!(secret_value(&secret, "endpoint").as_deref(), Some(TEST_ENDPOINT));
        assert_eq!(
            secret_value(&secret, "password"),
            h.api.passwords().first().cloned(),
            "the generated password survives publishing the endpoint"
        );
    }

    #[tokio::test]
    async fn test_not_ready_server_requeues() {
        let h = Harness::new(with_finalizer(mysql_server()));
        h.api.get_server.set(|| Ok(server("Disabled")));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let current = h.current();
        let status = current.status.clone().unwrap();
        assert_eq!(
            status.message.as_deref(),
            Some("SQL Server instance cool-server is Disabled")
        );
        assert_eq!(
            reason(&current, CONDITION_TYPE_READY).as_deref(),
            Some(REASON_UNAVAILABLE)
        );
        assert_eq!(h.api.count(&format!("get_firewall_rule:{FIREWALL_RULE_NAME}")), 0);
        assert!(h.secret().is_none());
    }

    #[tokio::test]
    async fn test_get_server_error_fails() {
        let h = Harness::new(with_finalizer(mysql_server()));
        h.api.get_server.set(|| Err(azure_boom()));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let current = h.current();
        assert!(message(&current, CONDITION_TYPE_SYNCED)
            .starts_with("failed to get SQL Server instance cool-server"));
        assert_eq!(h.api.count("create_server_begin"), 0);
    }

    #[tokio::test]
    async fn test_missing_firewall_rule_is_created_before_publishing() {
        let h = Harness::new(with_finalizer(mysql_server()));
        h.api.get_server.set(|| Ok(server("Ready")));
        h.api.get_firewall_rule.set(|| Err(azure_not_found()));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let operation = h.current().running_operation().cloned().unwrap();
        assert_eq!(operation.operation_type(), Some(OperationType::CreateFirewallRules));
        assert_eq!(operation.token_bytes().unwrap(), b"token-2");
        assert_eq!(
            h.api.count(&format!("create_firewall_rules_begin:{FIREWALL_RULE_NAME}")),
            1
        );
        assert!(h.secret().is_none());

        h.api.get_firewall_rule.set(|| {
            Ok(FirewallRule {
                name: FIREWALL_RULE_NAME.to_string(),
                ..Default::default()
            })
        });
        assert_eq!(h.pass().await, ReconcileOutcome::requeue());
        assert_eq!(h.api.count("create_firewall_rules_end:token-2"), 1);
        assert!(h.current().running_operation().is_none());

        assert_eq!(h.pass().await, ReconcileOutcome::requeue_after(LONG_WAIT));
        assert!(h.secret().is_some());
    }

    // ========== Deletion ==========

    #[tokio::test]
    async fn test_deletion_of_missing_server() {
        let h = Harness::new(being_deleted(mysql_server()));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::done());
        let current = h.current();
        assert_eq!(
            current.metadata.finalizers,
            Some(vec![TEST_OTHER_FINALIZER.to_string()])
        );
        assert_eq!(reason(&current, CONDITION_TYPE_READY).as_deref(), Some(REASON_DELETING));
        assert_eq!(
            reason(&current, CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_SUCCESS)
        );
        assert_eq!(h.api.count("delete_server"), 0);
    }

    #[tokio::test]
    async fn test_deletion_of_existing_server() {
        let h = Harness::new(being_deleted(mysql_server()));
        h.api.get_server.set(|| Ok(server("Ready")));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::done());
        assert_eq!(h.api.count("delete_server"), 1);
        assert_eq!(
            h.current().metadata.finalizers,
            Some(vec![TEST_OTHER_FINALIZER.to_string()])
        );
    }

    #[tokio::test]
    async fn test_deletion_failure_keeps_finalizer() {
        let h = Harness::new(being_deleted(mysql_server()));
        h.api.get_server.set(|| Ok(server("Ready")));
        h.api.delete_server.set(|| Err(azure_boom()));

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::requeue());
        let current = h.current();
        assert!(current
            .metadata
            .finalizers
            .clone()
            .unwrap_or_default()
            .contains(&FINALIZER_MYSQL_SERVER.to_string()));
        assert_eq!(reason(&current, CONDITION_TYPE_READY).as_deref(), Some(REASON_DELETING));
        assert_eq!(
            reason(&h.current(), CONDITION_TYPE_SYNCED).as_deref(),
            Some(REASON_RECONCILE_ERROR)
        );
    }

    #[tokio::test]
    async fn test_deletion_wins_over_running_operation() {
        let h = Harness::new(with_running_operation(
            being_deleted(mysql_server()),
            "createServer",
            "dG9rZW4tMQ==",
        ));

        h.pass().await;

        assert_eq!(h.api.count("create_server_end:token-1"), 0);
        assert_eq!(h.api.count("get_server"), 1);
    }

    #[tokio::test]
    async fn test_last_finalizer_release_removes_object() {
        let mut server = being_deleted(mysql_server());
        server.metadata.finalizers = Some(vec![FINALIZER_MYSQL_SERVER.to_string()]);
        let h = Harness::new(server);

        let outcome = h.pass().await;

        assert_eq!(outcome, ReconcileOutcome::done());
        assert!(h
            .store
            .stored::<MysqlServer>(TEST_NAMESPACE, TEST_SERVER_NAME)
            .is_none());
    }

    // ========== PostgreSQL ==========

    #[tokio::test]
    async fn test_postgresql_server_uses_its_vendor_and_finalizer() {
        let store = Arc::new(MemoryStore::new());
        store.insert(&provider());
        store.insert(&provider_secret());

        let mut server = PostgresqlServer::new(
            TEST_SERVER_NAME,
            PostgresqlServerSpec {
                provider_ref: ProviderReference {
                    name: TEST_PROVIDER_NAME.to_string(),
                    namespace: None,
                },
                write_connection_secret_to_ref: None,
                parameters: sql_parameters(),
            },
        );
        server.metadata.namespace = Some(TEST_NAMESPACE.to_string());
        let server = store.insert(&server);

        let api = Arc::new(MockSqlServerApi::default());
        let factory = Arc::new(MockFactory {
            api,
            fail: false,
            requests: Mutex::new(Vec::new()),
        });
        let reconciler: SqlServerReconciler<PostgresqlServer, MemoryStore> =
            SqlServerReconciler::new(store.clone(), factory.clone());

        reconciler.reconcile(server).await.unwrap();

        let stored: PostgresqlServer = store.stored(TEST_NAMESPACE, TEST_SERVER_NAME).unwrap();
        assert_eq!(
            stored.metadata.finalizers,
            Some(vec![FINALIZER_POSTGRESQL_SERVER.to_string()])
        );
        assert_eq!(factory.requests.lock().unwrap()[0].0, SqlVendor::Postgresql);
    }
}
