// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use kube::Client;
use stack_azure::{
    azure::sql::ArmSqlServerApiFactory,
    constants::{DEFAULT_METRICS_BIND_ADDRESS, TOKIO_WORKER_THREADS},
    controller::{run_managed_controller, run_redis_controller, run_sql_server_controller},
    crd::{MysqlServer, MysqlServerVirtualNetworkRule, PostgresqlServer, VirtualNetwork},
    reconcilers::{
        virtual_network::new_virtual_network_client,
        virtual_network_rule::new_mysql_virtual_network_rule_client, ManagedReconciler,
        ProviderConnecter, ProviderRedisConnecter, RedisReconciler, SqlServerReconciler,
    },
    server::{start_server, ServerState},
    store::KubeStore,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Kubernetes operator managing Azure MySQL, PostgreSQL, Redis and networking resources.
#[derive(Debug, Parser)]
#[command(name = "stack-azure", version, about)]
struct Args {
    /// Only watch resources in this namespace (all namespaces if unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Address of the metrics and health check server
    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    metrics_bind_address: String,

    /// Number of Tokio worker threads
    #[arg(long, env = "WORKER_THREADS", default_value_t = TOKIO_WORKER_THREADS)]
    worker_threads: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.worker_threads)
        .thread_name("stack-azure-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_tracing() {
    // Respects RUST_LOG if set, otherwise defaults to INFO level.
    // RUST_LOG_FORMAT=json switches to JSON output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: Args) -> Result<()> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = ?args.watch_namespace,
        "Starting Azure resource operator"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let store = Arc::new(KubeStore::new(client.clone()));
    let factory = Arc::new(ArmSqlServerApiFactory);
    let mysql = Arc::new(SqlServerReconciler::<MysqlServer, _>::new(
        store.clone(),
        factory.clone(),
    ));
    let postgresql = Arc::new(SqlServerReconciler::<PostgresqlServer, _>::new(
        store.clone(),
        factory,
    ));
    let redis = Arc::new(RedisReconciler::new(
        store.clone(),
        Arc::new(ProviderRedisConnecter::new(store.clone())),
    ));
    let vnet = Arc::new(ManagedReconciler::<VirtualNetwork, _>::new(
        store.clone(),
        Arc::new(ProviderConnecter::new(store.clone(), new_virtual_network_client)),
    ));
    let vnet_rule = Arc::new(ManagedReconciler::<MysqlServerVirtualNetworkRule, _>::new(
        store.clone(),
        Arc::new(ProviderConnecter::new(
            store,
            new_mysql_virtual_network_rule_client,
        )),
    ));

    let state = Arc::new(ServerState::new());
    state.set_ready(true);

    info!("Starting all controllers");

    // Controllers should never exit - if one does, log it and exit the process
    tokio::select! {
        result = start_server(&args.metrics_bind_address, state.clone()) => {
            error!("CRITICAL: HTTP server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("HTTP server exited unexpectedly without error")
        }
        result = run_sql_server_controller(client.clone(), mysql, args.watch_namespace.clone()) => {
            error!("CRITICAL: MysqlServer controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("MysqlServer controller exited unexpectedly without error")
        }
        result = run_sql_server_controller(client.clone(), postgresql, args.watch_namespace.clone()) => {
            error!("CRITICAL: PostgresqlServer controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("PostgresqlServer controller exited unexpectedly without error")
        }
        result = run_redis_controller(client.clone(), redis, args.watch_namespace.clone()) => {
            error!("CRITICAL: Redis controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Redis controller exited unexpectedly without error")
        }
        result = run_managed_controller(client.clone(), vnet, args.watch_namespace.clone()) => {
            error!("CRITICAL: VirtualNetwork controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("VirtualNetwork controller exited unexpectedly without error")
        }
        result = run_managed_controller(client, vnet_rule, args.watch_namespace.clone()) => {
            error!("CRITICAL: MysqlServerVirtualNetworkRule controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("MysqlServerVirtualNetworkRule controller exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            state.set_ready(false);
            info!("Received shutdown signal, stopping controllers");
            Ok(())
        }
    }
}
