//! ldaptoid - read-only LDAP projection of an OIDC identity provider.

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod http;

use config::Config;
use http::HttpState;
use ldaptoid_idp::IdpClient;
use ldaptoid_server::{serve, DirectoryTree, ServerContext};
use ldaptoid_snapshot::{
    seed_allocators, IdAllocator, MappingStore, RedisMappingStore, RefreshScheduler,
};

/// Bound on connection draining during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = Config::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "starting ldaptoid");

    // Startup validation: a bad IdP or suffix configuration is fatal.
    let idp_config = config.idp_config();
    let client = IdpClient::new(idp_config).context("invalid IdP configuration")?;
    let tree = DirectoryTree::new(&config.ldap_base_dn)
        .with_context(|| format!("invalid ldap base DN '{}'", config.ldap_base_dn))?;

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| anyhow::anyhow!("failed to install metrics recorder: {err}"))?;

    // Seed the allocators from the mapping store before the first build.
    let mut uid_alloc = IdAllocator::new("uid");
    let mut gid_alloc = IdAllocator::new("gid");
    let store: Option<Arc<dyn MappingStore>> = if config.mapping_store_enabled {
        match RedisMappingStore::connect(
            &config.mapping_store_host,
            config.mapping_store_port,
            config.mapping_store_password.as_deref(),
            config.mapping_store_database,
        )
        .await
        {
            Ok(store) => {
                match store.list().await {
                    Ok(records) => {
                        info!(records = records.len(), "seeding allocators from mapping store");
                        seed_allocators(&records, &mut uid_alloc, &mut gid_alloc);
                    }
                    Err(err) => warn!(%err, "mapping store listing failed, starting unseeded"),
                }
                Some(Arc::new(store))
            }
            Err(err) => {
                warn!(%err, "mapping store unreachable, running with in-memory ids only");
                None
            }
        }
    } else {
        None
    };
    let store_configured_but_down = config.mapping_store_enabled && store.is_none();

    let scheduler = Arc::new(RefreshScheduler::new(
        Arc::new(client),
        store,
        uid_alloc,
        gid_alloc,
        config.build_config(),
        config.scheduler_config(),
    ));
    let health = scheduler.health();
    if store_configured_but_down {
        health.set_degraded(true);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Refresh loop.
    let scheduler_task = {
        let scheduler = Arc::clone(&scheduler);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    // LDAP listener.
    let ldap_addr = SocketAddr::from(([0, 0, 0, 0], config.ldap_port));
    let ldap_listener = TcpListener::bind(ldap_addr)
        .await
        .with_context(|| format!("failed to bind LDAP listener on {ldap_addr}"))?;
    info!(%ldap_addr, suffix = %tree.suffix(), "LDAP endpoint configured");
    let ldap_task = {
        let context = Arc::new(ServerContext {
            config: Arc::new(config.session_config()),
            tree: Arc::new(tree),
            snapshots: Arc::clone(&scheduler) as _,
        });
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { serve(ldap_listener, context, shutdown).await })
    };

    // Health + metrics endpoint.
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let http_listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {http_addr}"))?;
    let http_task = {
        let router = http::router(HttpState {
            health,
            metrics: metrics_handle,
        });
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let server = axum::serve(http_listener, router).with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            });
            if let Err(err) = server.await {
                error!(%err, "HTTP server failed");
            }
        })
    };

    wait_for_signal().await;
    info!("shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    let drain = async {
        let _ = scheduler_task.await;
        let _ = ldap_task.await;
        let _ = http_task.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("drain deadline exceeded, exiting anyway");
    }
    info!("bye");
    Ok(())
}

/// JSON logs with `RUST_LOG`-style filtering.
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "SIGTERM handler unavailable, watching ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
