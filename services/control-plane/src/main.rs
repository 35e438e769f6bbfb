//! vdesk Control Plane
//!
//! The control plane is the coordination service for the desktop platform.
//! It provides the REST API for instance and entitlement operations and
//! runs the notification consumer that fans instance state changes out to
//! live client streams.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vdesk_control_plane::{
    api,
    cloud::{CatalogStore, EntitlementGrant, LocalCloud, MachineDef},
    config,
    notify::{NotifierConfig, NotifierHandle, SubscriptionRegistry},
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to VDESK_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting vdesk control plane");
    info!(listen_addr = %config.listen_addr, topic = %config.event_topic, "Configuration loaded");

    // Cloud adapters are wired by deployment; this build ships the local
    // in-process backend for development.
    if !config.dev_mode {
        anyhow::bail!(
            "no cloud backend is configured in this build; set VDESK_DEV=1 to use the local backend"
        );
    }
    let cloud = Arc::new(LocalCloud::new(config.event_topic.clone()));
    seed_dev_catalog(&cloud).await;

    let notifier_config = NotifierConfig::default();
    let registry = Arc::new(SubscriptionRegistry::new(notifier_config.subscriber_capacity));

    // Provision the notification queue and start the consumer
    let notifier = match NotifierHandle::start(
        cloud.clone(),
        cloud.clone(),
        registry.clone(),
        &config.event_topic,
        notifier_config,
    )
    .await
    {
        Ok(notifier) => notifier,
        Err(e) => {
            error!(error = %e, "Failed to provision notification queue");
            return Err(e.into());
        }
    };

    // Pre-cache the group→role mapping
    let role_map = match cloud.group_role_map().await {
        Ok(role_map) => role_map,
        Err(e) => {
            error!(error = %e, "Failed to load group/role map");
            notifier.shutdown().await;
            return Err(e.into());
        }
    };

    // Create application state
    let state = AppState::new(
        registry,
        cloud.clone(),
        cloud.clone(),
        cloud.clone(),
        role_map,
        notifier.status(),
    );

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to the HTTP server, then stop the consumer and tear
    // down the queue/subscription pair
    let _ = shutdown_tx.send(true);
    notifier.shutdown().await;

    info!("Control plane shutdown complete");
    Ok(())
}

/// Seed the local backend with a minimal catalog so dev mode is usable
/// out of the box.
async fn seed_dev_catalog(cloud: &LocalCloud) {
    cloud
        .seed_group("vdesk-users", vec!["desktop-user".to_string()])
        .await;
    cloud
        .seed_entitlement(
            "desktop-user",
            EntitlementGrant {
                machine_def_id: "dev-basic".to_string(),
                machine_count: 2,
            },
        )
        .await;
    cloud
        .seed_machine_def(MachineDef {
            machine_def_id: "dev-basic".to_string(),
            ami_id: "ami-0devbasic".to_string(),
            instance_type: "t3.large".to_string(),
            user_data: String::new(),
        })
        .await;
    info!("Seeded local dev catalog");
}
