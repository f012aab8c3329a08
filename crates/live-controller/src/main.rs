//! Live Controller
//!
//! Entry point for the Live Stage controller: stage leasing, live session
//! registry and co-host invites behind a small HTTP API.

use live_controller::actors::{RegistryConfig, SessionRegistry};
use live_controller::config::Config;
use live_controller::observability::metrics::init_metrics_recorder;
use live_controller::repositories::{PersistentStore, PgStore};
use live_controller::routes::{self, AppState};
use live_controller::services::notifier::spawn_redis_forwarder;
use live_controller::services::{
    BroadcastNotifier, HttpMediaTransport, InviteConfig, InviteLedger, MediaTransport,
    StageCoordinator,
};
use live_controller::tasks::{
    start_invite_cleanup, start_lease_cleanup, start_lease_unbinder, InviteCleanupConfig,
    LeaseCleanupConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "live_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Live Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        media_transport_url = %config.media_transport_url,
        session_ttl_seconds = config.session_ttl_seconds,
        participant_grace_seconds = config.participant_grace_seconds,
        lease_max_age_hours = config.lease_max_age_hours,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&add_query_timeout(config.database_url(), 5))
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;
    info!("Database ready");

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn PersistentStore> = Arc::new(PgStore::new(db_pool));
    let media: Arc<dyn MediaTransport> = Arc::new(HttpMediaTransport::new(
        &config.media_transport_url,
        config.media_transport_api_key.clone(),
    )?);

    let notifier = BroadcastNotifier::default();
    let forwarder_task = spawn_redis_forwarder(
        config.redis_url(),
        notifier.subscribe(),
        shutdown_token.child_token(),
    )
    .await?;
    let unbind_receiver = notifier.subscribe();

    let (registry, registry_task) = SessionRegistry::spawn(
        RegistryConfig::from_config(&config),
        Arc::new(notifier),
        shutdown_token.child_token(),
    );

    let coordinator = Arc::new(StageCoordinator::new(store.clone(), media.clone()));
    let ledger = Arc::new(InviteLedger::new(
        store.clone(),
        media,
        registry.clone(),
        InviteConfig::from_config(&config),
    ));

    let lease_cleanup_task = tokio::spawn(start_lease_cleanup(
        coordinator.clone(),
        LeaseCleanupConfig::from_config(&config),
        shutdown_token.child_token(),
    ));
    let invite_cleanup_task = tokio::spawn(start_invite_cleanup(
        ledger.clone(),
        InviteCleanupConfig::from_config(&config),
        shutdown_token.child_token(),
    ));
    let lease_unbind_task = tokio::spawn(start_lease_unbinder(
        coordinator.clone(),
        unbind_receiver,
        shutdown_token.child_token(),
    ));

    let state = Arc::new(AppState {
        store,
        coordinator,
        registry,
        ledger,
    });
    let app = routes::build_routes(state, metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("Live Controller listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    // Server is down; stop the actor and every background task.
    shutdown_token.cancel();
    let (registry_result, lease_result, invite_result, unbind_result, forwarder_result) = tokio::join!(
        registry_task,
        lease_cleanup_task,
        invite_cleanup_task,
        lease_unbind_task,
        forwarder_task
    );
    for (name, result) in [
        ("registry", registry_result),
        ("lease_cleanup", lease_result),
        ("invite_cleanup", invite_result),
        ("lease_unbind", unbind_result),
        ("redis_forwarder", forwarder_result),
    ] {
        if let Err(e) = result {
            error!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    info!("Live Controller shutdown complete");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM, cancelling `shutdown_token`.
async fn shutdown_signal(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    shutdown_token.cancel();
}

/// Adds statement_timeout to the database URL.
fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
