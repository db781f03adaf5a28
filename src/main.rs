use std::{sync::Arc, time::Duration};

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use dotenvy::dotenv;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pushhub_server::{
    config::Config,
    db::{cleanup_expired, init_db, open_db},
    handlers::{
        add_organization, config as config_handler, health, register, remove_organization, send,
        unregister,
    },
    hub::HubConnectionPool,
    push::{EngineOptions, PushEngine},
    state::AppState,
    webpush::{VapidSigner, WebPushSender},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = Arc::new(Config::from_env()?);
    let db = Arc::new(open_db(&cfg.db_path)?);
    init_db(&db)?;

    let timeout = Duration::from_millis(cfg.push_timeout_ms);
    let pool = HubConnectionPool::new(&cfg.notification_hubs, timeout);
    if pool.is_empty() {
        warn!("no notification hubs configured; native devices will not receive pushes");
    }

    let web_push = match (&cfg.vapid_private_key, &cfg.vapid_public_key) {
        (Some(private_key), Some(public_key)) => {
            let signer = VapidSigner::new(private_key, public_key, &cfg.vapid_subject)?;
            Some(WebPushSender::new(signer, cfg.push_ttl_seconds, timeout)?)
        }
        _ => {
            warn!("VAPID keys not configured; web push is disabled");
            None
        }
    };

    let engine = PushEngine::new(
        pool,
        web_push,
        db.clone(),
        EngineOptions {
            android_family: cfg.android_template_family,
            default_installation_id: cfg.installation_id,
            enable_send_tracing: cfg.enable_send_tracing,
            allowed_push_hosts: cfg.allowed_push_hosts.clone(),
            max_payload_bytes: cfg.max_payload_bytes,
            allow_http_endpoints: false,
        },
    );
    let state = AppState {
        engine: Arc::new(engine),
    };

    // Background cleanup for stale web push registrations.
    if cfg.registration_ttl_days > 0 {
        let db_clone = db.clone();
        let ttl_days = cfg.registration_ttl_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                match cleanup_expired(&db_clone, ttl_days) {
                    Ok(0) => {}
                    Ok(removed) => info!("removed {removed} stale web push registrations"),
                    Err(err) => error!("cleanup failed: {err}"),
                }
            }
        });
    }

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/config", get(config_handler))
        .route(
            "/push/register",
            put(register).layer(DefaultBodyLimit::max(16 * 1024)),
        )
        .route("/push/organizations/add", put(add_organization))
        .route("/push/organizations/remove", put(remove_organization))
        .route("/push/send", post(send))
        .route("/push/:device_id", delete(unregister))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!("listening on {}", cfg.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
