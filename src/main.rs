use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use log::{info, warn};
use tokio::sync::watch;

use festbot::channels::{MessagingPort, TelegramAdapter};
use festbot::config::AppConfig;
use festbot::notify::{NotificationDispatcher, NotificationQueue};
use festbot::policy::UserPolicy;
use festbot::shared::state::AppState;
use festbot::shared::utils::{create_conn, run_migrations};
use festbot::tickets::{
    EscalationMonitor, MessageRouter, PgTicketStore, ThreadRegistry, TicketStore,
};
use festbot::{stats, webhook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = AppConfig::from_env()?;

    let pool = create_conn(&config.database_url)?;
    run_migrations(&pool).map_err(|e| anyhow::anyhow!("Failed to run migrations: {e}"))?;
    info!("Database ready");

    let store: Arc<dyn TicketStore> = Arc::new(PgTicketStore::new(pool));

    let registry = Arc::new(ThreadRegistry::new());
    match registry.rebuild(store.as_ref()) {
        Ok(count) => info!("Thread registry primed with {} open tickets", count),
        Err(e) => warn!("Could not prime thread registry: {e}; it will rebuild lazily"),
    }

    let adapter = Arc::new(TelegramAdapter::new(&config.telegram));
    match adapter.get_me().await {
        Ok(me) => info!(
            "Authorized as @{}",
            me.get("username").and_then(|v| v.as_str()).unwrap_or("unknown")
        ),
        Err(e) => warn!("Could not verify bot credentials: {e}"),
    }
    if let Some(url) = &config.telegram.webhook_url {
        if let Err(e) = adapter.set_webhook(url).await {
            warn!("Failed to register webhook: {e}");
        }
    }
    let messaging: Arc<dyn MessagingPort> = adapter;

    let policy = Arc::new(UserPolicy::new(&config.rate_limit));
    let notifications = Arc::new(NotificationQueue::new(
        config.support.notification_queue_capacity,
    ));
    let router = Arc::new(MessageRouter::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&messaging),
        Arc::clone(&policy),
        Arc::clone(&notifications),
        config.support.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let dispatcher = NotificationDispatcher::new(
        Arc::clone(&notifications),
        Arc::clone(&messaging),
        config.email.clone(),
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    let monitor = EscalationMonitor::new(
        Arc::clone(&store),
        Arc::clone(&notifications),
        config.support.clone(),
    );
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        registry,
        router,
        policy,
        messaging,
        notifications,
    });

    let app = Router::new()
        .merge(webhook::configure())
        .merge(stats::configure())
        .with_state(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received; finishing in-flight requests");
        })
        .await?;

    shutdown_tx.send(true).ok();
    dispatcher_handle.await.ok();
    monitor_handle.await.ok();
    info!("Shutdown complete");
    Ok(())
}
