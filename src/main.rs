//! Dunning engine server.
//!
//! Serves the webhook and operator API and runs the retry scheduler in the
//! same process. All clients are built here and passed down explicitly.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use dunning_engine::adapters::email::{ResendConfig, ResendNotificationSender};
use dunning_engine::adapters::http::{dunning_router, DunningAppState};
use dunning_engine::adapters::postgres::{
    PostgresDunningStore, PostgresNotificationLedger, PostgresPaymentEventLedger,
};
use dunning_engine::adapters::stripe::{StripeConfig, StripePaymentAdapter};
use dunning_engine::adapters::RetryScheduler;
use dunning_engine::application::{DunningEngine, NotificationDispatcher, WebhookIngestionGateway};
use dunning_engine::config::{AppConfig, ConfigError, ValidationError};
use dunning_engine::domain::webhook::WebhookVerifier;
use dunning_engine::ports::{
    DunningStore, NotificationLedger, NotificationSender, PaymentEventLedger,
    PaymentProviderClient,
};

/// Anything that stops the process from starting or serving.
#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    InvalidConfig(#[from] ValidationError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    tracing::info!(
        environment = ?config.server.environment,
        stripe_test_mode = config.payment.is_test_mode(),
        max_attempts = config.dunning.max_attempts,
        "Starting dunning engine"
    );

    let connect_options = PgConnectOptions::from_str(&config.database.url)?.options([(
        "statement_timeout",
        config.database.statement_timeout().as_millis().to_string(),
    )]);
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .connect_with(connect_options)
        .await?;
    tracing::info!(database = %config.database.redacted_url(), "Connected to database");

    if config.database.run_migrations {
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
    }

    let store: Arc<dyn DunningStore> = Arc::new(PostgresDunningStore::new(pool.clone()));
    let event_ledger: Arc<dyn PaymentEventLedger> =
        Arc::new(PostgresPaymentEventLedger::new(pool.clone()));
    let notification_ledger: Arc<dyn NotificationLedger> =
        Arc::new(PostgresNotificationLedger::new(pool));

    let provider: Arc<dyn PaymentProviderClient> = Arc::new(StripePaymentAdapter::new(
        StripeConfig::new(config.payment.stripe_api_key.clone())
            .with_base_url(config.payment.api_base_url.clone())
            .with_timeout(config.payment.charge_timeout()),
    ));
    let sender: Arc<dyn NotificationSender> = Arc::new(ResendNotificationSender::new(
        ResendConfig::new(
            config.email.resend_api_key.clone(),
            config.email.from_header(),
        )
        .with_reply_to(config.email.reply_to.clone())
        .with_timeout(config.email.send_timeout()),
    ));

    let notifications =
        NotificationDispatcher::new(notification_ledger, sender, config.email.send_timeout());
    let engine = Arc::new(DunningEngine::new(
        store.clone(),
        provider,
        notifications,
        config.dunning.to_policy()?,
        config
            .dunning
            .engine_settings(config.payment.charge_timeout()),
    ));
    let verifier = WebhookVerifier::new(config.payment.stripe_webhook_secret.clone())
        .with_tolerance_secs(config.payment.webhook_tolerance_secs);
    let gateway = Arc::new(WebhookIngestionGateway::new(
        verifier,
        event_ledger.clone(),
        engine.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = RetryScheduler::new(
        engine.clone(),
        gateway.clone(),
        store,
        event_ledger,
        config.dunning.scheduler_config(),
    );
    let scheduler_handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let app = dunning_router(
        DunningAppState {
            engine: engine.clone(),
            gateway,
        },
        config.server.request_timeout(),
    );
    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_handle.await {
        tracing::error!(error = %e, "Retry scheduler task failed");
    }
    engine.flush_notifications().await;
    tracing::info!("Dunning engine stopped");

    served.map_err(StartupError::from)
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.is_production() {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl-C, shutting down"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}
