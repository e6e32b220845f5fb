//! Copydesk billing server.
//!
//! Loads configuration, connects PostgreSQL, wires the Stripe and HubSpot
//! adapters, starts the reconciliation sweeper and serves the API until
//! Ctrl-C or SIGTERM.

use std::sync::Arc;

use http::{HeaderValue, Method};
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use copydesk::adapters::http::{api_router, BillingAppState, JwtVerifier};
use copydesk::adapters::hubspot::{HubSpotClient, HubSpotConfig};
use copydesk::adapters::postgres::{
    connect, run_migrations, PostgresLedgerStore, PostgresWebhookEventRepository,
};
use copydesk::adapters::stripe::{StripeConfig, StripePaymentAdapter};
use copydesk::application::{
    CheckoutSettings, CrmSynchronizer, EventApplier, ReconciliationSweeper, WebhookIngress,
    WebhookSecrets,
};
use copydesk::config::{AppConfig, ConfigError, ValidationError};
use copydesk::ports::{CrmError, LedgerStore, PaymentError, PaymentProvider};

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Stripe client setup failed: {0}")]
    Payment(#[from] PaymentError),

    #[error("HubSpot client setup failed: {0}")]
    Crm(#[from] CrmError),

    #[error("Server error: {0}")]
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
        "Starting Copydesk billing server"
    );

    // Persistence
    let pool = connect(&config.database).await?;
    if config.database.run_migrations {
        run_migrations(&pool).await?;
    }
    let ledger: Arc<dyn LedgerStore> = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let events = Arc::new(PostgresWebhookEventRepository::new(pool));

    // Remote services
    let payments: Arc<dyn PaymentProvider> = Arc::new(StripePaymentAdapter::new(
        StripeConfig::new(SecretString::new(config.payment.stripe_api_key.clone()))
            .with_timeout(config.payment.timeout()),
    )?);
    let crm_client = HubSpotClient::new(
        HubSpotConfig::new(SecretString::new(config.crm.hubspot_access_token.clone()))
            .with_base_url(config.crm.hubspot_base_url.clone())
            .with_timeout(config.crm.timeout()),
    )?;
    let crm = Arc::new(
        CrmSynchronizer::new(Arc::new(crm_client), ledger.clone())
            .with_pipeline(config.crm.pipeline.clone()),
    );

    // Lifecycle
    let applier = Arc::new(EventApplier::new(ledger.clone(), payments.clone(), crm.clone()));
    let ingress = WebhookIngress::new(
        WebhookSecrets::from_config(&config.payment),
        events.clone(),
        applier,
    )
    .with_require_livemode(config.payment.require_livemode);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = if config.sweeper.enabled {
        let sweeper = ReconciliationSweeper::new(crm, events, config.sweeper.clone());
        Some(tokio::spawn(async move { sweeper.run(shutdown_rx).await }))
    } else {
        tracing::info!("Reconciliation sweeper disabled");
        None
    };

    // HTTP
    let state = BillingAppState {
        ledger,
        payment_provider: payments,
        ingress: Arc::new(ingress),
        checkout: CheckoutSettings {
            price_id: config.payment.price_id.clone(),
            success_url: config.payment.success_url(),
            cancel_url: config.payment.cancel_url(),
        },
    };
    let app = api_router(state, Arc::new(JwtVerifier::new(&config.auth)))
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .layer(cors_layer(&config.server.cors_origins_list()))
        .layer(TraceLayer::new_for_http());

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(task) = sweeper_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Sweeper task ended abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// JSON logs in production, human-readable otherwise. `RUST_LOG` overrides
/// the configured level.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
