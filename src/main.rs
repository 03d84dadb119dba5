//! Storefront order service

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use storefront::api::{self, AppState};
use storefront::auth::Authenticator;
use storefront::config::Config;
use storefront::ledger::{spawn_stale_sweeper, OrderLedger};
use storefront::notify::{EventPublisher, NatsPublisher, TracingPublisher};
use storefront::payments::{PaymentBridge, StripeClient};
use storefront::reconciler::WebhookReconciler;
use storefront::store::{Catalog, MemoryCatalog, MemoryOrderStore, OrderStore, PgCatalog, PgOrderStore};
use storefront::tracking::TrackingReader;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())).with(tracing_subscriber::fmt::layer()).init();
    let config = Config::from_env()?;

    let (catalog, orders): (Arc<dyn Catalog>, Arc<dyn OrderStore>) = match &config.database_url {
        Some(url) => {
            let db = PgPoolOptions::new().max_connections(10).connect(url).await?;
            sqlx::migrate!("./migrations").run(&db).await?;
            (Arc::new(PgCatalog::new(db.clone())), Arc::new(PgOrderStore::new(db)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory and lost on restart");
            (Arc::new(MemoryCatalog::new()), Arc::new(MemoryOrderStore::new()))
        }
    };

    let publisher: Arc<dyn EventPublisher> = match &config.nats_url {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Arc::new(NatsPublisher::new(client)),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, order events are only logged");
                Arc::new(TracingPublisher)
            }
        },
        None => Arc::new(TracingPublisher),
    };

    let ledger = Arc::new(OrderLedger::new(catalog.clone(), orders.clone(), publisher, config.currency.clone()));
    let (payments, reconciler) = match &config.payments {
        Some(p) => (
            Some(Arc::new(PaymentBridge::new(Arc::new(StripeClient::new(p.secret_key.clone(), p.api_base.clone())), p.timeout))),
            Some(Arc::new(WebhookReconciler::new(ledger.clone(), p.webhook_secret.clone(), p.webhook_tolerance_secs))),
        ),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY or STRIPE_WEBHOOK_SECRET not set, payment routes are disabled");
            (None, None)
        }
    };
    if config.jwt_secret.is_none() {
        tracing::warn!("JWT_SECRET not set, authenticated routes will answer 401");
    }

    if let Some(sweep) = &config.stale_sweep {
        tracing::info!(max_age_hours = sweep.max_age.num_hours(), every_secs = sweep.every.as_secs(), "stale order sweeper enabled");
        spawn_stale_sweeper(ledger.clone(), sweep.max_age, sweep.every);
    }

    let state = AppState {
        tracking: Arc::new(TrackingReader::new(orders, catalog)),
        auth: Arc::new(Authenticator::new(config.jwt_secret.clone())),
        ledger,
        payments,
        reconciler,
    };

    let addr = config.bind_addr();
    tracing::info!("🚀 Storefront listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, api::router(state)).await?;
    Ok(())
}
