//! OpenSASE Catalog - product aggregate writer service

use anyhow::Result;
use opensase_catalog::{
    config::Config,
    http,
    notify::NatsNotifier,
    store::{memory::InMemoryStore, postgres::PgStore},
    ProductWriter,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let notifier = match &config.nats_url {
        Some(url) => match async_nats::connect(url.as_str()).await {
            Ok(client) => NatsNotifier::new(client, config.subject_prefix.as_str()),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, catalog events disabled");
                NatsNotifier::disabled()
            }
        },
        None => NatsNotifier::disabled(),
    };

    let app = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, config.database_max_connections).await?;
            sqlx::migrate!("./migrations").run(store.pool()).await?;
            http::router(ProductWriter::new(store, notifier))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, products are kept in memory");
            http::router(ProductWriter::new(InMemoryStore::new(), notifier))
        }
    };
    let app = app.layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    let addr = config.listen_addr();
    tracing::info!("🚀 OpenSASE Catalog listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app).await?;
    Ok(())
}
