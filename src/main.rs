use std::sync::Arc;

use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use course_gate::clock::{Clock, SystemClock};
use course_gate::config::{Config, UploadBackend};
use course_gate::engine::{Engine, EngineSettings};
use course_gate::notify::{LogNotifier, Notifier, WebhookNotifier};
use course_gate::ratelimit::{MemoryRateLimitStore, RateLimiter};
use course_gate::routes::{self, AppState};
use course_gate::store::PgStore;
use course_gate::uploads::{FileStore, HttpObjectStore, LocalFileStore};
use course_gate::db;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "course_gate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let pool = db::connect(&config.database).await?;

    let files: Arc<dyn FileStore> = match config.uploads.backend {
        UploadBackend::Local => Arc::new(LocalFileStore::new(&config.uploads.data_dir, "/files")),
        UploadBackend::Http => {
            // presence checked by Config::from_env
            let endpoint = config.uploads.endpoint.clone().context("UPLOAD_ENDPOINT must be set")?;
            let public_url = config.uploads.public_url.clone().unwrap_or_else(|| endpoint.clone());
            Arc::new(HttpObjectStore::new(endpoint, config.uploads.token.clone(), public_url))
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = Engine::new(
        Arc::new(PgStore::new(pool)),
        clock.clone(),
        notifier,
        files,
        EngineSettings { ordering: config.ordering, max_upload_bytes: config.uploads.max_bytes },
    );
    let limiter = RateLimiter::new(
        Arc::new(MemoryRateLimitStore::new()),
        clock,
        config.rate_limit.max_requests,
        config.rate_limit.window,
    );

    let app = Router::new()
        .merge(routes::router(AppState { engine: Arc::new(engine), limiter: Arc::new(limiter) }))
        // locally stored homework files
        .nest_service("/files", ServeDir::new(&config.uploads.data_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
                // multipart framing on top of the file itself
                .layer(DefaultBodyLimit::max(config.uploads.max_bytes + 64 * 1024)),
        );

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await.context("Failed to bind to address")?;
    tracing::info!(ordering = ?config.ordering, "listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
