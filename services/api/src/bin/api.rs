//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{ChromiumLauncher, PgAccountStore},
    config::Config,
    error::ApiError,
    web::{self, rest::ApiDoc, state::AppState},
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use xengage_core::{
    spawn_dispatcher, AccountStore, BrowserActionExecutor, Clock, Dispatcher, Engine,
    InMemoryAccountStore, SessionStore, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Account Store ---
    let accounts: Arc<dyn AccountStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let store = PgAccountStore::new(db_pool);
            info!("Running database migrations...");
            store.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL is not set; linked accounts will be kept in memory only");
            Arc::new(InMemoryAccountStore::new())
        }
    };

    // --- 3. Browser Automation ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let urls = config.platform_urls();
    let launcher = Arc::new(ChromiumLauncher::new(
        config.browser_headless,
        config.chrome_executable.clone(),
        config.timeouts.clone(),
    ));
    let sessions = Arc::new(SessionStore::new(
        urls.clone(),
        config.timeouts.clone(),
        clock.clone(),
    ));
    let executor = Arc::new(BrowserActionExecutor::new(
        launcher,
        sessions.clone(),
        urls,
        config.timeouts.clone(),
    ));

    // --- 4. Engine & Scheduled Dispatch ---
    let engine = Arc::new(
        Engine::new(executor.clone(), executor, sessions, accounts, clock.clone())
            .with_auth_request_ttl(config.auth_request_ttl),
    );
    let dispatcher = Arc::new(
        Dispatcher::new(engine.queue(), engine.clone()).with_retention(config.schedule_retention),
    );
    let shutdown = CancellationToken::new();
    let dispatch_task = spawn_dispatcher(
        dispatcher,
        clock,
        config.dispatch_interval,
        shutdown.clone(),
    );
    info!(
        "Scheduled dispatch runs every {}s",
        config.dispatch_interval.as_secs()
    );

    // --- 5. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(web::middleware::USER_ID_HEADER),
        ]);

    let app_state = Arc::new(AppState::new(engine));
    let app = Router::new()
        .merge(web::router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
            }
            stop.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = dispatch_task.await {
        warn!("Dispatcher task ended abnormally: {}", e);
    }
    Ok(())
}
