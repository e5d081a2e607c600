use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agenthub::services::{ReviewJob, ReviewJobConfig};
use agenthub::{handlers, AppState, Config};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agenthub=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");

    info!(
        "Starting agenthub registry on {}:{} ({:?} mode)",
        config.host, config.port, config.environment
    );

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .expect("Failed to create database pool");

    info!("Database connection pool established");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run database migrations");

    info!("Database migrations completed");

    // Start the auto-review sweep. Single runner only: multi-instance
    // deployments must enable this on exactly one node.
    let review_job = ReviewJob::new(
        db_pool.clone(),
        ReviewJobConfig {
            interval: Duration::from_secs(config.auto_review_interval_hours * 3600),
            enabled: config.auto_review_enabled,
        },
        config.is_production(),
    );
    let _review_shutdown = review_job.start();

    let server_addr = format!("{}:{}", config.host, config.port);

    let app_state = web::Data::new(AppState {
        db: db_pool.clone(),
        config: config.clone(),
    });

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .route("/health", web::get().to(handlers::health_check))
            .configure(handlers::configure_auth_routes)
            .configure(handlers::configure_agent_routes)
            .configure(handlers::configure_search_routes)
            .configure(handlers::configure_feedback_routes)
    })
    .bind(&server_addr)?
    .run()
    .await
}
