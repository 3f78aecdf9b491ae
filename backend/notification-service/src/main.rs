use actix_web::{web, App, HttpServer};
use notification_service::{handlers::register_routes, metrics, AppState, Config};
use std::io;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,notification_service=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    tracing::info!("Starting notification service");

    let config = Config::from_env().map_err(|e| {
        tracing::error!("Invalid configuration: {:#}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    tracing::info!(
        env = %config.app.env,
        store = ?config.store,
        objects = ?config.objects,
        "Configuration loaded"
    );

    let state = AppState::from_config(&config).await.map_err(|e| {
        tracing::error!("Failed to initialize application state: {:#}", e);
        io::Error::new(io::ErrorKind::Other, e.to_string())
    })?;
    let state = web::Data::new(state);

    let addr = config.bind_address();
    tracing::info!("Starting HTTP server on {}:{}", addr.0, addr.1);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(metrics::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(register_routes)
    })
    .bind(addr)?
    .run()
    .await
}
