use actix_web::{middleware, web, App, HttpServer};
use alert_service::{
    handlers::{devices::register_routes as register_devices, websocket::register_routes as register_websocket},
    metrics, AlertRouter, Config, ConnectionRegistry, DeviceStore, PgDeviceStore, PushRelay,
    PushService, WebPushRelay,
};
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting alert service");

    let config = Config::from_env()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            io::Error::new(io::ErrorKind::Other, "Database connection failed")
        })?;
    tracing::info!("Successfully connected to database");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Migration failed: {e}")))?;

    // One registry instance per process, constructed at startup and injected
    // into both the connection handler and the broadcast callers.
    let registry = ConnectionRegistry::new();
    tracing::info!("Connection registry initialized");

    let device_store: Arc<dyn DeviceStore> = Arc::new(PgDeviceStore::new(db_pool.clone()));

    let relay: Option<Arc<dyn PushRelay>> = match &config.push.vapid_private_key {
        Some(key) => Some(Arc::new(WebPushRelay::new(
            key.clone(),
            config.push.vapid_subject.clone(),
        ))),
        None => {
            tracing::warn!("VAPID private key not configured; web push delivery disabled");
            None
        }
    };
    let push_service = Arc::new(PushService::new(device_store.clone(), relay));

    let router = Arc::new(AlertRouter::new(registry.clone(), push_service));

    let addr = format!("0.0.0.0:{}", config.app.port);
    tracing::info!("Starting HTTP server on {}", addr);

    let config_data = web::Data::new(config);
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(router.clone()))
            .app_data(web::Data::new(device_store.clone()))
            .app_data(config_data.clone())
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(|cfg| {
                register_websocket(cfg);
                register_devices(cfg);
            })
    })
    .bind(&addr)?
    .run()
    .await
}
