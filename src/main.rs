use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod address;
mod api;
mod auth;
mod chain;
mod config;
mod core;
mod errors;
mod monitor;
mod payment;
mod qr;
mod store;
mod webhook;

use api::AppState;
use auth::AuthService;
use chain::ChainClient;
use config::Config;
use monitor::Monitor;
use payment::PaymentService;
use store::postgres::PgStore;
use webhook::WebhookDispatcher;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    let config = Config::from_env().expect("failed to load configuration");

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let host = config.host.clone();
    let port = config.port;

    info!(%host, %port, environment = %config.environment, "starting paykript-gateway");

    let pg_store = PgStore::connect(&config.database_url)
        .await
        .expect("failed to connect to database");
    pg_store.migrate().await.expect("failed to run migrations");
    let store: Arc<dyn store::StoreGateway> = Arc::new(pg_store);

    let chain_client = Arc::new(ChainClient::new(
        config.tron_grid_base_url(),
        config.tron_grid_api_key.clone(),
    ));
    let webhook_dispatcher = Arc::new(WebhookDispatcher::new(config.webhook_secret.clone()));

    let auth_service = Arc::new(AuthService::new(
        store.clone(),
        config.secret_key.clone(),
        config.access_token_expire_minutes,
    ));
    let payment_service = Arc::new(PaymentService::new(
        store.clone(),
        config.usdt_contract_address.clone(),
        config.payment_timeout_minutes,
    ));

    let monitor = Monitor::new(
        store.clone(),
        chain_client.clone(),
        webhook_dispatcher.clone(),
        config.usdt_contract_address.clone(),
        config.required_confirmations,
        std::time::Duration::from_secs(config.tick_seconds),
        std::time::Duration::from_secs(config.error_backoff_seconds),
    );

    let shutdown = CancellationToken::new();
    let monitor_shutdown = shutdown.clone();
    let monitor_handle = tokio::spawn(async move { monitor.run(monitor_shutdown).await });

    let app_state = web::Data::new(AppState {
        store: store.clone(),
        auth: auth_service,
        payments: payment_service,
        usdt_contract: config.usdt_contract_address.clone(),
    });

    let allowed_origins = config.allowed_origins();

    let server = HttpServer::new(move || {
        let mut cors = Cors::default().allow_any_header().allow_any_method().max_age(3600);
        cors = if allowed_origins.is_empty() {
            cors.allow_any_origin()
        } else {
            allowed_origins.iter().fold(cors, |c, origin| c.allowed_origin(origin))
        };

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(web::scope("/api/v1").configure(api::configure_routes))
    })
    .bind((host, port))?
    .run()
    .await;

    shutdown.cancel();
    let _ = monitor_handle.await;

    server
}