pub mod handlers;
pub mod models;

use std::sync::Arc;

use actix_web::web;

use crate::auth::AuthService;
use crate::payment::PaymentService;
use crate::store::StoreGateway;

/// Shared application state, constructed once in `main` and handed to
/// every worker thread as `web::Data`.
pub struct AppState {
    pub store: Arc<dyn StoreGateway>,
    pub auth: Arc<AuthService>,
    pub payments: Arc<PaymentService>,
    pub usdt_contract: String,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(handlers::health_check)
        .service(handlers::register)
        .service(handlers::login)
        .service(handlers::create_payment)
        .service(handlers::payment_status)
        .service(handlers::payment_by_order)
        .service(handlers::payment_transactions)
        .service(handlers::payment_qr)
        .service(handlers::list_payments)
        .service(handlers::payment_stats)
        .service(handlers::cancel_payment)
        .service(handlers::create_wallet)
        .service(handlers::list_wallets)
        .service(handlers::activate_wallet)
        .service(handlers::delete_wallet)
        .service(handlers::create_api_key)
        .service(handlers::list_api_keys)
        .service(handlers::revoke_api_key);
}
