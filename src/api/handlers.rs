use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};

use crate::core::Wallet;
use crate::errors::{GatewayError, GatewayResult};
use crate::payment::CreatePaymentRequest;

use super::models::{
    ApiCredentialCreatedResponse, ChainTransactionResponse, CreatePaymentBody, CreateWalletRequest,
    ListPaymentsQuery, LoginRequest, PaymentResponse, PaymentStatsResponse,
    PaymentWithTransactionsResponse, QrResponse, RegisterRequest, TokenResponse,
};
use super::AppState;

fn bearer_header(req: &HttpRequest) -> GatewayResult<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::Unauthenticated)
}

async fn require_api_key(req: &HttpRequest, state: &AppState) -> GatewayResult<crate::core::ApiCredential> {
    let header = bearer_header(req)?;
    state.auth.authenticate_api_key(header).await
}

async fn require_jwt(req: &HttpRequest, state: &AppState) -> GatewayResult<crate::core::Merchant> {
    let header = bearer_header(req)?;
    let token = header.strip_prefix("Bearer ").ok_or(GatewayError::Unauthenticated)?;
    state.auth.verify_token(token).await
}

#[get("/health")]
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[post("/auth/register")]
pub async fn register(state: web::Data<AppState>, body: web::Json<RegisterRequest>) -> GatewayResult<HttpResponse> {
    let body = body.into_inner();
    let merchant = state
        .auth
        .register(&body.email, &body.password, body.full_name, body.company_name)
        .await?;
    Ok(HttpResponse::Created().json(merchant))
}

#[post("/auth/login")]
pub async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> GatewayResult<HttpResponse> {
    let token = state.auth.login(&body.email, &body.password).await?;
    Ok(HttpResponse::Ok().json(TokenResponse {
        access_token: token,
        token_type: "bearer",
    }))
}

#[post("/payments/create")]
pub async fn create_payment(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreatePaymentBody>,
) -> GatewayResult<HttpResponse> {
    let credential = require_api_key(&req, &state).await?;
    let body = body.into_inner();

    let created = state
        .payments
        .create(
            credential.merchant_id,
            CreatePaymentRequest {
                order_id: body.order_id,
                amount: body.amount,
                currency: body.currency,
                webhook_url: body.webhook_url,
                customer_email: body.customer_email,
                notes: body.notes,
            },
        )
        .await?;

    let mut response: PaymentResponse = created.payment.into();
    response.payment_uri = Some(created.payment_uri);
    Ok(HttpResponse::Created().json(response))
}

#[get("/payments/status/{id}")]
pub async fn payment_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> GatewayResult<HttpResponse> {
    let credential = require_api_key(&req, &state).await?;
    let (payment, transactions) = state
        .payments
        .get_with_transactions(credential.merchant_id, path.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(PaymentWithTransactionsResponse {
        payment: PaymentResponse::from(payment),
        transactions: transactions.into_iter().map(ChainTransactionResponse::from).collect(),
    }))
}

#[get("/payments/by-order/{order_id}")]
pub async fn payment_by_order(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> GatewayResult<HttpResponse> {
    let credential = require_api_key(&req, &state).await?;
    let payment = state
        .payments
        .by_order_id(credential.merchant_id, &path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}

/// Supplements spec §6: the original source joins a payment's linked
/// `ChainTransaction` rows onto its detail view (`payments.py:
/// get_payment_transactions`), dropped by the distillation but not
/// excluded by any Non-goal.
#[get("/payments/{id}/transactions")]
pub async fn payment_transactions(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> GatewayResult<HttpResponse> {
    let credential = require_api_key(&req, &state).await?;
    let (payment, transactions) = state
        .payments
        .get_with_transactions(credential.merchant_id, path.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(PaymentWithTransactionsResponse {
        payment: PaymentResponse::from(payment),
        transactions: transactions.into_iter().map(ChainTransactionResponse::from).collect(),
    }))
}

#[get("/payments/qr/{id}")]
pub async fn payment_qr(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> GatewayResult<HttpResponse> {
    let credential = require_api_key(&req, &state).await?;
    let payment = state.payments.get(credential.merchant_id, path.into_inner()).await?;

    let payload = format!(
        "tronlink://pay?address={}&amount={}&token={}",
        payment.address,
        payment.amount.normalize(),
        state.usdt_contract
    );
    let qr_data_uri = crate::qr::data_uri(&payload).map_err(|_| GatewayError::Internal)?;

    Ok(HttpResponse::Ok().json(QrResponse {
        qr_data_uri,
        address: payment.address,
        amount: payment.amount,
        currency: payment.currency,
    }))
}

#[get("/payments/list")]
pub async fn list_payments(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListPaymentsQuery>,
) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    let limit = query.limit.clamp(1, 100);
    let payments = state
        .payments
        .list_with_transactions(merchant.id, query.skip, limit, query.status)
        .await?;
    let response: Vec<PaymentWithTransactionsResponse> = payments
        .into_iter()
        .map(|(payment, transactions)| PaymentWithTransactionsResponse {
            payment: PaymentResponse::from(payment),
            transactions: transactions.into_iter().map(ChainTransactionResponse::from).collect(),
        })
        .collect();
    Ok(HttpResponse::Ok().json(response))
}

#[get("/payments/stats")]
pub async fn payment_stats(req: HttpRequest, state: web::Data<AppState>) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    let stats = state.payments.stats(merchant.id).await?;
    Ok(HttpResponse::Ok().json(PaymentStatsResponse::from(stats)))
}

#[post("/payments/cancel/{id}")]
pub async fn cancel_payment(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    let payment = state.payments.cancel(merchant.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(PaymentResponse::from(payment)))
}

#[post("/wallets")]
pub async fn create_wallet(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<CreateWalletRequest>,
) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    if !crate::address::validate_xpub(&body.xpub) {
        return Err(GatewayError::Validation("invalid xpub".into()));
    }
    let wallet = state
        .store
        .insert_wallet(merchant.id, &body.name, &body.xpub, &body.derivation_prefix)
        .await?;
    Ok(HttpResponse::Created().json(wallet))
}

#[get("/wallets")]
pub async fn list_wallets(req: HttpRequest, state: web::Data<AppState>) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    let wallets: Vec<Wallet> = state.store.list_wallets(merchant.id).await?;
    Ok(HttpResponse::Ok().json(wallets))
}

#[put("/wallets/{id}/activate")]
pub async fn activate_wallet(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    let wallet = state.store.activate_wallet(merchant.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(wallet))
}

#[delete("/wallets/{id}")]
pub async fn delete_wallet(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    state.store.delete_wallet(merchant.id, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[post("/api-keys")]
pub async fn create_api_key(req: HttpRequest, state: web::Data<AppState>) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    let (credential, secret) = state.auth.create_api_credential(merchant.id).await?;
    Ok(HttpResponse::Created().json(ApiCredentialCreatedResponse {
        public_id: credential.public_id,
        secret,
    }))
}

#[get("/api-keys")]
pub async fn list_api_keys(req: HttpRequest, state: web::Data<AppState>) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    let credentials = state.store.list_api_credentials(merchant.id).await?;
    Ok(HttpResponse::Ok().json(credentials))
}

#[delete("/api-keys/{id}")]
pub async fn revoke_api_key(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> GatewayResult<HttpResponse> {
    let merchant = require_jwt(&req, &state).await?;
    state.store.deactivate_api_credential(merchant.id, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use actix_web::{test, App};

    use super::health_check;

    #[actix_web::test]
    async fn health_check_reports_ok() {
        let app = test::init_service(App::new().service(health_check)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
