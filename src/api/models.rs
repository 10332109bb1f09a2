//! Request/response DTOs for the HTTP edge. Kept separate from `core`
//! types so the wire shape can evolve independently of the entities the
//! store persists.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{ChainTransaction, PaymentRequest, PaymentStatus, TransactionStatus};
use crate::store::PaymentStats;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub name: String,
    pub xpub: String,
    #[serde(default = "default_derivation_prefix")]
    pub derivation_prefix: String,
}

fn default_derivation_prefix() -> String {
    "m/44'/195'/0'/0".to_string()
}

#[derive(Debug, Serialize)]
pub struct ApiCredentialCreatedResponse {
    pub public_id: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentBody {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub webhook_url: Option<String>,
    pub customer_email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: i64,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub address: String,
    pub status: PaymentStatus,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub payment_uri: Option<String>,
}

impl From<PaymentRequest> for PaymentResponse {
    fn from(p: PaymentRequest) -> Self {
        Self {
            id: p.id,
            order_id: p.order_id,
            amount: p.amount,
            currency: p.currency,
            address: p.address,
            status: p.status,
            expires_at: p.expires_at,
            confirmed_at: p.confirmed_at,
            payment_uri: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListPaymentsQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub status: Option<PaymentStatus>,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct PaymentStatsResponse {
    pub total_payments: i64,
    pub pending_payments: i64,
    pub confirmed_payments: i64,
    pub total_amount: Decimal,
    pub today_payments: i64,
    pub today_amount: Decimal,
}

impl From<PaymentStats> for PaymentStatsResponse {
    fn from(s: PaymentStats) -> Self {
        Self {
            total_payments: s.total_payments,
            pending_payments: s.pending_payments,
            confirmed_payments: s.confirmed_payments,
            total_amount: s.total_amount,
            today_payments: s.today_payments,
            today_amount: s.today_amount,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChainTransactionResponse {
    pub id: i64,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub confirmations: i64,
    pub block_number: Option<i64>,
    pub status: TransactionStatus,
    pub detected_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl From<ChainTransaction> for ChainTransactionResponse {
    fn from(t: ChainTransaction) -> Self {
        Self {
            id: t.id,
            tx_hash: t.tx_hash,
            from_address: t.from_address,
            to_address: t.to_address,
            amount: t.amount,
            confirmations: t.confirmations,
            block_number: t.block_number,
            status: t.status,
            detected_at: t.detected_at,
            confirmed_at: t.confirmed_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentWithTransactionsResponse {
    #[serde(flatten)]
    pub payment: PaymentResponse,
    pub transactions: Vec<ChainTransactionResponse>,
}

#[derive(Debug, Serialize)]
pub struct QrResponse {
    pub qr_data_uri: String,
    pub address: String,
    pub amount: Decimal,
    pub currency: String,
}
