use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// §3 PaymentRequest.status. PENDING may transition to CONFIRMED, EXPIRED,
/// or FAILED; once in one of those terminal states it never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Expired,
    Failed,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Failed => "failed",
        }
    }
}

/// §3 ChainTransaction.status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Merchant {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub company_name: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// §3 Wallet. `address_index` is the monotonic counter of the last index
/// issued; `(wallet.id, address_index)` uniquely determines `address`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: i64,
    pub merchant_id: i64,
    pub name: String,
    pub xpub: String,
    pub network: String,
    pub derivation_prefix: String,
    pub address_index: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// §3 APICredential. `secret_hash` never leaves the store layer.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiCredential {
    pub id: i64,
    pub merchant_id: i64,
    pub public_id: String,
    #[serde(skip_serializing)]
    pub secret_hash: String,
    pub active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// §3 PaymentRequest.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentRequest {
    pub id: i64,
    pub merchant_id: i64,
    pub wallet_id: i64,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub address: String,
    pub address_index: i64,
    pub status: PaymentStatus,
    pub expires_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub webhook_url: Option<String>,
    pub webhook_sent: bool,
    pub webhook_attempts: i32,
    pub customer_email: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// §3 ChainTransaction. `tx_hash` is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChainTransaction {
    pub id: i64,
    pub payment_request_id: i64,
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: String,
    pub amount: Decimal,
    pub network: String,
    pub contract_address: Option<String>,
    pub block_number: Option<i64>,
    pub block_timestamp: Option<DateTime<Utc>>,
    pub confirmations: i64,
    pub status: TransactionStatus,
    pub detected_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}
