//! Component C: the transactional store gateway. The core depends only on
//! this trait's contract (spec §1: "Relational persistence is an external
//! collaborator"); `postgres` provides the concrete sqlx-backed
//! implementation actually wired up in `main.rs`.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core::{ApiCredential, ChainTransaction, Merchant, PaymentRequest, PaymentStatus, Wallet};
use crate::errors::GatewayResult;

/// An open database transaction. `allocate_next_address` and the payment
/// insert that follows it share one of these so an allocated index is
/// never orphaned if address derivation or the insert later fails
/// (spec §5, scenario 6).
pub type StoreTx = sqlx::Transaction<'static, sqlx::Postgres>;

pub struct NewPaymentRequest {
    pub merchant_id: i64,
    pub wallet_id: i64,
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub address: String,
    pub address_index: i64,
    pub expires_at: DateTime<Utc>,
    pub webhook_url: Option<String>,
    pub customer_email: Option<String>,
    pub notes: Option<String>,
}

pub struct NewChainTransaction {
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
    pub status: crate::core::TransactionStatus,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PaymentStats {
    pub total_payments: i64,
    pub pending_payments: i64,
    pub confirmed_payments: i64,
    pub total_amount: Decimal,
    pub today_payments: i64,
    pub today_amount: Decimal,
}

#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn begin(&self) -> GatewayResult<StoreTx>;

    // Merchants
    async fn create_merchant(
        &self,
        email: &str,
        hashed_password: &str,
        full_name: Option<String>,
        company_name: Option<String>,
    ) -> GatewayResult<Merchant>;
    async fn get_merchant(&self, id: i64) -> GatewayResult<Option<Merchant>>;
    async fn get_merchant_by_email(&self, email: &str) -> GatewayResult<Option<Merchant>>;

    // Wallets
    async fn insert_wallet(
        &self,
        merchant_id: i64,
        name: &str,
        xpub: &str,
        derivation_prefix: &str,
    ) -> GatewayResult<Wallet>;
    async fn get_wallet(&self, wallet_id: i64) -> GatewayResult<Option<Wallet>>;
    async fn get_active_wallet(&self, merchant_id: i64) -> GatewayResult<Option<Wallet>>;
    async fn list_wallets(&self, merchant_id: i64) -> GatewayResult<Vec<Wallet>>;
    /// Activating a wallet deactivates all siblings for the same merchant
    /// (spec §3 invariant: at most one wallet per merchant is active).
    async fn activate_wallet(&self, merchant_id: i64, wallet_id: i64) -> GatewayResult<Wallet>;

    /// Refuses to delete a wallet with outstanding PENDING payments
    /// (spec §7 Conflict).
    async fn delete_wallet(&self, merchant_id: i64, wallet_id: i64) -> GatewayResult<()>;

    /// Atomically increments `wallet.address_index` and returns the new
    /// value plus the wallet row, inside the caller's transaction.
    /// Linearizable per wallet (spec §5).
    async fn allocate_next_address(
        &self,
        tx: &mut StoreTx,
        wallet_id: i64,
    ) -> GatewayResult<(i64, Wallet)>;

    // API credentials
    async fn create_api_credential(
        &self,
        merchant_id: i64,
        public_id: &str,
        secret_hash: &str,
    ) -> GatewayResult<ApiCredential>;
    async fn get_api_credential_by_public_id(
        &self,
        public_id: &str,
    ) -> GatewayResult<Option<ApiCredential>>;
    async fn touch_api_credential(&self, id: i64) -> GatewayResult<()>;
    async fn list_api_credentials(&self, merchant_id: i64) -> GatewayResult<Vec<ApiCredential>>;
    async fn deactivate_api_credential(&self, merchant_id: i64, id: i64) -> GatewayResult<()>;

    // Payment requests
    async fn insert_payment_request(
        &self,
        tx: &mut StoreTx,
        new: NewPaymentRequest,
    ) -> GatewayResult<PaymentRequest>;
    async fn get_payment(&self, id: i64, merchant_id: i64) -> GatewayResult<Option<PaymentRequest>>;
    async fn get_payment_by_order_id(
        &self,
        merchant_id: i64,
        order_id: &str,
    ) -> GatewayResult<Option<PaymentRequest>>;
    async fn list_payments(
        &self,
        merchant_id: i64,
        skip: i64,
        limit: i64,
        status: Option<PaymentStatus>,
    ) -> GatewayResult<Vec<PaymentRequest>>;
    async fn list_open_payments(&self) -> GatewayResult<Vec<PaymentRequest>>;
    async fn list_expired_open_payments(&self) -> GatewayResult<Vec<PaymentRequest>>;
    async fn cancel_payment(&self, id: i64, merchant_id: i64) -> GatewayResult<PaymentRequest>;
    async fn payment_stats(&self, merchant_id: i64) -> GatewayResult<PaymentStats>;

    // Chain transactions
    /// Insert if `tx_hash` is absent, else update the mutable fields
    /// (`confirmations`, `block_number`, `status`). Keyed uniquely on
    /// `tx_hash` so at most one row exists per on-chain transaction.
    async fn upsert_transaction(&self, new: NewChainTransaction) -> GatewayResult<ChainTransaction>;
    async fn list_transactions_for_payment(
        &self,
        payment_id: i64,
    ) -> GatewayResult<Vec<ChainTransaction>>;
    async fn get_transaction_by_hash(&self, tx_hash: &str) -> GatewayResult<Option<ChainTransaction>>;

    /// `PENDING -> CONFIRMED`, idempotent: a second call on a non-PENDING
    /// payment is a no-op.
    async fn confirm_payment(
        &self,
        payment_id: i64,
        transaction_id: i64,
    ) -> GatewayResult<()>;

    /// `PENDING -> EXPIRED`; no-op otherwise.
    async fn mark_expired(&self, payment_id: i64) -> GatewayResult<()>;

    async fn record_webhook_attempt(&self, payment_id: i64, success: bool) -> GatewayResult<()>;
}
