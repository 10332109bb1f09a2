use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use super::{NewChainTransaction, NewPaymentRequest, PaymentStats, StoreGateway, StoreTx};
use crate::core::{ApiCredential, ChainTransaction, Merchant, PaymentRequest, PaymentStatus, Wallet};
use crate::errors::{GatewayError, GatewayResult};

const DEFAULT_DERIVATION_PREFIX: &str = "m/44'/195'/0'/0";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> GatewayResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| GatewayError::Validation(format!("database connection failed: {e}")))?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> GatewayResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GatewayError::Validation(format!("migration failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StoreGateway for PgStore {
    async fn begin(&self) -> GatewayResult<StoreTx> {
        Ok(self.pool.begin().await?)
    }

    async fn create_merchant(
        &self,
        email: &str,
        hashed_password: &str,
        full_name: Option<String>,
        company_name: Option<String>,
    ) -> GatewayResult<Merchant> {
        let row = sqlx::query_as::<_, Merchant>(
            r#"
            INSERT INTO merchants (email, hashed_password, full_name, company_name, is_active, created_at)
            VALUES ($1, $2, $3, $4, true, now())
            RETURNING id, email, hashed_password, full_name, company_name, is_active, created_at
            "#,
        )
        .bind(email)
        .bind(hashed_password)
        .bind(full_name)
        .bind(company_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_merchant(&self, id: i64) -> GatewayResult<Option<Merchant>> {
        let row = sqlx::query_as::<_, Merchant>(
            "SELECT id, email, hashed_password, full_name, company_name, is_active, created_at FROM merchants WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_merchant_by_email(&self, email: &str) -> GatewayResult<Option<Merchant>> {
        let row = sqlx::query_as::<_, Merchant>(
            "SELECT id, email, hashed_password, full_name, company_name, is_active, created_at FROM merchants WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_wallet(
        &self,
        merchant_id: i64,
        name: &str,
        xpub: &str,
        derivation_prefix: &str,
    ) -> GatewayResult<Wallet> {
        // address::derive always walks the non-hardened 0/index path; a
        // wallet claiming a different prefix would misrepresent its own
        // addressing scheme, so that mismatch is rejected here instead of
        // being silently ignored at derivation time (see address::derive).
        if derivation_prefix != DEFAULT_DERIVATION_PREFIX {
            return Err(GatewayError::Validation(format!(
                "unsupported derivation prefix: {derivation_prefix}"
            )));
        }

        let row = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (merchant_id, name, xpub, network, derivation_prefix, address_index, active, created_at)
            VALUES ($1, $2, $3, 'tron', $4, 0, true, now())
            RETURNING id, merchant_id, name, xpub, network, derivation_prefix, address_index, active, created_at
            "#,
        )
        .bind(merchant_id)
        .bind(name)
        .bind(xpub)
        .bind(derivation_prefix)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_wallet(&self, wallet_id: i64) -> GatewayResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            "SELECT id, merchant_id, name, xpub, network, derivation_prefix, address_index, active, created_at FROM wallets WHERE id = $1",
        )
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_active_wallet(&self, merchant_id: i64) -> GatewayResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            "SELECT id, merchant_id, name, xpub, network, derivation_prefix, address_index, active, created_at FROM wallets WHERE merchant_id = $1 AND active = true",
        )
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_wallets(&self, merchant_id: i64) -> GatewayResult<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, Wallet>(
            "SELECT id, merchant_id, name, xpub, network, derivation_prefix, address_index, active, created_at FROM wallets WHERE merchant_id = $1 ORDER BY created_at DESC",
        )
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn activate_wallet(&self, merchant_id: i64, wallet_id: i64) -> GatewayResult<Wallet> {
        let mut tx = self.pool.begin().await?;

        // §7: switching the active wallet away from one with outstanding
        // PENDING payments is a Conflict - those payments' deposit
        // addresses were issued under the wallet about to lose active
        // status, so the switch is refused rather than silently allowed.
        let dependent_pending: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM payment_requests pr
            JOIN wallets w ON w.id = pr.wallet_id
            WHERE w.merchant_id = $1 AND w.active = true AND w.id != $2 AND pr.status = 'pending'
            "#,
        )
        .bind(merchant_id)
        .bind(wallet_id)
        .fetch_one(&mut *tx)
        .await?;

        if dependent_pending > 0 {
            return Err(GatewayError::Conflict(
                "cannot activate another wallet while the current active wallet has pending payments".to_string(),
            ));
        }

        sqlx::query("UPDATE wallets SET active = false WHERE merchant_id = $1")
            .bind(merchant_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets SET active = true
            WHERE id = $1 AND merchant_id = $2
            RETURNING id, merchant_id, name, xpub, network, derivation_prefix, address_index, active, created_at
            "#,
        )
        .bind(wallet_id)
        .bind(merchant_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(GatewayError::NotFound("wallet"))?;

        tx.commit().await?;
        Ok(row)
    }

    async fn delete_wallet(&self, merchant_id: i64, wallet_id: i64) -> GatewayResult<()> {
        let exists = sqlx::query("SELECT id FROM wallets WHERE id = $1 AND merchant_id = $2")
            .bind(wallet_id)
            .bind(merchant_id)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(GatewayError::NotFound("wallet"));
        }

        let pending: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM payment_requests WHERE wallet_id = $1 AND status = 'pending'",
        )
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await?;

        if pending > 0 {
            return Err(GatewayError::Conflict(
                "cannot delete a wallet with pending payments".to_string(),
            ));
        }

        sqlx::query("DELETE FROM wallets WHERE id = $1 AND merchant_id = $2")
            .bind(wallet_id)
            .bind(merchant_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn allocate_next_address(
        &self,
        tx: &mut StoreTx,
        wallet_id: i64,
    ) -> GatewayResult<(i64, Wallet)> {
        // SELECT ... FOR UPDATE plus the subsequent UPDATE within the
        // caller's transaction serializes concurrent allocations for the
        // same wallet - two concurrent callers cannot observe the same
        // pre-increment value.
        sqlx::query("SELECT id FROM wallets WHERE id = $1 FOR UPDATE")
            .bind(wallet_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(GatewayError::NotFound("wallet"))?;

        let row = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets SET address_index = address_index + 1
            WHERE id = $1
            RETURNING id, merchant_id, name, xpub, network, derivation_prefix, address_index, active, created_at
            "#,
        )
        .bind(wallet_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok((row.address_index, row))
    }

    async fn create_api_credential(
        &self,
        merchant_id: i64,
        public_id: &str,
        secret_hash: &str,
    ) -> GatewayResult<ApiCredential> {
        let row = sqlx::query_as::<_, ApiCredential>(
            r#"
            INSERT INTO api_credentials (merchant_id, public_id, secret_hash, active, created_at)
            VALUES ($1, $2, $3, true, now())
            RETURNING id, merchant_id, public_id, secret_hash, active, last_used_at, created_at
            "#,
        )
        .bind(merchant_id)
        .bind(public_id)
        .bind(secret_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_api_credential_by_public_id(
        &self,
        public_id: &str,
    ) -> GatewayResult<Option<ApiCredential>> {
        let row = sqlx::query_as::<_, ApiCredential>(
            "SELECT id, merchant_id, public_id, secret_hash, active, last_used_at, created_at FROM api_credentials WHERE public_id = $1",
        )
        .bind(public_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn touch_api_credential(&self, id: i64) -> GatewayResult<()> {
        sqlx::query("UPDATE api_credentials SET last_used_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_api_credentials(&self, merchant_id: i64) -> GatewayResult<Vec<ApiCredential>> {
        let rows = sqlx::query_as::<_, ApiCredential>(
            "SELECT id, merchant_id, public_id, secret_hash, active, last_used_at, created_at FROM api_credentials WHERE merchant_id = $1 ORDER BY created_at DESC",
        )
        .bind(merchant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn deactivate_api_credential(&self, merchant_id: i64, id: i64) -> GatewayResult<()> {
        let updated = sqlx::query("UPDATE api_credentials SET active = false WHERE id = $1 AND merchant_id = $2")
            .bind(id)
            .bind(merchant_id)
            .execute(&self.pool)
            .await?;

        if updated.rows_affected() == 0 {
            return Err(GatewayError::NotFound("api credential"));
        }
        Ok(())
    }

    async fn insert_payment_request(
        &self,
        tx: &mut StoreTx,
        new: NewPaymentRequest,
    ) -> GatewayResult<PaymentRequest> {
        let row = sqlx::query_as::<_, PaymentRequest>(
            r#"
            INSERT INTO payment_requests
                (merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                 status, expires_at, webhook_url, webhook_sent, webhook_attempts,
                 customer_email, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, $9, false, 0, $10, $11, now())
            RETURNING id, merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                      status, expires_at, confirmed_at, webhook_url, webhook_sent, webhook_attempts,
                      customer_email, notes, created_at
            "#,
        )
        .bind(new.merchant_id)
        .bind(new.wallet_id)
        .bind(new.order_id)
        .bind(new.amount)
        .bind(new.currency)
        .bind(new.address)
        .bind(new.address_index)
        .bind(new.expires_at)
        .bind(new.webhook_url)
        .bind(new.customer_email)
        .bind(new.notes)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row)
    }

    async fn get_payment(&self, id: i64, merchant_id: i64) -> GatewayResult<Option<PaymentRequest>> {
        let row = sqlx::query_as::<_, PaymentRequest>(
            r#"SELECT id, merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                      status, expires_at, confirmed_at, webhook_url, webhook_sent, webhook_attempts,
                      customer_email, notes, created_at
               FROM payment_requests WHERE id = $1 AND merchant_id = $2"#,
        )
        .bind(id)
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_payment_by_order_id(
        &self,
        merchant_id: i64,
        order_id: &str,
    ) -> GatewayResult<Option<PaymentRequest>> {
        let row = sqlx::query_as::<_, PaymentRequest>(
            r#"SELECT id, merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                      status, expires_at, confirmed_at, webhook_url, webhook_sent, webhook_attempts,
                      customer_email, notes, created_at
               FROM payment_requests WHERE order_id = $1 AND merchant_id = $2"#,
        )
        .bind(order_id)
        .bind(merchant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_payments(
        &self,
        merchant_id: i64,
        skip: i64,
        limit: i64,
        status: Option<PaymentStatus>,
    ) -> GatewayResult<Vec<PaymentRequest>> {
        let rows = sqlx::query_as::<_, PaymentRequest>(
            r#"SELECT id, merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                      status, expires_at, confirmed_at, webhook_url, webhook_sent, webhook_attempts,
                      customer_email, notes, created_at
               FROM payment_requests
               WHERE merchant_id = $1 AND ($2::text IS NULL OR status = $2::text)
               ORDER BY created_at DESC
               OFFSET $3 LIMIT $4"#,
        )
        .bind(merchant_id)
        .bind(status.map(|s| s.as_str().to_string()))
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_open_payments(&self) -> GatewayResult<Vec<PaymentRequest>> {
        let rows = sqlx::query_as::<_, PaymentRequest>(
            r#"SELECT id, merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                      status, expires_at, confirmed_at, webhook_url, webhook_sent, webhook_attempts,
                      customer_email, notes, created_at
               FROM payment_requests
               WHERE status = 'pending' AND expires_at > now()"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_expired_open_payments(&self) -> GatewayResult<Vec<PaymentRequest>> {
        let rows = sqlx::query_as::<_, PaymentRequest>(
            r#"SELECT id, merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                      status, expires_at, confirmed_at, webhook_url, webhook_sent, webhook_attempts,
                      customer_email, notes, created_at
               FROM payment_requests
               WHERE status = 'pending' AND expires_at <= now()"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn cancel_payment(&self, id: i64, merchant_id: i64) -> GatewayResult<PaymentRequest> {
        let current = self
            .get_payment(id, merchant_id)
            .await?
            .ok_or(GatewayError::NotFound("payment"))?;

        if current.status != PaymentStatus::Pending {
            return Err(GatewayError::Conflict(
                "only a pending payment can be canceled".to_string(),
            ));
        }

        let row = sqlx::query_as::<_, PaymentRequest>(
            r#"UPDATE payment_requests SET status = 'failed'
               WHERE id = $1 AND merchant_id = $2 AND status = 'pending'
               RETURNING id, merchant_id, wallet_id, order_id, amount, currency, address, address_index,
                         status, expires_at, confirmed_at, webhook_url, webhook_sent, webhook_attempts,
                         customer_email, notes, created_at"#,
        )
        .bind(id)
        .bind(merchant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn payment_stats(&self, merchant_id: i64) -> GatewayResult<PaymentStats> {
        let row = sqlx::query(
            r#"
            SELECT
                count(*) FILTER (WHERE true) AS total_payments,
                count(*) FILTER (WHERE status = 'pending') AS pending_payments,
                count(*) FILTER (WHERE status = 'confirmed') AS confirmed_payments,
                coalesce(sum(amount) FILTER (WHERE status = 'confirmed'), 0) AS total_amount,
                count(*) FILTER (WHERE created_at >= date_trunc('day', now())) AS today_payments,
                coalesce(sum(amount) FILTER (WHERE status = 'confirmed' AND confirmed_at >= date_trunc('day', now())), 0) AS today_amount
            FROM payment_requests
            WHERE merchant_id = $1
            "#,
        )
        .bind(merchant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(PaymentStats {
            total_payments: row.try_get("total_payments")?,
            pending_payments: row.try_get("pending_payments")?,
            confirmed_payments: row.try_get("confirmed_payments")?,
            total_amount: row.try_get("total_amount")?,
            today_payments: row.try_get("today_payments")?,
            today_amount: row.try_get("today_amount")?,
        })
    }

    async fn upsert_transaction(&self, new: NewChainTransaction) -> GatewayResult<ChainTransaction> {
        let row = sqlx::query_as::<_, ChainTransaction>(
            r#"
            INSERT INTO chain_transactions
                (payment_request_id, tx_hash, from_address, to_address, amount, network,
                 contract_address, block_number, block_timestamp, confirmations, status, detected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
            ON CONFLICT (tx_hash) DO UPDATE SET
                confirmations = EXCLUDED.confirmations,
                block_number = EXCLUDED.block_number,
                status = CASE WHEN chain_transactions.status = 'confirmed' THEN chain_transactions.status ELSE EXCLUDED.status END
            RETURNING id, payment_request_id, tx_hash, from_address, to_address, amount, network,
                      contract_address, block_number, block_timestamp, confirmations, status,
                      detected_at, confirmed_at
            "#,
        )
        .bind(new.payment_request_id)
        .bind(new.tx_hash)
        .bind(new.from_address)
        .bind(new.to_address)
        .bind(new.amount)
        .bind(new.network)
        .bind(new.contract_address)
        .bind(new.block_number)
        .bind(new.block_timestamp)
        .bind(new.confirmations)
        .bind(new.status)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_transactions_for_payment(
        &self,
        payment_id: i64,
    ) -> GatewayResult<Vec<ChainTransaction>> {
        let rows = sqlx::query_as::<_, ChainTransaction>(
            r#"SELECT id, payment_request_id, tx_hash, from_address, to_address, amount, network,
                      contract_address, block_number, block_timestamp, confirmations, status,
                      detected_at, confirmed_at
               FROM chain_transactions WHERE payment_request_id = $1 ORDER BY detected_at DESC"#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_transaction_by_hash(&self, tx_hash: &str) -> GatewayResult<Option<ChainTransaction>> {
        let row = sqlx::query_as::<_, ChainTransaction>(
            r#"SELECT id, payment_request_id, tx_hash, from_address, to_address, amount, network,
                      contract_address, block_number, block_timestamp, confirmations, status,
                      detected_at, confirmed_at
               FROM chain_transactions WHERE tx_hash = $1"#,
        )
        .bind(tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn confirm_payment(&self, payment_id: i64, transaction_id: i64) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE payment_requests SET status = 'confirmed', confirmed_at = $2 WHERE id = $1 AND status = 'pending'",
        )
        .bind(payment_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Idempotent: if the payment was not PENDING, this whole call is a
        // no-op - do not flip the linked transaction either.
        if updated.rows_affected() == 1 {
            sqlx::query(
                "UPDATE chain_transactions SET status = 'confirmed', confirmed_at = $2 WHERE id = $1",
            )
            .bind(transaction_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn mark_expired(&self, payment_id: i64) -> GatewayResult<()> {
        sqlx::query("UPDATE payment_requests SET status = 'expired' WHERE id = $1 AND status = 'pending'")
            .bind(payment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_webhook_attempt(&self, payment_id: i64, success: bool) -> GatewayResult<()> {
        sqlx::query(
            r#"UPDATE payment_requests
               SET webhook_attempts = webhook_attempts + 1,
                   webhook_sent = webhook_sent OR $2
               WHERE id = $1"#,
        )
        .bind(payment_id)
        .bind(success)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
