//! Component E: at-least-once signed webhook delivery with bounded retry.
//!
//! Canonical JSON relies on `serde_json::Value`'s default `Map`
//! representation, which is a `BTreeMap` (the `preserve_order` feature is
//! not enabled anywhere in this crate), so every object - including
//! nested ones - serializes with lexicographically sorted keys. The bytes
//! handed to `reqwest` as the request body are the exact bytes HMACed.

use std::time::Duration;

use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;

use crate::core::{ChainTransaction, PaymentRequest};
use crate::store::StoreGateway;

type HmacSha256 = Hmac<Sha256>;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(5)];
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
const TEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct WebhookDispatcher {
    http: reqwest::Client,
    secret: String,
}

impl WebhookDispatcher {
    pub fn new(secret: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .expect("failed to build webhook http client");
        Self {
            http,
            secret: secret.into(),
        }
    }

    pub fn build_payload(payment: &PaymentRequest, tx: &ChainTransaction) -> Value {
        json!({
            "event": "payment.confirmed",
            "data": {
                "payment_id": payment.id,
                "order_id": payment.order_id,
                "amount": payment.amount.to_string(),
                "currency": payment.currency,
                "status": payment.status.as_str(),
                "payment_address": payment.address,
                "confirmed_at": payment.confirmed_at.map(|t| t.to_rfc3339()),
                "transaction": {
                    "tx_hash": tx.tx_hash,
                    "from_address": tx.from_address,
                    "amount": tx.amount.to_string(),
                    "confirmations": tx.confirmations,
                    "block_number": tx.block_number,
                    "network": tx.network,
                },
                "customer_email": payment.customer_email,
                "notes": payment.notes,
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": "1.0",
        })
    }

    pub fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    /// Deliver a `payment.confirmed` event with up to `MAX_ATTEMPTS`
    /// attempts on the `{1s, 5s}` back-off schedule. Every attempt -
    /// including the final failing one - is recorded via
    /// `record_webhook_attempt`, so `webhook_attempts` always equals the
    /// number of POSTs actually made.
    pub async fn send_confirmation(
        &self,
        store: &dyn StoreGateway,
        payment: &PaymentRequest,
        tx: &ChainTransaction,
    ) {
        let Some(url) = payment.webhook_url.as_deref() else {
            tracing::warn!(payment_id = payment.id, "no webhook_url configured");
            return;
        };

        let payload = Self::build_payload(payment, tx);
        let body = serde_json::to_vec(&payload).expect("payload is always serializable");
        let signature = Self::sign(&self.secret, &body);
        let event = payload["event"].as_str().unwrap_or_default().to_string();
        let timestamp = payload["timestamp"].as_str().unwrap_or_default().to_string();

        for attempt in 0..MAX_ATTEMPTS {
            let success = self
                .post_once(url, &body, &signature, &event, &timestamp, DELIVERY_TIMEOUT)
                .await;

            if let Err(e) = store.record_webhook_attempt(payment.id, success).await {
                tracing::error!(error = %e, payment_id = payment.id, "failed to record webhook attempt");
            }

            if success {
                tracing::info!(payment_id = payment.id, %url, "webhook delivered");
                return;
            }

            if (attempt as usize) < RETRY_DELAYS.len() {
                tokio::time::sleep(RETRY_DELAYS[attempt as usize]).await;
            }
        }

        tracing::error!(payment_id = payment.id, %url, "webhook delivery exhausted retries");
    }

    /// Manual resend for an already-confirmed payment. Bypasses the
    /// PENDING/CONFIRMED state machine entirely - it just re-delivers.
    pub async fn resend(
        &self,
        store: &dyn StoreGateway,
        payment: &PaymentRequest,
        tx: &ChainTransaction,
    ) {
        self.send_confirmation(store, payment, tx).await;
    }

    async fn post_once(
        &self,
        url: &str,
        body: &[u8],
        signature: &str,
        event: &str,
        timestamp: &str,
        timeout: Duration,
    ) -> bool {
        let result = self
            .http
            .post(url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .header("User-Agent", "PayKript-Webhook/1.0")
            .header("X-PayKript-Signature", signature)
            .header("X-PayKript-Event", event)
            .header("X-PayKript-Timestamp", timestamp)
            .body(body.to_vec())
            .send()
            .await;

        match result {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, %url, "webhook post failed");
                false
            }
        }
    }

    /// `WebhookService.test_webhook_endpoint` equivalent: probes a
    /// merchant URL with a synthetic event, 15s timeout, and reports
    /// round-trip latency without touching payment state.
    pub async fn send_test_event(&self, url: &str) -> TestWebhookResult {
        let payload = json!({
            "event": "webhook.test",
            "data": { "message": "this is a test webhook" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": "1.0",
        });
        let body = serde_json::to_vec(&payload).expect("payload is always serializable");
        let signature = Self::sign(&self.secret, &body);

        let started = std::time::Instant::now();
        let result = self
            .http
            .post(url)
            .timeout(TEST_TIMEOUT)
            .header("Content-Type", "application/json")
            .header("User-Agent", "PayKript-Webhook/1.0")
            .header("X-PayKript-Signature", signature)
            .header("X-PayKript-Event", "webhook.test")
            .body(body)
            .send()
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(resp) => TestWebhookResult {
                success: resp.status().is_success(),
                status_code: Some(resp.status().as_u16()),
                response_time_ms: Some(elapsed_ms),
                error: None,
            },
            Err(e) => TestWebhookResult {
                success: false,
                status_code: None,
                response_time_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TestWebhookResult {
    pub success: bool,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wiremock::matchers::{header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records `record_webhook_attempt` calls; every other `StoreGateway`
    /// method is unreachable from `send_confirmation`'s code path.
    #[derive(Default)]
    struct AttemptRecordingStore {
        attempts: Mutex<Vec<bool>>,
    }

    #[async_trait::async_trait]
    impl StoreGateway for AttemptRecordingStore {
        async fn begin(&self) -> crate::errors::GatewayResult<crate::store::StoreTx> {
            unreachable!()
        }
        async fn create_merchant(
            &self,
            _email: &str,
            _hashed_password: &str,
            _full_name: Option<String>,
            _company_name: Option<String>,
        ) -> crate::errors::GatewayResult<crate::core::Merchant> {
            unreachable!()
        }
        async fn get_merchant(&self, _id: i64) -> crate::errors::GatewayResult<Option<crate::core::Merchant>> {
            unreachable!()
        }
        async fn get_merchant_by_email(
            &self,
            _email: &str,
        ) -> crate::errors::GatewayResult<Option<crate::core::Merchant>> {
            unreachable!()
        }
        async fn insert_wallet(
            &self,
            _merchant_id: i64,
            _name: &str,
            _xpub: &str,
            _derivation_prefix: &str,
        ) -> crate::errors::GatewayResult<crate::core::Wallet> {
            unreachable!()
        }
        async fn get_wallet(&self, _wallet_id: i64) -> crate::errors::GatewayResult<Option<crate::core::Wallet>> {
            unreachable!()
        }
        async fn get_active_wallet(
            &self,
            _merchant_id: i64,
        ) -> crate::errors::GatewayResult<Option<crate::core::Wallet>> {
            unreachable!()
        }
        async fn list_wallets(&self, _merchant_id: i64) -> crate::errors::GatewayResult<Vec<crate::core::Wallet>> {
            unreachable!()
        }
        async fn activate_wallet(
            &self,
            _merchant_id: i64,
            _wallet_id: i64,
        ) -> crate::errors::GatewayResult<crate::core::Wallet> {
            unreachable!()
        }
        async fn delete_wallet(&self, _merchant_id: i64, _wallet_id: i64) -> crate::errors::GatewayResult<()> {
            unreachable!()
        }
        async fn allocate_next_address(
            &self,
            _tx: &mut crate::store::StoreTx,
            _wallet_id: i64,
        ) -> crate::errors::GatewayResult<(i64, crate::core::Wallet)> {
            unreachable!()
        }
        async fn create_api_credential(
            &self,
            _merchant_id: i64,
            _public_id: &str,
            _secret_hash: &str,
        ) -> crate::errors::GatewayResult<crate::core::ApiCredential> {
            unreachable!()
        }
        async fn get_api_credential_by_public_id(
            &self,
            _public_id: &str,
        ) -> crate::errors::GatewayResult<Option<crate::core::ApiCredential>> {
            unreachable!()
        }
        async fn touch_api_credential(&self, _id: i64) -> crate::errors::GatewayResult<()> {
            unreachable!()
        }
        async fn list_api_credentials(
            &self,
            _merchant_id: i64,
        ) -> crate::errors::GatewayResult<Vec<crate::core::ApiCredential>> {
            unreachable!()
        }
        async fn deactivate_api_credential(&self, _merchant_id: i64, _id: i64) -> crate::errors::GatewayResult<()> {
            unreachable!()
        }
        async fn insert_payment_request(
            &self,
            _tx: &mut crate::store::StoreTx,
            _new: crate::store::NewPaymentRequest,
        ) -> crate::errors::GatewayResult<PaymentRequest> {
            unreachable!()
        }
        async fn get_payment(&self, _id: i64, _merchant_id: i64) -> crate::errors::GatewayResult<Option<PaymentRequest>> {
            unreachable!()
        }
        async fn get_payment_by_order_id(
            &self,
            _merchant_id: i64,
            _order_id: &str,
        ) -> crate::errors::GatewayResult<Option<PaymentRequest>> {
            unreachable!()
        }
        async fn list_payments(
            &self,
            _merchant_id: i64,
            _skip: i64,
            _limit: i64,
            _status: Option<crate::core::PaymentStatus>,
        ) -> crate::errors::GatewayResult<Vec<PaymentRequest>> {
            unreachable!()
        }
        async fn list_open_payments(&self) -> crate::errors::GatewayResult<Vec<PaymentRequest>> {
            unreachable!()
        }
        async fn list_expired_open_payments(&self) -> crate::errors::GatewayResult<Vec<PaymentRequest>> {
            unreachable!()
        }
        async fn cancel_payment(&self, _id: i64, _merchant_id: i64) -> crate::errors::GatewayResult<PaymentRequest> {
            unreachable!()
        }
        async fn payment_stats(&self, _merchant_id: i64) -> crate::errors::GatewayResult<crate::store::PaymentStats> {
            unreachable!()
        }
        async fn upsert_transaction(
            &self,
            _new: crate::store::NewChainTransaction,
        ) -> crate::errors::GatewayResult<ChainTransaction> {
            unreachable!()
        }
        async fn list_transactions_for_payment(
            &self,
            _payment_id: i64,
        ) -> crate::errors::GatewayResult<Vec<ChainTransaction>> {
            unreachable!()
        }
        async fn get_transaction_by_hash(
            &self,
            _tx_hash: &str,
        ) -> crate::errors::GatewayResult<Option<ChainTransaction>> {
            unreachable!()
        }
        async fn confirm_payment(&self, _payment_id: i64, _transaction_id: i64) -> crate::errors::GatewayResult<()> {
            unreachable!()
        }
        async fn mark_expired(&self, _payment_id: i64) -> crate::errors::GatewayResult<()> {
            unreachable!()
        }
        async fn record_webhook_attempt(&self, _payment_id: i64, success: bool) -> crate::errors::GatewayResult<()> {
            self.attempts.lock().unwrap().push(success);
            Ok(())
        }
    }

    fn sample_payment(webhook_url: &str) -> PaymentRequest {
        PaymentRequest {
            id: 1,
            merchant_id: 1,
            wallet_id: 1,
            order_id: "o-1".to_string(),
            amount: "10.000000".parse().unwrap(),
            currency: "USDT".to_string(),
            address: "TLBaRhANQoJFTqre9Nf1mjDRHMHEz4LvKE".to_string(),
            address_index: 1,
            status: crate::core::PaymentStatus::Confirmed,
            expires_at: chrono::Utc::now(),
            confirmed_at: Some(chrono::Utc::now()),
            webhook_url: Some(webhook_url.to_string()),
            webhook_sent: false,
            webhook_attempts: 0,
            customer_email: None,
            notes: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn sample_tx() -> ChainTransaction {
        ChainTransaction {
            id: 1,
            payment_request_id: 1,
            tx_hash: "deadbeef".to_string(),
            from_address: "TFromAddr".to_string(),
            to_address: "TLBaRhANQoJFTqre9Nf1mjDRHMHEz4LvKE".to_string(),
            amount: "10.000000".parse().unwrap(),
            network: "tron".to_string(),
            contract_address: Some("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string()),
            block_number: Some(100),
            block_timestamp: None,
            confirmations: 1,
            status: crate::core::TransactionStatus::Confirmed,
            detected_at: chrono::Utc::now(),
            confirmed_at: Some(chrono::Utc::now()),
        }
    }

    #[tokio::test]
    async fn delivers_once_on_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("X-PayKript-Signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new("test-secret");
        let store = AttemptRecordingStore::default();
        let payment = sample_payment(&server.uri());
        let tx = sample_tx();

        dispatcher.send_confirmation(&store, &payment, &tx).await;

        assert_eq!(store.attempts.lock().unwrap().as_slice(), &[true]);
    }

    #[tokio::test]
    async fn retries_exhaust_after_three_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new("test-secret");
        let store = AttemptRecordingStore::default();
        let payment = sample_payment(&server.uri());
        let tx = sample_tx();

        dispatcher.send_confirmation(&store, &payment, &tx).await;

        assert_eq!(store.attempts.lock().unwrap().as_slice(), &[false, false, false]);
    }

    #[test]
    fn signature_is_deterministic_over_identical_bytes() {
        let body = br#"{"a":1,"b":2}"#;
        let a = WebhookDispatcher::sign("secret", body);
        let b = WebhookDispatcher::sign("secret", body);
        assert_eq!(a, b);
        assert!(a.starts_with("sha256="));
    }

    #[test]
    fn signature_changes_with_secret() {
        let body = br#"{"a":1}"#;
        let a = WebhookDispatcher::sign("secret-one", body);
        let b = WebhookDispatcher::sign("secret-two", body);
        assert_ne!(a, b);
    }

    #[test]
    fn payload_object_keys_serialize_sorted() {
        let v = json!({"z": 1, "a": 2, "m": {"y": 1, "b": 2}});
        let bytes = serde_json::to_vec(&v).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        let a_pos = s.find("\"a\"").unwrap();
        let m_pos = s.find("\"m\"").unwrap();
        let z_pos = s.find("\"z\"").unwrap();
        let b_pos = s.find("\"b\"").unwrap();
        let y_pos = s.find("\"y\"").unwrap();
        assert!(a_pos < m_pos && m_pos < z_pos);
        assert!(b_pos < y_pos);
    }

    /// Exercises the signing path in isolation from a real payment -
    /// the merchant-facing "send test event" probe signs and posts the
    /// same way `send_confirmation` does, without touching `StoreGateway`.
    #[tokio::test]
    async fn send_test_event_reports_success_and_signs_the_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header_exists("X-PayKript-Signature"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new("test-secret");
        let result = dispatcher.send_test_event(&server.uri()).await;

        assert!(result.success);
        assert_eq!(result.status_code, Some(200));
        assert!(result.response_time_ms.is_some());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn send_test_event_reports_failure_on_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new("test-secret");
        let result = dispatcher.send_test_event(&server.uri()).await;

        assert!(!result.success);
        assert_eq!(result.status_code, Some(500));
    }
}
