//! Component D: the blockchain monitor. A continuous reconciliation loop
//! that polls the chain client for every open payment, matches transfers
//! against the expected amount in fixed-point decimal, upserts
//! transactions, confirms payments that cross the confirmation
//! threshold, and - strictly afterwards - expires payments past their
//! deadline so a same-tick confirmation is never overridden by expiry.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use crate::chain::ChainClient;
use crate::core::{PaymentRequest, TransactionStatus};
use crate::store::{NewChainTransaction, StoreGateway};
use crate::webhook::WebhookDispatcher;

const AMOUNT_TOLERANCE: &str = "0.01";
const USDT_DECIMALS: u32 = 6;
const TRANSFERS_PER_CALL: u32 = 50;

pub struct Monitor {
    store: Arc<dyn StoreGateway>,
    chain: Arc<ChainClient>,
    webhook: Arc<WebhookDispatcher>,
    usdt_contract: String,
    required_confirmations: i64,
    tick_interval: Duration,
    error_backoff: Duration,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn StoreGateway>,
        chain: Arc<ChainClient>,
        webhook: Arc<WebhookDispatcher>,
        usdt_contract: String,
        required_confirmations: i64,
        tick_interval: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            store,
            chain,
            webhook,
            usdt_contract,
            required_confirmations,
            tick_interval,
            error_backoff,
        }
    }

    /// Runs until `shutdown` is cancelled. Each tick completes in full
    /// before the cancellation is observed, giving the in-flight pass a
    /// bounded one-tick grace period.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "monitor tick failed, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(self.error_backoff) => {}
                    _ = shutdown.cancelled() => return,
                }
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.tick_interval) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }

    async fn tick(&self) -> crate::errors::GatewayResult<()> {
        let open_payments = self.store.list_open_payments().await?;

        for payment in &open_payments {
            if let Err(e) = self.reconcile_payment(payment).await {
                tracing::warn!(error = %e, payment_id = payment.id, "failed to reconcile payment");
            }
        }

        let expired = self.store.list_expired_open_payments().await?;
        for payment in expired {
            if let Err(e) = self.store.mark_expired(payment.id).await {
                tracing::warn!(error = %e, payment_id = payment.id, "failed to mark payment expired");
            } else {
                tracing::info!(payment_id = payment.id, "payment expired");
            }
        }

        Ok(())
    }

    async fn reconcile_payment(&self, payment: &PaymentRequest) -> crate::errors::GatewayResult<()> {
        let transfers = self
            .chain
            .list_trc20_transfers(&payment.address, &self.usdt_contract, TRANSFERS_PER_CALL)
            .await;

        let tolerance: Decimal = AMOUNT_TOLERANCE.parse().expect("static tolerance literal");

        for transfer in transfers {
            if transfer.to != payment.address || transfer.contract != self.usdt_contract {
                continue;
            }

            let observed = Decimal::from(transfer.raw_amount)
                .checked_div(Decimal::from(10u64.pow(USDT_DECIMALS)))
                .unwrap_or_default();

            if (observed - payment.amount).abs() > tolerance {
                continue;
            }

            let status = if transfer.confirmations >= self.required_confirmations {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Pending
            };

            let tx = self
                .store
                .upsert_transaction(NewChainTransaction {
                    payment_request_id: payment.id,
                    tx_hash: transfer.tx_hash.clone(),
                    from_address: transfer.from.clone(),
                    to_address: transfer.to.clone(),
                    amount: observed,
                    network: "tron".to_string(),
                    contract_address: Some(transfer.contract.clone()),
                    block_number: transfer.block_number,
                    block_timestamp: transfer
                        .timestamp_ms
                        .and_then(|ms| chrono::DateTime::from_timestamp_millis(ms)),
                    confirmations: transfer.confirmations,
                    status,
                })
                .await?;

            if tx.confirmations < self.required_confirmations {
                continue;
            }

            // Re-check live status rather than the snapshot captured at the
            // top of the tick: two distinct qualifying transfers for the
            // same payment in one tick must not each think the payment is
            // still PENDING and both dispatch a webhook.
            let live = self
                .store
                .get_payment(payment.id, payment.merchant_id)
                .await?
                .ok_or(crate::errors::GatewayError::NotFound("payment"))?;

            if live.status.is_terminal() {
                continue;
            }

            self.store.confirm_payment(payment.id, tx.id).await?;

            if let Some(confirmed) = self.store.get_payment(payment.id, payment.merchant_id).await? {
                self.webhook.send_confirmation(self.store.as_ref(), &confirmed, &tx).await;
            }

            // A payment is satisfied by a single transfer (spec §1
            // Non-goals: no partial-payment aggregation) - stop scanning
            // further transfers for an already-confirmed payment.
            break;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tolerance_accepts_one_cent_overage() {
        let requested = dec!(10.000000);
        let observed = dec!(10.010000);
        let tolerance: Decimal = AMOUNT_TOLERANCE.parse().unwrap();
        assert!((observed - requested).abs() <= tolerance);
    }

    #[test]
    fn tolerance_rejects_two_cent_overage() {
        let requested = dec!(10.000000);
        let observed = dec!(10.020000);
        let tolerance: Decimal = AMOUNT_TOLERANCE.parse().unwrap();
        assert!((observed - requested).abs() > tolerance);
    }

    #[test]
    fn raw_amount_conversion_matches_six_decimals() {
        let raw: u64 = 10_010_000;
        let observed = Decimal::from(raw) / Decimal::from(10u64.pow(USDT_DECIMALS));
        assert_eq!(observed, dec!(10.01));
    }
}
