//! Component F: the payment service. Reserves the next address index on
//! the merchant's active wallet and the payment row in a single
//! transaction (spec §5, scenario 6) so a derivation failure never
//! orphans an allocated index.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;

use crate::address;
use crate::core::{PaymentRequest, PaymentStatus};
use crate::errors::{GatewayError, GatewayResult};
use crate::store::{NewPaymentRequest, StoreGateway};

pub struct CreatePaymentRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub webhook_url: Option<String>,
    pub customer_email: Option<String>,
    pub notes: Option<String>,
}

pub struct CreatedPayment {
    pub payment: PaymentRequest,
    pub payment_uri: String,
}

pub struct PaymentService {
    store: Arc<dyn StoreGateway>,
    usdt_contract: String,
    payment_timeout_minutes: i64,
}

impl PaymentService {
    pub fn new(store: Arc<dyn StoreGateway>, usdt_contract: String, payment_timeout_minutes: i64) -> Self {
        Self {
            store,
            usdt_contract,
            payment_timeout_minutes,
        }
    }

    pub async fn create(
        &self,
        merchant_id: i64,
        req: CreatePaymentRequest,
    ) -> GatewayResult<CreatedPayment> {
        if req.amount <= Decimal::ZERO {
            return Err(GatewayError::Validation("amount must be positive".into()));
        }

        let wallet = self
            .store
            .get_active_wallet(merchant_id)
            .await?
            .ok_or(GatewayError::NoActiveWallet)?;

        let mut tx = self.store.begin().await?;

        let (index, wallet) = match self.store.allocate_next_address(&mut tx, wallet.id).await {
            Ok(pair) => pair,
            Err(e) => {
                // tx is dropped here, rolling back the allocation
                return Err(e);
            }
        };

        let index_u32 = u32::try_from(index)
            .map_err(|_| GatewayError::AddressDerivation("address index out of range".into()))?;

        let derived_address = match address::derive(&wallet.xpub, index_u32) {
            Ok(addr) => addr,
            Err(e) => {
                // dropping tx rolls back the index allocation - no orphaned index.
                return Err(e);
            }
        };

        let expires_at: DateTime<Utc> =
            Utc::now() + ChronoDuration::minutes(self.payment_timeout_minutes);

        let new = NewPaymentRequest {
            merchant_id,
            wallet_id: wallet.id,
            order_id: req.order_id,
            amount: req.amount,
            currency: req.currency.unwrap_or_else(|| "USDT".to_string()),
            address: derived_address,
            address_index: index,
            expires_at,
            webhook_url: req.webhook_url,
            customer_email: req.customer_email,
            notes: req.notes,
        };

        let payment = self.store.insert_payment_request(&mut tx, new).await?;
        tx.commit().await?;

        let payment_uri = payment_uri(&payment.address, payment.amount, &self.usdt_contract);

        Ok(CreatedPayment {
            payment,
            payment_uri,
        })
    }

    pub async fn get(&self, merchant_id: i64, payment_id: i64) -> GatewayResult<PaymentRequest> {
        self.store
            .get_payment(payment_id, merchant_id)
            .await?
            .ok_or(GatewayError::NotFound("payment not found"))
    }

    pub async fn by_order_id(&self, merchant_id: i64, order_id: &str) -> GatewayResult<PaymentRequest> {
        self.store
            .get_payment_by_order_id(merchant_id, order_id)
            .await?
            .ok_or(GatewayError::NotFound("payment not found"))
    }

    /// Payment plus its linked on-chain transactions, newest first.
    pub async fn get_with_transactions(
        &self,
        merchant_id: i64,
        payment_id: i64,
    ) -> GatewayResult<(PaymentRequest, Vec<crate::core::ChainTransaction>)> {
        let payment = self.get(merchant_id, payment_id).await?;
        let transactions = self.store.list_transactions_for_payment(payment.id).await?;
        Ok((payment, transactions))
    }

    pub async fn list(
        &self,
        merchant_id: i64,
        skip: i64,
        limit: i64,
        status: Option<PaymentStatus>,
    ) -> GatewayResult<Vec<PaymentRequest>> {
        self.store.list_payments(merchant_id, skip, limit, status).await
    }

    /// `list`, with each payment's linked on-chain transactions joined in.
    pub async fn list_with_transactions(
        &self,
        merchant_id: i64,
        skip: i64,
        limit: i64,
        status: Option<PaymentStatus>,
    ) -> GatewayResult<Vec<(PaymentRequest, Vec<crate::core::ChainTransaction>)>> {
        let payments = self.list(merchant_id, skip, limit, status).await?;
        let mut out = Vec::with_capacity(payments.len());
        for payment in payments {
            let transactions = self.store.list_transactions_for_payment(payment.id).await?;
            out.push((payment, transactions));
        }
        Ok(out)
    }

    /// Cancels a PENDING payment. The store rejects anything already
    /// terminal with `GatewayError::Conflict` (spec §7: "canceling a
    /// non-PENDING payment") - cancellation never overrides a confirmation.
    pub async fn cancel(&self, merchant_id: i64, payment_id: i64) -> GatewayResult<PaymentRequest> {
        self.store.cancel_payment(payment_id, merchant_id).await
    }

    pub async fn stats(&self, merchant_id: i64) -> GatewayResult<crate::store::PaymentStats> {
        self.store.payment_stats(merchant_id).await
    }
}

/// `tronlink://pay?...` deep link with a canonical decimal amount - no
/// trailing zeros beyond what the requested amount actually carries.
fn payment_uri(address: &str, amount: Decimal, contract: &str) -> String {
    format!(
        "tronlink://pay?address={}&amount={}&token={}",
        address,
        amount.normalize(),
        contract
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_uri_normalizes_trailing_zeros() {
        let uri = payment_uri(
            "TAddrXYZ",
            "10.000000".parse().unwrap(),
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
        );
        assert_eq!(
            uri,
            "tronlink://pay?address=TAddrXYZ&amount=10&token=TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"
        );
    }

    #[test]
    fn payment_uri_preserves_significant_fraction() {
        let uri = payment_uri(
            "TAddrXYZ",
            "10.500000".parse().unwrap(),
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
        );
        assert_eq!(
            uri,
            "tronlink://pay?address=TAddrXYZ&amount=10.5&token=TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"
        );
    }
}
