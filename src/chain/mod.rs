//! Component B: typed wrapper over the upstream TRC-20 chain indexer
//! (TronGrid). Failures never propagate to the caller as errors - per
//! spec §4.B, `list_trc20_transfers` returns an empty list and
//! `get_transaction` returns `None` on any upstream failure, so the
//! monitor can simply retry on the next tick.

use serde::Deserialize;
use std::time::Duration;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TransferObservation {
    pub tx_hash: String,
    pub from: String,
    pub to: String,
    pub raw_amount: u64,
    pub contract: String,
    pub block_number: Option<i64>,
    pub timestamp_ms: Option<i64>,
    pub confirmations: i64,
}

#[derive(Debug, Clone)]
pub struct TransactionDetail {
    pub tx_hash: String,
    pub block_number: Option<i64>,
    pub confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct TrongridTransferListResponse {
    #[serde(default)]
    data: Vec<TrongridTransfer>,
}

#[derive(Debug, Deserialize)]
struct TrongridTransfer {
    transaction_id: String,
    from: String,
    to: String,
    value: String,
    token_info: TrongridTokenInfo,
    #[serde(default)]
    block_timestamp: Option<i64>,
    #[serde(default)]
    confirmed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TrongridTokenInfo {
    address: String,
}

pub struct ChainClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ChainClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("failed to build chain client http client");

        Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn with_api_key_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header("TRON-PRO-API-KEY", &self.api_key)
        }
    }

    pub async fn list_trc20_transfers(
        &self,
        address: &str,
        contract: &str,
        limit: u32,
    ) -> Vec<TransferObservation> {
        let url = format!(
            "{}/v1/accounts/{}/transactions/trc20",
            self.base_url, address
        );

        let request = self.with_api_key_header(self.http.get(&url)).query(&[
            ("limit", limit.to_string()),
            ("contract_address", contract.to_string()),
        ]);

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, %address, "trongrid request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), %address, "trongrid returned non-success status");
            return Vec::new();
        }

        let parsed: TrongridTransferListResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(error = %e, %address, "trongrid response did not parse");
                return Vec::new();
            }
        };

        parsed
            .data
            .into_iter()
            .filter_map(|t| {
                let raw_amount: u64 = t.value.parse().ok()?;
                Some(TransferObservation {
                    tx_hash: t.transaction_id,
                    from: t.from,
                    to: t.to,
                    raw_amount,
                    contract: t.token_info.address,
                    block_number: None,
                    timestamp_ms: t.block_timestamp,
                    confirmations: if t.confirmed.unwrap_or(false) { 1 } else { 0 },
                })
            })
            .collect()
    }

    pub async fn get_transaction(&self, tx_hash: &str) -> Option<TransactionDetail> {
        let url = format!("{}/wallet/gettransactionbyid", self.base_url);

        let request = self
            .with_api_key_header(self.http.post(&url))
            .json(&serde_json::json!({ "value": tx_hash }));

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, %tx_hash, "trongrid get_transaction failed");
                return None;
            }
        };

        if !response.status().is_success() {
            return None;
        }

        let body: serde_json::Value = response.json().await.ok()?;
        if body.get("txID").is_none() {
            return None;
        }

        let block_number = body
            .get("blockNumber")
            .and_then(|v| v.as_i64());

        Some(TransactionDetail {
            tx_hash: tx_hash.to_string(),
            block_number,
            confirmed: block_number.is_some(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn list_returns_empty_on_connection_failure() {
        let client = ChainClient::new("http://127.0.0.1:1", "");
        let transfers = client
            .list_trc20_transfers("TXyz", "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", 50)
            .await;
        assert!(transfers.is_empty());
    }

    #[tokio::test]
    async fn get_transaction_returns_none_on_connection_failure() {
        let client = ChainClient::new("http://127.0.0.1:1", "");
        assert!(client.get_transaction("deadbeef").await.is_none());
    }

    #[tokio::test]
    async fn list_parses_trongrid_transfer_body_and_sends_api_key_header() {
        let server = MockServer::start().await;
        let contract = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

        Mock::given(method("GET"))
            .and(path("/v1/accounts/TXyz/transactions/trc20"))
            .and(header("TRON-PRO-API-KEY", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "transaction_id": "deadbeef",
                    "from": "TFromAddr",
                    "to": "TXyz",
                    "value": "10000000",
                    "token_info": { "address": contract },
                    "block_timestamp": 1_700_000_000_000i64,
                    "confirmed": true,
                }]
            })))
            .mount(&server)
            .await;

        let client = ChainClient::new(server.uri(), "test-key");
        let transfers = client.list_trc20_transfers("TXyz", contract, 50).await;

        assert_eq!(transfers.len(), 1);
        let t = &transfers[0];
        assert_eq!(t.tx_hash, "deadbeef");
        assert_eq!(t.raw_amount, 10_000_000);
        assert_eq!(t.contract, contract);
        assert_eq!(t.confirmations, 1);
    }

    #[tokio::test]
    async fn list_skips_api_key_header_when_unset() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "data": [] })))
            .mount(&server)
            .await;

        let client = ChainClient::new(server.uri(), "");
        let transfers = client
            .list_trc20_transfers("TXyz", "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", 50)
            .await;
        assert!(transfers.is_empty());
    }
}
