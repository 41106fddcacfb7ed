//! HTTP client for the market-making intermediary a swap is negotiated
//! with. The intermediary's own pricing/liquidity policy is out of scope;
//! this module only speaks the wire contract described in §6.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rpc::RpcFuture;

/// Response to a payment-authorization poll.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAuthorization {
    pub is_paid: bool,
    /// Packed swap `data` word, present once paid.
    pub data: Option<U256>,
    pub prefix: Option<String>,
    pub timeout: Option<u64>,
    pub signature: Option<String>,
    pub expiry: Option<u64>,
}

/// Response to a `receive_lightning` request, offering terms for an
/// EVM-token-to-Lightning swap.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightningReceiveOffer {
    pub pr: String,
    pub secret: Option<String>,
    pub intermediary_key: Address,
    pub total: U256,
    pub security_deposit: U256,
    pub swap_fee: u64,
    pub pricing_info: String,
    pub fee_rate: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReceiveLightningRequest<'a> {
    amount_sats: u64,
    token: Address,
    offerer: Address,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: String,
}

/// The intermediary wire contract the Swap Engine consumes, abstracted
/// from [`IntermediaryClient`]'s concrete HTTP transport so reconciliation
/// can be driven against an in-memory fake in tests (the same split
/// `EvmRpc`/`FakeRpc` and `Storage`/`MemorySwapStorage` already use).
pub trait IntermediaryApi: Send + Sync {
    fn get_payment_authorization<'a>(
        &'a self,
        base_url: &'a str,
        pr: &'a str,
        auth_token: &'a str,
        offerer: Address,
        base_fee: u64,
        fee_ppm: u64,
    ) -> RpcFuture<'a, PaymentAuthorization>;

    fn receive_lightning<'a>(
        &'a self,
        base_url: &'a str,
        auth_token: &'a str,
        amount_sats: u64,
        token: Address,
        offerer: Address,
        description: &'a str,
    ) -> RpcFuture<'a, LightningReceiveOffer>;
}

/// Talks to one intermediary's HTTP API over a base URL fixed at
/// construction.
#[derive(Debug, Clone)]
pub struct IntermediaryClient {
    client: reqwest::Client,
}

impl Default for IntermediaryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IntermediaryClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Polls whether `payment_hash` (identified via `pr`, the invoice or
    /// descriptor the intermediary issued) has been paid, and if so, the
    /// authorization data needed to commit the swap on-chain.
    pub async fn get_payment_authorization(
        &self,
        base_url: &str,
        pr: &str,
        auth_token: &str,
        offerer: Address,
        base_fee: u64,
        fee_ppm: u64,
    ) -> Result<PaymentAuthorization> {
        let url = format!(
            "{}/payment-authorization?pr={}&offerer={:#x}&baseFee={}&feePpm={}",
            base_url.trim_end_matches('/'),
            pr,
            offerer,
            base_fee,
            fee_ppm
        );
        self.get_json(&url, auth_token).await
    }

    /// Requests Lightning-receive terms for a token-to-Lightning swap.
    pub async fn receive_lightning(
        &self,
        base_url: &str,
        auth_token: &str,
        amount_sats: u64,
        token: Address,
        offerer: Address,
        description: &str,
    ) -> Result<LightningReceiveOffer> {
        let url = format!("{}/receive-lightning", base_url.trim_end_matches('/'));
        let body = ReceiveLightningRequest {
            amount_sats,
            token,
            offerer,
            description,
        };
        self.post_json(&url, auth_token, &body).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, auth_token: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(auth_token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("failed to reach {url}: {e}")))?;
        self.parse_response(url, response).await
    }

    async fn post_json<T: serde::de::DeserializeOwned, R: Serialize>(
        &self,
        url: &str,
        auth_token: &str,
        body: &R,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .bearer_auth(auth_token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(format!("failed to reach {url}: {e}")))?;
        self.parse_response(url, response).await
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(&self, url: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("failed to read response from {url}: {e}")))?;
        log::debug!("intermediary {url} -> {status}: {text}");

        if !status.is_success() {
            let body = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            return Err(Error::HttpResponse {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&text).map_err(|e| Error::Parse(format!("failed to parse response from {url}: {e}. body: {text}")))
    }
}

impl IntermediaryApi for IntermediaryClient {
    fn get_payment_authorization<'a>(
        &'a self,
        base_url: &'a str,
        pr: &'a str,
        auth_token: &'a str,
        offerer: Address,
        base_fee: u64,
        fee_ppm: u64,
    ) -> RpcFuture<'a, PaymentAuthorization> {
        Box::pin(self.get_payment_authorization(base_url, pr, auth_token, offerer, base_fee, fee_ppm))
    }

    fn receive_lightning<'a>(
        &'a self,
        base_url: &'a str,
        auth_token: &'a str,
        amount_sats: u64,
        token: Address,
        offerer: Address,
        description: &'a str,
    ) -> RpcFuture<'a, LightningReceiveOffer> {
        Box::pin(self.receive_lightning(base_url, auth_token, amount_sats, token, offerer, description))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_authorization_parses_unpaid_shape() {
        let raw = r#"{"isPaid":false,"data":null,"prefix":null,"timeout":null,"signature":null,"expiry":null}"#;
        let parsed: PaymentAuthorization = serde_json::from_str(raw).unwrap();
        assert!(!parsed.is_paid);
        assert!(parsed.data.is_none());
    }

    #[test]
    fn payment_authorization_parses_paid_shape() {
        let raw = r#"{"isPaid":true,"data":"0x1","prefix":"initialize","timeout":1700000000,"signature":"0xabc","expiry":1700003600}"#;
        let parsed: PaymentAuthorization = serde_json::from_str(raw).unwrap();
        assert!(parsed.is_paid);
        assert_eq!(parsed.data, Some(U256::from(1)));
        assert_eq!(parsed.prefix.as_deref(), Some("initialize"));
    }
}
