//! Price Oracle Adapter: BTC <-> token conversion with a short-lived cache
//! and the paid-amount tolerance check the Swap Engine uses to accept or
//! reject a reported Lightning/on-chain payment.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use alloy_primitives::{Address, U256};

use crate::config::OracleConfig;
use crate::error::{Error, Result};
use crate::rpc::RpcFuture;

/// Peg a token to exactly one satoshi per smallest unit; skips the price
/// feed entirely.
pub const PAIR_FIXED_ONE: &str = "$fixed-1";
/// Short-circuits `is_valid_amount_send`/`is_valid_amount_receive` to
/// `true` without consulting the price feed, for tokens whose value isn't
/// tracked (e.g. test fixtures, points-style rewards).
pub const PAIR_IGNORE: &str = "$ignore";

/// External BTC-denominated price feed (OKX-style ticker), one value per
/// pair name, fetched lazily and cached by [`PriceOracle`].
pub trait PriceIndex: Send + Sync {
    /// Price of one whole unit of `pair`'s base asset, denominated in BTC.
    fn fetch_price(&self, pair: &str) -> RpcFuture<'_, f64>;
}

/// How a token maps onto the price feed: which pair name prices it, and
/// how many decimals its smallest unit has.
#[derive(Debug, Clone)]
pub struct TokenPricing {
    pub pair: String,
    pub decimals: u32,
}

struct CachedPrice {
    value: f64,
    fetched_at: Instant,
}

/// Converts between satoshis and token smallest-units, and validates a
/// reported paid amount against the expected converted amount within a
/// configured tolerance.
pub struct PriceOracle<I> {
    index: I,
    tokens: HashMap<Address, TokenPricing>,
    cache: Mutex<HashMap<String, CachedPrice>>,
    cache_ttl: Duration,
    max_allowed_fee_diff_ppm: u64,
}

impl<I: PriceIndex> PriceOracle<I> {
    pub fn new(index: I, tokens: HashMap<Address, TokenPricing>, config: &OracleConfig, cache_ttl: Duration) -> Self {
        Self {
            index,
            tokens,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
            max_allowed_fee_diff_ppm: config.max_allowed_fee_diff_ppm,
        }
    }

    fn pricing_for(&self, token: Address) -> Result<&TokenPricing> {
        self.tokens
            .get(&token)
            .ok_or_else(|| Error::InvalidArgument(format!("no pricing registered for token {token:#x}")))
    }

    async fn price_for(&self, pair: &str) -> Result<f64> {
        if let Some(cached) = self.cache.lock().unwrap().get(pair) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.value);
            }
        }
        let value = self.index.fetch_price(pair).await?;
        log::debug!("oracle: fetched price for {pair}: {value}");
        self.cache.lock().unwrap().insert(
            pair.to_string(),
            CachedPrice {
                value,
                fetched_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Converts `sats` (milli-satoshi precision retained in the result) to
    /// the smallest unit of `token`.
    pub async fn get_from_btc(&self, sats: u128, token: Address) -> Result<u128> {
        let pricing = self.pricing_for(token)?;
        if pricing.pair == PAIR_FIXED_ONE {
            return Ok(sats);
        }
        let price = self.price_for(&pricing.pair).await?;
        let scaled = (sats as f64) * 10f64.powi(pricing.decimals as i32) * 1000.0 / price;
        Ok(scaled.round() as u128)
    }

    /// Inverse of [`Self::get_from_btc`].
    pub async fn get_to_btc(&self, amount: u128, token: Address) -> Result<u128> {
        let pricing = self.pricing_for(token)?;
        if pricing.pair == PAIR_FIXED_ONE {
            return Ok(amount);
        }
        let price = self.price_for(&pricing.pair).await?;
        let scaled = (amount as f64) * price / (10f64.powi(pricing.decimals as i32) * 1000.0);
        Ok(scaled.round() as u128)
    }

    /// Validates a claimed-send amount: `sats` were sent over Bitcoin,
    /// `paid_token` is what the counterparty credited on the EVM side.
    pub async fn is_valid_amount_send(
        &self,
        sats: u64,
        base_fee_sats: u64,
        fee_ppm: u64,
        paid_token: U256,
        token: Address,
    ) -> Result<bool> {
        if self.pricing_for(token)?.pair == PAIR_IGNORE {
            return Ok(true);
        }
        let total_sats = (sats as u128) * (1_000_000 + fee_ppm as u128) / 1_000_000 + base_fee_sats as u128;
        self.check_within_tolerance(total_sats, paid_token, token).await
    }

    /// Validates a claimed-receive amount: the counterparty will pay
    /// `sats` minus its fee for `paid_token` credited upfront.
    pub async fn is_valid_amount_receive(
        &self,
        sats: u64,
        base_fee_sats: u64,
        fee_ppm: u64,
        paid_token: U256,
        token: Address,
    ) -> Result<bool> {
        if self.pricing_for(token)?.pair == PAIR_IGNORE {
            return Ok(true);
        }
        let gross = (sats as u128) * (1_000_000 - fee_ppm.min(1_000_000) as u128) / 1_000_000;
        let total_sats = gross.saturating_sub(base_fee_sats as u128);
        self.check_within_tolerance(total_sats, paid_token, token).await
    }

    async fn check_within_tolerance(&self, total_sats: u128, paid_token: U256, token: Address) -> Result<bool> {
        let expected_token = self.get_from_btc(total_sats, token).await?;
        if expected_token == 0 {
            return Ok(paid_token.is_zero());
        }
        let paid = u128::try_from(paid_token).unwrap_or(u128::MAX);
        let diff = paid as i128 - expected_token as i128;
        let diff_ppm = diff * 1_000_000 / expected_token as i128;
        log::debug!("oracle: expected {expected_token}, paid {paid}, diff_ppm {diff_ppm}");
        Ok(diff_ppm <= self.max_allowed_fee_diff_ppm as i128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedIndex(f64);
    impl PriceIndex for FixedIndex {
        fn fetch_price(&self, _pair: &str) -> RpcFuture<'_, f64> {
            let value = self.0;
            Box::pin(async move { Ok(value) })
        }
    }

    fn oracle(pair: &str, decimals: u32, price: f64, ppm: u64) -> (PriceOracle<FixedIndex>, Address) {
        let token = Address::repeat_byte(0xAA);
        let mut tokens = HashMap::new();
        tokens.insert(
            token,
            TokenPricing {
                pair: pair.to_string(),
                decimals,
            },
        );
        let config = OracleConfig {
            max_allowed_fee_diff_ppm: ppm,
        };
        (
            PriceOracle::new(FixedIndex(price), tokens, &config, Duration::from_secs(10)),
            token,
        )
    }

    #[tokio::test]
    async fn from_btc_and_to_btc_are_inverses_within_rounding() {
        let (oracle, token) = oracle("BTC-USDC", 6, 60_000.0, 5_000);
        let token_amount = oracle.get_from_btc(100_000_000, token).await.unwrap();
        let sats_back = oracle.get_to_btc(token_amount, token).await.unwrap();
        let diff = (sats_back as i128 - 100_000_000_000i128).abs();
        assert!(diff < 1_000_000, "round trip drifted too far: {sats_back}");
    }

    #[tokio::test]
    async fn fixed_one_is_identity() {
        let (oracle, token) = oracle(PAIR_FIXED_ONE, 0, 1.0, 5_000);
        assert_eq!(oracle.get_from_btc(42, token).await.unwrap(), 42);
        assert_eq!(oracle.get_to_btc(42, token).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn ignore_pair_always_valid() {
        let (oracle, token) = oracle(PAIR_IGNORE, 8, 1.0, 0);
        assert!(
            oracle
                .is_valid_amount_send(1, 0, 0, U256::from(999_999_999u64), token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn send_within_tolerance_is_valid() {
        let (oracle, token) = oracle("BTC-USDC", 6, 1.0, 5_000);
        let expected = oracle.get_from_btc(1_000_000, token).await.unwrap();
        let paid = U256::from(expected);
        assert!(
            oracle
                .is_valid_amount_send(1_000_000, 0, 0, paid, token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn send_outside_tolerance_is_invalid() {
        let (oracle, token) = oracle("BTC-USDC", 6, 1.0, 1_000);
        let expected = oracle.get_from_btc(1_000_000, token).await.unwrap();
        let paid = U256::from(expected * 2);
        assert!(
            !oracle
                .is_valid_amount_send(1_000_000, 0, 0, paid, token)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn send_underpayment_is_valid() {
        let (oracle, token) = oracle("BTC-USDC", 6, 1.0, 1_000);
        let expected = oracle.get_from_btc(1_000_000, token).await.unwrap();
        let paid = U256::from(expected / 2);
        assert!(
            oracle
                .is_valid_amount_send(1_000_000, 0, 0, paid, token)
                .await
                .unwrap()
        );
    }
}
