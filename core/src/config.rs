//! Engine configuration: grace periods, gas budgets, relay scan parameters,
//! and concurrency limits.
//!
//! Loaded from a TOML file with a handful of environment-variable overrides,
//! the same shape the BTC-relayer companion service uses for its own config.

use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;

fn get_env_var(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Top-level engine configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// Authorization signatures must have at least this many seconds left
    /// before their `timeout` to be accepted.
    #[serde(default = "default_auth_grace_period")]
    pub auth_grace_period: u64,
    /// Minimum seconds between a claim authorization's issuance and the
    /// swap's expiry.
    #[serde(default = "default_claim_grace_period")]
    pub claim_grace_period: u64,
    /// Minimum seconds past expiry before a refund is offered.
    #[serde(default = "default_refund_grace_period")]
    pub refund_grace_period: u64,
    /// Upper bound on concurrent intermediary polls during reconciliation.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Milliseconds a fetched BTC price stays valid before refetching.
    #[serde(default = "default_price_cache_ms")]
    pub price_cache_ms: u64,

    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub contract: ContractConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
}

/// BTC Relay Client tuning parameters.
#[derive(Deserialize, Clone, Debug)]
pub struct RelayConfig {
    /// Number of EVM blocks per log-query window when paging backwards.
    #[serde(default = "default_log_blocks_limit")]
    pub log_blocks_limit: u64,
    /// Milliseconds to sleep between empty relay log-scan windows.
    #[serde(default = "default_log_scan_sleep_ms")]
    pub log_scan_sleep_ms: u64,

    /// Gas budget for submitting the genesis header.
    #[serde(default = "default_gas_initial")]
    pub gas_initial: u64,
    /// Base gas for a main-chain header batch, per additional header.
    #[serde(default = "default_gas_main_base")]
    pub gas_main_base: u64,
    #[serde(default = "default_gas_main_per_header")]
    pub gas_main_per_header: u64,
    /// Base gas for opening a new fork, per additional header.
    #[serde(default = "default_gas_new_fork_base")]
    pub gas_new_fork_base: u64,
    #[serde(default = "default_gas_new_fork_per_header")]
    pub gas_new_fork_per_header: u64,
    /// Base gas for extending an existing fork, per additional header.
    #[serde(default = "default_gas_fork_base")]
    pub gas_fork_base: u64,
    #[serde(default = "default_gas_fork_per_header")]
    pub gas_fork_per_header: u64,
    /// Gas estimate per header for `estimate_synchronize_fee`.
    #[serde(default = "default_gas_per_synchronize_header")]
    pub gas_per_synchronize_header: u64,
}

/// Swap Contract Client gas budgets, magic constants reproduced verbatim so
/// fee estimates stay bit-compatible with market-making intermediaries that
/// hardcode the same numbers.
#[derive(Deserialize, Clone, Debug)]
pub struct ContractConfig {
    #[serde(default = "default_gas_init")]
    pub gas_init: u64,
    #[serde(default = "default_gas_init_pay_in_pre")]
    pub gas_init_pay_in_pre: u64,
    #[serde(default = "default_gas_claim_with_secret")]
    pub gas_claim_with_secret: u64,
    #[serde(default = "default_gas_claim_with_tx_data_base")]
    pub gas_claim_with_tx_data_base: u64,
    #[serde(default = "default_gas_claim_with_tx_data_per_byte")]
    pub gas_claim_with_tx_data_per_byte: u64,
    #[serde(default = "default_gas_refund")]
    pub gas_refund: u64,
    #[serde(default = "default_gas_refund_with_auth")]
    pub gas_refund_with_auth: u64,
    #[serde(default = "default_gas_deposit")]
    pub gas_deposit: u64,
    #[serde(default = "default_gas_withdraw")]
    pub gas_withdraw: u64,
    #[serde(default = "default_gas_transfer")]
    pub gas_transfer: u64,
    #[serde(default = "default_gas_approve")]
    pub gas_approve: u64,
}

fn default_gas_init() -> u64 {
    100_000
}
fn default_gas_init_pay_in_pre() -> u64 {
    80_000
}
fn default_gas_claim_with_secret() -> u64 {
    150_000
}
fn default_gas_claim_with_tx_data_base() -> u64 {
    200_000
}
fn default_gas_claim_with_tx_data_per_byte() -> u64 {
    100
}
fn default_gas_refund() -> u64 {
    100_000
}
fn default_gas_refund_with_auth() -> u64 {
    120_000
}
fn default_gas_deposit() -> u64 {
    80_000
}
fn default_gas_withdraw() -> u64 {
    100_000
}
fn default_gas_transfer() -> u64 {
    21_000
}
fn default_gas_approve() -> u64 {
    21_000
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            gas_init: default_gas_init(),
            gas_init_pay_in_pre: default_gas_init_pay_in_pre(),
            gas_claim_with_secret: default_gas_claim_with_secret(),
            gas_claim_with_tx_data_base: default_gas_claim_with_tx_data_base(),
            gas_claim_with_tx_data_per_byte: default_gas_claim_with_tx_data_per_byte(),
            gas_refund: default_gas_refund(),
            gas_refund_with_auth: default_gas_refund_with_auth(),
            gas_deposit: default_gas_deposit(),
            gas_withdraw: default_gas_withdraw(),
            gas_transfer: default_gas_transfer(),
            gas_approve: default_gas_approve(),
        }
    }
}

/// Price Oracle Adapter tolerance and caching parameters.
#[derive(Deserialize, Clone, Debug)]
pub struct OracleConfig {
    /// Maximum allowed deviation (parts per million) between a paid amount
    /// and the expected converted amount before `is_valid_amount_*` fails.
    #[serde(default = "default_max_allowed_fee_diff_ppm")]
    pub max_allowed_fee_diff_ppm: u64,
}

fn default_max_allowed_fee_diff_ppm() -> u64 {
    5_000
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_allowed_fee_diff_ppm: default_max_allowed_fee_diff_ppm(),
        }
    }
}

fn default_auth_grace_period() -> u64 {
    300
}
fn default_claim_grace_period() -> u64 {
    600
}
fn default_refund_grace_period() -> u64 {
    600
}
fn default_max_concurrent_requests() -> usize {
    8
}
fn default_price_cache_ms() -> u64 {
    10_000
}
fn default_log_blocks_limit() -> u64 {
    2500
}
fn default_log_scan_sleep_ms() -> u64 {
    500
}
fn default_gas_initial() -> u64 {
    150_000
}
fn default_gas_main_base() -> u64 {
    40_000
}
fn default_gas_main_per_header() -> u64 {
    40_000
}
fn default_gas_new_fork_base() -> u64 {
    200_000
}
fn default_gas_new_fork_per_header() -> u64 {
    100_000
}
fn default_gas_fork_base() -> u64 {
    200_000
}
fn default_gas_fork_per_header() -> u64 {
    100_000
}
fn default_gas_per_synchronize_header() -> u64 {
    35_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            log_blocks_limit: default_log_blocks_limit(),
            log_scan_sleep_ms: default_log_scan_sleep_ms(),
            gas_initial: default_gas_initial(),
            gas_main_base: default_gas_main_base(),
            gas_main_per_header: default_gas_main_per_header(),
            gas_new_fork_base: default_gas_new_fork_base(),
            gas_new_fork_per_header: default_gas_new_fork_per_header(),
            gas_fork_base: default_gas_fork_base(),
            gas_fork_per_header: default_gas_fork_per_header(),
            gas_per_synchronize_header: default_gas_per_synchronize_header(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auth_grace_period: default_auth_grace_period(),
            claim_grace_period: default_claim_grace_period(),
            refund_grace_period: default_refund_grace_period(),
            max_concurrent_requests: default_max_concurrent_requests(),
            price_cache_ms: default_price_cache_ms(),
            relay: RelayConfig::default(),
            contract: ContractConfig::default(),
            oracle: OracleConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML file, with a few settings
    /// overridable via environment variables.
    ///
    /// # Errors
    /// * the file does not exist or cannot be read
    /// * the contents are not valid TOML for this shape
    pub fn from_file(path: &str) -> Result<Self> {
        let raw = fs::read_to_string(path).context("failed to read config file")?;
        let mut config: EngineConfig =
            toml::from_str(&raw).context("failed to parse config file")?;

        if let Some(v) = get_env_var("SWAPRELAY_MAX_CONCURRENT_REQUESTS") {
            config.max_concurrent_requests = v
                .parse()
                .context("invalid SWAPRELAY_MAX_CONCURRENT_REQUESTS")?;
        }
        if let Some(v) = get_env_var("SWAPRELAY_LOG_BLOCKS_LIMIT") {
            config.relay.log_blocks_limit =
                v.parse().context("invalid SWAPRELAY_LOG_BLOCKS_LIMIT")?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::default();
        assert_eq!(config.auth_grace_period, 300);
        assert_eq!(config.claim_grace_period, 600);
        assert_eq!(config.refund_grace_period, 600);
        assert_eq!(config.relay.log_blocks_limit, 2500);
        assert_eq!(config.contract.gas_claim_with_secret, 150_000);
        assert_eq!(config.oracle.max_allowed_fee_diff_ppm, 5_000);
    }
}
