use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ton::endpoint::{Network, Selection};
use crate::ton::ton_to_nano;

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub static LS_CONFIG: LazyLock<String> =
    LazyLock::new(|| env_or("LS_CONFIG", "https://ton.org/global.config.json"));
pub static LS_CONFIG_TESTNET: LazyLock<String> = LazyLock::new(|| {
    env_or(
        "LS_CONFIG_TESTNET",
        "https://ton.org/testnet-global.config.json",
    )
});
pub static TONAPI_BASE_URL: LazyLock<String> =
    LazyLock::new(|| env_or("TONAPI_BASE_URL", "https://tonapi.io"));
pub static TONAPI_BASE_URL_TESTNET: LazyLock<String> =
    LazyLock::new(|| env_or("TONAPI_BASE_URL_TESTNET", "https://testnet.tonapi.io"));
pub static TONAPI_KEY: LazyLock<String> = LazyLock::new(|| env_or("TONAPI_KEY", ""));
pub static HOUSE_MNEMONIC: LazyLock<String> = LazyLock::new(|| env_or("HOUSE_MNEMONIC", ""));
pub static HOUSE_WALLET_ADDRESS: LazyLock<String> =
    LazyLock::new(|| env_or("HOUSE_WALLET_ADDRESS", ""));

/// Value attached to a deployed item so the item contract can pay for its
/// own initialization, in nano-TON.
pub static FORWARD_AMOUNT: LazyLock<u64> =
    LazyLock::new(|| ton_to_nano(&env_or("FORWARD_AMOUNT", "0.02")).unwrap_or(20_000_000));
pub static COLLECTION_TRANSFER_AMOUNT: LazyLock<u64> = LazyLock::new(|| {
    ton_to_nano(&env_or("COLLECTION_TRANSFER_AMOUNT", "0.05")).unwrap_or(50_000_000)
});
pub static NFT_TRANSFER_AMOUNT: LazyLock<u64> =
    LazyLock::new(|| ton_to_nano(&env_or("NFT_TRANSFER_AMOUNT", "0.05")).unwrap_or(50_000_000));
pub static NFT_TRANSFER_FORWARD_AMOUNT: LazyLock<u64> = LazyLock::new(|| {
    ton_to_nano(&env_or("NFT_TRANSFER_FORWARD_AMOUNT", "0.01")).unwrap_or(10_000_000)
});

pub static ROYALTY: LazyLock<f64> = LazyLock::new(|| env_parse("ROYALTY", 0.05));
pub static ROYALTY_BASE: LazyLock<u32> = LazyLock::new(|| env_parse("ROYALTY_BASE", 1000));

/// How the client picks a light server: a pinned index or automatic rotation.
fn ls_index_from_env() -> Selection {
    match std::env::var("LS_INDEX") {
        Ok(v) => match v.parse::<usize>() {
            Ok(i) => Selection::Fixed(i),
            Err(_) => Selection::Auto,
        },
        Err(_) => Selection::Auto,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub network: Network,
    pub ls_index: Selection,
    pub ls_retry_cnt: u32,
    pub config_retry_cnt: u32,
    pub run_method_retry_cnt: u32,
    pub request_timeout_secs: u64,
    pub mint_timeout_ticks: u32,
    pub transfer_timeout_ticks: u32,
}

impl ClientConfig {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            ls_index: Selection::Auto,
            ls_retry_cnt: 3,
            config_retry_cnt: 3,
            run_method_retry_cnt: 10,
            request_timeout_secs: 30,
            mint_timeout_ticks: 60,
            transfer_timeout_ticks: 60,
        }
    }

    pub fn from_env(network: Network) -> Self {
        dotenv::dotenv().ok();
        Self {
            network,
            ls_index: ls_index_from_env(),
            ls_retry_cnt: env_parse("LS_RETRY_CNT", 3),
            config_retry_cnt: env_parse("CONFIG_RETRY_CNT", 3),
            run_method_retry_cnt: env_parse("RUN_METHOD_RETRY_CNT", 10),
            request_timeout_secs: env_parse("LITESERVER_TIMEOUT", 30),
            mint_timeout_ticks: env_parse("MINT_TIMEOUT", 60),
            transfer_timeout_ticks: env_parse("TRANSFER_TIMEOUT", 60),
        }
    }

    pub fn directory_url(&self) -> String {
        match self.network {
            Network::Mainnet => LS_CONFIG.clone(),
            Network::Testnet => LS_CONFIG_TESTNET.clone(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(Network::Testnet)
    }
}

/// Message values the client attaches to mint and transfer sends, in nano-TON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MintAmounts {
    pub forward: u64,
    pub collection_deploy: u64,
    pub item_deploy: u64,
    pub item_transfer: u64,
    pub transfer_forward: u64,
}

impl MintAmounts {
    pub fn from_env() -> Self {
        Self {
            forward: *FORWARD_AMOUNT,
            collection_deploy: *COLLECTION_TRANSFER_AMOUNT,
            item_deploy: *NFT_TRANSFER_AMOUNT,
            item_transfer: *NFT_TRANSFER_AMOUNT,
            transfer_forward: *NFT_TRANSFER_FORWARD_AMOUNT,
        }
    }
}

impl Default for MintAmounts {
    fn default() -> Self {
        Self {
            forward: 20_000_000,
            collection_deploy: 50_000_000,
            item_deploy: 50_000_000,
            item_transfer: 50_000_000,
            transfer_forward: 10_000_000,
        }
    }
}

/// Per-task retry budgets for the background pipeline.
///
/// Dependency waits (an item mint waiting on its collection) get their own
/// budget, separate from transport-failure retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub workers: usize,
    pub mint_attempts: u32,
    pub mint_retry_delay_secs: u64,
    pub transfer_attempts: u32,
    pub transfer_retry_delay_secs: u64,
    pub transaction_attempts: u32,
    pub transaction_retry_delay_secs: u64,
    pub dependency_wait_attempts: u32,
    pub dependency_wait_delay_secs: u64,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            workers: env_parse("PIPELINE_WORKERS", 4),
            mint_attempts: env_parse("MINT_ATTEMPS_CNT", 3),
            mint_retry_delay_secs: env_parse("MINT_RETRY_DELAY", 60),
            transfer_attempts: env_parse("TRANSFER_ATTEMPS_CNT", 3),
            transfer_retry_delay_secs: env_parse("TRANSFER_RETRY_DELAY", 60),
            transaction_attempts: env_parse("TRANSACTION_ATTEMPS_CNT", 10),
            transaction_retry_delay_secs: env_parse("TRANSACTION_RETRY_DELAY", 30),
            dependency_wait_attempts: env_parse("DEPENDENCY_WAIT_ATTEMPS_CNT", 30),
            dependency_wait_delay_secs: env_parse("DEPENDENCY_WAIT_DELAY", 60),
        }
    }

    pub fn mint_retry_delay(&self) -> Duration {
        Duration::from_secs(self.mint_retry_delay_secs)
    }

    pub fn transfer_retry_delay(&self) -> Duration {
        Duration::from_secs(self.transfer_retry_delay_secs)
    }

    pub fn transaction_retry_delay(&self) -> Duration {
        Duration::from_secs(self.transaction_retry_delay_secs)
    }

    pub fn dependency_wait_delay(&self) -> Duration {
        Duration::from_secs(self.dependency_wait_delay_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            mint_attempts: 3,
            mint_retry_delay_secs: 60,
            transfer_attempts: 3,
            transfer_retry_delay_secs: 60,
            transaction_attempts: 10,
            transaction_retry_delay_secs: 30,
            dependency_wait_attempts: 30,
            dependency_wait_delay_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_config_uses_auto_selection() {
        let config = ClientConfig::default();
        assert!(matches!(config.ls_index, Selection::Auto));
        assert_eq!(config.ls_retry_cnt, 3);
        assert_eq!(config.run_method_retry_cnt, 10);
    }

    #[test]
    fn dependency_budget_is_distinct_from_mint_budget() {
        let config = PipelineConfig::default();
        assert!(config.dependency_wait_attempts > config.mint_attempts);
    }
}
