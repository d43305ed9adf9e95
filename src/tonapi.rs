//! Transaction-lookup API client.
//!
//! The pipeline's transaction confirmation step asks an indexing service
//! whether a transaction hash landed successfully. The service sits behind
//! the [`TransactionLookup`] seam so tests can script outcomes.

use serde::Deserialize;

use crate::config::{TONAPI_BASE_URL, TONAPI_BASE_URL_TESTNET, TONAPI_KEY};
use crate::ton::endpoint::Network;

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionData {
    pub success: bool,
}

pub trait TransactionLookup: Send + Sync {
    fn transaction(
        &self,
        hash: &str,
    ) -> impl Future<Output = anyhow::Result<TransactionData>> + Send;
}

#[derive(Debug, Clone)]
pub struct TonapiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TonapiClient {
    pub fn new(network: Network) -> Self {
        let base_url = if network.is_testnet() {
            TONAPI_BASE_URL_TESTNET.clone()
        } else {
            TONAPI_BASE_URL.clone()
        };
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key: TONAPI_KEY.clone(),
        }
    }

    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }
}

impl TransactionLookup for TonapiClient {
    async fn transaction(&self, hash: &str) -> anyhow::Result<TransactionData> {
        let url = format!("{}/v2/blockchain/transactions/{}", self.base_url, hash);
        let mut request = self.http.get(&url);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
