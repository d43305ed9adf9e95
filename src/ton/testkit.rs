//! Scripted in-memory chain used by unit tests.
//!
//! The mock speaks the same trait seams as production: a connector that
//! "opens" servers against endpoint indices, a signer whose output encodes
//! the sequence number it was given, and a builder whose payloads the mock
//! chain interprets to mutate its own state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::{ClientConfig, MintAmounts};
use crate::ton::address::TonAddress;
use crate::ton::builder::{CollectionInit, CollectionSpec, NftMessageBuilder, WalletSigner};
use crate::ton::client::TonClient;
use crate::ton::connection::{
    AccountState, Connect, LiteServer, LiteServerError, MethodResult, StackValue,
};
use crate::ton::endpoint::{EndpointPool, Network, Selection};

pub(crate) fn addr(seed: u8) -> TonAddress {
    TonAddress::new(0, [seed; 32])
}

pub(crate) fn house_wallet() -> TonAddress {
    addr(0x01)
}

pub(crate) fn collection_address() -> TonAddress {
    addr(0xC0)
}

pub(crate) fn item_address(index: u64) -> TonAddress {
    let mut hash = [0xEE; 32];
    hash[24..32].copy_from_slice(&index.to_be_bytes());
    TonAddress::new(0, hash)
}

pub(crate) fn initialized_account() -> AccountState {
    AccountState {
        balance: 1_000_000,
        code: "te6ccgEBAQEAAgAAAA==".to_string(),
        data: String::new(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum StubPayload {
    Mint { index: u64 },
    BatchMint { from: u64, count: u64 },
    Transfer { new_owner: TonAddress },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StubMessage {
    pub seqno: u32,
    pub dest: TonAddress,
    pub amount: u64,
    pub payload: Option<StubPayload>,
    pub has_state_init: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SendRecord {
    pub endpoint: usize,
    pub message: StubMessage,
}

#[derive(Default)]
pub(crate) struct ChainState {
    pub seqno: u32,
    pub next_index: u64,
    pub accounts: HashMap<TonAddress, AccountState>,
    pub owners: HashMap<TonAddress, TonAddress>,
    /// Every send_boc call, including ones that fail.
    pub send_attempts: Vec<usize>,
    /// Sends the chain accepted.
    pub accepted: Vec<SendRecord>,
    pub fail_send_on: HashSet<usize>,
    pub fail_run_on: HashSet<usize>,
    pub fail_account_state: bool,
}

pub(crate) type SharedChain = Arc<Mutex<ChainState>>;

pub(crate) fn chain() -> SharedChain {
    Arc::new(Mutex::new(ChainState::default()))
}

pub(crate) struct MockConnector {
    pub net: SharedChain,
}

impl Connect for MockConnector {
    type Server = MockServer;

    async fn open(&self, endpoint: &crate::ton::endpoint::Endpoint) -> Result<MockServer, LiteServerError> {
        Ok(MockServer {
            net: self.net.clone(),
            endpoint: endpoint.index,
        })
    }
}

pub(crate) struct MockServer {
    net: SharedChain,
    endpoint: usize,
}

impl LiteServer for MockServer {
    async fn send_boc(&self, boc: &[u8]) -> Result<(), LiteServerError> {
        let mut state = self.net.lock().unwrap();
        state.send_attempts.push(self.endpoint);
        if state.fail_send_on.contains(&self.endpoint) {
            return Err(LiteServerError::Transport(format!(
                "endpoint {} refused the message",
                self.endpoint
            )));
        }
        let message: StubMessage = serde_json::from_slice(boc)
            .map_err(|e| LiteServerError::Transport(e.to_string()))?;
        state.seqno += 1;
        if message.has_state_init {
            let dest = message.dest;
            state.accounts.insert(dest, initialized_account());
        }
        match &message.payload {
            Some(StubPayload::Mint { index }) => {
                state.accounts.insert(item_address(*index), initialized_account());
                state.owners.insert(item_address(*index), house_wallet());
                state.next_index = index + 1;
            }
            Some(StubPayload::BatchMint { from, count }) => {
                for offset in 0..*count {
                    let item = item_address(from + offset);
                    state.accounts.insert(item, initialized_account());
                    state.owners.insert(item, house_wallet());
                }
                state.next_index = from + count;
            }
            Some(StubPayload::Transfer { new_owner }) => {
                state.owners.insert(message.dest, *new_owner);
            }
            None => {}
        }
        state.accepted.push(SendRecord {
            endpoint: self.endpoint,
            message,
        });
        Ok(())
    }

    async fn run_method(
        &self,
        address: &TonAddress,
        method: &str,
        stack: Vec<StackValue>,
    ) -> Result<MethodResult, LiteServerError> {
        let state = self.net.lock().unwrap();
        if state.fail_run_on.contains(&self.endpoint) {
            return Err(LiteServerError::Transport(format!(
                "endpoint {} unreachable",
                self.endpoint
            )));
        }
        let ok = |stack: Vec<StackValue>| MethodResult {
            gas_used: 100,
            exit_code: 0,
            stack,
        };
        let result = match method {
            "seqno" => ok(vec![StackValue::Int(state.seqno as i64)]),
            "get_collection_data" => ok(vec![StackValue::Int(state.next_index as i64)]),
            "get_nft_address_by_index" => {
                let index = stack
                    .first()
                    .and_then(StackValue::as_int)
                    .unwrap_or_default() as u64;
                ok(vec![StackValue::Address(item_address(index))])
            }
            "get_nft_data" => match state.owners.get(address) {
                Some(owner) => ok(vec![
                    StackValue::Int(1),
                    StackValue::Int(0),
                    StackValue::Address(collection_address()),
                    StackValue::Address(*owner),
                ]),
                None => MethodResult {
                    gas_used: 0,
                    exit_code: -13,
                    stack: Vec::new(),
                },
            },
            _ => MethodResult {
                gas_used: 0,
                exit_code: 11,
                stack: Vec::new(),
            },
        };
        Ok(result)
    }

    async fn account_state(&self, address: &TonAddress) -> Result<AccountState, LiteServerError> {
        let state = self.net.lock().unwrap();
        if state.fail_account_state {
            return Err(LiteServerError::Transport(
                "account state unavailable".to_string(),
            ));
        }
        Ok(state.accounts.get(address).cloned().unwrap_or_default())
    }
}

pub(crate) struct StubSigner;

impl WalletSigner for StubSigner {
    fn build_transfer(
        &self,
        seqno: u32,
        dest: &TonAddress,
        amount: u64,
        payload: Option<&[u8]>,
        state_init: Option<&[u8]>,
    ) -> anyhow::Result<Vec<u8>> {
        let payload: Option<StubPayload> = match payload {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };
        let message = StubMessage {
            seqno,
            dest: *dest,
            amount,
            payload,
            has_state_init: state_init.is_some(),
        };
        Ok(serde_json::to_vec(&message)?)
    }
}

pub(crate) struct StubBuilder;

impl NftMessageBuilder for StubBuilder {
    fn collection_init(&self, _spec: &CollectionSpec) -> anyhow::Result<CollectionInit> {
        Ok(CollectionInit {
            address: collection_address(),
            state_init: b"collection-state-init".to_vec(),
        })
    }

    fn item_mint_payload(
        &self,
        _collection: &TonAddress,
        index: u64,
        _item_content_uri: &str,
        _forward_amount: u64,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&StubPayload::Mint { index })?)
    }

    fn batch_mint_payload(
        &self,
        _collection: &TonAddress,
        from_index: u64,
        count: u64,
        _item_content_uri: &str,
        _forward_amount_per_item: u64,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&StubPayload::BatchMint {
            from: from_index,
            count,
        })?)
    }

    fn item_transfer_payload(
        &self,
        new_owner: &TonAddress,
        _response_to: &TonAddress,
        _forward_amount: u64,
    ) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&StubPayload::Transfer {
            new_owner: *new_owner,
        })?)
    }
}

pub(crate) fn test_config(selection: Selection, ls_retry_cnt: u32) -> ClientConfig {
    ClientConfig {
        network: Network::Testnet,
        ls_index: selection,
        ls_retry_cnt,
        config_retry_cnt: 3,
        run_method_retry_cnt: 4,
        request_timeout_secs: 5,
        mint_timeout_ticks: 5,
        transfer_timeout_ticks: 5,
    }
}

pub(crate) fn test_client(
    net: SharedChain,
    endpoints: usize,
    selection: Selection,
    ls_retry_cnt: u32,
) -> TonClient<MockConnector> {
    let urls = (0..endpoints)
        .map(|i| format!("http://mock-{}.test", i))
        .collect();
    let pool = EndpointPool::from_urls(Network::Testnet, urls, selection).unwrap();
    TonClient::new(
        pool,
        MockConnector { net },
        test_config(selection, ls_retry_cnt),
        MintAmounts::default(),
        house_wallet(),
        Arc::new(StubSigner),
        Arc::new(StubBuilder),
    )
}

pub(crate) fn collection_spec() -> CollectionSpec {
    CollectionSpec {
        owner: house_wallet(),
        royalty_address: house_wallet(),
        royalty: 0.05,
        royalty_base: 1000,
        collection_content_uri: "https://meta.test/collection.json".to_string(),
        item_content_base_uri: "https://meta.test/items/".to_string(),
    }
}
