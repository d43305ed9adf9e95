//! The failover engine.
//!
//! [`TonClient`] wraps one immutable [`EndpointPool`] and a connector and
//! turns them into reliable primitives: send a message, run a get-method,
//! read an account state. Transport failures rotate to the next light
//! server inside a bounded budget; contract-level failures surface to the
//! caller untouched.
//!
//! The high-level operations (`deploy_collection`, `deploy_item`,
//! `transfer_nft`) all follow the same shape: check the chain first and skip
//! the send when the effect is already visible, otherwise send and poll
//! until the effect appears or the tick ceiling is hit.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::{ClientConfig, MintAmounts};
use crate::error::{ClientError, Result};
use crate::ton::address::TonAddress;
use crate::ton::builder::{CollectionSpec, NftMessageBuilder, WalletSigner};
use crate::ton::connection::{
    AccountState, Connect, HttpConnector, LiteServer, MethodResult, StackValue,
};
use crate::ton::endpoint::{Endpoint, EndpointPool};
use crate::ton::poller::wait_until;

/// Delay between attempts after a transport failure and between
/// confirmation polls.
const RETRY_TICK: Duration = Duration::from_secs(1);

pub struct TonClient<C: Connect> {
    pool: EndpointPool,
    connector: C,
    config: ClientConfig,
    amounts: MintAmounts,
    wallet_address: TonAddress,
    signer: Arc<dyn WalletSigner>,
    builder: Arc<dyn NftMessageBuilder>,
    // Serializes sequence-number acquisition across concurrent sends: the
    // lock is held from the seqno fetch through the submit of one attempt.
    seqno_gate: Mutex<()>,
}

impl TonClient<HttpConnector> {
    /// Fetches the light-server directory and builds a production client.
    pub async fn connect(
        config: ClientConfig,
        amounts: MintAmounts,
        wallet_address: TonAddress,
        signer: Arc<dyn WalletSigner>,
        builder: Arc<dyn NftMessageBuilder>,
    ) -> Result<Self> {
        let pool = EndpointPool::fetch(&config).await?;
        let connector = HttpConnector::new(Duration::from_secs(config.request_timeout_secs));
        Ok(Self::new(pool, connector, config, amounts, wallet_address, signer, builder))
    }
}

impl<C: Connect> TonClient<C> {
    pub fn new(
        pool: EndpointPool,
        connector: C,
        config: ClientConfig,
        amounts: MintAmounts,
        wallet_address: TonAddress,
        signer: Arc<dyn WalletSigner>,
        builder: Arc<dyn NftMessageBuilder>,
    ) -> Self {
        Self {
            pool,
            connector,
            config,
            amounts,
            wallet_address,
            signer,
            builder,
            seqno_gate: Mutex::new(()),
        }
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }

    pub fn wallet_address(&self) -> TonAddress {
        self.wallet_address
    }

    /// Sends one signed external message.
    ///
    /// Runs up to `ls_retry_cnt` full sweeps over the pool. `Ok(false)` means
    /// every attempt failed at the transport level; the caller must assume
    /// nothing reached the chain. Contract-level rejections are returned as
    /// errors and are not retried here.
    pub async fn send_message(
        &self,
        to: &TonAddress,
        amount: u64,
        payload: Option<&[u8]>,
        state_init: Option<&[u8]>,
    ) -> Result<bool> {
        for sweep in 1..=self.config.ls_retry_cnt {
            debug!(
                "send to {}: sweep {}/{}",
                to, sweep, self.config.ls_retry_cnt
            );
            for endpoint in self.pool.sweep() {
                match self
                    .try_send_once(endpoint, to, amount, payload, state_init)
                    .await
                {
                    Ok(()) => {
                        info!("message to {} accepted by light server {}", to, endpoint.index);
                        return Ok(true);
                    }
                    Err(ClientError::Transport(reason)) => {
                        warn!(
                            "light server {} failed to take message for {}: {}",
                            endpoint.index, to, reason
                        );
                        sleep(RETRY_TICK).await;
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        warn!(
            "message to {} not sent: {} sweeps over {} light servers exhausted",
            to,
            self.config.ls_retry_cnt,
            self.pool.len()
        );
        Ok(false)
    }

    /// One attempt against one endpoint: open, fetch a fresh seqno through
    /// the same connection, sign, submit. The connection closes on every
    /// exit path when the handle drops.
    async fn try_send_once(
        &self,
        endpoint: &Endpoint,
        to: &TonAddress,
        amount: u64,
        payload: Option<&[u8]>,
        state_init: Option<&[u8]>,
    ) -> Result<()> {
        let server = self.connector.open(endpoint).await?;
        let _guard = self.seqno_gate.lock().await;
        let seqno = self.fetch_seqno_on(&server).await?;
        let boc = self
            .signer
            .build_transfer(seqno, to, amount, payload, state_init)
            .map_err(|e| ClientError::Builder(e.to_string()))?;
        server.send_boc(&boc).await?;
        Ok(())
    }

    async fn fetch_seqno_on(&self, server: &C::Server) -> Result<u32> {
        let result = server
            .run_method(&self.wallet_address, "seqno", Vec::new())
            .await?;
        if !result.is_ok() {
            // An unsynced light server reports a failed seqno read; rotating
            // is the right response, so report it as a transport problem.
            return Err(ClientError::Transport(format!(
                "seqno read failed with exit code {}",
                result.exit_code
            )));
        }
        result
            .stack
            .first()
            .and_then(StackValue::as_int)
            .map(|v| v as u32)
            .ok_or_else(|| ClientError::BadStack {
                method: "seqno".to_string(),
                reason: "expected an integer at position 0".to_string(),
            })
    }

    /// Runs a contract get-method, treating a non-zero or absent exit code as
    /// "not ready yet". Retried up to `run_method_retry_cnt` attempts across
    /// rotating endpoints.
    pub async fn run_method(
        &self,
        address: &TonAddress,
        method: &str,
        stack: Vec<StackValue>,
    ) -> Result<MethodResult> {
        let mut attempts = 0;
        'budget: while attempts < self.config.run_method_retry_cnt {
            for endpoint in self.pool.sweep() {
                if attempts >= self.config.run_method_retry_cnt {
                    break 'budget;
                }
                attempts += 1;
                debug!(
                    "run {} on {}: attempt {}/{} via light server {}",
                    method, address, attempts, self.config.run_method_retry_cnt, endpoint.index
                );
                match self.run_method_once(endpoint, address, method, &stack).await {
                    Ok(result) if result.is_ok() => return Ok(result),
                    Ok(result) => {
                        debug!(
                            "{} on {} not ready (exit code {}), retrying",
                            method, address, result.exit_code
                        );
                        sleep(RETRY_TICK).await;
                    }
                    Err(ClientError::Transport(reason)) => {
                        warn!(
                            "light server {} failed running {} on {}: {}",
                            endpoint.index, method, address, reason
                        );
                        sleep(RETRY_TICK).await;
                    }
                    Err(other) => return Err(other),
                }
            }
        }
        Err(ClientError::MethodExhausted {
            address: address.to_string(),
            method: method.to_string(),
            attempts,
        })
    }

    async fn run_method_once(
        &self,
        endpoint: &Endpoint,
        address: &TonAddress,
        method: &str,
        stack: &[StackValue],
    ) -> Result<MethodResult> {
        let server = self.connector.open(endpoint).await?;
        Ok(server.run_method(address, method, stack.to_vec()).await?)
    }

    /// Reads raw account state. Single shot: failures are logged and come
    /// back as `None`, callers must null-check.
    pub async fn account_state(&self, address: &TonAddress) -> Option<AccountState> {
        let endpoint = self.pool.sweep().next()?;
        debug!("reading account state of {}", address);
        let server = match self.connector.open(endpoint).await {
            Ok(server) => server,
            Err(e) => {
                warn!("could not open light server {}: {}", endpoint.index, e);
                return None;
            }
        };
        match server.account_state(address).await {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("failed to read account state of {}: {}", address, e);
                None
            }
        }
    }

    /// Current sequence number of the house wallet.
    pub async fn seqno(&self) -> Result<u32> {
        let result = self
            .run_method(&self.wallet_address, "seqno", Vec::new())
            .await?;
        result
            .stack
            .first()
            .and_then(StackValue::as_int)
            .map(|v| v as u32)
            .ok_or_else(|| ClientError::BadStack {
                method: "seqno".to_string(),
                reason: "expected an integer at position 0".to_string(),
            })
    }

    /// Index the next minted item will take in the collection.
    pub async fn collection_next_index(&self, collection: &TonAddress) -> Result<u64> {
        let result = self
            .run_method(collection, "get_collection_data", Vec::new())
            .await?;
        result
            .stack
            .first()
            .and_then(StackValue::as_int)
            .map(|v| v as u64)
            .ok_or_else(|| ClientError::BadStack {
                method: "get_collection_data".to_string(),
                reason: "expected the next item index at position 0".to_string(),
            })
    }

    /// Deterministic item address for an index in the collection.
    pub async fn nft_address_by_index(
        &self,
        collection: &TonAddress,
        index: u64,
    ) -> Result<TonAddress> {
        let result = self
            .run_method(
                collection,
                "get_nft_address_by_index",
                vec![StackValue::Int(index as i64)],
            )
            .await?;
        result
            .stack
            .first()
            .and_then(StackValue::as_address)
            .ok_or_else(|| ClientError::BadStack {
                method: "get_nft_address_by_index".to_string(),
                reason: "expected an address at position 0".to_string(),
            })
    }

    /// Current owner of an item, `None` when the read fails.
    pub async fn nft_owner(&self, nft: &TonAddress) -> Option<TonAddress> {
        match self.run_method(nft, "get_nft_data", Vec::new()).await {
            Ok(result) => result.stack.get(3).and_then(StackValue::as_address),
            Err(e) => {
                warn!("failed to read the owner of {}: {}", nft, e);
                None
            }
        }
    }

    /// Deploys an empty collection. Returns the collection address plus
    /// whether the contract is live on-chain.
    ///
    /// If the account already holds code, nothing is sent.
    pub async fn deploy_collection(&self, spec: &CollectionSpec) -> Result<(TonAddress, bool)> {
        let init = self
            .builder
            .collection_init(spec)
            .map_err(|e| ClientError::Builder(e.to_string()))?;
        let address = init.address;
        info!("deploying collection {}", address);

        if let Some(state) = self.account_state(&address).await {
            if state.is_initialized() {
                info!("collection {} already exists, skipping deploy", address);
                return Ok((address, true));
            }
        }

        let sent = self
            .send_message(
                &address,
                self.amounts.collection_deploy,
                None,
                Some(&init.state_init),
            )
            .await?;
        if !sent {
            warn!("collection {} deploy message was not sent", address);
            return Ok((address, false));
        }

        info!("waiting for collection {} to appear on-chain", address);
        let confirmed = wait_until(
            || async move {
                matches!(
                    self.account_state(&address).await,
                    Some(state) if state.is_initialized()
                )
            },
            self.config.mint_timeout_ticks,
            RETRY_TICK,
        )
        .await;
        if confirmed {
            info!("collection {} is live", address);
        } else {
            warn!("collection {} mint confirmation timed out", address);
        }
        Ok((address, confirmed))
    }

    /// Mints one item into an existing collection. `Ok(None)` means the send
    /// failed or the item never appeared within the mint timeout.
    pub async fn deploy_item(
        &self,
        collection: &TonAddress,
        item_content_uri: &str,
    ) -> Result<Option<TonAddress>> {
        let index = self.collection_next_index(collection).await?;
        let item_address = self.nft_address_by_index(collection, index).await?;
        info!(
            "minting item {} at index {} into collection {}",
            item_address, index, collection
        );

        let payload = self
            .builder
            .item_mint_payload(collection, index, item_content_uri, self.amounts.forward)
            .map_err(|e| ClientError::Builder(e.to_string()))?;
        let sent = self
            .send_message(collection, self.amounts.item_deploy, Some(&payload), None)
            .await?;
        if !sent {
            warn!("mint message for item {} was not sent", item_address);
            return Ok(None);
        }

        let confirmed = wait_until(
            || async move {
                matches!(
                    self.account_state(&item_address).await,
                    Some(state) if state.is_initialized()
                )
            },
            self.config.mint_timeout_ticks,
            RETRY_TICK,
        )
        .await;
        if confirmed {
            info!("item {} minted", item_address);
            Ok(Some(item_address))
        } else {
            warn!("mint confirmation for item {} timed out", item_address);
            Ok(None)
        }
    }

    /// Mints `count` consecutive items with one message. `Ok(None)` on send
    /// failure or timeout, otherwise every new item address.
    pub async fn deploy_batch(
        &self,
        collection: &TonAddress,
        count: u64,
        item_content_uri: &str,
    ) -> Result<Option<Vec<TonAddress>>> {
        if count == 0 {
            return Ok(Some(Vec::new()));
        }
        let from_index = self.collection_next_index(collection).await?;
        let mut addresses = Vec::with_capacity(count as usize);
        for offset in 0..count {
            addresses.push(
                self.nft_address_by_index(collection, from_index + offset)
                    .await?,
            );
        }
        info!(
            "minting {} items from index {} into collection {}",
            count, from_index, collection
        );

        let payload = self
            .builder
            .batch_mint_payload(
                collection,
                from_index,
                count,
                item_content_uri,
                self.amounts.forward,
            )
            .map_err(|e| ClientError::Builder(e.to_string()))?;
        let amount = self.amounts.item_deploy + count * self.amounts.forward;
        let sent = self
            .send_message(collection, amount, Some(&payload), None)
            .await?;
        if !sent {
            warn!("batch mint message into {} was not sent", collection);
            return Ok(None);
        }

        let pending = &addresses;
        let confirmed = wait_until(
            || async move {
                for address in pending {
                    match self.account_state(address).await {
                        Some(state) if state.is_initialized() => {}
                        _ => return false,
                    }
                }
                true
            },
            self.config.mint_timeout_ticks,
            RETRY_TICK,
        )
        .await;
        if confirmed {
            info!("batch of {} items minted into {}", count, collection);
            Ok(Some(addresses))
        } else {
            warn!("batch mint confirmation in {} timed out", collection);
            Ok(None)
        }
    }

    /// Moves an item from the house wallet to `new_owner`.
    ///
    /// Already owned by the target: success with no send. Held by a third
    /// party: success as "not ours to move", so retries never fight over
    /// assets that left custody. Unknown owner: failure, so the task-level
    /// retry gets another look instead of assuming anything.
    pub async fn transfer_nft(&self, nft: &TonAddress, new_owner: &TonAddress) -> Result<bool> {
        info!("transferring item {} to {}", nft, new_owner);
        match self.nft_owner(nft).await {
            Some(owner) if owner == *new_owner => {
                info!("item {} already belongs to {}", nft, new_owner);
                return Ok(true);
            }
            Some(owner) if owner != self.wallet_address => {
                warn!(
                    "item {} is held by {}, not by the house wallet; leaving it alone",
                    nft, owner
                );
                return Ok(true);
            }
            Some(_) => {}
            None => {
                warn!("owner of {} is unknown, not transferring", nft);
                return Ok(false);
            }
        }

        let payload = self
            .builder
            .item_transfer_payload(
                new_owner,
                &self.wallet_address,
                self.amounts.transfer_forward,
            )
            .map_err(|e| ClientError::Builder(e.to_string()))?;
        let sent = self
            .send_message(nft, self.amounts.item_transfer, Some(&payload), None)
            .await?;
        if !sent {
            warn!("transfer message for item {} was not sent", nft);
            return Ok(false);
        }

        let target = *new_owner;
        let nft_address = *nft;
        let confirmed = wait_until(
            || async move {
                self.nft_owner(&nft_address).await == Some(target)
            },
            self.config.transfer_timeout_ticks,
            RETRY_TICK,
        )
        .await;
        if confirmed {
            info!("item {} now belongs to {}", nft, new_owner);
        } else {
            warn!("transfer confirmation for item {} timed out", nft);
        }
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ton::endpoint::Selection;
    use crate::ton::testkit::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_logger() {
        INIT.call_once(|| {
            env_logger::builder().is_test(true).try_init().ok();
        });
    }

    #[tokio::test(start_paused = true)]
    async fn send_rotates_past_failing_endpoints_in_index_order() {
        init_logger();
        let net = chain();
        net.lock().unwrap().fail_send_on = [0, 1].into_iter().collect();
        let client = test_client(net.clone(), 3, Selection::Auto, 3);

        let sent = client
            .send_message(&addr(0x42), 1_000, None, None)
            .await
            .unwrap();
        assert!(sent);

        let state = net.lock().unwrap();
        assert_eq!(state.send_attempts, vec![0, 1, 2]);
        assert_eq!(state.accepted.len(), 1);
        assert_eq!(state.accepted[0].endpoint, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_budget_is_sweeps_times_endpoints_and_never_raises() {
        init_logger();
        let net = chain();
        net.lock().unwrap().fail_send_on = [0, 1, 2].into_iter().collect();
        let client = test_client(net.clone(), 3, Selection::Auto, 2);

        let sent = client
            .send_message(&addr(0x42), 1_000, None, None)
            .await
            .unwrap();
        assert!(!sent);
        assert_eq!(net.lock().unwrap().send_attempts.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_selection_never_touches_other_endpoints() {
        init_logger();
        let net = chain();
        net.lock().unwrap().fail_send_on = [1].into_iter().collect();
        let client = test_client(net.clone(), 3, Selection::Fixed(1), 2);

        let sent = client
            .send_message(&addr(0x42), 1_000, None, None)
            .await
            .unwrap();
        assert!(!sent);

        let state = net.lock().unwrap();
        assert_eq!(state.send_attempts, vec![1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_sends_never_reuse_a_sequence_number() {
        init_logger();
        let net = chain();
        net.lock().unwrap().seqno = 7;
        let client = Arc::new(test_client(net.clone(), 2, Selection::Auto, 3));

        let a = {
            let client = client.clone();
            tokio::spawn(async move { client.send_message(&addr(0x21), 5, None, None).await })
        };
        let b = {
            let client = client.clone();
            tokio::spawn(async move { client.send_message(&addr(0x22), 5, None, None).await })
        };
        assert!(a.await.unwrap().unwrap());
        assert!(b.await.unwrap().unwrap());

        let state = net.lock().unwrap();
        let seqnos: Vec<u32> = state.accepted.iter().map(|r| r.message.seqno).collect();
        assert_eq!(seqnos.len(), 2);
        assert_ne!(seqnos[0], seqnos[1]);
        assert!(seqnos.contains(&7) && seqnos.contains(&8));
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_signs_with_a_fresh_seqno() {
        init_logger();
        let net = chain();
        net.lock().unwrap().seqno = 3;
        let client = test_client(net.clone(), 1, Selection::Auto, 3);

        assert!(client.send_message(&addr(0x30), 1, None, None).await.unwrap());
        assert!(client.send_message(&addr(0x31), 1, None, None).await.unwrap());

        let state = net.lock().unwrap();
        let seqnos: Vec<u32> = state.accepted.iter().map(|r| r.message.seqno).collect();
        assert_eq!(seqnos, vec![3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_method_exhausts_its_budget_with_a_typed_error() {
        init_logger();
        let net = chain();
        net.lock().unwrap().fail_run_on = [0, 1].into_iter().collect();
        let client = test_client(net.clone(), 2, Selection::Auto, 2);

        let err = client
            .run_method(&addr(0x42), "seqno", Vec::new())
            .await
            .unwrap_err();
        match err {
            ClientError::MethodExhausted { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("expected MethodExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_collection_skips_the_send_when_already_deployed() {
        init_logger();
        let net = chain();
        net.lock()
            .unwrap()
            .accounts
            .insert(collection_address(), initialized_account());
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        let (address, live) = client.deploy_collection(&collection_spec()).await.unwrap();
        assert_eq!(address, collection_address());
        assert!(live);
        assert!(net.lock().unwrap().send_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_collection_sends_state_init_and_confirms() {
        init_logger();
        let net = chain();
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        let (address, live) = client.deploy_collection(&collection_spec()).await.unwrap();
        assert!(live);

        let state = net.lock().unwrap();
        assert_eq!(state.accepted.len(), 1);
        assert!(state.accepted[0].message.has_state_init);
        assert_eq!(state.accepted[0].message.dest, address);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_item_resolves_index_address_and_enables_transfer() {
        init_logger();
        let net = chain();
        net.lock().unwrap().next_index = 4;
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        let minted = client
            .deploy_item(&collection_address(), "https://meta.test/items/4.json")
            .await
            .unwrap();
        assert_eq!(minted, Some(item_address(4)));
        assert_eq!(net.lock().unwrap().next_index, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_batch_mints_consecutive_indices() {
        init_logger();
        let net = chain();
        net.lock().unwrap().next_index = 2;
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        let minted = client
            .deploy_batch(&collection_address(), 3, "https://meta.test/items/x.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            minted,
            vec![item_address(2), item_address(3), item_address(4)]
        );
        assert_eq!(net.lock().unwrap().next_index, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_to_current_owner_sends_nothing() {
        init_logger();
        let net = chain();
        let nft = item_address(0);
        let target = addr(0x42);
        net.lock().unwrap().owners.insert(nft, target);
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        assert!(client.transfer_nft(&nft, &target).await.unwrap());
        assert!(net.lock().unwrap().send_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn item_held_outside_custody_is_left_alone() {
        init_logger();
        let net = chain();
        let nft = item_address(0);
        net.lock().unwrap().owners.insert(nft, addr(0x99));
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        assert!(client.transfer_nft(&nft, &addr(0x42)).await.unwrap());
        assert!(net.lock().unwrap().send_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_from_house_wallet_confirms_new_owner() {
        init_logger();
        let net = chain();
        let nft = item_address(0);
        let target = addr(0x42);
        net.lock().unwrap().owners.insert(nft, house_wallet());
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        assert!(client.transfer_nft(&nft, &target).await.unwrap());
        assert_eq!(net.lock().unwrap().owners.get(&nft), Some(&target));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_owner_fails_the_transfer_instead_of_skipping() {
        init_logger();
        let net = chain();
        let nft = item_address(0);
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        assert!(!client.transfer_nft(&nft, &addr(0x42)).await.unwrap());
        assert!(net.lock().unwrap().send_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn account_state_failures_read_as_none() {
        init_logger();
        let net = chain();
        net.lock().unwrap().fail_account_state = true;
        let client = test_client(net.clone(), 2, Selection::Auto, 3);

        assert!(client.account_state(&addr(0x42)).await.is_none());
    }
}
