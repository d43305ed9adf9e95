//! Seams for the external transaction builder.
//!
//! Key custody and cell encoding live outside this crate. The client only
//! needs two capabilities from that dependency: signing an outgoing wallet
//! transfer for a given sequence number, and producing the NFT-specific
//! message bodies. Both are modeled as object-safe traits so deployments can
//! plug in their builder of choice and tests can substitute stubs.

use crate::ton::address::TonAddress;

/// Parameters for a new collection contract.
#[derive(Debug, Clone)]
pub struct CollectionSpec {
    pub owner: TonAddress,
    pub royalty_address: TonAddress,
    pub royalty: f64,
    pub royalty_base: u32,
    pub collection_content_uri: String,
    pub item_content_base_uri: String,
}

/// A collection's deterministic address together with the state-init payload
/// that deploys it.
#[derive(Debug, Clone)]
pub struct CollectionInit {
    pub address: TonAddress,
    pub state_init: Vec<u8>,
}

/// Signs external messages for the house wallet.
///
/// `seqno` must be the freshly fetched wallet sequence number for this exact
/// attempt; the client re-fetches it on every retry.
pub trait WalletSigner: Send + Sync {
    fn build_transfer(
        &self,
        seqno: u32,
        dest: &TonAddress,
        amount: u64,
        payload: Option<&[u8]>,
        state_init: Option<&[u8]>,
    ) -> anyhow::Result<Vec<u8>>;
}

/// Produces the NFT contract message bodies.
pub trait NftMessageBuilder: Send + Sync {
    /// State init and address for an empty collection.
    fn collection_init(&self, spec: &CollectionSpec) -> anyhow::Result<CollectionInit>;

    /// Mint body for a single item at `index`.
    fn item_mint_payload(
        &self,
        collection: &TonAddress,
        index: u64,
        item_content_uri: &str,
        forward_amount: u64,
    ) -> anyhow::Result<Vec<u8>>;

    /// Mint body for `count` consecutive items starting at `from_index`.
    fn batch_mint_payload(
        &self,
        collection: &TonAddress,
        from_index: u64,
        count: u64,
        item_content_uri: &str,
        forward_amount_per_item: u64,
    ) -> anyhow::Result<Vec<u8>>;

    /// Ownership transfer body for one item.
    fn item_transfer_payload(
        &self,
        new_owner: &TonAddress,
        response_to: &TonAddress,
        forward_amount: u64,
    ) -> anyhow::Result<Vec<u8>>;
}
