//! tonforge: mint NFT collections and items on TON and deliver them to
//! user wallets.
//!
//! The crate is built around three layers:
//!
//! - [`ton`]: a failover chain client over a pool of interchangeable light
//!   servers, with bounded retries and polling-based confirmation of
//!   asynchronous on-chain effects
//! - [`pipeline`]: the background task machinery driving the
//!   collection-mint, item-mint and item-transfer workflow with per-step
//!   retry budgets and durable statuses
//! - [`ledger`]: the status store those statuses live in
//!
//! Signing, cell encoding and the user-facing messenger stay outside the
//! crate behind the seams in [`ton::builder`] and [`pipeline::Notifier`].

pub mod config;
pub mod error;
pub mod ledger;
pub mod pipeline;
pub mod ton;
pub mod tonapi;
pub mod wallet;

pub use error::{ClientError, Result};
pub use pipeline::{Pipeline, SubmitOutcome};
pub use ton::{TonAddress, TonClient};
pub use wallet::HouseWallet;
