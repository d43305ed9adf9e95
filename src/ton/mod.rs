//! Chain access layer.
//!
//! Everything that talks to the TON network lives here:
//!
//! - [`address`]: canonical account addresses and the raw/friendly textual forms
//! - [`endpoint`]: the light-server directory and per-call rotation
//! - [`connection`]: one open connection to one light server, per call
//! - [`client`]: the failover engine and the high-level mint/transfer operations
//! - [`poller`]: "wait until the chain shows it" confirmation loops
//! - [`builder`]: seams for the external signer and NFT message builder
//!
//! The client never keeps a connection between calls; every logical call
//! opens against one endpoint, runs, and closes, so rotating to the next
//! light server after a transport failure needs no connection bookkeeping.

pub mod address;
pub mod builder;
pub mod client;
pub mod connection;
pub mod endpoint;
pub mod poller;
#[cfg(test)]
pub(crate) mod testkit;

pub use address::TonAddress;
pub use client::TonClient;

const NANO_PER_TON: u64 = 1_000_000_000;

/// Parses a decimal TON amount ("0.05") into nano-TON.
pub fn ton_to_nano(value: &str) -> Option<u64> {
    let value = value.trim();
    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if frac.len() > 9 {
        return None;
    }
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac_nano: u64 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<9}", frac);
        padded.parse().ok()?
    };
    whole
        .checked_mul(NANO_PER_TON)
        .and_then(|n| n.checked_add(frac_nano))
}

/// Converts nano-TON back to a TON amount.
pub fn ton_from_nano(value: u64) -> f64 {
    value as f64 / NANO_PER_TON as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nano_conversion_round_trip() {
        assert_eq!(ton_to_nano("1"), Some(1_000_000_000));
        assert_eq!(ton_to_nano("0.05"), Some(50_000_000));
        assert_eq!(ton_to_nano("2.5"), Some(2_500_000_000));
        assert_eq!(ton_to_nano("0.000000001"), Some(1));
        assert_eq!(ton_to_nano("not a number"), None);
        assert_eq!(ton_to_nano("0.0000000001"), None);
        assert!((ton_from_nano(50_000_000) - 0.05).abs() < 1e-12);
    }
}
