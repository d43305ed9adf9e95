//! The house wallet: the application-controlled account that funds and
//! originates every mint and transfer message.
//!
//! Only the identity lives here. Signing and message encoding belong to the
//! external builder behind [`crate::ton::builder::WalletSigner`]; this module
//! hands that builder a derived secret and keeps it off the heap after drop.

use anyhow::anyhow;
use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use zeroize::ZeroizeOnDrop;

use crate::config::{HOUSE_MNEMONIC, HOUSE_WALLET_ADDRESS};
use crate::ton::address::TonAddress;

const SEED_SALT: &[u8] = b"TON default seed";
const SEED_ROUNDS: u32 = 100_000;

#[derive(ZeroizeOnDrop)]
pub struct HouseWallet {
    #[zeroize(skip)]
    address: TonAddress,
    secret: [u8; 64],
}

impl HouseWallet {
    /// Loads the wallet from `HOUSE_MNEMONIC` and `HOUSE_WALLET_ADDRESS`.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        let phrase = HOUSE_MNEMONIC.clone();
        if phrase.is_empty() {
            return Err(anyhow!("HOUSE_MNEMONIC is not set"));
        }
        let address: TonAddress = HOUSE_WALLET_ADDRESS
            .parse()
            .map_err(|e| anyhow!("HOUSE_WALLET_ADDRESS: {}", e))?;
        Self::from_mnemonic(&phrase, address)
    }

    /// Derives the signing seed from a 24-word phrase: entropy by
    /// HMAC-SHA512 over the phrase, then PBKDF2-HMAC-SHA512 with the
    /// standard salt.
    pub fn from_mnemonic(phrase: &str, address: TonAddress) -> anyhow::Result<Self> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.len() != 24 {
            return Err(anyhow!(
                "expected a 24-word mnemonic, got {} words",
                words.len()
            ));
        }
        let word_list = Language::English.word_list();
        for (position, word) in words.iter().enumerate() {
            if !word_list.iter().any(|candidate| candidate == word) {
                return Err(anyhow!("unknown mnemonic word at position {}", position + 1));
            }
        }

        let phrase = words.join(" ");
        let entropy = mnemonic_entropy(&phrase)?;
        let mut secret = [0u8; 64];
        pbkdf2_hmac::<Sha512>(&entropy, SEED_SALT, SEED_ROUNDS, &mut secret);
        Ok(Self { address, secret })
    }

    pub fn address(&self) -> TonAddress {
        self.address
    }

    /// The derived 64-byte seed the external signer consumes.
    pub fn secret(&self) -> &[u8; 64] {
        &self.secret
    }
}

impl std::fmt::Debug for HouseWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HouseWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

fn mnemonic_entropy(phrase: &str) -> anyhow::Result<[u8; 64]> {
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(phrase.as_bytes())
        .map_err(|e| anyhow!("entropy derivation failed: {}", e))?;
    mac.update(b"");
    let digest = mac.finalize().into_bytes();
    let mut entropy = [0u8; 64];
    entropy.copy_from_slice(&digest);
    Ok(entropy)
}

/// A fresh 24-word phrase for provisioning a new house wallet.
pub fn generate_mnemonic() -> anyhow::Result<String> {
    let mnemonic = Mnemonic::generate_in(Language::English, 24)
        .map_err(|e| anyhow!("mnemonic generation failed: {}", e))?;
    Ok(mnemonic.to_string())
}
