use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TEST_ONLY: u8 = 0x80;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("unrecognized address format: {0}")]
    Format(String),
    #[error("address payload has length {0}, expected 36 bytes")]
    Length(usize),
    #[error("address checksum mismatch")]
    Checksum,
    #[error("unknown address tag byte {0:#04x}")]
    Tag(u8),
    #[error("invalid workchain: {0}")]
    Workchain(String),
    #[error("invalid account hash: {0}")]
    Hash(String),
}

/// A TON account address.
///
/// Both textual representations parse into the same value: the raw form
/// `<workchain>:<64 hex>` and the 48-character user-friendly base64 form.
/// Display and serde use the canonical rendering (bounceable, url-safe),
/// so any address that crosses the client boundary is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TonAddress {
    workchain: i8,
    hash: [u8; 32],
}

impl TonAddress {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    pub fn workchain(&self) -> i8 {
        self.workchain
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Raw form, e.g. `0:af3b...`.
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// Canonical user-friendly form: bounceable tag, url-safe alphabet.
    pub fn to_friendly(&self) -> String {
        let mut payload = [0u8; 36];
        payload[0] = TAG_BOUNCEABLE;
        payload[1] = self.workchain as u8;
        payload[2..34].copy_from_slice(&self.hash);
        let crc = crc16_xmodem(&payload[..34]);
        payload[34] = (crc >> 8) as u8;
        payload[35] = (crc & 0xff) as u8;
        URL_SAFE.encode(payload)
    }

    fn from_raw(s: &str) -> Result<Self, AddressParseError> {
        let (wc, hash_hex) = s
            .split_once(':')
            .ok_or_else(|| AddressParseError::Format(s.to_string()))?;
        let workchain: i8 = wc
            .parse()
            .map_err(|_| AddressParseError::Workchain(wc.to_string()))?;
        let bytes =
            hex::decode(hash_hex).map_err(|_| AddressParseError::Hash(hash_hex.to_string()))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AddressParseError::Hash(hash_hex.to_string()))?;
        Ok(Self { workchain, hash })
    }

    fn from_friendly(s: &str) -> Result<Self, AddressParseError> {
        let payload = URL_SAFE
            .decode(s)
            .or_else(|_| STANDARD.decode(s))
            .map_err(|_| AddressParseError::Format(s.to_string()))?;
        if payload.len() != 36 {
            return Err(AddressParseError::Length(payload.len()));
        }
        let crc = crc16_xmodem(&payload[..34]);
        if payload[34] != (crc >> 8) as u8 || payload[35] != (crc & 0xff) as u8 {
            return Err(AddressParseError::Checksum);
        }
        let tag = payload[0] & !TAG_TEST_ONLY;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(AddressParseError::Tag(payload[0]));
        }
        let workchain = payload[1] as i8;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&payload[2..34]);
        Ok(Self { workchain, hash })
    }
}

impl FromStr for TonAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            Self::from_raw(s)
        } else if s.len() == 48 {
            Self::from_friendly(s)
        } else {
            Err(AddressParseError::Format(s.to_string()))
        }
    }
}

impl fmt::Display for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly())
    }
}

impl Serialize for TonAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_friendly())
    }
}

impl<'de> Deserialize<'de> for TonAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// CRC16/XMODEM, the checksum the user-friendly form carries.
fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}
