use thiserror::Error;

use crate::ton::connection::LiteServerError;

/// Errors produced by the chain client.
///
/// Transport-level failures are absorbed and retried inside the client up to
/// its budgets; only the variants below ever reach a caller.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("light server directory unavailable after {attempts} attempts: {reason}")]
    DirectoryUnavailable { attempts: u32, reason: String },
    #[error("invalid client configuration: {0}")]
    Config(String),
    #[error("light server transport failure: {0}")]
    Transport(String),
    #[error("contract-level rejection (exit code {code}): {message}")]
    Application { code: i32, message: String },
    #[error("method {method} on {address} returned no usable stack after {attempts} attempts")]
    MethodExhausted {
        address: String,
        method: String,
        attempts: u32,
    },
    #[error("unexpected stack shape from {method}: {reason}")]
    BadStack { method: String, reason: String },
    #[error("invalid address: {0}")]
    Address(#[from] crate::ton::address::AddressParseError),
    #[error("transfer builder failed: {0}")]
    Builder(String),
    #[error("wallet error: {0}")]
    Wallet(#[from] anyhow::Error),
}

impl From<LiteServerError> for ClientError {
    fn from(err: LiteServerError) -> Self {
        match err {
            LiteServerError::Transport(msg) => ClientError::Transport(msg),
            LiteServerError::Application { code, message } => {
                ClientError::Application { code, message }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
