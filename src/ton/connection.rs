//! One live connection to one light server.
//!
//! A connection is opened per logical call and released when the handle is
//! dropped, on every exit path. The error split here is load-bearing:
//! [`LiteServerError::Transport`] makes the client rotate to the next light
//! server, [`LiteServerError::Application`] is surfaced to the caller as-is.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use jsonrpsee::core::client::{ClientT, Error as RpcError};
use jsonrpsee::core::traits::ToRpcParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::ton::address::TonAddress;
use crate::ton::endpoint::Endpoint;

#[derive(Debug, Error)]
pub enum LiteServerError {
    /// The light server was unreachable or rejected the session.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The light server answered, the contract side said no.
    #[error("application error {code}: {message}")]
    Application { code: i32, message: String },
}

impl LiteServerError {
    pub fn is_transport(&self) -> bool {
        matches!(self, LiteServerError::Transport(_))
    }
}

fn map_rpc_error(err: RpcError) -> LiteServerError {
    match err {
        RpcError::Call(e) => LiteServerError::Application {
            code: e.code(),
            message: e.message().to_string(),
        },
        other => LiteServerError::Transport(other.to_string()),
    }
}

/// Smart-contract state as the gateway reports it. An account that has never
/// been deployed comes back with an empty `code`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    #[serde(default)]
    pub balance: i64,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub data: String,
}

impl AccountState {
    pub fn is_initialized(&self) -> bool {
        !self.code.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StackValue {
    Int(i64),
    Address(TonAddress),
    Bytes(String),
}

impl StackValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            StackValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<TonAddress> {
        match self {
            StackValue::Address(addr) => Some(*addr),
            _ => None,
        }
    }
}

fn missing_exit_code() -> i32 {
    -1
}

/// Result of a get-method execution. An absent exit code is reported as
/// non-zero so "not ready yet" handling covers both cases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodResult {
    #[serde(default)]
    pub gas_used: i64,
    #[serde(default = "missing_exit_code")]
    pub exit_code: i32,
    #[serde(default)]
    pub stack: Vec<StackValue>,
}

impl MethodResult {
    pub fn is_ok(&self) -> bool {
        self.exit_code == 0
    }
}

/// A single open light-server session. Dropping the value closes it.
pub trait LiteServer: Send + Sync {
    fn send_boc(
        &self,
        boc: &[u8],
    ) -> impl Future<Output = Result<(), LiteServerError>> + Send;

    fn run_method(
        &self,
        address: &TonAddress,
        method: &str,
        stack: Vec<StackValue>,
    ) -> impl Future<Output = Result<MethodResult, LiteServerError>> + Send;

    fn account_state(
        &self,
        address: &TonAddress,
    ) -> impl Future<Output = Result<AccountState, LiteServerError>> + Send;
}

/// Opens connections against directory endpoints. The failover client is
/// generic over this seam; tests plug in scripted fakes.
pub trait Connect: Send + Sync {
    type Server: LiteServer;

    fn open(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Server, LiteServerError>> + Send;
}

pub struct AsRpcParams<T>(pub T);

impl<T: Serialize> ToRpcParams for AsRpcParams<T> {
    fn to_rpc_params(self) -> Result<Option<Box<RawValue>>, serde_json::Error> {
        let s = serde_json::to_string(&self.0)?;
        RawValue::from_string(s).map(Some)
    }
}

#[derive(Serialize)]
struct SendBocParams {
    boc: String,
}

#[derive(Serialize)]
struct RunMethodParams<'a> {
    address: &'a TonAddress,
    method: &'a str,
    stack: &'a [StackValue],
}

#[derive(Serialize)]
struct AccountStateParams<'a> {
    address: &'a TonAddress,
}

/// JSON-RPC gateway connector used in production.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    request_timeout: Duration,
}

impl HttpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

impl Connect for HttpConnector {
    type Server = HttpLiteServer;

    async fn open(&self, endpoint: &Endpoint) -> Result<HttpLiteServer, LiteServerError> {
        let client = HttpClientBuilder::default()
            .request_timeout(self.request_timeout)
            .build(&endpoint.url)
            .map_err(|e| LiteServerError::Transport(e.to_string()))?;
        Ok(HttpLiteServer { client })
    }
}

pub struct HttpLiteServer {
    client: HttpClient,
}

impl LiteServer for HttpLiteServer {
    async fn send_boc(&self, boc: &[u8]) -> Result<(), LiteServerError> {
        let params = SendBocParams {
            boc: STANDARD.encode(boc),
        };
        self.client
            .request::<serde_json::Value, _>("raw.sendMessage", AsRpcParams(params))
            .await
            .map_err(map_rpc_error)?;
        Ok(())
    }

    async fn run_method(
        &self,
        address: &TonAddress,
        method: &str,
        stack: Vec<StackValue>,
    ) -> Result<MethodResult, LiteServerError> {
        let params = RunMethodParams {
            address,
            method,
            stack: &stack,
        };
        self.client
            .request("smc.runMethod", AsRpcParams(params))
            .await
            .map_err(map_rpc_error)
    }

    async fn account_state(&self, address: &TonAddress) -> Result<AccountState, LiteServerError> {
        let params = AccountStateParams { address };
        self.client
            .request("raw.getAccountState", AsRpcParams(params))
            .await
            .map_err(map_rpc_error)
    }
}
