use crate::encoding::fmt_bytes;
use ethers::providers::{ProviderError, RpcError as _};
use serde_json::Value;

pub type Result<T, E = AaError> = std::result::Result<T, E>;

/// Failure of a single JSON-RPC exchange.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The node or bundler answered with a JSON-RPC `error` object.
    #[error("execution error {code}: {message}")]
    Execution {
        code: i64,
        message: String,
        /// Raw `error.data`, usually the hex revert payload of an `eth_call`.
        data: Option<String>,
    },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error(transparent)]
    Provider(ProviderError),
}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        if let Some(resp) = err.as_error_response() {
            // revert payloads come back as bytes; anything else keeps its JSON text
            let data = resp.as_revert_data().map(|d| fmt_bytes(&d)).or_else(|| {
                resp.data.as_ref().map(|d| match d {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
            });
            return RpcError::Execution {
                code: resp.code,
                message: resp.message.clone(),
                data,
            };
        }
        RpcError::Provider(err)
    }
}

impl RpcError {
    /// Revert payload carried by an execution error, if any.
    pub fn revert_data(&self) -> Option<&str> {
        match self {
            RpcError::Execution { data, .. } => data.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AaError {
    #[error("no rpc url or client provided")]
    NoRpc,
    #[error("unsupported chain id: {0}")]
    UnsupportedChain(u64),
    #[error("no default entry point contract exists for chain {0}")]
    NoEntryPoint(u64),
    #[error("no default {kind} account factory contract exists for chain {chain_id}")]
    NoFactoryAddress { kind: &'static str, chain_id: u64 },
    #[error("no rpc url found for chain {0}")]
    RpcUrlNotFound(u64),
    #[error("failed to get smart contract account address: {0}")]
    CounterfactualAddress(String),
    #[error("account not connected")]
    NotConnected,
    #[error("request is missing parameters: {0}")]
    MissingParameters(String),
    /// A field required by the packing layout was absent. This is a caller bug:
    /// the operation should have been validated before hashing.
    #[error("user operation field `{0}` is not set")]
    MissingField(&'static str),
    #[error("failed to find transaction for user operation {0:?}")]
    NoTransaction(ethers::types::H256),
    #[error("{0} is not supported by this account")]
    NotSupported(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("signer error: {0}")]
    Signer(String),
    #[error("paymaster error {code}: {message}")]
    Paymaster { code: i64, message: String },
    #[error("invalid hex in `{field}`: {source}")]
    Hex {
        field: &'static str,
        #[source]
        source: hex::FromHexError,
    },
    #[error("invalid quantity in `{field}`: {value}")]
    Quantity { field: &'static str, value: String },
    #[error(transparent)]
    Rpc(#[from] RpcError),
}
