use super::transport::JsonRpcTransport;
use super::Erc4337Client;
use crate::encoding::{fmt_address, fmt_h256, parse_h256, parse_u256_field};
use crate::error::{AaError, Result, RpcError};
use crate::types::{GasEstimate, UserOperationReceipt, UserOperationRequest};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{
    transaction::eip2718::TypedTransaction, Address, BlockNumber, Bytes, TransactionRequest, H256,
    U256,
};
use reqwest::Url;
use serde_json::{json, Value};

/// [`Erc4337Client`] backed by a bundler endpoint that also serves the
/// standard `eth_*` namespace. UserOperation methods go over the raw
/// transport; chain reads go through an ethers [`Provider`] sharing the same
/// HTTP client and headers.
#[derive(Debug, Clone)]
pub struct Erc4337RpcClient {
    transport: JsonRpcTransport,
    provider: Provider<Http>,
}

impl Erc4337RpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::from_transport(JsonRpcTransport::new(url)?)
    }

    pub fn from_transport(transport: JsonRpcTransport) -> Result<Self> {
        let url = Url::parse(transport.url()).map_err(|e| {
            AaError::InvalidArgument(format!("rpc url {:?}: {e}", transport.url()))
        })?;
        let provider = Provider::new(Http::new_with_client(url, transport.http_client().clone()));
        Ok(Self { transport, provider })
    }

    pub fn transport(&self) -> &JsonRpcTransport {
        &self.transport
    }

    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }
}

#[async_trait]
impl Erc4337Client for Erc4337RpcClient {
    async fn estimate_user_operation_gas(
        &self,
        request: &UserOperationRequest,
        entry_point: Address,
    ) -> Result<GasEstimate> {
        let params = json!([request, fmt_address(entry_point)]);
        let res = self
            .transport
            .rpc("eth_estimateUserOperationGas", params)
            .await?;
        parse_gas_estimate(&res)
    }

    async fn send_user_operation(
        &self,
        request: &UserOperationRequest,
        entry_point: Address,
    ) -> Result<H256> {
        let params = json!([request, fmt_address(entry_point)]);
        let res = self.transport.rpc("eth_sendUserOperation", params).await?;
        parse_userop_hash(&res)
    }

    async fn get_user_operation_receipt(&self, hash: H256) -> Result<Option<UserOperationReceipt>> {
        let receipt = self
            .transport
            .request::<Option<UserOperationReceipt>>(
                "eth_getUserOperationReceipt",
                json!([fmt_h256(hash)]),
            )
            .await?;
        Ok(receipt)
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256> {
        let fee: U256 = self
            .provider
            .request("eth_maxPriorityFeePerGas", ())
            .await
            .map_err(RpcError::from)?;
        Ok(fee)
    }

    async fn get_block_base_fee(&self) -> Result<U256> {
        let block = self
            .provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(RpcError::from)?
            .ok_or_else(|| RpcError::UnexpectedResponse("latest block not found".into()))?;
        Ok(block.base_fee_per_gas.unwrap_or_default())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        Ok(self.provider.call(&tx, None).await.map_err(RpcError::from)?)
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self
            .provider
            .get_code(address, None)
            .await
            .map_err(RpcError::from)?)
    }
}

pub(crate) fn parse_gas_estimate(res: &Value) -> Result<GasEstimate> {
    Ok(GasEstimate {
        call_gas_limit: parse_u256_field(res, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(res, "verificationGasLimit")?,
        pre_verification_gas: parse_u256_field(res, "preVerificationGas")?,
    })
}

fn parse_userop_hash(res: &Value) -> Result<H256> {
    // Most bundlers return the hash as a bare string; some wrap it in an object.
    let hash_str = if let Some(s) = res.as_str() {
        s
    } else if let Some(s) = ["result", "userOpHash", "userOperationHash"]
        .iter()
        .find_map(|key| res.get(*key).and_then(Value::as_str))
    {
        s
    } else {
        return Err(RpcError::UnexpectedResponse(format!(
            "unexpected eth_sendUserOperation result shape: {res}"
        ))
        .into());
    };

    parse_h256("userOpHash", hash_str)
}
