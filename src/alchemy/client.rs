use crate::client::{Erc4337Client, Erc4337RpcClient, JsonRpcTransport};
use crate::encoding::{fmt_u256, parse_bytes, parse_u256_field};
use crate::error::{Result, RpcError};
use crate::sponsor::{check_embedded_error, sponsor_error};
use crate::types::{GasEstimate, UserOperationReceipt, UserOperationRequest};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use serde_json::{json, Value};

/// Fee values forwarded to `alchemy_requestGasAndPaymasterAndData`; unset
/// fields are left to the gas manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_gas_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_gas_limit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_verification_gas: Option<String>,
}

impl FeeOverride {
    pub fn fees(max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> Self {
        Self {
            max_fee_per_gas: Some(fmt_u256(max_fee_per_gas)),
            max_priority_fee_per_gas: Some(fmt_u256(max_priority_fee_per_gas)),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn omit_fee_override(fee_override: &Option<FeeOverride>) -> bool {
    fee_override.as_ref().map_or(true, FeeOverride::is_empty)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymasterAndDataParams {
    pub policy_id: String,
    pub entry_point: String,
    pub user_operation: UserOperationRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dummy_signature: Option<String>,
    /// Dropped from the request when unset or empty.
    #[serde(skip_serializing_if = "omit_fee_override")]
    pub fee_override: Option<FeeOverride>,
}

/// Everything the gas manager fills in one round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlchemyGasAndPaymasterAndData {
    pub paymaster_and_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// Alchemy Gas Manager methods.
#[async_trait]
pub trait AlchemyClient: Send + Sync {
    async fn request_paymaster_and_data(&self, params: &PaymasterAndDataParams) -> Result<Bytes>;

    async fn request_gas_and_paymaster_and_data(
        &self,
        params: &PaymasterAndDataParams,
    ) -> Result<AlchemyGasAndPaymasterAndData>;
}

/// Bundler client for Alchemy endpoints. Priority fees come from Rundler's
/// `rundler_maxPriorityFeePerGas`.
#[derive(Debug, Clone)]
pub struct AlchemyRpcClient {
    inner: Erc4337RpcClient,
}

impl AlchemyRpcClient {
    pub fn new(url: impl Into<String>, headers: &[(String, String)]) -> Result<Self> {
        let transport = JsonRpcTransport::with_headers(url, headers)?;
        Ok(Self {
            inner: Erc4337RpcClient::from_transport(transport)?,
        })
    }

    pub fn url(&self) -> &str {
        self.inner.transport().url()
    }

    async fn sponsor_call(&self, method: &str, params: &PaymasterAndDataParams) -> Result<Value> {
        let res = self
            .inner
            .transport()
            .rpc(method, json!([params]))
            .await
            .map_err(sponsor_error)?;
        check_embedded_error(&res)?;
        Ok(res)
    }
}

#[async_trait]
impl AlchemyClient for AlchemyRpcClient {
    async fn request_paymaster_and_data(&self, params: &PaymasterAndDataParams) -> Result<Bytes> {
        let res = self
            .sponsor_call("alchemy_requestPaymasterAndData", params)
            .await?;
        parse_paymaster_and_data(&res)
    }

    async fn request_gas_and_paymaster_and_data(
        &self,
        params: &PaymasterAndDataParams,
    ) -> Result<AlchemyGasAndPaymasterAndData> {
        let res = self
            .sponsor_call("alchemy_requestGasAndPaymasterAndData", params)
            .await?;
        parse_gas_and_paymaster_and_data(&res)
    }
}

#[async_trait]
impl Erc4337Client for AlchemyRpcClient {
    async fn estimate_user_operation_gas(
        &self,
        request: &UserOperationRequest,
        entry_point: Address,
    ) -> Result<GasEstimate> {
        self.inner.estimate_user_operation_gas(request, entry_point).await
    }

    async fn send_user_operation(
        &self,
        request: &UserOperationRequest,
        entry_point: Address,
    ) -> Result<H256> {
        self.inner.send_user_operation(request, entry_point).await
    }

    async fn get_user_operation_receipt(&self, hash: H256) -> Result<Option<UserOperationReceipt>> {
        self.inner.get_user_operation_receipt(hash).await
    }

    async fn max_priority_fee_per_gas(&self) -> Result<U256> {
        let res = self
            .inner
            .transport()
            .rpc("rundler_maxPriorityFeePerGas", json!([]))
            .await?;
        let fee = res.as_str().ok_or_else(|| {
            RpcError::UnexpectedResponse(format!("rundler_maxPriorityFeePerGas: {res}"))
        })?;
        crate::encoding::parse_u256_quantity("result", fee)
    }

    async fn get_block_base_fee(&self) -> Result<U256> {
        self.inner.get_block_base_fee().await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        self.inner.call(to, data).await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.inner.get_code(address).await
    }
}

/// Accepts `{ "paymasterAndData": .. }` as well as the newer shape nested
/// under `entrypointV06Response`.
pub(crate) fn parse_paymaster_and_data(result: &Value) -> Result<Bytes> {
    let holder = result
        .get("entrypointV06Response")
        .or_else(|| result.get("entryPointV06Response"))
        .unwrap_or(result);
    let pmd = holder
        .get("paymasterAndData")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::UnexpectedResponse(format!("missing paymasterAndData: {result}")))?;
    parse_bytes("paymasterAndData", pmd)
}

pub(crate) fn parse_gas_and_paymaster_and_data(result: &Value) -> Result<AlchemyGasAndPaymasterAndData> {
    Ok(AlchemyGasAndPaymasterAndData {
        paymaster_and_data: parse_paymaster_and_data(result)?,
        call_gas_limit: parse_u256_field(result, "callGasLimit")?,
        verification_gas_limit: parse_u256_field(result, "verificationGasLimit")?,
        pre_verification_gas: parse_u256_field(result, "preVerificationGas")?,
        max_fee_per_gas: parse_u256_field(result, "maxFeePerGas")?,
        max_priority_fee_per_gas: parse_u256_field(result, "maxPriorityFeePerGas")?,
    })
}
