use crate::client::{Erc4337Client, Erc4337RpcClient};
use crate::encoding::{parse_bytes, parse_u256_field};
use crate::error::{AaError, Result, RpcError};
use crate::sponsor::{check_embedded_error, sponsor_error};
use crate::types::{GasEstimate, UserOperationReceipt, UserOperationRequest};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPrice {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

/// `pimlico_getUserOperationGasPrice` tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PimlicoUserOperationGasPrice {
    pub slow: GasPrice,
    pub standard: GasPrice,
    pub fast: GasPrice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorUserOperationParams {
    pub user_operation: UserOperationRequest,
    pub entry_point: Address,
    pub sponsorship_policy_id: Option<String>,
}

impl SponsorUserOperationParams {
    /// Positional `[userOperation, entryPoint, {sponsorshipPolicyId}?]`.
    pub fn to_params(&self) -> Value {
        let mut params = vec![
            json!(self.user_operation),
            json!(crate::encoding::fmt_address(self.entry_point)),
        ];
        if let Some(policy) = &self.sponsorship_policy_id {
            params.push(json!({ "sponsorshipPolicyId": policy }));
        }
        Value::Array(params)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PimlicoSponsorResult {
    pub paymaster_and_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

#[async_trait]
pub trait PimlicoClient: Send + Sync {
    async fn get_user_operation_gas_price(&self) -> Result<PimlicoUserOperationGasPrice>;

    async fn sponsor_user_operation(
        &self,
        params: &SponsorUserOperationParams,
    ) -> Result<PimlicoSponsorResult>;
}

/// Bundler client for Pimlico endpoints. The priority fee is the standard
/// tier of `pimlico_getUserOperationGasPrice`.
#[derive(Debug, Clone)]
pub struct PimlicoRpcClient {
    inner: Erc4337RpcClient,
}

impl PimlicoRpcClient {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            inner: Erc4337RpcClient::new(url)?,
        })
    }

    pub fn url(&self) -> &str {
        self.inner.transport().url()
    }
}

#[async_trait]
impl PimlicoClient for PimlicoRpcClient {
    async fn get_user_operation_gas_price(&self) -> Result<PimlicoUserOperationGasPrice> {
        let res = self
            .inner
            .transport()
            .rpc("pimlico_getUserOperationGasPrice", json!([]))
            .await?;
        parse_gas_price(&res)
    }

    async fn sponsor_user_operation(
        &self,
        params: &SponsorUserOperationParams,
    ) -> Result<PimlicoSponsorResult> {
        let res = self
            .inner
            .transport()
            .rpc("pm_sponsorUserOperation", params.to_params())
            .await
            .map_err(sponsor_error)?;
        check_embedded_error(&res)?;
        parse_sponsor_result(&res)
    }
}

#[async_trait]
impl Erc4337Client for PimlicoRpcClient {
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
        Ok(self
            .get_user_operation_gas_price()
            .await?
            .standard
            .max_priority_fee_per_gas)
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

fn tier(res: &Value, name: &'static str) -> Result<GasPrice> {
    let tier = res.get(name).ok_or_else(|| {
        AaError::from(RpcError::UnexpectedResponse(format!(
            "pimlico_getUserOperationGasPrice: missing `{name}` tier"
        )))
    })?;
    Ok(GasPrice {
        max_fee_per_gas: parse_u256_field(tier, "maxFeePerGas")?,
        max_priority_fee_per_gas: parse_u256_field(tier, "maxPriorityFeePerGas")?,
    })
}

pub(crate) fn parse_gas_price(res: &Value) -> Result<PimlicoUserOperationGasPrice> {
    Ok(PimlicoUserOperationGasPrice {
        slow: tier(res, "slow")?,
        standard: tier(res, "standard")?,
        fast: tier(res, "fast")?,
    })
}

/// Older paymaster versions name the verification limit `verificationGas`.
pub(crate) fn parse_sponsor_result(res: &Value) -> Result<PimlicoSponsorResult> {
    let pmd = res
        .get("paymasterAndData")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::UnexpectedResponse(format!("missing paymasterAndData: {res}")))?;
    let verification_gas_limit = if res.get("verificationGasLimit").is_some() {
        parse_u256_field(res, "verificationGasLimit")?
    } else {
        parse_u256_field(res, "verificationGas")?
    };
    Ok(PimlicoSponsorResult {
        paymaster_and_data: parse_bytes("paymasterAndData", pmd)?,
        call_gas_limit: parse_u256_field(res, "callGasLimit")?,
        verification_gas_limit,
        pre_verification_gas: parse_u256_field(res, "preVerificationGas")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ENTRY_POINT_V06;
    use crate::types::UserOperation;

    #[test]
    fn gas_price_tiers() {
        let res = json!({
            "slow": { "maxFeePerGas": "0x64", "maxPriorityFeePerGas": "0xa" },
            "standard": { "maxFeePerGas": "0xc8", "maxPriorityFeePerGas": "0x14" },
            "fast": { "maxFeePerGas": "0x12c", "maxPriorityFeePerGas": "0x1e" }
        });
        let price = parse_gas_price(&res).unwrap();
        assert_eq!(price.slow.max_fee_per_gas, U256::from(100));
        assert_eq!(price.standard.max_priority_fee_per_gas, U256::from(20));
        assert_eq!(price.fast.max_fee_per_gas, U256::from(300));
    }

    #[test]
    fn gas_price_missing_tier_is_error() {
        let res = json!({ "standard": { "maxFeePerGas": "0x1", "maxPriorityFeePerGas": "0x1" } });
        assert!(parse_gas_price(&res).is_err());
    }

    #[test]
    fn sponsor_result_accepts_both_verification_names() {
        let limit = json!({
            "paymasterAndData": "0xbeef",
            "callGasLimit": "0x10",
            "verificationGasLimit": "0x20",
            "preVerificationGas": "0x30"
        });
        let legacy = json!({
            "paymasterAndData": "0xbeef",
            "callGasLimit": "0x10",
            "verificationGas": "0x20",
            "preVerificationGas": "0x30"
        });
        for res in [limit, legacy] {
            let out = parse_sponsor_result(&res).unwrap();
            assert_eq!(out.paymaster_and_data, Bytes::from(vec![0xbe, 0xef]));
            assert_eq!(out.verification_gas_limit, U256::from(0x20));
            assert_eq!(out.pre_verification_gas, U256::from(0x30));
        }
    }

    #[test]
    fn sponsor_params_are_positional() {
        let params = SponsorUserOperationParams {
            user_operation: UserOperation::default().to_request(),
            entry_point: ENTRY_POINT_V06,
            sponsorship_policy_id: Some("sp_123".into()),
        };
        let v = params.to_params();
        assert_eq!(v[0]["nonce"], "0x0");
        assert_eq!(v[1], "0x5ff137d4b0fdcd49dca30c7cf57e578a026d2789");
        assert_eq!(v[2], json!({ "sponsorshipPolicyId": "sp_123" }));

        let without = SponsorUserOperationParams {
            sponsorship_policy_id: None,
            ..params
        };
        assert_eq!(without.to_params().as_array().map(Vec::len), Some(2));
    }
}
