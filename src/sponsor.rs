//! Pieces shared by the Alchemy and Pimlico gas managers.
//!
//! Both sponsors can estimate gas themselves while signing off on the
//! paymaster data. When they do, the provider's own gas and fee stages step
//! aside, unless the caller overrides `paymasterAndData` and the sponsor
//! stage is skipped for that run.

use crate::chain::Chain;
use crate::client::Erc4337Client;
use crate::error::{AaError, Result, RpcError};
use crate::middleware::{ClientMiddleware, MiddlewareContext};
use crate::types::{UserOperation, UserOperationOverrides};
use async_trait::async_trait;
use ethers::types::{Bytes, U256};
use hex_literal::hex;
use serde_json::Value;
use std::sync::Arc;

const DUMMY_PAYMASTER_AND_DATA_MAINNETS: [u8; 117] = hex!(
    "4Fd9098af9ddcB41DA48A1d78F91F1398965addcfffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

const DUMMY_PAYMASTER_AND_DATA_TESTNETS: [u8; 117] = hex!(
    "c03aac639bb21233e0139381970328db8bceeb67fffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

/// Placeholder `paymasterAndData` the hosted paymasters accept during gas
/// estimation: their verifying paymaster address followed by a dummy
/// validity window and signature.
pub fn dummy_paymaster_and_data(chain: &Chain) -> Bytes {
    match chain.id {
        1 | 10 | 137 | 42_161 => Bytes::from(DUMMY_PAYMASTER_AND_DATA_MAINNETS.to_vec()),
        _ => Bytes::from(DUMMY_PAYMASTER_AND_DATA_TESTNETS.to_vec()),
    }
}

/// Maps a sponsor call's failure to [`AaError::Paymaster`] when the sponsor
/// itself rejected the request.
pub(crate) fn sponsor_error(err: RpcError) -> AaError {
    match err {
        RpcError::Execution { code, message, .. } => AaError::Paymaster { code, message },
        other => AaError::Rpc(other),
    }
}

/// Some sponsors report rejections inside `result` instead of as a JSON-RPC
/// error.
pub(crate) fn check_embedded_error(result: &Value) -> Result<()> {
    match result.get("error").filter(|e| !e.is_null()) {
        None => Ok(()),
        Some(err) => Err(AaError::Paymaster {
            code: err.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
    }
}

/// Zeroes the gas limits so the sponsor estimates them. Falls back to
/// `fallback` when the caller supplies its own `paymasterAndData`.
pub struct DeferredGasEstimator {
    fallback: Arc<dyn ClientMiddleware>,
}

impl DeferredGasEstimator {
    pub fn new(fallback: Arc<dyn ClientMiddleware>) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl ClientMiddleware for DeferredGasEstimator {
    async fn call(
        &self,
        client: &dyn Erc4337Client,
        mut op: UserOperation,
        overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        if overrides.paymaster_and_data.is_some() {
            return self.fallback.call(client, op, overrides, ctx).await;
        }
        op.call_gas_limit = Some(U256::zero());
        op.verification_gas_limit = Some(U256::zero());
        op.pre_verification_gas = Some(U256::zero());
        Ok(op)
    }
}

/// Leaves fees to the sponsor: caller overrides or already set values are
/// kept, anything else is zero. Falls back to `fallback` when the caller
/// supplies its own `paymasterAndData`.
pub struct DeferredFeeDataGetter {
    fallback: Arc<dyn ClientMiddleware>,
}

impl DeferredFeeDataGetter {
    pub fn new(fallback: Arc<dyn ClientMiddleware>) -> Self {
        Self { fallback }
    }
}

#[async_trait]
impl ClientMiddleware for DeferredFeeDataGetter {
    async fn call(
        &self,
        client: &dyn Erc4337Client,
        mut op: UserOperation,
        overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        if overrides.paymaster_and_data.is_some() {
            return self.fallback.call(client, op, overrides, ctx).await;
        }
        op.max_fee_per_gas = Some(
            overrides
                .max_fee_per_gas
                .or(op.max_fee_per_gas)
                .unwrap_or_default(),
        );
        op.max_priority_fee_per_gas = Some(
            overrides
                .max_priority_fee_per_gas
                .or(op.max_priority_fee_per_gas)
                .unwrap_or_default(),
        );
        Ok(op)
    }
}
