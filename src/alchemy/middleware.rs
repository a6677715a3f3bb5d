use super::client::{AlchemyClient, FeeOverride, PaymasterAndDataParams};
use crate::client::Erc4337Client;
use crate::encoding::fmt_address;
use crate::error::Result;
use crate::middleware::{ClientMiddleware, MiddlewareContext};
use crate::types::{UserOperation, UserOperationOverrides};
use async_trait::async_trait;
use ethers::types::U256;
use std::sync::Arc;

pub const DEFAULT_BASE_FEE_BUFFER_PERCENT: u64 = 50;
pub const DEFAULT_MAX_PRIORITY_FEE_BUFFER_PERCENT: u64 = 5;

/// Buffers both fee components:
/// `maxFee = base * (100 + b) / 100 + priority * (100 + p) / 100`.
#[derive(Debug, Clone, Copy)]
pub struct AlchemyFeeEstimator {
    pub base_fee_buffer_percent: u64,
    pub max_priority_fee_buffer_percent: u64,
}

impl Default for AlchemyFeeEstimator {
    fn default() -> Self {
        Self {
            base_fee_buffer_percent: DEFAULT_BASE_FEE_BUFFER_PERCENT,
            max_priority_fee_buffer_percent: DEFAULT_MAX_PRIORITY_FEE_BUFFER_PERCENT,
        }
    }
}

#[async_trait]
impl ClientMiddleware for AlchemyFeeEstimator {
    async fn call(
        &self,
        client: &dyn Erc4337Client,
        mut op: UserOperation,
        overrides: &UserOperationOverrides,
        _ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        if let (Some(max_fee), Some(max_priority_fee)) =
            (overrides.max_fee_per_gas, overrides.max_priority_fee_per_gas)
        {
            op.max_fee_per_gas = Some(max_fee);
            op.max_priority_fee_per_gas = Some(max_priority_fee);
            return Ok(op);
        }

        let base_fee = client.get_block_base_fee().await?;
        let max_priority_fee = match overrides.max_priority_fee_per_gas {
            Some(fee) => fee,
            None => {
                client.max_priority_fee_per_gas().await?
                    * (100 + self.max_priority_fee_buffer_percent)
                    / 100
            }
        };
        let max_fee = overrides.max_fee_per_gas.unwrap_or_else(|| {
            base_fee * (100 + self.base_fee_buffer_percent) / 100 + max_priority_fee
        });

        op.max_fee_per_gas = Some(max_fee);
        op.max_priority_fee_per_gas = Some(max_priority_fee);
        Ok(op)
    }
}

/// Final paymaster stage when the provider estimates gas itself.
pub struct RequestPaymasterAndData {
    client: Arc<dyn AlchemyClient>,
    policy_id: String,
}

impl RequestPaymasterAndData {
    pub fn new(client: Arc<dyn AlchemyClient>, policy_id: impl Into<String>) -> Self {
        Self {
            client,
            policy_id: policy_id.into(),
        }
    }
}

#[async_trait]
impl ClientMiddleware for RequestPaymasterAndData {
    async fn call(
        &self,
        _client: &dyn Erc4337Client,
        mut op: UserOperation,
        _overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        let params = PaymasterAndDataParams {
            policy_id: self.policy_id.clone(),
            entry_point: fmt_address(ctx.entry_point),
            user_operation: op.to_request(),
            dummy_signature: None,
            fee_override: None,
        };
        op.paymaster_and_data = Some(self.client.request_paymaster_and_data(&params).await?);
        tracing::debug!(policy_id = %self.policy_id, "alchemy paymaster data attached");
        Ok(op)
    }
}

/// Final paymaster stage when the gas manager also estimates gas and fees.
/// Fees already on the operation, e.g. from caller overrides, are passed on
/// as `feeOverride`.
pub struct RequestGasAndPaymasterAndData {
    client: Arc<dyn AlchemyClient>,
    policy_id: String,
}

impl RequestGasAndPaymasterAndData {
    pub fn new(client: Arc<dyn AlchemyClient>, policy_id: impl Into<String>) -> Self {
        Self {
            client,
            policy_id: policy_id.into(),
        }
    }
}

#[async_trait]
impl ClientMiddleware for RequestGasAndPaymasterAndData {
    async fn call(
        &self,
        _client: &dyn Erc4337Client,
        mut op: UserOperation,
        _overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        let request = op.to_request();
        let max_fee = op.max_fee_per_gas.unwrap_or_default();
        let fee_override = (max_fee > U256::zero()).then(|| {
            FeeOverride::fees(max_fee, op.max_priority_fee_per_gas.unwrap_or_default())
        });
        let params = PaymasterAndDataParams {
            policy_id: self.policy_id.clone(),
            entry_point: fmt_address(ctx.entry_point),
            dummy_signature: Some(request.signature.clone()),
            user_operation: request,
            fee_override,
        };

        let res = self.client.request_gas_and_paymaster_and_data(&params).await?;
        op.paymaster_and_data = Some(res.paymaster_and_data);
        op.call_gas_limit = Some(res.call_gas_limit);
        op.verification_gas_limit = Some(res.verification_gas_limit);
        op.pre_verification_gas = Some(res.pre_verification_gas);
        op.max_fee_per_gas = Some(res.max_fee_per_gas);
        op.max_priority_fee_per_gas = Some(res.max_priority_fee_per_gas);
        tracing::debug!(policy_id = %self.policy_id, "alchemy gas and paymaster data attached");
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, ENTRY_POINT_V06};
    use crate::test_utils::{expect_fees, MockBundler};

    const GWEI: u64 = 1_000_000_000;

    fn ctx(chain: &Chain) -> MiddlewareContext<'_> {
        MiddlewareContext {
            entry_point: ENTRY_POINT_V06,
            chain,
        }
    }

    #[tokio::test]
    async fn fee_estimator_buffers_both_components() {
        let mut client = MockBundler::new();
        expect_fees(&mut client, 10 * GWEI, 2 * GWEI);
        let op = AlchemyFeeEstimator::default()
            .call(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();

        let priority = U256::from(2_100_000_000u64);
        assert_eq!(op.max_priority_fee_per_gas, Some(priority));
        assert_eq!(op.max_fee_per_gas, Some(U256::from(15 * GWEI) + priority));
    }

    #[tokio::test]
    async fn fee_estimator_skips_the_node_when_both_fees_are_overridden() {
        let mut client = MockBundler::new();
        client.expect_get_block_base_fee().never();
        client.expect_max_priority_fee_per_gas().never();
        let both = UserOperationOverrides {
            max_fee_per_gas: Some(U256::from(7)),
            max_priority_fee_per_gas: Some(U256::from(3)),
            ..Default::default()
        };
        let op = AlchemyFeeEstimator::default()
            .call(&client, UserOperation::default(), &both, &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();
        assert_eq!(op.max_fee_per_gas, Some(U256::from(7)));
        assert_eq!(op.max_priority_fee_per_gas, Some(U256::from(3)));
    }

    #[tokio::test]
    async fn fee_estimator_keeps_priority_override() {
        let mut client = MockBundler::new();
        client
            .expect_get_block_base_fee()
            .times(1)
            .returning(|| Ok(U256::from(10 * GWEI)));
        client.expect_max_priority_fee_per_gas().never();
        let priority_only = UserOperationOverrides {
            max_priority_fee_per_gas: Some(U256::from(GWEI)),
            ..Default::default()
        };
        let op = AlchemyFeeEstimator {
            base_fee_buffer_percent: 0,
            max_priority_fee_buffer_percent: 0,
        }
        .call(&client, UserOperation::default(), &priority_only, &ctx(&Chain::SEPOLIA))
        .await
        .unwrap();
        assert_eq!(op.max_priority_fee_per_gas, Some(U256::from(GWEI)));
        assert_eq!(op.max_fee_per_gas, Some(U256::from(11 * GWEI)));
    }
}
