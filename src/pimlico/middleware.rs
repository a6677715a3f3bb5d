use super::client::{PimlicoClient, SponsorUserOperationParams};
use crate::client::Erc4337Client;
use crate::error::Result;
use crate::middleware::{ClientMiddleware, MiddlewareContext};
use crate::types::{UserOperation, UserOperationOverrides};
use async_trait::async_trait;
use std::sync::Arc;

/// Fees from the standard tier of Pimlico's gas price oracle.
pub struct PimlicoFeeEstimator {
    client: Arc<dyn PimlicoClient>,
}

impl PimlicoFeeEstimator {
    pub fn new(client: Arc<dyn PimlicoClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClientMiddleware for PimlicoFeeEstimator {
    async fn call(
        &self,
        _client: &dyn Erc4337Client,
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

        let standard = self.client.get_user_operation_gas_price().await?.standard;
        op.max_fee_per_gas = Some(overrides.max_fee_per_gas.unwrap_or(standard.max_fee_per_gas));
        op.max_priority_fee_per_gas = Some(
            overrides
                .max_priority_fee_per_gas
                .unwrap_or(standard.max_priority_fee_per_gas),
        );
        Ok(op)
    }
}

/// `pm_sponsorUserOperation` as the final paymaster stage. With
/// `fill_gas_limits` the sponsor's gas limits replace the operation's.
pub struct SponsorUserOperation {
    client: Arc<dyn PimlicoClient>,
    policy_id: Option<String>,
    fill_gas_limits: bool,
}

impl SponsorUserOperation {
    pub fn new(client: Arc<dyn PimlicoClient>, policy_id: Option<String>, fill_gas_limits: bool) -> Self {
        Self {
            client,
            policy_id,
            fill_gas_limits,
        }
    }
}

#[async_trait]
impl ClientMiddleware for SponsorUserOperation {
    async fn call(
        &self,
        _client: &dyn Erc4337Client,
        mut op: UserOperation,
        _overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        let params = SponsorUserOperationParams {
            user_operation: op.to_request(),
            entry_point: ctx.entry_point,
            sponsorship_policy_id: self.policy_id.clone(),
        };
        let res = self.client.sponsor_user_operation(&params).await?;

        op.paymaster_and_data = Some(res.paymaster_and_data);
        if self.fill_gas_limits {
            op.call_gas_limit = Some(res.call_gas_limit);
            op.verification_gas_limit = Some(res.verification_gas_limit);
            op.pre_verification_gas = Some(res.pre_verification_gas);
        }
        tracing::debug!(policy_id = ?self.policy_id, fill_gas_limits = self.fill_gas_limits, "pimlico sponsorship attached");
        Ok(op)
    }
}
