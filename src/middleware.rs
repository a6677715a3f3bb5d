//! The four-stage pipeline that fills an in-progress UserOperation.
//!
//! Stages run in a fixed order: dummy paymaster data, fee data, gas
//! estimation, paymaster data. Each stage is a [`ClientMiddleware`] and can
//! be swapped without touching the others. When the caller overrides
//! `paymasterAndData`, the paymaster stage is replaced by
//! [`OverridePaymasterData`] for that run.

use crate::chain::Chain;
use crate::client::Erc4337Client;
use crate::error::Result;
use crate::types::{UserOperation, UserOperationOverrides};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use std::fmt;
use std::sync::Arc;

/// Read-only facts every stage may need.
#[derive(Debug, Clone, Copy)]
pub struct MiddlewareContext<'a> {
    pub entry_point: Address,
    pub chain: &'a Chain,
}

#[async_trait]
pub trait ClientMiddleware: Send + Sync {
    async fn call(
        &self,
        client: &dyn Erc4337Client,
        op: UserOperation,
        overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddlewareStage {
    DummyPaymasterData,
    FeeDataGetter,
    GasEstimator,
    PaymasterData,
    OverridePaymasterData,
}

impl MiddlewareStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            MiddlewareStage::DummyPaymasterData => "dummy_paymaster_data",
            MiddlewareStage::FeeDataGetter => "fee_data_getter",
            MiddlewareStage::GasEstimator => "gas_estimator",
            MiddlewareStage::PaymasterData => "paymaster_data",
            MiddlewareStage::OverridePaymasterData => "override_paymaster_data",
        }
    }
}

impl fmt::Display for MiddlewareStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub struct MiddlewarePipeline {
    dummy_paymaster_data: Arc<dyn ClientMiddleware>,
    fee_data_getter: Arc<dyn ClientMiddleware>,
    gas_estimator: Arc<dyn ClientMiddleware>,
    paymaster_data: Arc<dyn ClientMiddleware>,
    override_paymaster_data: Arc<dyn ClientMiddleware>,
}

impl MiddlewarePipeline {
    pub fn new(fee_data_getter: DefaultFeeDataGetter, gas_estimator: DefaultGasEstimator) -> Self {
        Self {
            dummy_paymaster_data: Arc::new(DummyPaymasterData::default()),
            fee_data_getter: Arc::new(fee_data_getter),
            gas_estimator: Arc::new(gas_estimator),
            paymaster_data: Arc::new(DefaultPaymasterData),
            override_paymaster_data: Arc::new(OverridePaymasterData),
        }
    }

    pub fn set(&mut self, stage: MiddlewareStage, middleware: Arc<dyn ClientMiddleware>) {
        let slot = match stage {
            MiddlewareStage::DummyPaymasterData => &mut self.dummy_paymaster_data,
            MiddlewareStage::FeeDataGetter => &mut self.fee_data_getter,
            MiddlewareStage::GasEstimator => &mut self.gas_estimator,
            MiddlewareStage::PaymasterData => &mut self.paymaster_data,
            MiddlewareStage::OverridePaymasterData => &mut self.override_paymaster_data,
        };
        *slot = middleware;
    }

    pub fn get(&self, stage: MiddlewareStage) -> &Arc<dyn ClientMiddleware> {
        match stage {
            MiddlewareStage::DummyPaymasterData => &self.dummy_paymaster_data,
            MiddlewareStage::FeeDataGetter => &self.fee_data_getter,
            MiddlewareStage::GasEstimator => &self.gas_estimator,
            MiddlewareStage::PaymasterData => &self.paymaster_data,
            MiddlewareStage::OverridePaymasterData => &self.override_paymaster_data,
        }
    }

    pub async fn run(
        &self,
        client: &dyn Erc4337Client,
        mut op: UserOperation,
        overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        let paymaster_stage = if overrides.paymaster_and_data.is_some() {
            MiddlewareStage::OverridePaymasterData
        } else {
            MiddlewareStage::PaymasterData
        };
        let stages = [
            MiddlewareStage::DummyPaymasterData,
            MiddlewareStage::FeeDataGetter,
            MiddlewareStage::GasEstimator,
            paymaster_stage,
        ];
        for stage in stages {
            tracing::debug!(stage = stage.as_str(), sender = %op.sender, "running middleware");
            op = self.get(stage).call(client, op, overrides, ctx).await?;
        }
        Ok(op)
    }
}

impl fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewarePipeline").finish_non_exhaustive()
    }
}

/// Sets a placeholder `paymasterAndData` so gas estimation sees a payload of
/// realistic size. Sponsors that validate the placeholder need their own
/// sentinel, passed in through [`DummyPaymasterData::new`].
#[derive(Debug, Clone, Default)]
pub struct DummyPaymasterData {
    paymaster_and_data: Bytes,
}

impl DummyPaymasterData {
    pub fn new(paymaster_and_data: impl Into<Bytes>) -> Self {
        Self {
            paymaster_and_data: paymaster_and_data.into(),
        }
    }
}

#[async_trait]
impl ClientMiddleware for DummyPaymasterData {
    async fn call(
        &self,
        _client: &dyn Erc4337Client,
        mut op: UserOperation,
        _overrides: &UserOperationOverrides,
        _ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        op.paymaster_and_data = Some(self.paymaster_and_data.clone());
        Ok(op)
    }
}

/// Bids a buffered priority fee on top of the network's base fee.
#[derive(Debug, Clone, Copy)]
pub struct DefaultFeeDataGetter {
    /// Floor for the bid on chains without a registered one.
    pub min_priority_fee_per_bid: U256,
    /// Percentage added to the network's priority fee estimate.
    pub max_priority_fee_buffer_percent: u64,
}

impl DefaultFeeDataGetter {
    fn bid(&self, estimate: U256, chain: &Chain) -> U256 {
        let floor = chain
            .min_priority_fee_per_bid()
            .unwrap_or(self.min_priority_fee_per_bid);
        let buffered = estimate * (100 + self.max_priority_fee_buffer_percent) / 100;
        buffered.max(floor)
    }
}

#[async_trait]
impl ClientMiddleware for DefaultFeeDataGetter {
    async fn call(
        &self,
        client: &dyn Erc4337Client,
        mut op: UserOperation,
        overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        let max_priority_fee_per_gas = match overrides.max_priority_fee_per_gas {
            Some(fee) => fee,
            None => self.bid(client.max_priority_fee_per_gas().await?, ctx.chain),
        };

        // keep the network's base fee component, swap in our own bid
        let max_fee_per_gas = match overrides.max_fee_per_gas {
            Some(fee) => fee,
            None => {
                let fees = client.estimate_fees_per_gas(ctx.chain).await?;
                fees.max_fee_per_gas.saturating_sub(fees.max_priority_fee_per_gas)
                    + max_priority_fee_per_gas
            }
        };

        op.max_fee_per_gas = Some(max_fee_per_gas);
        op.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        Ok(op)
    }
}

/// Asks the bundler for gas limits. Overridden limits are used as is; when all
/// three are overridden the bundler is not called.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultGasEstimator {
    /// Applied to the estimated preVerificationGas only.
    pub pre_verification_gas_buffer_percent: u64,
}

#[async_trait]
impl ClientMiddleware for DefaultGasEstimator {
    async fn call(
        &self,
        client: &dyn Erc4337Client,
        mut op: UserOperation,
        overrides: &UserOperationOverrides,
        ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        if let (Some(call), Some(verification), Some(pre_verification)) = (
            overrides.call_gas_limit,
            overrides.verification_gas_limit,
            overrides.pre_verification_gas,
        ) {
            op.call_gas_limit = Some(call);
            op.verification_gas_limit = Some(verification);
            op.pre_verification_gas = Some(pre_verification);
            return Ok(op);
        }

        let estimate = client
            .estimate_user_operation_gas(&op.to_request(), ctx.entry_point)
            .await?;
        tracing::debug!(
            call_gas_limit = %estimate.call_gas_limit,
            verification_gas_limit = %estimate.verification_gas_limit,
            pre_verification_gas = %estimate.pre_verification_gas,
            "bundler gas estimate"
        );

        let buffered_pvg = estimate.pre_verification_gas
            * (100 + self.pre_verification_gas_buffer_percent)
            / 100;
        op.call_gas_limit = Some(overrides.call_gas_limit.unwrap_or(estimate.call_gas_limit));
        op.verification_gas_limit = Some(
            overrides
                .verification_gas_limit
                .unwrap_or(estimate.verification_gas_limit),
        );
        op.pre_verification_gas = Some(overrides.pre_verification_gas.unwrap_or(buffered_pvg));
        Ok(op)
    }
}

/// No sponsorship: `paymasterAndData` is empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPaymasterData;

#[async_trait]
impl ClientMiddleware for DefaultPaymasterData {
    async fn call(
        &self,
        _client: &dyn Erc4337Client,
        mut op: UserOperation,
        _overrides: &UserOperationOverrides,
        _ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        op.paymaster_and_data = Some(Bytes::new());
        Ok(op)
    }
}

/// Echoes the caller's `paymasterAndData` override.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverridePaymasterData;

#[async_trait]
impl ClientMiddleware for OverridePaymasterData {
    async fn call(
        &self,
        _client: &dyn Erc4337Client,
        mut op: UserOperation,
        overrides: &UserOperationOverrides,
        _ctx: &MiddlewareContext<'_>,
    ) -> Result<UserOperation> {
        op.paymaster_and_data = Some(overrides.paymaster_and_data.clone().unwrap_or_default());
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ENTRY_POINT_V06;
    use crate::test_utils::{expect_fees, expect_gas_estimate, gas_estimate, MockBundler};
    use std::sync::Mutex;

    const GWEI: u64 = 1_000_000_000;

    fn pipeline() -> MiddlewarePipeline {
        MiddlewarePipeline::new(
            DefaultFeeDataGetter {
                min_priority_fee_per_bid: U256::from(100_000_000u64),
                max_priority_fee_buffer_percent: 33,
            },
            DefaultGasEstimator::default(),
        )
    }

    fn bundler() -> MockBundler {
        let mut client = MockBundler::new();
        expect_fees(&mut client, 10 * GWEI, GWEI);
        expect_gas_estimate(&mut client, gas_estimate(50_000, 100_000, 40_000));
        client
    }

    fn ctx(chain: &Chain) -> MiddlewareContext<'_> {
        MiddlewareContext {
            entry_point: ENTRY_POINT_V06,
            chain,
        }
    }

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl ClientMiddleware for Recorder {
        async fn call(
            &self,
            _client: &dyn Erc4337Client,
            op: UserOperation,
            _overrides: &UserOperationOverrides,
            _ctx: &MiddlewareContext<'_>,
        ) -> Result<UserOperation> {
            self.log.lock().unwrap().push(self.name);
            Ok(op)
        }
    }

    struct FixedPaymaster(Bytes);

    #[async_trait]
    impl ClientMiddleware for FixedPaymaster {
        async fn call(
            &self,
            _client: &dyn Erc4337Client,
            mut op: UserOperation,
            _overrides: &UserOperationOverrides,
            _ctx: &MiddlewareContext<'_>,
        ) -> Result<UserOperation> {
            op.paymaster_and_data = Some(self.0.clone());
            Ok(op)
        }
    }

    #[tokio::test]
    async fn stages_run_in_fixed_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = pipeline();
        for (stage, name) in [
            (MiddlewareStage::PaymasterData, "paymaster"),
            (MiddlewareStage::GasEstimator, "gas"),
            (MiddlewareStage::FeeDataGetter, "fee"),
            (MiddlewareStage::DummyPaymasterData, "dummy"),
        ] {
            pipeline.set(stage, Arc::new(Recorder { name, log: log.clone() }));
        }

        let client = MockBundler::new();
        pipeline
            .run(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["dummy", "fee", "gas", "paymaster"]);
    }

    #[tokio::test]
    async fn defaults_fill_every_field() {
        let client = bundler();
        let op = pipeline()
            .run(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();

        // 1 gwei * 1.33 beats the 0.1 gwei floor
        let bid = U256::from(1_330_000_000u64);
        assert_eq!(op.max_priority_fee_per_gas, Some(bid));
        // base 10 gwei * 1.2
        assert_eq!(op.max_fee_per_gas, Some(U256::from(12 * GWEI) + bid));
        assert_eq!(op.call_gas_limit, Some(U256::from(50_000)));
        assert_eq!(op.pre_verification_gas, Some(U256::from(40_000)));
        assert_eq!(op.paymaster_and_data, Some(Bytes::new()));
        assert!(op.is_submittable());
    }

    #[tokio::test]
    async fn replacing_paymaster_stage_leaves_fee_and_gas_alone() {
        let client = bundler();
        let base = pipeline()
            .run(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();

        let mut sponsored = pipeline();
        sponsored.set(
            MiddlewareStage::PaymasterData,
            Arc::new(FixedPaymaster(Bytes::from(vec![0xde, 0xad]))),
        );
        let op = sponsored
            .run(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();

        assert_eq!(op.paymaster_and_data, Some(Bytes::from(vec![0xde, 0xad])));
        assert_eq!(op.max_fee_per_gas, base.max_fee_per_gas);
        assert_eq!(op.max_priority_fee_per_gas, base.max_priority_fee_per_gas);
        assert_eq!(op.call_gas_limit, base.call_gas_limit);
        assert_eq!(op.verification_gas_limit, base.verification_gas_limit);
        assert_eq!(op.pre_verification_gas, base.pre_verification_gas);
    }

    #[tokio::test]
    async fn gas_estimation_sees_dummy_paymaster_data() {
        let mut client = MockBundler::new();
        expect_fees(&mut client, 10 * GWEI, GWEI);
        client
            .expect_estimate_user_operation_gas()
            .withf(|request, entry_point| {
                request.paymaster_and_data == format!("0x{}", "ab".repeat(20))
                    && *entry_point == ENTRY_POINT_V06
            })
            .times(1)
            .returning(|_, _| Ok(gas_estimate(50_000, 100_000, 40_000)));
        let mut pipeline = pipeline();
        pipeline.set(
            MiddlewareStage::DummyPaymasterData,
            Arc::new(DummyPaymasterData::new(vec![0xab_u8; 20])),
        );
        let op = pipeline
            .run(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();

        assert_eq!(op.paymaster_and_data, Some(Bytes::new()));
    }

    #[tokio::test]
    async fn overrides_take_precedence() {
        let mut client = MockBundler::new();
        client.expect_estimate_user_operation_gas().never();
        client.expect_max_priority_fee_per_gas().never();
        client.expect_get_block_base_fee().never();
        let overrides = UserOperationOverrides {
            call_gas_limit: Some(U256::from(1)),
            verification_gas_limit: Some(U256::from(2)),
            pre_verification_gas: Some(U256::from(3)),
            max_fee_per_gas: Some(U256::from(4)),
            max_priority_fee_per_gas: Some(U256::from(5)),
            paymaster_and_data: Some(Bytes::from(vec![0x01])),
        };
        let op = pipeline()
            .run(&client, UserOperation::default(), &overrides, &ctx(&Chain::SEPOLIA))
            .await
            .unwrap();

        assert_eq!(op.call_gas_limit, Some(U256::from(1)));
        assert_eq!(op.verification_gas_limit, Some(U256::from(2)));
        assert_eq!(op.pre_verification_gas, Some(U256::from(3)));
        assert_eq!(op.max_fee_per_gas, Some(U256::from(4)));
        assert_eq!(op.max_priority_fee_per_gas, Some(U256::from(5)));
        assert_eq!(op.paymaster_and_data, Some(Bytes::from(vec![0x01])));
    }

    #[tokio::test]
    async fn partial_gas_override_still_estimates() {
        let mut client = MockBundler::new();
        client
            .expect_estimate_user_operation_gas()
            .times(1)
            .returning(|_, _| Ok(gas_estimate(50_000, 100_000, 40_000)));
        let overrides = UserOperationOverrides {
            call_gas_limit: Some(U256::from(7)),
            ..Default::default()
        };
        let estimator = DefaultGasEstimator {
            pre_verification_gas_buffer_percent: 5,
        };
        let op = estimator
            .call(&client, UserOperation::default(), &overrides, &ctx(&Chain::ARBITRUM))
            .await
            .unwrap();

        assert_eq!(op.call_gas_limit, Some(U256::from(7)));
        assert_eq!(op.verification_gas_limit, Some(U256::from(100_000)));
        assert_eq!(op.pre_verification_gas, Some(U256::from(42_000)));
    }

    #[tokio::test]
    async fn arbitrum_floor_replaces_default_floor() {
        let mut client = MockBundler::new();
        expect_fees(&mut client, 10 * GWEI, 0);
        let getter = DefaultFeeDataGetter {
            min_priority_fee_per_bid: U256::from(100_000_000u64),
            max_priority_fee_buffer_percent: 33,
        };

        let arb = getter
            .call(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::ARBITRUM))
            .await
            .unwrap();
        assert_eq!(arb.max_priority_fee_per_gas, Some(U256::from(10_000_000u64)));

        let eth = getter
            .call(&client, UserOperation::default(), &Default::default(), &ctx(&Chain::MAINNET))
            .await
            .unwrap();
        assert_eq!(eth.max_priority_fee_per_gas, Some(U256::from(100_000_000u64)));
    }

    #[test]
    fn stage_names_are_stable() {
        assert_eq!(MiddlewareStage::FeeDataGetter.to_string(), "fee_data_getter");
        assert_eq!(MiddlewareStage::OverridePaymasterData.as_str(), "override_paymaster_data");
    }
}
