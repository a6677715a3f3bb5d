//! Bundler and node RPC boundary.

mod rpc;
mod transport;

pub use rpc::Erc4337RpcClient;
pub use transport::JsonRpcTransport;

use crate::chain::Chain;
use crate::error::{AaError, Result};
use crate::types::{FeeValuesEip1559, GasEstimate, UserOperationReceipt, UserOperationRequest};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

pub const DEFAULT_BASE_FEE_MULTIPLIER: f64 = 1.2;

/// The UserOperation methods of ERC-4337 plus the few chain reads accounts
/// and middleware need.
#[async_trait]
pub trait Erc4337Client: Send + Sync {
    async fn estimate_user_operation_gas(
        &self,
        request: &UserOperationRequest,
        entry_point: Address,
    ) -> Result<GasEstimate>;

    async fn send_user_operation(
        &self,
        request: &UserOperationRequest,
        entry_point: Address,
    ) -> Result<H256>;

    /// `Ok(None)` while the bundler has not seen the operation included.
    async fn get_user_operation_receipt(&self, hash: H256) -> Result<Option<UserOperationReceipt>>;

    async fn max_priority_fee_per_gas(&self) -> Result<U256>;

    /// `baseFeePerGas` of the latest block, zero before London.
    async fn get_block_base_fee(&self) -> Result<U256>;

    /// `eth_call` against the latest block. Reverts surface as
    /// [`crate::error::RpcError::Execution`] carrying the revert data.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    async fn get_code(&self, address: Address) -> Result<Bytes>;

    /// Multiplies the latest base fee by the chain's multiplier and adds the
    /// chain's fixed priority fee, or the node's estimate when it has none.
    async fn estimate_fees_per_gas(&self, chain: &Chain) -> Result<FeeValuesEip1559> {
        let multiplier = chain
            .base_fee_multiplier
            .unwrap_or(DEFAULT_BASE_FEE_MULTIPLIER);
        let base_fee = self.get_block_base_fee().await?;
        let gas_price = apply_base_fee_multiplier(base_fee, multiplier)?;
        let max_priority_fee_per_gas = match chain.default_priority_fee {
            Some(fee) => fee,
            None => self.max_priority_fee_per_gas().await?,
        };
        Ok(FeeValuesEip1559 {
            gas_price,
            max_fee_per_gas: gas_price + max_priority_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }
}

/// `base * ceil(multiplier * 10^4) / 10^4`, truncating the final division.
pub fn apply_base_fee_multiplier(base: U256, multiplier: f64) -> Result<U256> {
    if !multiplier.is_finite() || multiplier < DEFAULT_BASE_FEE_MULTIPLIER {
        return Err(AaError::InvalidArgument(format!(
            "`baseFeeMultiplier` must be greater than or equal to {DEFAULT_BASE_FEE_MULTIPLIER}, got {multiplier}"
        )));
    }
    const SCALE: u64 = 10_000;
    let scaled = U256::from((multiplier * SCALE as f64).ceil() as u64);
    Ok(base * scaled / U256::from(SCALE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{expect_fees, MockBundler};

    #[test]
    fn multiplier_truncates_the_product() {
        assert_eq!(
            apply_base_fee_multiplier(U256::from(100), 1.2).unwrap(),
            U256::from(120)
        );
        // 7 * 1.25 = 8.75
        assert_eq!(
            apply_base_fee_multiplier(U256::from(7), 1.25).unwrap(),
            U256::from(8)
        );
        // 3 * 1.5 = 4.5
        assert_eq!(
            apply_base_fee_multiplier(U256::from(3), 1.5).unwrap(),
            U256::from(4)
        );
    }

    #[test]
    fn multiplier_below_floor_is_rejected() {
        let err = apply_base_fee_multiplier(U256::from(100), 1.1).unwrap_err();
        assert!(matches!(err, AaError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn fees_use_network_priority_fee_by_default() {
        let mut client = MockBundler::new();
        expect_fees(&mut client, 1_000, 50);

        let fees = client.estimate_fees_per_gas(&Chain::SEPOLIA).await.unwrap();
        assert_eq!(fees.gas_price, U256::from(1_200));
        assert_eq!(fees.max_priority_fee_per_gas, U256::from(50));
        assert_eq!(fees.max_fee_per_gas, U256::from(1_250));
    }

    #[tokio::test]
    async fn fees_prefer_chain_fixed_priority_fee() {
        let mut client = MockBundler::new();
        client
            .expect_get_block_base_fee()
            .times(1)
            .returning(|| Ok(U256::from(1_000)));
        client.expect_max_priority_fee_per_gas().never();
        let chain = Chain::POLYGON
            .with_base_fee_multiplier(1.5)
            .with_default_priority_fee(U256::from(30));

        let fees = client.estimate_fees_per_gas(&chain).await.unwrap();
        assert_eq!(fees.gas_price, U256::from(1_500));
        assert_eq!(fees.max_fee_per_gas, U256::from(1_530));
    }
}
