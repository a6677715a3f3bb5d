//! mockall doubles for the client, signer and sponsor traits.

use crate::account::SmartAccountSigner;
use crate::alchemy::{AlchemyClient, AlchemyGasAndPaymasterAndData, PaymasterAndDataParams};
use crate::client::Erc4337Client;
use crate::error::{AaError, Result, RpcError};
use crate::pimlico::{
    GasPrice, PimlicoClient, PimlicoSponsorResult, PimlicoUserOperationGasPrice,
    SponsorUserOperationParams,
};
use crate::types::{GasEstimate, Receipt, UserOperationReceipt, UserOperationRequest};
use ethers::types::{Address, Bytes, H256, U256};

mockall::mock! {
    pub Bundler {}

    #[async_trait::async_trait]
    impl Erc4337Client for Bundler {
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
        async fn get_user_operation_receipt(&self, hash: H256)
            -> Result<Option<UserOperationReceipt>>;
        async fn max_priority_fee_per_gas(&self) -> Result<U256>;
        async fn get_block_base_fee(&self) -> Result<U256>;
        async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;
        async fn get_code(&self, address: Address) -> Result<Bytes>;
    }
}

mockall::mock! {
    pub Signer {}

    #[async_trait::async_trait]
    impl SmartAccountSigner for Signer {
        fn signer_type(&self) -> &'static str;
        fn address(&self) -> Address;
        async fn sign_message(&self, message: &[u8]) -> Result<Bytes>;
    }
}

mockall::mock! {
    pub GasManager {}

    #[async_trait::async_trait]
    impl AlchemyClient for GasManager {
        async fn request_paymaster_and_data(&self, params: &PaymasterAndDataParams)
            -> Result<Bytes>;
        async fn request_gas_and_paymaster_and_data(
            &self,
            params: &PaymasterAndDataParams,
        ) -> Result<AlchemyGasAndPaymasterAndData>;
    }
}

mockall::mock! {
    pub Paymaster {}

    #[async_trait::async_trait]
    impl PimlicoClient for Paymaster {
        async fn get_user_operation_gas_price(&self) -> Result<PimlicoUserOperationGasPrice>;
        async fn sponsor_user_operation(
            &self,
            params: &SponsorUserOperationParams,
        ) -> Result<PimlicoSponsorResult>;
    }
}

pub(crate) fn gas_estimate(call: u64, verification: u64, pre_verification: u64) -> GasEstimate {
    GasEstimate {
        call_gas_limit: U256::from(call),
        verification_gas_limit: U256::from(verification),
        pre_verification_gas: U256::from(pre_verification),
    }
}

/// Answers the base fee and priority fee reads any number of times.
pub(crate) fn expect_fees(client: &mut MockBundler, base_fee: u64, priority_fee: u64) {
    client
        .expect_get_block_base_fee()
        .returning(move || Ok(U256::from(base_fee)));
    client
        .expect_max_priority_fee_per_gas()
        .returning(move || Ok(U256::from(priority_fee)));
}

/// Answers `eth_estimateUserOperationGas` any number of times.
pub(crate) fn expect_gas_estimate(client: &mut MockBundler, estimate: GasEstimate) {
    client
        .expect_estimate_user_operation_gas()
        .returning(move |_, _| Ok(estimate));
}

/// Reports no code at any address, so accounts stay counterfactual.
pub(crate) fn expect_undeployed(client: &mut MockBundler) {
    client.expect_get_code().returning(|_| Ok(Bytes::new()));
}

/// `eth_call` failure as the node reports a revert.
pub(crate) fn execution_reverted(data: Option<&str>) -> AaError {
    AaError::Rpc(RpcError::Execution {
        code: 3,
        message: "execution reverted".into(),
        data: data.map(str::to_string),
    })
}

/// Deterministic 65-byte stand-in for an owner signature over `message`.
pub(crate) fn test_signature(message: &[u8]) -> Bytes {
    let digest = ethers::utils::keccak256(message);
    let mut sig = Vec::with_capacity(65);
    sig.extend_from_slice(&digest);
    sig.extend_from_slice(&digest);
    sig.push(0x1b);
    Bytes::from(sig)
}

/// Signer owned by `owner` that signs with [`test_signature`].
pub(crate) fn mock_signer(owner: Address) -> MockSigner {
    let mut signer = MockSigner::new();
    signer.expect_signer_type().return_const("mock");
    signer.expect_address().return_const(owner);
    signer
        .expect_sign_message()
        .returning(|message| Ok(test_signature(message)));
    signer
}

/// Pimlico gas price tiers where tier `n` bids `n` wei priority and `10n` max fee.
pub(crate) fn tiered_gas_price() -> PimlicoUserOperationGasPrice {
    let tier = |fee: u64| GasPrice {
        max_fee_per_gas: U256::from(fee * 10),
        max_priority_fee_per_gas: U256::from(fee),
    };
    PimlicoUserOperationGasPrice {
        slow: tier(1),
        standard: tier(2),
        fast: tier(3),
    }
}

pub(crate) fn sample_receipt(hash: H256) -> UserOperationReceipt {
    UserOperationReceipt {
        user_op_hash: hash,
        entry_point: crate::chain::ENTRY_POINT_V06,
        sender: Address::repeat_byte(0x11),
        nonce: U256::zero(),
        paymaster: None,
        actual_gas_cost: U256::from(21_000),
        actual_gas_used: U256::from(21_000),
        success: true,
        reason: None,
        receipt: Receipt {
            transaction_hash: H256::repeat_byte(0xee),
            ..Default::default()
        },
    }
}
