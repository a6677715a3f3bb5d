use crate::encoding::{fmt_address, fmt_bytes, fmt_u256, parse_address, parse_bytes, parse_u256_quantity};
use crate::error::AaError;
use ethers::types::{Address, Bytes, H256, U256, U64};
use serde::{Deserialize, Serialize};

/// ERC-4337 UserOperation (EntryPoint v0.6 layout) while it is being filled.
///
/// Gas, fee, paymaster and signature fields start out empty and are set by the
/// middleware pipeline. Only [`UserOperation::is_submittable`] operations may be
/// hashed and sent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub paymaster_and_data: Option<Bytes>,
    pub signature: Option<Bytes>,
}

impl UserOperation {
    /// Names of the fields that keep this operation from being submitted.
    ///
    /// The four gas/fee limits must be set and non-zero. A zero
    /// `maxPriorityFeePerGas` is legal on some chains, so it only has to be set.
    pub fn missing_parameters(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let non_zero = [
            ("callGasLimit", self.call_gas_limit),
            ("verificationGasLimit", self.verification_gas_limit),
            ("preVerificationGas", self.pre_verification_gas),
            ("maxFeePerGas", self.max_fee_per_gas),
        ];
        for (name, value) in non_zero {
            if value.map_or(true, |v| v.is_zero()) {
                missing.push(name);
            }
        }
        if self.max_priority_fee_per_gas.is_none() {
            missing.push("maxPriorityFeePerGas");
        }
        missing
    }

    pub fn is_submittable(&self) -> bool {
        self.missing_parameters().is_empty()
    }

    /// Converts to the hex wire form. Absent numbers become `0x0` and absent
    /// byte strings become `0x`; validate with [`Self::is_submittable`] first.
    pub fn to_request(&self) -> UserOperationRequest {
        let quantity = |v: Option<U256>| fmt_u256(v.unwrap_or_default());
        let bytes = |v: &Option<Bytes>| v.as_ref().map(|b| fmt_bytes(b)).unwrap_or_else(|| "0x".into());
        UserOperationRequest {
            sender: fmt_address(self.sender),
            nonce: fmt_u256(self.nonce),
            init_code: fmt_bytes(&self.init_code),
            call_data: fmt_bytes(&self.call_data),
            call_gas_limit: quantity(self.call_gas_limit),
            verification_gas_limit: quantity(self.verification_gas_limit),
            pre_verification_gas: quantity(self.pre_verification_gas),
            max_fee_per_gas: quantity(self.max_fee_per_gas),
            max_priority_fee_per_gas: quantity(self.max_priority_fee_per_gas),
            paymaster_and_data: bytes(&self.paymaster_and_data),
            signature: bytes(&self.signature),
        }
    }
}

/// UserOperation as bundlers accept it: every field present and hex encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationRequest {
    pub sender: String,
    pub nonce: String,
    pub init_code: String,
    pub call_data: String,
    pub call_gas_limit: String,
    pub verification_gas_limit: String,
    pub pre_verification_gas: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    pub paymaster_and_data: String,
    pub signature: String,
}

impl TryFrom<&UserOperationRequest> for UserOperation {
    type Error = AaError;

    fn try_from(req: &UserOperationRequest) -> Result<Self, Self::Error> {
        Ok(UserOperation {
            sender: parse_address("sender", &req.sender)?,
            nonce: parse_u256_quantity("nonce", &req.nonce)?,
            init_code: parse_bytes("initCode", &req.init_code)?,
            call_data: parse_bytes("callData", &req.call_data)?,
            call_gas_limit: Some(parse_u256_quantity("callGasLimit", &req.call_gas_limit)?),
            verification_gas_limit: Some(parse_u256_quantity(
                "verificationGasLimit",
                &req.verification_gas_limit,
            )?),
            pre_verification_gas: Some(parse_u256_quantity(
                "preVerificationGas",
                &req.pre_verification_gas,
            )?),
            max_fee_per_gas: Some(parse_u256_quantity("maxFeePerGas", &req.max_fee_per_gas)?),
            max_priority_fee_per_gas: Some(parse_u256_quantity(
                "maxPriorityFeePerGas",
                &req.max_priority_fee_per_gas,
            )?),
            paymaster_and_data: Some(parse_bytes("paymasterAndData", &req.paymaster_and_data)?),
            signature: Some(parse_bytes("signature", &req.signature)?),
        })
    }
}

/// Caller-supplied values that win over whatever a middleware stage computes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperationOverrides {
    pub call_gas_limit: Option<U256>,
    pub verification_gas_limit: Option<U256>,
    pub pre_verification_gas: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub paymaster_and_data: Option<Bytes>,
}

/// One call executed by the smart account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserOperationCallData {
    pub target: Address,
    pub data: Bytes,
    pub value: Option<U256>,
}

impl UserOperationCallData {
    pub fn new(target: Address, data: impl Into<Bytes>) -> Self {
        Self {
            target,
            data: data.into(),
            value: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn value_or_zero(&self) -> U256 {
        self.value.unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GasEstimate {
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeeValuesEip1559 {
    /// Latest base fee after the chain's multiplier.
    pub gas_price: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeploymentState {
    #[default]
    Undetermined,
    NotDeployed,
    Deployed,
}

/// Result of `eth_getUserOperationReceipt`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperationReceipt {
    pub user_op_hash: H256,
    pub entry_point: Address,
    pub sender: Address,
    pub nonce: U256,
    #[serde(default)]
    pub paymaster: Option<Address>,
    pub actual_gas_cost: U256,
    pub actual_gas_used: U256,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub receipt: Receipt,
}

/// Transaction receipt of the bundle that included a UserOperation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Receipt {
    pub transaction_hash: H256,
    pub transaction_index: Option<U64>,
    pub block_hash: Option<H256>,
    pub block_number: Option<U64>,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub cumulative_gas_used: Option<U256>,
    pub gas_used: Option<U256>,
    pub contract_address: Option<Address>,
    pub status: Option<U64>,
    pub logs_bloom: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: Option<U64>,
    pub effective_gas_price: Option<U256>,
}
