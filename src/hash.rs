//! UserOperation packing and the entry point's signing hash.
//!
//! The layout mirrors `EntryPoint.getUserOpHash` (v0.6): the dynamic fields
//! are replaced by their keccak256 before ABI encoding, the packed tuple is
//! hashed again and bound to the entry point and chain id.

use crate::error::{AaError, Result};
use crate::types::{UserOperation, UserOperationRequest};
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;

fn required<T: Clone>(value: &Option<T>, field: &'static str) -> Result<T> {
    value.clone().ok_or(AaError::MissingField(field))
}

/// ABI-encoded `(sender, nonce, keccak(initCode), keccak(callData),
/// callGasLimit, verificationGasLimit, preVerificationGas, maxFeePerGas,
/// maxPriorityFeePerGas, keccak(paymasterAndData))`.
///
/// Every optional field must be set; a missing one is a [`AaError::MissingField`]
/// and no default is substituted.
pub fn pack_user_operation(op: &UserOperation) -> Result<Bytes> {
    let tokens = vec![
        Token::Address(op.sender),
        Token::Uint(op.nonce),
        Token::FixedBytes(keccak256(&op.init_code).to_vec()),
        Token::FixedBytes(keccak256(&op.call_data).to_vec()),
        Token::Uint(required(&op.call_gas_limit, "callGasLimit")?),
        Token::Uint(required(&op.verification_gas_limit, "verificationGasLimit")?),
        Token::Uint(required(&op.pre_verification_gas, "preVerificationGas")?),
        Token::Uint(required(&op.max_fee_per_gas, "maxFeePerGas")?),
        Token::Uint(required(&op.max_priority_fee_per_gas, "maxPriorityFeePerGas")?),
        Token::FixedBytes(
            keccak256(required(&op.paymaster_and_data, "paymasterAndData")?).to_vec(),
        ),
    ];
    Ok(encode(&tokens).into())
}

/// `keccak256(abi.encode(keccak256(pack(op)), entryPoint, chainId))`.
pub fn user_operation_hash(op: &UserOperation, entry_point: Address, chain_id: u64) -> Result<H256> {
    let packed = pack_user_operation(op)?;
    let encoded = encode(&[
        Token::FixedBytes(keccak256(&packed).to_vec()),
        Token::Address(entry_point),
        Token::Uint(U256::from(chain_id)),
    ]);
    Ok(H256::from(keccak256(encoded)))
}

/// Same as [`user_operation_hash`] for an operation already in wire form.
pub fn request_hash(req: &UserOperationRequest, entry_point: Address, chain_id: u64) -> Result<H256> {
    let op = UserOperation::try_from(req)?;
    user_operation_hash(&op, entry_point, chain_id)
}
