use super::AccountVariant;
use crate::chain::AccountKind;
use crate::encoding::encode_function_call;
use crate::error::{AaError, Result};
use crate::types::UserOperationCallData;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use hex_literal::hex;

pub(crate) const SIMPLE_DUMMY_SIGNATURE: [u8; 65] = hex!(
    "fffffffffffffffffffffffffffffff0000000000000000000000000000000007aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa1c"
);

/// eth-infinitism `SimpleAccount`. The factory supports several accounts per
/// owner, selected by `index`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimpleAccount {
    pub index: u64,
}

impl SimpleAccount {
    pub fn new(index: u64) -> Self {
        Self { index }
    }
}

impl AccountVariant for SimpleAccount {
    fn kind(&self) -> AccountKind {
        AccountKind::Simple
    }

    fn factory_calldata(&self, owner: Address) -> Bytes {
        encode_function_call(
            "createAccount(address,uint256)",
            &[Token::Address(owner), Token::Uint(U256::from(self.index))],
        )
    }

    fn encode_batch_execute(&self, _calls: &[UserOperationCallData]) -> Result<Bytes> {
        Err(AaError::NotSupported("executeBatch"))
    }

    fn dummy_signature(&self) -> Bytes {
        Bytes::from(SIMPLE_DUMMY_SIGNATURE.to_vec())
    }
}
