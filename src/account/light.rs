use super::simple::SIMPLE_DUMMY_SIGNATURE;
use super::AccountVariant;
use crate::chain::AccountKind;
use crate::encoding::encode_function_call;
use crate::error::Result;
use crate::types::UserOperationCallData;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};

/// Alchemy `LightAccount`: one account per owner, with native batching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LightAccount;

impl AccountVariant for LightAccount {
    fn kind(&self) -> AccountKind {
        AccountKind::Light
    }

    fn factory_calldata(&self, owner: Address) -> Bytes {
        // no sub-accounts, salt is always zero
        encode_function_call(
            "createAccount(address,uint256)",
            &[Token::Address(owner), Token::Uint(U256::zero())],
        )
    }

    fn encode_batch_execute(&self, calls: &[UserOperationCallData]) -> Result<Bytes> {
        let targets = calls.iter().map(|c| Token::Address(c.target)).collect();
        let values = calls.iter().map(|c| Token::Uint(c.value_or_zero())).collect();
        let datas = calls.iter().map(|c| Token::Bytes(c.data.to_vec())).collect();
        Ok(encode_function_call(
            "executeBatch(address[],uint256[],bytes[])",
            &[
                Token::Array(targets),
                Token::Array(values),
                Token::Array(datas),
            ],
        ))
    }

    fn dummy_signature(&self) -> Bytes {
        Bytes::from(SIMPLE_DUMMY_SIGNATURE.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{decode, ParamType};

    #[test]
    fn batch_encodes_parallel_arrays() {
        let calls = [
            UserOperationCallData::new(Address::repeat_byte(1), vec![0xaa_u8]),
            UserOperationCallData::new(Address::repeat_byte(2), Vec::<u8>::new()).with_value(U256::from(5)),
        ];
        let encoded = LightAccount.encode_batch_execute(&calls).unwrap();
        assert_eq!(
            &encoded[..4],
            &ethers::utils::id("executeBatch(address[],uint256[],bytes[])")[..]
        );

        let tokens = decode(
            &[
                ParamType::Array(Box::new(ParamType::Address)),
                ParamType::Array(Box::new(ParamType::Uint(256))),
                ParamType::Array(Box::new(ParamType::Bytes)),
            ],
            &encoded[4..],
        )
        .unwrap();
        assert_eq!(
            tokens[1],
            Token::Array(vec![Token::Uint(U256::zero()), Token::Uint(U256::from(5))])
        );
        assert_eq!(
            tokens[2],
            Token::Array(vec![Token::Bytes(vec![0xaa]), Token::Bytes(vec![])])
        );
    }

    #[test]
    fn index_is_always_zero() {
        let calldata = LightAccount.factory_calldata(Address::repeat_byte(9));
        assert!(calldata[calldata.len() - 32..].iter().all(|b| *b == 0));
    }
}
