use super::AccountVariant;
use crate::chain::AccountKind;
use crate::encoding::encode_function_call;
use crate::error::Result;
use crate::types::UserOperationCallData;
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use hex_literal::hex;

const KERNEL_DUMMY_SIGNATURE: [u8; 65] = hex!(
    "000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000001b"
);

/// ZeroDev Kernel: the factory deploys a proxy to `logic` and initializes it
/// with an ECDSA validator module for the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelAccount {
    pub ecdsa_validator: Address,
    pub logic: Address,
    pub index: u64,
}

impl KernelAccount {
    pub fn new(ecdsa_validator: Address, logic: Address) -> Self {
        Self {
            ecdsa_validator,
            logic,
            index: 0,
        }
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }
}

impl AccountVariant for KernelAccount {
    fn kind(&self) -> AccountKind {
        AccountKind::Kernel
    }

    fn factory_calldata(&self, owner: Address) -> Bytes {
        let initialize = encode_function_call(
            "initialize(address,address)",
            &[Token::Address(self.ecdsa_validator), Token::Address(owner)],
        );
        encode_function_call(
            "createAccount(address,bytes,uint256)",
            &[
                Token::Address(self.logic),
                Token::Bytes(initialize.to_vec()),
                Token::Uint(U256::from(self.index)),
            ],
        )
    }

    fn encode_batch_execute(&self, calls: &[UserOperationCallData]) -> Result<Bytes> {
        let calls = calls
            .iter()
            .map(|c| {
                Token::Tuple(vec![
                    Token::Address(c.target),
                    Token::Uint(c.value_or_zero()),
                    Token::Bytes(c.data.to_vec()),
                ])
            })
            .collect();
        Ok(encode_function_call(
            "executeBatch((address,uint256,bytes)[])",
            &[Token::Array(calls)],
        ))
    }

    fn dummy_signature(&self) -> Bytes {
        Bytes::from(KERNEL_DUMMY_SIGNATURE.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{decode, ParamType};

    fn kernel() -> KernelAccount {
        KernelAccount::new(Address::repeat_byte(0xaa), Address::repeat_byte(0xbb)).with_index(3)
    }

    #[test]
    fn factory_call_nests_initialize() {
        let owner = Address::repeat_byte(0xcc);
        let calldata = kernel().factory_calldata(owner);
        assert_eq!(
            &calldata[..4],
            &ethers::utils::id("createAccount(address,bytes,uint256)")[..]
        );

        let tokens = decode(
            &[ParamType::Address, ParamType::Bytes, ParamType::Uint(256)],
            &calldata[4..],
        )
        .unwrap();
        assert_eq!(tokens[0], Token::Address(Address::repeat_byte(0xbb)));
        assert_eq!(tokens[2], Token::Uint(U256::from(3)));

        let Token::Bytes(init) = &tokens[1] else {
            panic!("expected bytes, got {:?}", tokens[1]);
        };
        assert_eq!(&init[..4], &ethers::utils::id("initialize(address,address)")[..]);
        let args = decode(&[ParamType::Address, ParamType::Address], &init[4..]).unwrap();
        assert_eq!(
            args,
            vec![
                Token::Address(Address::repeat_byte(0xaa)),
                Token::Address(owner)
            ]
        );
    }

    #[test]
    fn batch_encodes_call_tuples() {
        let calls = [
            UserOperationCallData::new(Address::repeat_byte(1), vec![1_u8, 2]),
            UserOperationCallData::new(Address::repeat_byte(2), Vec::<u8>::new()).with_value(U256::from(9)),
        ];
        let encoded = kernel().encode_batch_execute(&calls).unwrap();
        let tokens = decode(
            &[ParamType::Array(Box::new(ParamType::Tuple(vec![
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Bytes,
            ])))],
            &encoded[4..],
        )
        .unwrap();
        let Token::Array(items) = &tokens[0] else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1],
            Token::Tuple(vec![
                Token::Address(Address::repeat_byte(2)),
                Token::Uint(U256::from(9)),
                Token::Bytes(vec![]),
            ])
        );
    }

    #[test]
    fn dummy_signature_is_zero_rs_with_v() {
        let sig = kernel().dummy_signature();
        assert_eq!(sig.len(), 65);
        assert!(sig[..64].iter().all(|b| *b == 0));
        assert_eq!(sig[64], 0x1b);
    }
}
