//! JSON-RPC hex encodings used on the bundler wire.

use crate::error::{AaError, Result};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::keccak256;
use serde_json::Value;

pub fn fmt_address(addr: Address) -> String {
    format!("0x{}", hex::encode(addr.as_bytes()))
}

pub fn fmt_h256(h: H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

/// JSON-RPC "quantity" encoding.
pub fn fmt_u256(v: U256) -> String {
    if v.is_zero() {
        "0x0".to_string()
    } else {
        format!("0x{:x}", v)
    }
}

pub fn fmt_bytes(b: &[u8]) -> String {
    format!("0x{}", hex::encode(b))
}

pub fn parse_u256_quantity(field: &'static str, s: &str) -> Result<U256> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16).map_err(|_| AaError::Quantity {
        field,
        value: s.to_string(),
    })
}

pub fn parse_bytes(field: &'static str, s: &str) -> Result<Bytes> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits)
        .map(Bytes::from)
        .map_err(|source| AaError::Hex { field, source })
}

pub fn parse_address(field: &'static str, s: &str) -> Result<Address> {
    let bytes = parse_bytes(field, s)?;
    if bytes.len() != 20 {
        return Err(AaError::InvalidArgument(format!(
            "`{field}` must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

pub fn parse_h256(field: &'static str, s: &str) -> Result<H256> {
    let bytes = parse_bytes(field, s)?;
    if bytes.len() != 32 {
        return Err(AaError::InvalidArgument(format!(
            "expected 32-byte hex in `{field}`, got {} bytes",
            bytes.len()
        )));
    }
    Ok(H256::from_slice(&bytes))
}

/// Reads a quantity field that bundlers return either as a hex string or as a
/// plain JSON number.
pub fn parse_u256_field(v: &Value, key: &'static str) -> Result<U256> {
    match v.get(key) {
        Some(Value::String(s)) => parse_u256_quantity(key, s),
        Some(Value::Number(n)) => n.as_u64().map(U256::from).ok_or(AaError::Quantity {
            field: key,
            value: n.to_string(),
        }),
        other => Err(AaError::Quantity {
            field: key,
            value: other.map(|x| x.to_string()).unwrap_or_default(),
        }),
    }
}

/// Concatenates byte strings, e.g. `factory ++ calldata` for init code.
pub fn concat_bytes(parts: &[&[u8]]) -> Bytes {
    let len = parts.iter().map(|p| p.len()).sum();
    let mut v = Vec::with_capacity(len);
    for part in parts {
        v.extend_from_slice(part);
    }
    Bytes::from(v)
}

/// ABI-encodes a function call: 4-byte selector of `signature` followed by the
/// encoded arguments.
pub fn encode_function_call(signature: &str, args: &[ethers::abi::Token]) -> Bytes {
    let selector = &keccak256(signature.as_bytes())[..4];
    let encoded = ethers::abi::encode(args);
    concat_bytes(&[selector, &encoded])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quantities_use_minimal_hex() {
        assert_eq!(fmt_u256(U256::zero()), "0x0");
        assert_eq!(fmt_u256(U256::from(0x0114c2u64)), "0x114c2");
        assert_eq!(fmt_u256(U256::from(31u64)), "0x1f");
    }

    #[test]
    fn parse_quantity_accepts_empty_and_padded() {
        assert_eq!(parse_u256_quantity("x", "0x").unwrap(), U256::zero());
        assert_eq!(
            parse_u256_quantity("x", "0x0114c2").unwrap(),
            U256::from(0x114c2u64)
        );
        assert!(parse_u256_quantity("x", "0xzz").is_err());
    }

    #[test]
    fn parse_u256_field_accepts_string_or_number() {
        let v = json!({ "a": "0x10", "b": 16, "c": true });
        assert_eq!(parse_u256_field(&v, "a").unwrap(), U256::from(16u64));
        assert_eq!(parse_u256_field(&v, "b").unwrap(), U256::from(16u64));
        assert!(parse_u256_field(&v, "c").is_err());
        assert!(parse_u256_field(&v, "missing").is_err());
    }

    #[test]
    fn parse_h256_rejects_wrong_length() {
        assert!(parse_h256("hash", "0x1234").is_err());
        let h = parse_h256(
            "hash",
            "0x1111111111111111111111111111111111111111111111111111111111111111",
        )
        .unwrap();
        assert_eq!(h, H256::repeat_byte(0x11));
    }

    #[test]
    fn function_selector_matches_known_value() {
        let call = encode_function_call("getSenderAddress(bytes)", &[]);
        assert_eq!(fmt_bytes(&call), "0x9b249f69");
    }
}
