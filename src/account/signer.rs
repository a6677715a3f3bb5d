use crate::error::{AaError, Result};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes};
use std::str::FromStr;

/// Owner key of a smart account.
#[async_trait]
pub trait SmartAccountSigner: Send + Sync {
    /// e.g. `"local"` or `"hardware"`.
    fn signer_type(&self) -> &'static str;

    fn address(&self) -> Address;

    /// EIP-191 personal-message signature over `message`.
    async fn sign_message(&self, message: &[u8]) -> Result<Bytes>;
}

/// Signs with an in-process secp256k1 key.
#[derive(Debug, Clone)]
pub struct LocalAccountSigner {
    wallet: LocalWallet,
}

impl LocalAccountSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let wallet = LocalWallet::from_str(private_key)
            .map_err(|e| AaError::Signer(format!("invalid private key: {e}")))?;
        Ok(Self::new(wallet))
    }
}

#[async_trait]
impl SmartAccountSigner for LocalAccountSigner {
    fn signer_type(&self) -> &'static str {
        "local"
    }

    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes> {
        let sig = self
            .wallet
            .sign_message(message)
            .await
            .map_err(|e| AaError::Signer(e.to_string()))?;
        Ok(Bytes::from(sig.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Signature;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn local_signer_produces_recoverable_personal_sign() {
        let signer = LocalAccountSigner::from_private_key(KEY).unwrap();
        assert_eq!(signer.signer_type(), "local");
        assert_eq!(
            signer.address(),
            "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".parse::<Address>().unwrap()
        );

        let message = [0xab_u8; 32];
        let sig = signer.sign_message(&message).await.unwrap();
        assert_eq!(sig.len(), 65);

        let sig = Signature::try_from(sig.as_ref()).unwrap();
        assert_eq!(sig.recover(&message[..]).unwrap(), signer.address());
    }

    #[test]
    fn bad_key_is_a_signer_error() {
        let err = LocalAccountSigner::from_private_key("0x1234").unwrap_err();
        assert!(matches!(err, AaError::Signer(_)));
    }
}
