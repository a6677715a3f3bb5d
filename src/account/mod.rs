//! Smart contract accounts.
//!
//! [`SmartContractAccount`] owns everything the variants share: address
//! resolution through the entry point, the deployment-state cache, nonce reads
//! and ERC-6492 wrapping. An [`AccountVariant`] only describes how a concrete
//! account contract is created and called.

mod kernel;
mod light;
mod signer;
mod simple;

pub use kernel::KernelAccount;
pub use light::LightAccount;
pub use signer::{LocalAccountSigner, SmartAccountSigner};
pub use simple::SimpleAccount;

use crate::chain::{AccountKind, Chain};
use crate::client::Erc4337Client;
use crate::encoding::{concat_bytes, encode_function_call, fmt_bytes};
use crate::error::{AaError, Result, RpcError};
use crate::types::{DeploymentState, UserOperationCallData};
use async_trait::async_trait;
use ethers::abi::{ParamType, Token};
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;

/// `bytes32(0x6492…6492)`, appended to counterfactual signatures.
pub const ERC6492_MAGIC_VALUE: [u8; 32] = [
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
];

/// What the provider needs from an account to build and sign UserOperations.
///
/// Methods taking `&mut self` may update the address and deployment caches;
/// concurrent use of one account must be serialized by the caller.
#[async_trait]
pub trait SmartAccount: Send + Sync {
    /// Empty once the account is deployed, `factory ++ factoryCalldata` before.
    async fn get_init_code(&mut self) -> Result<Bytes>;

    async fn get_address(&mut self) -> Result<Address>;

    async fn get_nonce(&mut self) -> Result<U256>;

    async fn deployment_state(&mut self) -> Result<DeploymentState>;

    fn encode_execute(&self, call: &UserOperationCallData) -> Bytes;

    fn encode_batch_execute(&self, calls: &[UserOperationCallData]) -> Result<Bytes>;

    fn dummy_signature(&self) -> Bytes;

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes>;

    async fn sign_message_with_6492(&mut self, message: &[u8]) -> Result<Bytes>;

    /// Entry point fixed for this account, if any.
    fn entry_point_override(&self) -> Option<Address>;

    fn get_entry_point_address(&self) -> Result<Address>;

    fn factory_address(&self) -> Address;

    fn owner(&self) -> Address;
}

/// Per-contract encodings.
pub trait AccountVariant: Send + Sync {
    fn kind(&self) -> AccountKind;

    /// Calldata for the factory's create function.
    fn factory_calldata(&self, owner: Address) -> Bytes;

    fn encode_execute(&self, call: &UserOperationCallData) -> Bytes {
        encode_function_call(
            "execute(address,uint256,bytes)",
            &[
                Token::Address(call.target),
                Token::Uint(call.value_or_zero()),
                Token::Bytes(call.data.to_vec()),
            ],
        )
    }

    fn encode_batch_execute(&self, calls: &[UserOperationCallData]) -> Result<Bytes>;

    fn dummy_signature(&self) -> Bytes;
}

pub type SimpleSmartContractAccount = SmartContractAccount<SimpleAccount>;
pub type LightSmartContractAccount = SmartContractAccount<LightAccount>;
pub type KernelSmartContractAccount = SmartContractAccount<KernelAccount>;

pub struct SmartContractAccount<V> {
    variant: V,
    client: Arc<dyn Erc4337Client>,
    signer: Arc<dyn SmartAccountSigner>,
    chain: Chain,
    factory_address: Address,
    entry_point_address: Option<Address>,
    account_address: Option<Address>,
    deployment_state: DeploymentState,
}

impl<V: AccountVariant> SmartContractAccount<V> {
    pub fn new(
        variant: V,
        client: Arc<dyn Erc4337Client>,
        signer: Arc<dyn SmartAccountSigner>,
        chain: Chain,
        factory_address: Address,
    ) -> Self {
        Self {
            variant,
            client,
            signer,
            chain,
            factory_address,
            entry_point_address: None,
            account_address: None,
            deployment_state: DeploymentState::Undetermined,
        }
    }

    /// Uses the chain's registered factory for this variant.
    pub fn with_default_factory(
        variant: V,
        client: Arc<dyn Erc4337Client>,
        signer: Arc<dyn SmartAccountSigner>,
        chain: Chain,
    ) -> Result<Self> {
        let factory = chain.default_account_factory(variant.kind())?;
        Ok(Self::new(variant, client, signer, chain, factory))
    }

    pub fn with_entry_point(mut self, entry_point: Address) -> Self {
        self.entry_point_address = Some(entry_point);
        self
    }

    /// Skips counterfactual address resolution for an already known account.
    pub fn with_account_address(mut self, address: Address) -> Self {
        self.account_address = Some(address);
        self
    }

    pub fn variant(&self) -> &V {
        &self.variant
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn signer(&self) -> &Arc<dyn SmartAccountSigner> {
        &self.signer
    }

    /// `factory ++ factoryCalldata`, regardless of deployment state.
    pub fn account_init_code(&self) -> Bytes {
        let calldata = self.variant.factory_calldata(self.signer.address());
        concat_bytes(&[self.factory_address.as_bytes(), &calldata])
    }

    fn encode_get_sender_address(&self) -> Bytes {
        encode_function_call(
            "getSenderAddress(bytes)",
            &[Token::Bytes(self.account_init_code().to_vec())],
        )
    }

    async fn refresh_deployment_state(&mut self) -> Result<DeploymentState> {
        let address = self.get_address().await?;
        let code = self.client.get_code(address).await?;
        self.deployment_state = if code.is_empty() {
            DeploymentState::NotDeployed
        } else {
            DeploymentState::Deployed
        };
        tracing::debug!(%address, state = ?self.deployment_state, "resolved deployment state");
        Ok(self.deployment_state)
    }
}

#[async_trait]
impl<V: AccountVariant> SmartAccount for SmartContractAccount<V> {
    async fn get_init_code(&mut self) -> Result<Bytes> {
        // A deployed account stays deployed; anything else is re-checked since
        // the first UserOperation deploys it.
        if self.deployment_state == DeploymentState::Deployed {
            return Ok(Bytes::new());
        }
        match self.refresh_deployment_state().await? {
            DeploymentState::Deployed => Ok(Bytes::new()),
            _ => Ok(self.account_init_code()),
        }
    }

    async fn get_address(&mut self) -> Result<Address> {
        if let Some(address) = self.account_address {
            return Ok(address);
        }

        let entry_point = self.get_entry_point_address()?;
        let address = match self
            .client
            .call(entry_point, self.encode_get_sender_address())
            .await
        {
            Ok(_) => {
                return Err(AaError::CounterfactualAddress(
                    "getSenderAddress returned without reverting".into(),
                ))
            }
            Err(AaError::Rpc(err @ RpcError::Execution { .. })) => {
                sender_from_revert_data(err.revert_data())?
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(%address, kind = self.variant.kind().as_str(), "counterfactual address");
        self.account_address = Some(address);
        Ok(address)
    }

    async fn get_nonce(&mut self) -> Result<U256> {
        if self.deployment_state().await? != DeploymentState::Deployed {
            return Ok(U256::zero());
        }

        let address = self.get_address().await?;
        let data = encode_function_call(
            "getNonce(address,uint192)",
            &[Token::Address(address), Token::Uint(U256::zero())],
        );
        let res = self.client.call(self.get_entry_point_address()?, data).await?;
        let nonce = ethers::abi::decode(&[ParamType::Uint(256)], &res)
            .ok()
            .and_then(|tokens| tokens.into_iter().next())
            .and_then(Token::into_uint)
            .ok_or_else(|| {
                RpcError::UnexpectedResponse(format!("getNonce returned {}", fmt_bytes(&res)))
            })?;
        Ok(nonce)
    }

    async fn deployment_state(&mut self) -> Result<DeploymentState> {
        match self.deployment_state {
            DeploymentState::Undetermined => self.refresh_deployment_state().await,
            state => Ok(state),
        }
    }

    fn encode_execute(&self, call: &UserOperationCallData) -> Bytes {
        self.variant.encode_execute(call)
    }

    fn encode_batch_execute(&self, calls: &[UserOperationCallData]) -> Result<Bytes> {
        self.variant.encode_batch_execute(calls)
    }

    fn dummy_signature(&self) -> Bytes {
        self.variant.dummy_signature()
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Bytes> {
        self.signer.sign_message(message).await
    }

    async fn sign_message_with_6492(&mut self, message: &[u8]) -> Result<Bytes> {
        let signature = self.sign_message(message).await?;
        if self.deployment_state().await? == DeploymentState::Deployed {
            return Ok(signature);
        }

        let wrapped = ethers::abi::encode(&[
            Token::Address(self.factory_address),
            Token::Bytes(self.variant.factory_calldata(self.signer.address()).to_vec()),
            Token::Bytes(signature.to_vec()),
        ]);
        Ok(concat_bytes(&[&wrapped, &ERC6492_MAGIC_VALUE]))
    }

    fn entry_point_override(&self) -> Option<Address> {
        self.entry_point_address
    }

    fn get_entry_point_address(&self) -> Result<Address> {
        match self.entry_point_address {
            Some(address) => Ok(address),
            None => self.chain.default_entry_point(),
        }
    }

    fn factory_address(&self) -> Address {
        self.factory_address
    }

    fn owner(&self) -> Address {
        self.signer.address()
    }
}

/// The entry point reverts with `SenderAddressResult(address)`; the address is
/// the last 20 bytes of the payload.
fn sender_from_revert_data(data: Option<&str>) -> Result<Address> {
    let data = data
        .map(|d| d.trim_matches(|c| c == '"' || c == ' '))
        .ok_or_else(|| AaError::CounterfactualAddress("revert carried no data".into()))?;
    let bytes = hex::decode(data.strip_prefix("0x").unwrap_or(data))
        .map_err(|e| AaError::CounterfactualAddress(format!("revert data is not hex: {e}")))?;
    if bytes.len() < 20 {
        return Err(AaError::CounterfactualAddress(format!(
            "revert data too short: {data}"
        )));
    }
    Ok(Address::from_slice(&bytes[bytes.len() - 20..]))
}
