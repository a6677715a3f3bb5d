//! Alchemy bundler endpoints and the Alchemy Gas Manager.

mod client;
mod middleware;

pub use client::{
    AlchemyClient, AlchemyGasAndPaymasterAndData, AlchemyRpcClient, FeeOverride,
    PaymasterAndDataParams,
};
pub use middleware::{
    AlchemyFeeEstimator, RequestGasAndPaymasterAndData, RequestPaymasterAndData,
    DEFAULT_BASE_FEE_BUFFER_PERCENT, DEFAULT_MAX_PRIORITY_FEE_BUFFER_PERCENT,
};

use crate::chain::Chain;
use crate::client::Erc4337Client;
use crate::error::{AaError, Result};
use crate::middleware::{ClientMiddleware, DefaultGasEstimator, DummyPaymasterData, MiddlewareStage};
use crate::provider::{SmartAccountProvider, SmartAccountProviderOpts};
use crate::sponsor::{dummy_paymaster_and_data, DeferredFeeDataGetter, DeferredGasEstimator};
use ethers::types::Address;
use serde::Deserialize;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Chain ids Alchemy serves bundler traffic for.
pub const SUPPORTED_CHAIN_IDS: [u64; 14] = [
    80_001, 137, 1, 11_155_111, 5, 421_613, 421_614, 42_161, 10, 420, 11_155_420, 8453, 84_531,
    84_532,
];

pub fn is_supported(chain: &Chain) -> bool {
    SUPPORTED_CHAIN_IDS.contains(&chain.id)
}

/// HTTPS endpoint prefix; the API key is appended as the last path segment.
pub fn rpc_http_url(chain: &Chain) -> Option<&'static str> {
    Some(match chain.id {
        80_001 => "https://polygon-mumbai.g.alchemy.com/v2",
        137 => "https://polygon-mainnet.g.alchemy.com/v2",
        1 => "https://eth-mainnet.g.alchemy.com/v2",
        11_155_111 => "https://eth-sepolia.g.alchemy.com/v2",
        5 => "https://eth-goerli.g.alchemy.com/v2",
        421_613 => "https://arb-goerli.g.alchemy.com/v2",
        42_161 => "https://arb-mainnet.g.alchemy.com/v2",
        10 => "https://opt-mainnet.g.alchemy.com/v2",
        420 => "https://opt-goerli.g.alchemy.com/v2",
        8453 => "https://base-mainnet.g.alchemy.com/v2",
        84_531 => "https://base-goerli.g.alchemy.com/v2",
        _ => return None,
    })
}

pub fn rpc_ws_url(chain: &Chain) -> Option<&'static str> {
    Some(match chain.id {
        80_001 => "wss://polygon-mumbai.g.alchemy.com/v2",
        137 => "wss://polygon-mainnet.g.alchemy.com/v2",
        1 => "wss://eth-mainnet.g.alchemy.com/v2",
        11_155_111 => "wss://eth-sepolia.g.alchemy.com/v2",
        5 => "wss://eth-goerli.g.alchemy.com/v2",
        421_613 => "wss://arb-goerli.g.alchemy.com/v2",
        42_161 => "wss://arb-mainnet.g.alchemy.com/v2",
        10 => "wss://opt-mainnet.g.alchemy.com/v2",
        420 => "wss://opt-goerli.g.alchemy.com/v2",
        8453 => "wss://base-mainnet.g.alchemy.com/v2",
        84_531 => "wss://base-goerli.g.alchemy.com/v2",
        _ => return None,
    })
}

/// How to reach Alchemy. An explicit `rpc_url` wins over the API key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub api_key: Option<String>,
    /// Sent as `Authorization: Bearer <jwt>`.
    pub jwt: Option<String>,
    pub rpc_url: Option<String>,
}

impl ConnectionConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Default::default()
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        self.jwt
            .iter()
            .map(|jwt| ("Authorization".to_string(), format!("Bearer {jwt}")))
            .collect()
    }
}

/// Percent buffers applied by the default fee and gas stages.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeeOpts {
    /// Default 50.
    pub base_fee_buffer_percent: Option<u64>,
    /// Default 5.
    pub max_priority_fee_buffer_percent: Option<u64>,
    /// Default 5 on Arbitrum and Optimism, 0 elsewhere. preVerificationGas
    /// there tracks L1 fees at estimation time; the buffer is always charged.
    pub pre_verification_gas_buffer_percent: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AlchemyProviderConfig {
    pub chain: Chain,
    pub connection: ConnectionConfig,
    pub opts: Option<SmartAccountProviderOpts>,
    pub fee_opts: Option<FeeOpts>,
}

impl AlchemyProviderConfig {
    pub fn new(chain: Chain, connection: ConnectionConfig) -> Self {
        Self {
            chain,
            connection,
            opts: None,
            fee_opts: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlchemyGasManagerConfig {
    pub policy_id: String,
}

/// Resolves the endpoint for `chain`: `connection.rpc_url`, else the chain's
/// Alchemy URL followed by the API key.
pub fn resolve_rpc_url(chain: &Chain, connection: &ConnectionConfig) -> Result<String> {
    if !is_supported(chain) {
        return Err(AaError::UnsupportedChain(chain.id));
    }
    if let Some(url) = &connection.rpc_url {
        return Ok(url.clone());
    }
    rpc_http_url(chain)
        .map(|base| format!("{base}/{}", connection.api_key.as_deref().unwrap_or_default()))
        .ok_or(AaError::RpcUrlNotFound(chain.id))
}

/// [`SmartAccountProvider`] preconfigured for Alchemy: Rundler priority fees,
/// buffered fee estimation and optional Gas Manager sponsorship.
pub struct AlchemyProvider {
    provider: SmartAccountProvider,
    sponsor: Arc<dyn AlchemyClient>,
    rpc_url: String,
}

impl AlchemyProvider {
    pub fn new(entry_point_address: Option<Address>, config: AlchemyProviderConfig) -> Result<Self> {
        let rpc_url = resolve_rpc_url(&config.chain, &config.connection)?;
        let client = Arc::new(AlchemyRpcClient::new(
            rpc_url.as_str(),
            &config.connection.headers(),
        )?);
        tracing::debug!(chain = %config.chain, jwt = config.connection.jwt.is_some(), "alchemy provider");
        Self::from_clients(client.clone(), client, rpc_url, entry_point_address, &config)
    }

    pub(crate) fn from_clients(
        client: Arc<dyn Erc4337Client>,
        sponsor: Arc<dyn AlchemyClient>,
        rpc_url: String,
        entry_point_address: Option<Address>,
        config: &AlchemyProviderConfig,
    ) -> Result<Self> {
        let mut provider = SmartAccountProvider::new(
            Some(client),
            None,
            entry_point_address,
            config.chain,
            config.opts,
        )?;

        let fee_opts = config.fee_opts.unwrap_or_default();
        let pre_verification_gas_buffer_percent = fee_opts
            .pre_verification_gas_buffer_percent
            .unwrap_or_else(|| config.chain.default_pre_verification_gas_buffer_percent());
        provider
            .with_fee_data_getter(Arc::new(AlchemyFeeEstimator {
                base_fee_buffer_percent: fee_opts
                    .base_fee_buffer_percent
                    .unwrap_or(DEFAULT_BASE_FEE_BUFFER_PERCENT),
                max_priority_fee_buffer_percent: fee_opts
                    .max_priority_fee_buffer_percent
                    .unwrap_or(DEFAULT_MAX_PRIORITY_FEE_BUFFER_PERCENT),
            }))
            .with_gas_estimator(Arc::new(DefaultGasEstimator {
                pre_verification_gas_buffer_percent,
            }));

        Ok(Self {
            provider,
            sponsor,
            rpc_url,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Routes paymaster data through the Gas Manager policy.
    ///
    /// With `estimate_gas`, the provider's gas and fee stages step aside and
    /// `alchemy_requestGasAndPaymasterAndData` fills limits, fees and
    /// paymaster data in one call. Without it, gas is estimated locally
    /// against a dummy paymaster payload and only the paymaster data is
    /// requested.
    pub fn with_alchemy_gas_manager(
        &mut self,
        config: AlchemyGasManagerConfig,
        estimate_gas: bool,
    ) -> &mut Self {
        if estimate_gas {
            let gas_fallback = self.middleware().get(MiddlewareStage::GasEstimator).clone();
            let fee_fallback = self.middleware().get(MiddlewareStage::FeeDataGetter).clone();
            let sponsor: Arc<dyn ClientMiddleware> = Arc::new(RequestGasAndPaymasterAndData::new(
                self.sponsor.clone(),
                config.policy_id,
            ));
            self.provider
                .with_gas_estimator(Arc::new(DeferredGasEstimator::new(gas_fallback)))
                .with_fee_data_getter(Arc::new(DeferredFeeDataGetter::new(fee_fallback)))
                .with_paymaster_middleware(None, Some(sponsor));
        } else {
            let dummy: Arc<dyn ClientMiddleware> =
                Arc::new(DummyPaymasterData::new(dummy_paymaster_and_data(self.chain())));
            let sponsor: Arc<dyn ClientMiddleware> =
                Arc::new(RequestPaymasterAndData::new(self.sponsor.clone(), config.policy_id));
            self.provider
                .with_paymaster_middleware(Some(dummy), Some(sponsor));
        }
        self
    }
}

impl Deref for AlchemyProvider {
    type Target = SmartAccountProvider;

    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

impl DerefMut for AlchemyProvider {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.provider
    }
}
