//! Pimlico bundler endpoints and the Pimlico verifying paymaster.

mod client;
mod middleware;

pub use client::{
    GasPrice, PimlicoClient, PimlicoRpcClient, PimlicoSponsorResult, PimlicoUserOperationGasPrice,
    SponsorUserOperationParams,
};
pub use middleware::{PimlicoFeeEstimator, SponsorUserOperation};

use crate::chain::Chain;
use crate::client::Erc4337Client;
use crate::error::{AaError, Result};
use crate::middleware::{ClientMiddleware, DefaultGasEstimator, DummyPaymasterData};
use crate::provider::{SmartAccountProvider, SmartAccountProviderOpts};
use crate::sponsor::{dummy_paymaster_and_data, DeferredGasEstimator};
use ethers::types::Address;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub const SUPPORTED_CHAIN_IDS: [u64; 9] =
    [1, 42_161, 421_614, 8453, 84_532, 59_144, 137, 11_155_111, 10];

pub fn is_supported(chain: &Chain) -> bool {
    SUPPORTED_CHAIN_IDS.contains(&chain.id)
}

pub fn rpc_http_url(chain: &Chain) -> Option<String> {
    is_supported(chain).then(|| format!("https://api.pimlico.io/v2/{}/rpc", chain.id))
}

#[derive(Debug, Clone)]
pub struct PimlicoProviderConfig {
    pub chain: Chain,
    pub api_key: String,
    pub opts: Option<SmartAccountProviderOpts>,
}

#[derive(Debug, Clone, Default)]
pub struct PimlicoGasManagerConfig {
    pub sponsorship_policy_id: Option<String>,
}

/// Tunes [`PimlicoProvider::with_pimlico_gas_manager`].
#[derive(Clone, Default)]
pub struct PimlicoGasEstimationOptions {
    /// Estimate gas and fees locally and ask the paymaster only for its data.
    pub disable_gas_estimation: bool,
    /// Replaces the provider's gas estimator where local estimation runs.
    pub fallback_gas_estimator: Option<Arc<dyn ClientMiddleware>>,
    /// Replaces [`PimlicoFeeEstimator`] where local fee estimation runs.
    pub fallback_fee_data_getter: Option<Arc<dyn ClientMiddleware>>,
}

fn resolve_rpc_url(config: &PimlicoProviderConfig) -> Result<String> {
    if !is_supported(&config.chain) {
        return Err(AaError::UnsupportedChain(config.chain.id));
    }
    rpc_http_url(&config.chain)
        .map(|base| format!("{base}?apikey={}", config.api_key))
        .ok_or(AaError::RpcUrlNotFound(config.chain.id))
}

/// [`SmartAccountProvider`] preconfigured for Pimlico: oracle fees and
/// optional paymaster sponsorship.
pub struct PimlicoProvider {
    provider: SmartAccountProvider,
    sponsor: Arc<dyn PimlicoClient>,
    rpc_url: String,
}

impl PimlicoProvider {
    pub fn new(entry_point_address: Option<Address>, config: PimlicoProviderConfig) -> Result<Self> {
        let rpc_url = resolve_rpc_url(&config)?;
        let client = Arc::new(PimlicoRpcClient::new(rpc_url.as_str())?);
        Self::from_clients(client.clone(), client, rpc_url, entry_point_address, &config)
    }

    pub(crate) fn from_clients(
        client: Arc<dyn Erc4337Client>,
        sponsor: Arc<dyn PimlicoClient>,
        rpc_url: String,
        entry_point_address: Option<Address>,
        config: &PimlicoProviderConfig,
    ) -> Result<Self> {
        let mut provider = SmartAccountProvider::new(
            Some(client),
            None,
            entry_point_address,
            config.chain,
            config.opts,
        )?;
        provider.with_fee_data_getter(Arc::new(PimlicoFeeEstimator::new(sponsor.clone())));
        Ok(Self {
            provider,
            sponsor,
            rpc_url,
        })
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Routes paymaster data through `pm_sponsorUserOperation`.
    ///
    /// By default the paymaster also supplies the gas limits and the local gas
    /// estimator steps aside. A one-off `paymasterAndData` override skips the
    /// paymaster, so those runs fall back to local estimation. Fees always
    /// come from the fee stage.
    pub fn with_pimlico_gas_manager(
        &mut self,
        config: PimlicoGasManagerConfig,
        options: Option<PimlicoGasEstimationOptions>,
    ) -> &mut Self {
        let options = options.unwrap_or_default();
        let fallback_fee_data_getter = options
            .fallback_fee_data_getter
            .unwrap_or_else(|| {
                Arc::new(PimlicoFeeEstimator::new(self.sponsor.clone())) as Arc<dyn ClientMiddleware>
            });
        let fallback_gas_estimator = options
            .fallback_gas_estimator
            .unwrap_or_else(|| Arc::new(DefaultGasEstimator::default()) as Arc<dyn ClientMiddleware>);

        let dummy: Arc<dyn ClientMiddleware> =
            Arc::new(DummyPaymasterData::new(dummy_paymaster_and_data(self.chain())));
        let estimate_remotely = !options.disable_gas_estimation;
        let sponsor: Arc<dyn ClientMiddleware> = Arc::new(SponsorUserOperation::new(
            self.sponsor.clone(),
            config.sponsorship_policy_id,
            estimate_remotely,
        ));

        let gas_estimator: Arc<dyn ClientMiddleware> = if estimate_remotely {
            Arc::new(DeferredGasEstimator::new(fallback_gas_estimator))
        } else {
            fallback_gas_estimator
        };
        // the paymaster never prices gas, so fees are always estimated here
        self.provider
            .with_gas_estimator(gas_estimator)
            .with_fee_data_getter(fallback_fee_data_getter)
            .with_paymaster_middleware(Some(dummy), Some(sponsor));
        self
    }
}

impl Deref for PimlicoProvider {
    type Target = SmartAccountProvider;

    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

impl DerefMut for PimlicoProvider {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.provider
    }
}
