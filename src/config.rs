use crate::chain::Chain;
use crate::provider::SmartAccountProviderOpts;
use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::{env, fs, path::Path};

/// On-disk form of [`ProviderConfig`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigRaw {
    pub chain_id: u64,
    pub rpc: String,
    #[serde(default)]
    pub rpc_env_var: Option<String>,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub factory: Option<String>,
    #[serde(default)]
    pub opts: Option<SmartAccountProviderOpts>,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub chain: Chain,
    pub rpc_url: String,
    pub entry_point: Option<Address>,
    pub factory: Option<Address>,
    pub opts: SmartAccountProviderOpts,
}

/// Loads a provider config from JSON. The RPC URL comes from `rpc_override`,
/// then the variable named by `rpcEnvVar`, then `rpc`.
pub fn load_provider_config(path: &Path, rpc_override: Option<String>) -> Result<ProviderConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read provider config at {}", path.display()))?;
    let raw: ProviderConfigRaw = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse provider config at {}", path.display()))?;

    let rpc_url = if let Some(rpc) = rpc_override {
        rpc
    } else if let Some(env_var) = raw.rpc_env_var.as_deref() {
        env::var(env_var).unwrap_or_else(|_| raw.rpc.clone())
    } else {
        raw.rpc.clone()
    };

    let chain = Chain::by_id(raw.chain_id).context("unsupported chainId in provider config")?;
    let entry_point = raw
        .entry_point
        .as_deref()
        .map(parse_addr)
        .transpose()
        .context("invalid entryPoint address")?;
    let factory = raw
        .factory
        .as_deref()
        .map(parse_addr)
        .transpose()
        .context("invalid factory address")?;

    Ok(ProviderConfig {
        chain,
        rpc_url,
        entry_point,
        factory,
        opts: raw.opts.unwrap_or_default(),
    })
}

fn parse_addr(s: &str) -> Result<Address> {
    s.parse::<Address>().map_err(|e| anyhow!("{e}"))
}
