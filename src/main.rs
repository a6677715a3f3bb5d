use aa_rs::account::{
    AccountVariant, LightAccount, LocalAccountSigner, SimpleAccount, SmartAccount,
    SmartAccountSigner, SmartContractAccount,
};
use aa_rs::alchemy::{AlchemyGasManagerConfig, AlchemyProvider, AlchemyProviderConfig, ConnectionConfig};
use aa_rs::client::Erc4337Client;
use aa_rs::config::{load_provider_config, ProviderConfig};
use aa_rs::encoding;
use aa_rs::{Chain, SmartAccountProvider, UserOperationCallData, UserOperationOverrides};
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ethers::types::{Address, Bytes, U256};
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "aa", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the owner, counterfactual smart account address and deployment state.
    Account(AccountArgs),

    /// Build, sign and send a UserOperation calling `execute(target, value, data)`.
    Send(SendArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum AccountType {
    Simple,
    Light,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Provider config (chainId, rpc, optional entryPoint/factory/opts).
    #[arg(long, env = "AA_CONFIG", default_value = "aa.json")]
    config: PathBuf,

    /// Override the bundler RPC URL (otherwise uses the config file).
    #[arg(long, env = "AA_RPC_URL")]
    rpc: Option<String>,

    /// Smart account owner private key.
    ///
    /// Recommended: set via env var AA_OWNER_PRIVATE_KEY.
    #[arg(long, env = "AA_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: String,

    #[arg(long, value_enum, default_value_t = AccountType::Simple)]
    account_type: AccountType,

    /// Account index passed to the SimpleAccount factory.
    #[arg(long, default_value_t = 0)]
    index: u64,

    /// Print a single JSON object to stdout; logs stay on stderr.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Call target.
    #[arg(long)]
    target: String,

    /// Value in wei (decimal).
    #[arg(long, default_value = "0")]
    value: String,

    /// Call data (0x-prefixed hex).
    #[arg(long, default_value = "0x")]
    data: String,

    /// Sponsor gas with this Alchemy Gas Manager policy.
    #[arg(long, env = "AA_GAS_MANAGER_POLICY_ID")]
    policy_id: Option<String>,

    /// Bearer token for the Alchemy endpoint.
    #[arg(long, env = "AA_ALCHEMY_JWT", hide_env_values = true)]
    jwt: Option<String>,

    /// Let the Gas Manager estimate gas limits and fees as well.
    #[arg(long, default_value_t = false)]
    sponsor_estimates_gas: bool,

    /// maxFeePerGas override in wei (decimal).
    #[arg(long)]
    max_fee_per_gas: Option<String>,

    /// maxPriorityFeePerGas override in wei (decimal).
    #[arg(long)]
    max_priority_fee_per_gas: Option<String>,

    /// Print the built UserOperation without signing or sending it.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Return after submission instead of waiting for the receipt.
    #[arg(long, default_value_t = false)]
    no_wait: bool,
}

enum Provider {
    Plain(SmartAccountProvider),
    Alchemy(AlchemyProvider),
}

impl Deref for Provider {
    type Target = SmartAccountProvider;

    fn deref(&self) -> &Self::Target {
        match self {
            Provider::Plain(p) => p,
            Provider::Alchemy(p) => p,
        }
    }
}

impl DerefMut for Provider {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Provider::Plain(p) => p,
            Provider::Alchemy(p) => p,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout is reserved for command output
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Send(args) => cmd_send(args).await,
    }
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let cfg = load_provider_config(&args.common.config, args.common.rpc.clone())?;
    let mut provider = Provider::Plain(plain_provider(&cfg)?);
    connect_account(&mut provider, &args.common, &cfg)?;

    let entry_point = provider.get_entry_point_address()?;
    let account = provider.account_mut()?;
    let owner = account.owner();
    let factory = account.factory_address();
    let address = account
        .get_address()
        .await
        .context("failed to resolve counterfactual address")?;
    let state = account.deployment_state().await?;

    if args.common.json {
        let out = serde_json::json!({
            "chainId": cfg.chain.id,
            "entryPoint": encoding::fmt_address(entry_point),
            "factory": encoding::fmt_address(factory),
            "owner": encoding::fmt_address(owner),
            "smartAccount": encoding::fmt_address(address),
            "deploymentState": format!("{state:?}"),
        });
        println!("{}", out);
        return Ok(());
    }

    println!("chain:          {}", cfg.chain);
    println!("entryPoint:     {:?}", entry_point);
    println!("factory:        {:?}", factory);
    println!("owner:          {:?}", owner);
    println!("smartAccount:   {:?}", address);
    println!("deployment:     {:?}", state);
    Ok(())
}

async fn cmd_send(args: SendArgs) -> Result<()> {
    let cfg = load_provider_config(&args.common.config, args.common.rpc.clone())?;

    let target = Address::from_str(&args.target).context("invalid --target address")?;
    let value = parse_wei(&args.value).context("invalid --value")?;
    let data = parse_hex(&args.data).context("invalid --data")?;
    let overrides = UserOperationOverrides {
        max_fee_per_gas: args
            .max_fee_per_gas
            .as_deref()
            .map(parse_wei)
            .transpose()
            .context("invalid --max-fee-per-gas")?,
        max_priority_fee_per_gas: args
            .max_priority_fee_per_gas
            .as_deref()
            .map(parse_wei)
            .transpose()
            .context("invalid --max-priority-fee-per-gas")?,
        ..Default::default()
    };

    let mut provider = match args.policy_id.clone() {
        Some(policy_id) => {
            let connection = ConnectionConfig {
                rpc_url: Some(cfg.rpc_url.clone()),
                jwt: args.jwt.clone(),
                ..Default::default()
            };
            let mut alchemy_cfg = AlchemyProviderConfig::new(cfg.chain, connection);
            alchemy_cfg.opts = Some(cfg.opts);
            let mut alchemy = AlchemyProvider::new(cfg.entry_point, alchemy_cfg)
                .context("failed to create alchemy provider")?;
            alchemy.with_alchemy_gas_manager(
                AlchemyGasManagerConfig { policy_id },
                args.sponsor_estimates_gas,
            );
            Provider::Alchemy(alchemy)
        }
        None => Provider::Plain(plain_provider(&cfg)?),
    };
    connect_account(&mut provider, &args.common, &cfg)?;

    let call = UserOperationCallData::new(target, data).with_value(value);
    let op = provider
        .build_user_operation(&call, &overrides)
        .await
        .context("failed to build user operation")?;

    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&op.to_request())?);
        return Ok(());
    }

    let hash = provider
        .sign_and_send_user_operation(op)
        .await
        .context("failed to send user operation")?;
    let sender = provider.get_address().await?;

    if args.no_wait {
        print_result(args.common.json, hash, sender, None);
        return Ok(());
    }

    let receipt = provider
        .wait_for_user_operation_transaction(hash)
        .await
        .context("user operation was not mined")?;
    if !receipt.success {
        tracing::warn!(
            user_op_hash = %encoding::fmt_h256(hash),
            reason = ?receipt.reason,
            "user operation reverted"
        );
    }
    print_result(args.common.json, hash, sender, Some(&receipt));
    Ok(())
}

fn plain_provider(cfg: &ProviderConfig) -> Result<SmartAccountProvider> {
    SmartAccountProvider::new(
        None,
        Some(cfg.rpc_url.as_str()),
        cfg.entry_point,
        cfg.chain,
        Some(cfg.opts),
    )
    .context("failed to create provider")
}

fn connect_account(provider: &mut Provider, common: &CommonArgs, cfg: &ProviderConfig) -> Result<()> {
    let signer: Arc<dyn SmartAccountSigner> = Arc::new(
        LocalAccountSigner::from_private_key(&common.owner_private_key)
            .context("invalid owner private key")?,
    );
    let client = provider.client().clone();
    let chain = *provider.chain();

    match common.account_type {
        AccountType::Simple => {
            let account =
                smart_account(SimpleAccount::new(common.index), client, signer, chain, cfg.factory)?;
            provider.connect(account);
        }
        AccountType::Light => {
            let account = smart_account(LightAccount, client, signer, chain, cfg.factory)?;
            provider.connect(account);
        }
    }
    Ok(())
}

fn smart_account<V: AccountVariant + 'static>(
    variant: V,
    client: Arc<dyn Erc4337Client>,
    signer: Arc<dyn SmartAccountSigner>,
    chain: Chain,
    factory: Option<Address>,
) -> Result<SmartContractAccount<V>> {
    match factory {
        Some(factory) => Ok(SmartContractAccount::new(variant, client, signer, chain, factory)),
        None => SmartContractAccount::with_default_factory(variant, client, signer, chain)
            .context("no factory configured and no default for this chain"),
    }
}

fn print_result(
    json: bool,
    hash: ethers::types::H256,
    sender: Address,
    receipt: Option<&aa_rs::UserOperationReceipt>,
) {
    let tx_hash = receipt.map(|r| encoding::fmt_h256(r.receipt.transaction_hash));
    if json {
        let out = serde_json::json!({
            "userOpHash": encoding::fmt_h256(hash),
            "sender": encoding::fmt_address(sender),
            "transactionHash": tx_hash,
            "success": receipt.map(|r| r.success),
        });
        println!("{}", out);
        return;
    }

    println!("userOpHash:     {}", encoding::fmt_h256(hash));
    println!("sender:         {:?}", sender);
    if let Some(receipt) = receipt {
        println!("txHash:         {}", tx_hash.unwrap_or_default());
        println!("success:        {}", receipt.success);
    }
}

fn parse_wei(s: &str) -> Result<U256> {
    U256::from_dec_str(s.trim()).map_err(|e| anyhow!("{e:?}"))
}

fn parse_hex(s: &str) -> Result<Bytes> {
    let s = s.trim();
    let hex_str = s.strip_prefix("0x").unwrap_or(s);
    Ok(Bytes::from(hex::decode(hex_str)?))
}
