use crate::account::SmartAccount;
use crate::chain::Chain;
use crate::client::{Erc4337Client, Erc4337RpcClient};
use crate::encoding::fmt_h256;
use crate::error::{AaError, Result};
use crate::hash::user_operation_hash;
use crate::middleware::{
    ClientMiddleware, DefaultFeeDataGetter, DefaultGasEstimator, MiddlewareContext,
    MiddlewarePipeline, MiddlewareStage,
};
use crate::types::{UserOperation, UserOperationCallData, UserOperationOverrides, UserOperationReceipt};
use ethers::types::{Address, Bytes, H256, U256};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound (exclusive) of the random delay added to each receipt poll.
const RETRY_JITTER_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmartAccountProviderOpts {
    /// Receipt polls before giving up.
    pub tx_max_retries: u32,
    pub tx_retry_interval_ms: u64,
    pub tx_retry_multiplier: f64,
    /// Floor for the bidded priority fee, in wei.
    pub min_priority_fee_per_bid: u64,
    /// Percentage added to the network's priority fee estimate.
    pub max_priority_fee_per_gas_estimate_buffer: u64,
}

impl Default for SmartAccountProviderOpts {
    fn default() -> Self {
        Self {
            tx_max_retries: 5,
            tx_retry_interval_ms: 2_000,
            tx_retry_multiplier: 1.5,
            min_priority_fee_per_bid: 100_000_000,
            max_priority_fee_per_gas_estimate_buffer: 33,
        }
    }
}

/// Delay before receipt poll number `attempt` (zero based):
/// `interval * multiplier^attempt + jitter`.
pub fn backoff_delay(attempt: u32, interval_ms: u64, multiplier: f64, jitter_ms: u64) -> Duration {
    let base = interval_ms as f64 * multiplier.powi(attempt as i32);
    // `as` saturates, so very late attempts clamp to u64::MAX
    Duration::from_millis((base as u64).saturating_add(jitter_ms))
}

/// Builds, signs, sends and tracks UserOperations for one connected account.
pub struct SmartAccountProvider {
    client: Arc<dyn Erc4337Client>,
    chain: Chain,
    entry_point_address: Option<Address>,
    opts: SmartAccountProviderOpts,
    account: Option<Box<dyn SmartAccount>>,
    middleware: MiddlewarePipeline,
}

impl SmartAccountProvider {
    /// Uses `client` when given, otherwise connects a [`Erc4337RpcClient`] to
    /// `rpc_url`. Having neither is [`AaError::NoRpc`].
    pub fn new(
        client: Option<Arc<dyn Erc4337Client>>,
        rpc_url: Option<&str>,
        entry_point_address: Option<Address>,
        chain: Chain,
        opts: Option<SmartAccountProviderOpts>,
    ) -> Result<Self> {
        let client = match (client, rpc_url) {
            (Some(client), _) => client,
            (None, Some(url)) => Arc::new(Erc4337RpcClient::new(url)?) as Arc<dyn Erc4337Client>,
            (None, None) => return Err(AaError::NoRpc),
        };
        Ok(Self::from_parts(
            client,
            entry_point_address,
            chain,
            opts.unwrap_or_default(),
        ))
    }

    /// Default options, chain entry point.
    pub fn with_client(client: Arc<dyn Erc4337Client>, chain: Chain) -> Self {
        Self::from_parts(client, None, chain, SmartAccountProviderOpts::default())
    }

    fn from_parts(
        client: Arc<dyn Erc4337Client>,
        entry_point_address: Option<Address>,
        chain: Chain,
        opts: SmartAccountProviderOpts,
    ) -> Self {
        let middleware = MiddlewarePipeline::new(
            DefaultFeeDataGetter {
                min_priority_fee_per_bid: U256::from(opts.min_priority_fee_per_bid),
                max_priority_fee_buffer_percent: opts.max_priority_fee_per_gas_estimate_buffer,
            },
            DefaultGasEstimator::default(),
        );
        Self {
            client,
            chain,
            entry_point_address,
            opts,
            account: None,
            middleware,
        }
    }

    /// Binds `account`, replacing any previously connected one.
    pub fn connect(&mut self, account: impl SmartAccount + 'static) -> &mut Self {
        self.account = Some(Box::new(account));
        self
    }

    pub fn is_connected(&self) -> bool {
        self.account.is_some()
    }

    pub fn client(&self) -> &Arc<dyn Erc4337Client> {
        &self.client
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn opts(&self) -> &SmartAccountProviderOpts {
        &self.opts
    }

    pub fn middleware(&self) -> &MiddlewarePipeline {
        &self.middleware
    }

    pub fn account(&self) -> Option<&dyn SmartAccount> {
        self.account.as_deref()
    }

    pub fn account_mut(&mut self) -> Result<&mut (dyn SmartAccount + 'static)> {
        self.account.as_deref_mut().ok_or(AaError::NotConnected)
    }

    pub async fn get_address(&mut self) -> Result<Address> {
        self.account_mut()?.get_address().await
    }

    /// The connected account's own entry point, then the provider's, then the
    /// chain default.
    pub fn get_entry_point_address(&self) -> Result<Address> {
        if let Some(address) = self.account.as_ref().and_then(|a| a.entry_point_override()) {
            return Ok(address);
        }
        match self.entry_point_address {
            Some(address) => Ok(address),
            None => self.chain.default_entry_point(),
        }
    }

    /// Fills every field except the signature, which holds the account's
    /// dummy signature.
    pub async fn build_user_operation(
        &mut self,
        data: &UserOperationCallData,
        overrides: &UserOperationOverrides,
    ) -> Result<UserOperation> {
        let call_data = self.account_mut()?.encode_execute(data);
        self.build_from_call_data(call_data, overrides).await
    }

    pub async fn build_batch_user_operation(
        &mut self,
        calls: &[UserOperationCallData],
        overrides: &UserOperationOverrides,
    ) -> Result<UserOperation> {
        let call_data = self.account_mut()?.encode_batch_execute(calls)?;
        self.build_from_call_data(call_data, overrides).await
    }

    async fn build_from_call_data(
        &mut self,
        call_data: Bytes,
        overrides: &UserOperationOverrides,
    ) -> Result<UserOperation> {
        let account = self.account_mut()?;
        let init_code = account.get_init_code().await?;
        let sender = account.get_address().await?;
        let nonce = account.get_nonce().await?;
        let signature = account.dummy_signature();

        let op = UserOperation {
            sender,
            nonce,
            init_code,
            call_data,
            paymaster_and_data: Some(Bytes::new()),
            signature: Some(signature),
            ..Default::default()
        };

        let ctx = MiddlewareContext {
            entry_point: self.get_entry_point_address()?,
            chain: &self.chain,
        };
        self.middleware
            .run(self.client.as_ref(), op, overrides, &ctx)
            .await
    }

    pub async fn send_user_operation(
        &mut self,
        data: &UserOperationCallData,
        overrides: &UserOperationOverrides,
    ) -> Result<H256> {
        let op = self.build_user_operation(data, overrides).await?;
        self.sign_and_send_user_operation(op).await
    }

    pub async fn send_batch_user_operation(
        &mut self,
        calls: &[UserOperationCallData],
        overrides: &UserOperationOverrides,
    ) -> Result<H256> {
        let op = self.build_batch_user_operation(calls, overrides).await?;
        self.sign_and_send_user_operation(op).await
    }

    /// Signs a built operation with the connected account and submits it.
    pub async fn sign_and_send_user_operation(&mut self, mut op: UserOperation) -> Result<H256> {
        if self.account.is_none() {
            return Err(AaError::NotConnected);
        }
        let missing = op.missing_parameters();
        if !missing.is_empty() {
            return Err(AaError::MissingParameters(missing.join(", ")));
        }

        let entry_point = self.get_entry_point_address()?;
        let hash = user_operation_hash(&op, entry_point, self.chain.id)?;
        op.signature = Some(self.account_mut()?.sign_message(hash.as_bytes()).await?);

        let sent = self
            .client
            .send_user_operation(&op.to_request(), entry_point)
            .await?;
        tracing::info!(
            user_op_hash = %fmt_h256(sent),
            sender = %op.sender,
            nonce = %op.nonce,
            "user operation sent"
        );
        Ok(sent)
    }

    /// Polls the bundler for the receipt with exponential backoff.
    ///
    /// An RPC error on the last attempt is returned as is; running out of
    /// attempts without a receipt is [`AaError::NoTransaction`].
    pub async fn wait_for_user_operation_transaction(&self, hash: H256) -> Result<UserOperationReceipt> {
        let max_retries = self.opts.tx_max_retries;
        for attempt in 0..max_retries {
            let jitter = rand::thread_rng().gen_range(0..RETRY_JITTER_MS);
            let delay = backoff_delay(
                attempt,
                self.opts.tx_retry_interval_ms,
                self.opts.tx_retry_multiplier,
                jitter,
            );
            tokio::time::sleep(delay).await;

            match self.client.get_user_operation_receipt(hash).await {
                Ok(Some(receipt)) => {
                    tracing::info!(
                        user_op_hash = %fmt_h256(hash),
                        tx_hash = %fmt_h256(receipt.receipt.transaction_hash),
                        success = receipt.success,
                        "user operation included"
                    );
                    return Ok(receipt);
                }
                Ok(None) => {
                    tracing::debug!(attempt, user_op_hash = %fmt_h256(hash), "receipt not available yet");
                }
                Err(e) if attempt + 1 == max_retries => return Err(e),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "receipt poll failed; retrying");
                }
            }
        }
        Err(AaError::NoTransaction(hash))
    }

    pub fn with_fee_data_getter(&mut self, middleware: Arc<dyn ClientMiddleware>) -> &mut Self {
        self.middleware.set(MiddlewareStage::FeeDataGetter, middleware);
        self
    }

    pub fn with_gas_estimator(&mut self, middleware: Arc<dyn ClientMiddleware>) -> &mut Self {
        self.middleware.set(MiddlewareStage::GasEstimator, middleware);
        self
    }

    /// Replaces the dummy and/or final paymaster stages; `None` keeps the
    /// current one.
    pub fn with_paymaster_middleware(
        &mut self,
        dummy_paymaster_data: Option<Arc<dyn ClientMiddleware>>,
        paymaster_data: Option<Arc<dyn ClientMiddleware>>,
    ) -> &mut Self {
        if let Some(middleware) = dummy_paymaster_data {
            self.middleware
                .set(MiddlewareStage::DummyPaymasterData, middleware);
        }
        if let Some(middleware) = paymaster_data {
            self.middleware.set(MiddlewareStage::PaymasterData, middleware);
        }
        self
    }
}
