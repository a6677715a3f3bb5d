//! ERC-4337 smart account SDK.
//!
//! A [`SmartAccountProvider`] connects a [`SmartAccount`](account::SmartAccount)
//! to a bundler, fills UserOperations through a four stage middleware
//! pipeline, signs them with the account's owner and polls for receipts.
//! [`alchemy`] and [`pimlico`] provide preconfigured providers with paymaster
//! sponsorship.

pub mod account;
pub mod alchemy;
pub mod chain;
pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod hash;
pub mod middleware;
pub mod pimlico;
pub mod provider;
pub mod sponsor;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use chain::{AccountKind, Chain, ENTRY_POINT_V06};
pub use error::{AaError, Result, RpcError};
pub use provider::{SmartAccountProvider, SmartAccountProviderOpts};
pub use types::{
    UserOperation, UserOperationCallData, UserOperationOverrides, UserOperationReceipt,
    UserOperationRequest,
};
