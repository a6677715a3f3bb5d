//! Static chain registry: supported networks and their default
//! ERC-4337 deployments.

use crate::error::{AaError, Result};
use ethers::types::{Address, H160, U256};
use hex_literal::hex;
use std::fmt;

/// EntryPoint v0.6 (same address on every chain it is deployed to).
pub const ENTRY_POINT_V06: Address = H160(hex!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789"));

const SIMPLE_FACTORY_MAINNETS: Address = H160(hex!("15Ba39375ee2Ab563E8873C8390be6f2E2F50232"));
const SIMPLE_FACTORY_TESTNETS: Address = H160(hex!("9406Cc6185a346906296840746125a0E44976454"));
const LIGHT_FACTORY: Address = H160(hex!("000000893A26168158fbeaDD9335Be5bC96592E2"));

/// Priority fee floor used on Arbitrum, where the network estimate is tiny.
const ARBITRUM_MIN_PRIORITY_FEE_PER_BID: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Currency {
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u8,
}

const ETHER: Currency = Currency {
    name: "Ether",
    symbol: "ETH",
    decimals: 18,
};

/// A network the SDK knows how to talk to.
///
/// Two chains are equal when their ids are equal.
#[derive(Debug, Clone, Copy)]
pub struct Chain {
    pub id: u64,
    pub network: &'static str,
    pub name: &'static str,
    pub currency: Currency,
    /// Multiplier applied to the latest base fee when estimating fees (must be >= 1.2).
    pub base_fee_multiplier: Option<f64>,
    /// Fixed priority fee; skips `eth_maxPriorityFeePerGas` when set.
    pub default_priority_fee: Option<U256>,
}

impl PartialEq for Chain {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Chain {}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Smart account implementations with a registered factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Simple,
    Light,
    Kernel,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Simple => "simple",
            AccountKind::Light => "light",
            AccountKind::Kernel => "kernel",
        }
    }
}

impl Chain {
    pub const MAINNET: Chain = Chain::new(1, "homestead", "Ethereum", ETHER);
    pub const SEPOLIA: Chain = Chain::new(
        11_155_111,
        "sepolia",
        "Sepolia",
        Currency {
            name: "Sepolia Ether",
            symbol: "SEP",
            decimals: 18,
        },
    );
    pub const GOERLI: Chain = Chain::new(
        5,
        "goerli",
        "Goerli",
        Currency {
            name: "Goerli Ether",
            symbol: "ETH",
            decimals: 18,
        },
    );
    pub const POLYGON: Chain = Chain::new(137, "matic", "Polygon", MATIC);
    pub const POLYGON_MUMBAI: Chain = Chain::new(80_001, "maticmum", "Polygon Mumbai", MATIC);
    pub const OPTIMISM: Chain = Chain::new(10, "optimism", "OP Mainnet", ETHER);
    pub const OPTIMISM_GOERLI: Chain =
        Chain::new(420, "optimism-goerli", "Optimism Goerli", GOERLI_ETHER);
    pub const OPTIMISM_SEPOLIA: Chain =
        Chain::new(11_155_420, "optimism-sepolia", "Optimism Sepolia", SEPOLIA_ETHER);
    pub const ARBITRUM: Chain = Chain::new(42_161, "arbitrum", "Arbitrum One", ETHER);
    pub const ARBITRUM_GOERLI: Chain =
        Chain::new(421_613, "arbitrum-goerli", "Arbitrum Goerli", GOERLI_ETHER);
    pub const ARBITRUM_SEPOLIA: Chain = Chain::new(
        421_614,
        "arbitrum-sepolia",
        "Arbitrum Sepolia",
        Currency {
            name: "Arbitrum Sepolia Ether",
            symbol: "ETH",
            decimals: 18,
        },
    );
    pub const BASE: Chain = Chain::new(8453, "base", "Base", ETHER);
    pub const BASE_GOERLI: Chain = Chain::new(84_531, "base-goerli", "Base Goerli", GOERLI_ETHER);
    pub const BASE_SEPOLIA: Chain =
        Chain::new(84_532, "base-sepolia", "Base Sepolia", SEPOLIA_ETHER);
    pub const LINEA: Chain = Chain::new(59_144, "linea-mainnet", "Linea Mainnet", ETHER);

    /// Every chain in the registry.
    pub const ALL: [Chain; 15] = [
        Chain::MAINNET,
        Chain::SEPOLIA,
        Chain::GOERLI,
        Chain::POLYGON,
        Chain::POLYGON_MUMBAI,
        Chain::OPTIMISM,
        Chain::OPTIMISM_GOERLI,
        Chain::OPTIMISM_SEPOLIA,
        Chain::ARBITRUM,
        Chain::ARBITRUM_GOERLI,
        Chain::ARBITRUM_SEPOLIA,
        Chain::BASE,
        Chain::BASE_GOERLI,
        Chain::BASE_SEPOLIA,
        Chain::LINEA,
    ];

    pub const fn new(id: u64, network: &'static str, name: &'static str, currency: Currency) -> Self {
        Self {
            id,
            network,
            name,
            currency,
            base_fee_multiplier: None,
            default_priority_fee: None,
        }
    }

    pub fn with_base_fee_multiplier(mut self, multiplier: f64) -> Self {
        self.base_fee_multiplier = Some(multiplier);
        self
    }

    pub fn with_default_priority_fee(mut self, fee: U256) -> Self {
        self.default_priority_fee = Some(fee);
        self
    }

    pub fn by_id(id: u64) -> Result<Chain> {
        Chain::ALL
            .iter()
            .find(|c| c.id == id)
            .copied()
            .ok_or(AaError::UnsupportedChain(id))
    }

    /// Default EntryPoint for this chain.
    pub fn default_entry_point(&self) -> Result<Address> {
        match self.id {
            1 | 11_155_111 | 5 | 137 | 80_001 | 10 | 420 | 42_161 | 421_613 | 8453 | 84_531 => {
                Ok(ENTRY_POINT_V06)
            }
            id => Err(self.missing(AaError::NoEntryPoint(id))),
        }
    }

    /// Default factory for the given account implementation on this chain.
    pub fn default_account_factory(&self, kind: AccountKind) -> Result<Address> {
        let found = match kind {
            AccountKind::Simple => match self.id {
                1 | 137 | 10 | 42_161 | 8453 | 84_531 => Some(SIMPLE_FACTORY_MAINNETS),
                11_155_111 | 5 | 80_001 | 420 | 421_613 => Some(SIMPLE_FACTORY_TESTNETS),
                _ => None,
            },
            AccountKind::Light => match self.id {
                1 | 11_155_111 | 5 | 137 | 80_001 | 10 | 420 | 42_161 | 421_613 | 8453
                | 84_531 => Some(LIGHT_FACTORY),
                _ => None,
            },
            // Kernel factories are deployment specific; callers pass one explicitly.
            AccountKind::Kernel => None,
        };

        found.ok_or_else(|| {
            self.missing(AaError::NoFactoryAddress {
                kind: kind.as_str(),
                chain_id: self.id,
            })
        })
    }

    /// Lower bound for the bidded priority fee, when the chain has its own.
    pub fn min_priority_fee_per_bid(&self) -> Option<U256> {
        match self.id {
            42_161 | 421_613 | 421_614 => Some(U256::from(ARBITRUM_MIN_PRIORITY_FEE_PER_BID)),
            _ => None,
        }
    }

    /// preVerificationGas on Arbitrum/Optimism depends on L1 fees at estimation
    /// time, so a small buffer is added there.
    pub fn default_pre_verification_gas_buffer_percent(&self) -> u64 {
        match self.id {
            42_161 | 421_613 | 10 | 420 => 5,
            _ => 0,
        }
    }

    fn missing(&self, err: AaError) -> AaError {
        if Chain::ALL.contains(self) {
            err
        } else {
            AaError::UnsupportedChain(self.id)
        }
    }
}

const MATIC: Currency = Currency {
    name: "MATIC",
    symbol: "MATIC",
    decimals: 18,
};

const GOERLI_ETHER: Currency = Currency {
    name: "Goerli Ether",
    symbol: "ETH",
    decimals: 18,
};

const SEPOLIA_ETHER: Currency = Currency {
    name: "Sepolia Ether",
    symbol: "ETH",
    decimals: 18,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_literal_matches_parse() {
        let parsed: Address = "0x5FF137D4b0FDCD49DcA30c7CF57E578a026d2789".parse().unwrap();
        assert_eq!(ENTRY_POINT_V06, parsed);
    }

    #[test]
    fn lookups_are_stable_for_every_registered_chain() {
        for chain in Chain::ALL {
            let first = chain.default_entry_point().ok();
            let second = chain.default_entry_point().ok();
            assert_eq!(first, second, "entry point changed for {chain}");

            for kind in [AccountKind::Simple, AccountKind::Light, AccountKind::Kernel] {
                let a = chain.default_account_factory(kind).ok();
                let b = chain.default_account_factory(kind).ok();
                assert_eq!(a, b, "{} factory changed for {chain}", kind.as_str());
            }
        }
    }

    #[test]
    fn simple_factory_differs_between_mainnet_and_testnet() {
        assert_eq!(
            Chain::MAINNET
                .default_account_factory(AccountKind::Simple)
                .unwrap(),
            SIMPLE_FACTORY_MAINNETS
        );
        assert_eq!(
            Chain::SEPOLIA
                .default_account_factory(AccountKind::Simple)
                .unwrap(),
            SIMPLE_FACTORY_TESTNETS
        );
    }

    #[test]
    fn registered_chain_without_deployment_reports_missing_address() {
        let err = Chain::BASE_SEPOLIA.default_entry_point().unwrap_err();
        assert!(matches!(err, AaError::NoEntryPoint(84_532)));

        let err = Chain::POLYGON
            .default_account_factory(AccountKind::Kernel)
            .unwrap_err();
        assert!(matches!(err, AaError::NoFactoryAddress { kind: "kernel", .. }));
    }

    #[test]
    fn unknown_chain_is_unsupported() {
        assert!(matches!(Chain::by_id(999), Err(AaError::UnsupportedChain(999))));

        let custom = Chain::new(999, "custom", "Custom", ETHER);
        assert!(matches!(
            custom.default_entry_point(),
            Err(AaError::UnsupportedChain(999))
        ));
    }

    #[test]
    fn equality_is_by_id() {
        let tweaked = Chain::POLYGON.with_base_fee_multiplier(2.0);
        assert_eq!(tweaked, Chain::POLYGON);
        assert_eq!(Chain::by_id(80_001).unwrap(), Chain::POLYGON_MUMBAI);
    }

    #[test]
    fn arbitrum_has_priority_fee_floor() {
        assert_eq!(
            Chain::ARBITRUM.min_priority_fee_per_bid(),
            Some(U256::from(10_000_000u64))
        );
        assert_eq!(Chain::MAINNET.min_priority_fee_per_bid(), None);
        assert_eq!(Chain::OPTIMISM.default_pre_verification_gas_buffer_percent(), 5);
        assert_eq!(Chain::BASE.default_pre_verification_gas_buffer_percent(), 0);
    }
}
