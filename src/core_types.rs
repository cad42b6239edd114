//! Core types used throughout the system
//!
//! Identifier aliases and the supported network set. Every other module
//! speaks in these types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wallet ID - primary key of a custodied wallet.
pub type WalletId = Uuid;

/// Transaction ID - primary key of a ledger transaction row.
pub type TransactionId = Uuid;

/// User ID - owner of one wallet per network.
pub type UserId = Uuid;

/// Supported blockchain networks
///
/// One Chain Adapter instance is bound per network. The string form is the
/// identifier used in storage and configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Network {
    EthereumSepolia,
    Tron,
    Ton,
}

impl Network {
    /// Return all supported networks
    pub fn all() -> [Network; 3] {
        [Network::EthereumSepolia, Network::Tron, Network::Ton]
    }

    /// Storage / config identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::EthereumSepolia => "ETHEREUM_SEPOLIA",
            Network::Tron => "TRON",
            Network::Ton => "TON",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Network::EthereumSepolia => "Ethereum Sepolia",
            Network::Tron => "Tron",
            Network::Ton => "TON",
        }
    }

    /// Native currency symbol
    pub fn native_currency(&self) -> &'static str {
        match self {
            Network::EthereumSepolia => "ETH",
            Network::Tron => "TRX",
            Network::Ton => "TON",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ETHEREUM_SEPOLIA" | "ETH" => Ok(Network::EthereumSepolia),
            "TRON" | "TRX" => Ok(Network::Tron),
            "TON" => Ok(Network::Ton),
            _ => Err(format!("Unsupported network: {}", s)),
        }
    }
}
