//! Deposit Scanning
//!
//! [`DepositScanner`] walks each wallet's transfer history forward from its
//! scan cursor and records every incoming transfer exactly once.
//! [`ConfirmationRefresher`] later credits deposits that were not yet final
//! when first seen.

pub mod confirmation;
pub mod deposit;

pub use confirmation::{ConfirmationRefresher, RefreshOutcome};
pub use deposit::{DepositScanner, ScanReport};

use std::collections::HashMap;
use std::time::Duration;

use crate::core_types::Network;

/// Scan-side tuning
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Transfers fetched per scan call
    pub batch_limit: usize,
    pub adapter_timeout: Duration,
    /// Confirmations after which a deposit counts as final even when the
    /// node does not flag it. Networks without an entry rely on the flag.
    pub required_confirmations: HashMap<Network, i32>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_limit: 100,
            adapter_timeout: Duration::from_secs(10),
            required_confirmations: HashMap::new(),
        }
    }
}

impl ScannerConfig {
    pub fn is_final(&self, network: Network, confirmations: i32, confirmed: bool) -> bool {
        confirmed
            || self
                .required_confirmations
                .get(&network)
                .is_some_and(|required| *required > 0 && confirmations >= *required)
    }
}
