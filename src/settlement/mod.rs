//! Withdrawal Settlement
//!
//! [`WithdrawalService`] handles the synchronous side (create, approve,
//! reject, cancel). [`Settler`] runs the asynchronous broadcast sweep.

pub mod settler;
pub mod state;
pub mod withdrawal;

pub use settler::{SettleOutcome, Settler, SettlementReport};
pub use state::TxStatus;
pub use withdrawal::WithdrawalService;

use std::time::Duration;

/// Configuration for the settlement sweep
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    pub adapter_timeout: Duration,
    /// Maximum withdrawals handled per sweep and per status
    pub batch_size: usize,
    /// Parallel broadcasts per sweep
    pub max_concurrency: usize,
    /// How far before `created_at` to look for a matching outgoing transfer
    pub ambiguity_window: Duration,
    /// How long a withdrawal may sit in BROADCASTING with no matching
    /// transfer on chain before it is failed and released
    pub stale_broadcast: Duration,
    /// Outgoing transfers fetched per page while reconciling
    pub history_page_size: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(10),
            batch_size: 100,
            max_concurrency: 8,
            ambiguity_window: Duration::from_secs(300),
            stale_broadcast: Duration::from_secs(3600),
            history_page_size: 200,
        }
    }
}
