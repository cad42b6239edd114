//! Chain Custody - Multi-chain custodial wallet ledger
//!
//! Tracks per-user wallets on several blockchains, credits incoming deposits
//! exactly once, and settles outgoing withdrawals through an approval
//! workflow while keeping the stored balance consistent with the
//! transaction history.
//!
//! # Modules
//!
//! - [`core_types`] - Identifier aliases and the network set
//! - [`models`] - Wallet, Transaction and scan cursor records
//! - [`error`] - Error taxonomy with stable codes
//! - [`chain`] - Chain Adapter contract, registry and the simulated chain
//! - [`store`] - Ledger persistence (PostgreSQL and in-memory)
//! - [`ledger`] - Balance Ledger: serialized, atomic balance mutation
//! - [`vault`] - Private key encryption at rest
//! - [`scanner`] - Deposit scanning and confirmation refresh
//! - [`settlement`] - Withdrawal lifecycle and broadcast settlement
//! - [`wallet`] - Wallet provisioning and queries
//! - [`coordinator`] - Periodic sweeps

// Core types - must be first!
pub mod core_types;

pub mod error;
pub mod models;

pub mod chain;
pub mod ledger;
pub mod store;
pub mod vault;

pub mod scanner;
pub mod settlement;
pub mod wallet;

pub mod coordinator;

pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use chain::{AdapterRegistry, ChainAdapter, ChainError, SimulatedChain};
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use core_types::{Network, TransactionId, UserId, WalletId};
pub use error::{CustodyError, CustodyResult, ValidationError};
pub use ledger::BalanceLedger;
pub use models::{Direction, ScanCursor, Transaction, Wallet};
pub use scanner::{ConfirmationRefresher, DepositScanner, ScannerConfig};
pub use settlement::{SettlementConfig, Settler, TxStatus, WithdrawalService};
pub use store::{LedgerStore, MemoryStore, PgStore};
pub use vault::{AesGcmVault, KeyVault};
pub use wallet::WalletService;
