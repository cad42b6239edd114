//! Ledger Store
//!
//! Persistence contract of the custody core. Every balance change is applied
//! in the same atomic unit as the transaction row that explains it, and every
//! status change is a compare-and-swap on the current status.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{Network, TransactionId, UserId, WalletId};
use crate::models::{Direction, ScanCursor, Transaction, Wallet};
use crate::settlement::state::TxStatus;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Transaction hash already recorded: {0}")]
    DuplicateHash(String),

    #[error("Transaction {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: TransactionId,
        from: TxStatus,
        to: TxStatus,
    },

    #[error("User {user_id} already has a {network} wallet")]
    DuplicateWallet { user_id: UserId, network: Network },

    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Balance overflow")]
    Overflow,

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Reject a status change the row's direction does not allow
pub(crate) fn check_transition(
    id: TransactionId,
    direction: Direction,
    expected: TxStatus,
    next: TxStatus,
) -> Result<(), StoreError> {
    if expected.can_transition_to(direction, next) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition {
            id,
            from: expected,
            to: next,
        })
    }
}

/// Balance effect applied atomically with a row write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOp {
    None,
    /// Confirmed deposit
    Credit(Decimal),
    /// Withdrawal hold. Fails when the balance would go negative.
    HoldAndDebit(Decimal),
    /// Withdrawal hold returned
    Release(Decimal),
}

impl BalanceOp {
    /// New balance after this op. Never negative.
    pub fn apply(&self, balance: Decimal) -> Result<Decimal, StoreError> {
        match *self {
            BalanceOp::None => Ok(balance),
            BalanceOp::Credit(amount) | BalanceOp::Release(amount) => {
                balance.checked_add(amount).ok_or(StoreError::Overflow)
            }
            BalanceOp::HoldAndDebit(amount) => {
                if amount > balance {
                    return Err(StoreError::InsufficientBalance {
                        available: balance,
                        requested: amount,
                    });
                }
                Ok(balance - amount)
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, BalanceOp::None)
    }
}

/// Mutable fields written together with a status transition.
/// `None` keeps the stored value.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: TxStatus,
    pub tx_hash: Option<String>,
    pub block_position: Option<i64>,
    pub confirmations: Option<i32>,
    pub error_message: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl StatusChange {
    pub fn to(status: TxStatus) -> Self {
        Self {
            status,
            tx_hash: None,
            block_position: None,
            confirmations: None,
            error_message: None,
            confirmed_at: None,
        }
    }

    pub fn hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn position(mut self, block_position: i64) -> Self {
        self.block_position = Some(block_position);
        self
    }

    pub fn confirmations(mut self, confirmations: i32) -> Self {
        self.confirmations = Some(confirmations);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn confirmed_now(mut self) -> Self {
        self.confirmed_at = Some(Utc::now());
        self
    }

    /// Copy the changed fields onto `tx`
    pub fn apply_to(&self, tx: &mut Transaction) {
        tx.status = self.status;
        if let Some(hash) = &self.tx_hash {
            tx.tx_hash = Some(hash.clone());
        }
        if let Some(position) = self.block_position {
            tx.block_position = Some(position);
        }
        if let Some(confirmations) = self.confirmations {
            tx.confirmations = confirmations;
        }
        if let Some(message) = &self.error_message {
            tx.error_message = Some(message.clone());
        }
        if let Some(at) = self.confirmed_at {
            tx.confirmed_at = Some(at);
        }
        tx.updated_at = Utc::now();
    }
}

/// Durable ledger state
///
/// Implementations must make `insert_transaction` and `transition` atomic
/// with their `BalanceOp`, and reject a second row of the same wallet
/// carrying an already recorded `tx_hash`. A transfer between two custodied
/// wallets legitimately appears once in each.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // === Wallets ===

    /// Fails with `DuplicateWallet` when the user already has one on the network
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError>;

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError>;

    async fn find_wallet(
        &self,
        user_id: UserId,
        network: Network,
    ) -> Result<Option<Wallet>, StoreError>;

    async fn active_wallets(&self) -> Result<Vec<Wallet>, StoreError>;

    async fn set_wallet_active(&self, id: WalletId, active: bool) -> Result<(), StoreError>;

    /// Move the scan cursor forward. Returns false if `cursor` is not ahead
    /// of the stored one (the stored cursor is left untouched).
    async fn advance_cursor(&self, id: WalletId, cursor: &ScanCursor) -> Result<bool, StoreError>;

    // === Transactions ===

    /// Insert `tx` and apply `op` to its wallet in one atomic unit.
    /// Returns the wallet balance afterwards.
    async fn insert_transaction(
        &self,
        tx: &Transaction,
        op: BalanceOp,
    ) -> Result<Decimal, StoreError>;

    /// CAS: apply `change` and `op` only if the row is still in `expected`.
    /// Returns false when another writer got there first. Fails with
    /// `IllegalTransition` when the row's direction does not allow
    /// `expected -> change.status`.
    async fn transition(
        &self,
        id: TransactionId,
        expected: TxStatus,
        change: &StatusChange,
        op: BalanceOp,
    ) -> Result<bool, StoreError>;

    async fn update_confirmations(
        &self,
        id: TransactionId,
        confirmations: i32,
    ) -> Result<(), StoreError>;

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// The row of `wallet_id` carrying `tx_hash`, if any
    async fn find_by_hash(
        &self,
        wallet_id: WalletId,
        tx_hash: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Oldest first
    async fn transactions_by_status(
        &self,
        direction: Direction,
        status: TxStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Newest first
    async fn wallet_transactions(&self, wallet_id: WalletId)
    -> Result<Vec<Transaction>, StoreError>;

    /// Newest first, across all of the user's wallets
    async fn user_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_ops() {
        let hundred = Decimal::from(100);
        assert_eq!(
            BalanceOp::Credit(Decimal::from(5)).apply(hundred).unwrap(),
            Decimal::from(105)
        );
        assert_eq!(
            BalanceOp::HoldAndDebit(Decimal::from(30))
                .apply(hundred)
                .unwrap(),
            Decimal::from(70)
        );
        assert_eq!(
            BalanceOp::Release(Decimal::from(30))
                .apply(Decimal::from(70))
                .unwrap(),
            hundred
        );
        assert_eq!(BalanceOp::None.apply(hundred).unwrap(), hundred);
    }

    #[test]
    fn test_hold_never_goes_negative() {
        let err = BalanceOp::HoldAndDebit(Decimal::from(101))
            .apply(Decimal::from(100))
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InsufficientBalance {
                available: Decimal::from(100),
                requested: Decimal::from(101),
            }
        );

        // exact balance is allowed
        assert_eq!(
            BalanceOp::HoldAndDebit(Decimal::from(100))
                .apply(Decimal::from(100))
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_status_change_keeps_unset_fields() {
        let wallet = Wallet::new(
            uuid::Uuid::new_v4(),
            Network::Ton,
            "EQsrc".into(),
            "k".into(),
            "p".into(),
        );
        let mut tx = Transaction::withdrawal(&wallet, "EQdst", Decimal::ONE, None);
        tx.error_message = Some("earlier".into());

        StatusChange::to(TxStatus::Confirmed)
            .hash("abc")
            .confirmed_now()
            .apply_to(&mut tx);

        assert_eq!(tx.status, TxStatus::Confirmed);
        assert_eq!(tx.tx_hash.as_deref(), Some("abc"));
        assert!(tx.confirmed_at.is_some());
        assert_eq!(tx.error_message.as_deref(), Some("earlier"));
    }
}
