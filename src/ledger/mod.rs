//! Balance Ledger
//!
//! Sole path through which a wallet balance changes. Every primitive writes
//! the transaction row that explains the change in the same atomic store
//! operation, under the wallet's lock.
//!
//! Invariant (checked by [`BalanceLedger::audit`]):
//! `balance = sum(CONFIRMED deposits) - sum(withdrawals still holding funds)`

mod locks;

pub use locks::WalletLocks;

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

use crate::core_types::WalletId;
use crate::error::{CustodyError, CustodyResult, ValidationError};
use crate::models::{Direction, Transaction};
use crate::settlement::state::TxStatus;
use crate::store::{BalanceOp, LedgerStore, StatusChange};

/// Recomputed vs. recorded balance of one wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceAudit {
    pub wallet_id: WalletId,
    pub recorded: Decimal,
    pub confirmed_deposits: Decimal,
    pub held_withdrawals: Decimal,
}

impl BalanceAudit {
    pub fn expected(&self) -> Decimal {
        self.confirmed_deposits - self.held_withdrawals
    }

    pub fn drift(&self) -> Decimal {
        self.recorded - self.expected()
    }

    pub fn is_consistent(&self) -> bool {
        self.drift().is_zero()
    }
}

pub struct BalanceLedger {
    store: Arc<dyn LedgerStore>,
    locks: WalletLocks,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            locks: WalletLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    fn positive(amount: Decimal) -> Result<(), ValidationError> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount);
        }
        Ok(())
    }

    /// Record a deposit row that carries no balance effect (not yet final,
    /// or without value)
    pub async fn record(&self, tx: &Transaction) -> CustodyResult<()> {
        self.store.insert_transaction(tx, BalanceOp::None).await?;
        Ok(())
    }

    /// Record a confirmed deposit and credit its amount
    pub async fn credit(&self, tx: &Transaction) -> CustodyResult<Decimal> {
        Self::positive(tx.amount)?;
        let _guard = self.locks.lock(tx.wallet_id).await;
        let balance = self
            .store
            .insert_transaction(tx, BalanceOp::Credit(tx.amount))
            .await?;
        Ok(balance)
    }

    /// Place a withdrawal hold: debit the amount and record the PENDING row.
    /// Fails with `InsufficientBalance` if `amount > balance`.
    pub async fn hold_and_debit(&self, tx: &Transaction) -> CustodyResult<Decimal> {
        Self::positive(tx.amount)?;
        let _guard = self.locks.lock(tx.wallet_id).await;
        let balance = self
            .store
            .insert_transaction(tx, BalanceOp::HoldAndDebit(tx.amount))
            .await?;
        Ok(balance)
    }

    /// Give a held withdrawal amount back while moving the row out of
    /// `expected`. Returns false if the row was no longer in `expected`.
    pub async fn release(
        &self,
        tx: &Transaction,
        expected: TxStatus,
        change: &StatusChange,
    ) -> CustodyResult<bool> {
        debug_assert!(!change.status.holds_funds());
        let _guard = self.locks.lock(tx.wallet_id).await;
        let released = self
            .store
            .transition(tx.id, expected, change, BalanceOp::Release(tx.amount))
            .await?;
        Ok(released)
    }

    /// Credit a deposit recorded earlier without balance effect, moving it
    /// out of `expected`. At most once: the CAS loser credits nothing.
    pub async fn credit_recorded(
        &self,
        tx: &Transaction,
        expected: TxStatus,
        change: &StatusChange,
    ) -> CustodyResult<bool> {
        Self::positive(tx.amount)?;
        let _guard = self.locks.lock(tx.wallet_id).await;
        let credited = self
            .store
            .transition(tx.id, expected, change, BalanceOp::Credit(tx.amount))
            .await?;
        Ok(credited)
    }

    pub async fn current_balance(&self, wallet_id: WalletId) -> CustodyResult<Decimal> {
        self.store
            .get_wallet(wallet_id)
            .await?
            .map(|w| w.balance)
            .ok_or(CustodyError::WalletNotFound(wallet_id))
    }

    /// Recompute the balance from the wallet's transaction rows
    pub async fn audit(&self, wallet_id: WalletId) -> CustodyResult<BalanceAudit> {
        let _guard = self.locks.lock(wallet_id).await;
        let recorded = self.current_balance(wallet_id).await?;
        let rows = self.store.wallet_transactions(wallet_id).await?;

        let mut confirmed_deposits = Decimal::ZERO;
        let mut held_withdrawals = Decimal::ZERO;
        for tx in rows {
            match tx.direction {
                Direction::Deposit if tx.status == TxStatus::Confirmed => {
                    confirmed_deposits += tx.amount
                }
                Direction::Withdrawal if tx.status.holds_funds() => held_withdrawals += tx.amount,
                _ => {}
            }
        }

        Ok(BalanceAudit {
            wallet_id,
            recorded,
            confirmed_deposits,
            held_withdrawals,
        })
    }
}
