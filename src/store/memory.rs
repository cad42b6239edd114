//! In-process store
//!
//! Same contract as the PostgreSQL store, with one mutex standing in for the
//! database's row locks. Backs tests and the no-database mode.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{BalanceOp, LedgerStore, StatusChange, StoreError, check_transition};
use crate::core_types::{Network, TransactionId, UserId, WalletId};
use crate::models::{Direction, ScanCursor, Transaction, Wallet};
use crate::settlement::state::TxStatus;

#[derive(Debug, Default)]
struct Tables {
    wallets: HashMap<WalletId, Wallet>,
    transactions: HashMap<TransactionId, Transaction>,
    /// Insertion order, stands in for `created_at` ordering
    sequence: Vec<TransactionId>,
    /// Unique index on `(wallet_id, tx_hash)`
    hashes: HashMap<(WalletId, String), TransactionId>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
    }
}

impl Tables {
    fn wallet_mut(&mut self, id: WalletId) -> Result<&mut Wallet, StoreError> {
        self.wallets
            .get_mut(&id)
            .ok_or(StoreError::WalletNotFound(id))
    }

    /// Compute the new balance without writing it
    fn checked_balance(&self, id: WalletId, op: BalanceOp) -> Result<Decimal, StoreError> {
        let wallet = self
            .wallets
            .get(&id)
            .ok_or(StoreError::WalletNotFound(id))?;
        op.apply(wallet.balance)
    }

    fn set_balance(&mut self, id: WalletId, balance: Decimal) -> Result<(), StoreError> {
        let wallet = self.wallet_mut(id)?;
        wallet.balance = balance;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    fn ordered<'a>(
        &'a self,
        filter: impl Fn(&Transaction) -> bool + 'a,
    ) -> impl DoubleEndedIterator<Item = &'a Transaction> + 'a {
        self.sequence
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .filter(move |tx| filter(tx))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_wallet(&self, wallet: &Wallet) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let taken = tables
            .wallets
            .values()
            .any(|w| w.user_id == wallet.user_id && w.network == wallet.network);
        if taken || tables.wallets.contains_key(&wallet.id) {
            return Err(StoreError::DuplicateWallet {
                user_id: wallet.user_id,
                network: wallet.network,
            });
        }
        tables.wallets.insert(wallet.id, wallet.clone());
        Ok(())
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>, StoreError> {
        Ok(self.tables()?.wallets.get(&id).cloned())
    }

    async fn find_wallet(
        &self,
        user_id: UserId,
        network: Network,
    ) -> Result<Option<Wallet>, StoreError> {
        Ok(self
            .tables()?
            .wallets
            .values()
            .find(|w| w.user_id == user_id && w.network == network)
            .cloned())
    }

    async fn active_wallets(&self) -> Result<Vec<Wallet>, StoreError> {
        let tables = self.tables()?;
        let mut wallets: Vec<Wallet> = tables
            .wallets
            .values()
            .filter(|w| w.active)
            .cloned()
            .collect();
        wallets.sort_by_key(|w| w.created_at);
        Ok(wallets)
    }

    async fn set_wallet_active(&self, id: WalletId, active: bool) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let wallet = tables.wallet_mut(id)?;
        wallet.active = active;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    async fn advance_cursor(&self, id: WalletId, cursor: &ScanCursor) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        let wallet = tables.wallet_mut(id)?;
        let advanced = wallet
            .cursor
            .advance_to(cursor.logical_time, &cursor.hash);
        if advanced {
            wallet.updated_at = Utc::now();
        }
        Ok(advanced)
    }

    async fn insert_transaction(
        &self,
        tx: &Transaction,
        op: BalanceOp,
    ) -> Result<Decimal, StoreError> {
        let mut tables = self.tables()?;
        if let Some(hash) = &tx.tx_hash
            && tables.hashes.contains_key(&(tx.wallet_id, hash.clone()))
        {
            return Err(StoreError::DuplicateHash(hash.clone()));
        }
        let balance = tables.checked_balance(tx.wallet_id, op)?;

        tables.set_balance(tx.wallet_id, balance)?;
        if let Some(hash) = &tx.tx_hash {
            tables.hashes.insert((tx.wallet_id, hash.clone()), tx.id);
        }
        tables.sequence.push(tx.id);
        tables.transactions.insert(tx.id, tx.clone());
        Ok(balance)
    }

    async fn transition(
        &self,
        id: TransactionId,
        expected: TxStatus,
        change: &StatusChange,
        op: BalanceOp,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables()?;
        let current = tables
            .transactions
            .get(&id)
            .ok_or(StoreError::TransactionNotFound(id))?;
        check_transition(id, current.direction, expected, change.status)?;
        if current.status != expected {
            return Ok(false);
        }
        let wallet_id = current.wallet_id;
        let current_hash = current.tx_hash.clone();

        if let Some(hash) = &change.tx_hash {
            let owner = tables.hashes.get(&(wallet_id, hash.clone()));
            if owner.is_some_and(|owner| *owner != id) {
                return Err(StoreError::DuplicateHash(hash.clone()));
            }
        }
        let balance = tables.checked_balance(wallet_id, op)?;

        // all checks passed, write
        if !op.is_none() {
            tables.set_balance(wallet_id, balance)?;
        }
        if let Some(hash) = &change.tx_hash {
            if let Some(old) = current_hash {
                tables.hashes.remove(&(wallet_id, old));
            }
            tables.hashes.insert((wallet_id, hash.clone()), id);
        }
        if let Some(tx) = tables.transactions.get_mut(&id) {
            change.apply_to(tx);
        }
        Ok(true)
    }

    async fn update_confirmations(
        &self,
        id: TransactionId,
        confirmations: i32,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables()?;
        let tx = tables
            .transactions
            .get_mut(&id)
            .ok_or(StoreError::TransactionNotFound(id))?;
        tx.confirmations = confirmations;
        tx.updated_at = Utc::now();
        Ok(())
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>, StoreError> {
        Ok(self.tables()?.transactions.get(&id).cloned())
    }

    async fn find_by_hash(
        &self,
        wallet_id: WalletId,
        tx_hash: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .hashes
            .get(&(wallet_id, tx_hash.to_string()))
            .and_then(|id| tables.transactions.get(id))
            .cloned())
    }

    async fn transactions_by_status(
        &self,
        direction: Direction,
        status: TxStatus,
        limit: usize,
    ) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .ordered(move |tx| tx.direction == direction && tx.status == status)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn wallet_transactions(
        &self,
        wallet_id: WalletId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.tables()?;
        Ok(tables
            .ordered(move |tx| tx.wallet_id == wallet_id)
            .rev()
            .cloned()
            .collect())
    }

    async fn user_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        let tables = self.tables()?;
        let owned: Vec<WalletId> = tables
            .wallets
            .values()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.id)
            .collect();
        Ok(tables
            .ordered(move |tx| owned.contains(&tx.wallet_id))
            .rev()
            .cloned()
            .collect())
    }
}
