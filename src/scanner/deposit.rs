//! Deposit Scanner
//!
//! Per wallet:
//! 1. fetch up to `batch_limit` transfers after the stored cursor
//! 2. walk them in ascending chain order, skipping transfers to other
//!    addresses, transfers at or before the cursor, and hashes this wallet
//!    already recorded
//! 3. record each remaining transfer as a DEPOSIT (CONFIRMED + credit when
//!    final, PENDING otherwise, FAILED when it carried no value)
//! 4. advance the cursor to the highest position processed
//!
//! The cursor is written only after the rows it covers are durable, so a
//! crash mid-batch re-reads the unrecorded tail on the next pass.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ScannerConfig;
use crate::chain::{AdapterRegistry, RawTransfer, with_timeout};
use crate::core_types::WalletId;
use crate::error::{CustodyError, CustodyResult};
use crate::ledger::{BalanceLedger, WalletLocks};
use crate::models::{Direction, ScanCursor, Transaction, Wallet};
use crate::settlement::state::TxStatus;

/// What one scan call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub fetched: usize,
    pub credited: usize,
    pub pending: usize,
    pub failed: usize,
    /// Not for this wallet, stale, or already recorded
    pub skipped: usize,
    pub cursor: ScanCursor,
    pub advanced: bool,
}

impl ScanReport {
    pub fn recorded(&self) -> usize {
        self.credited + self.pending + self.failed
    }
}

enum Handled {
    Credited,
    Pending,
    Failed,
    Skipped,
}

pub struct DepositScanner {
    ledger: Arc<BalanceLedger>,
    adapters: Arc<AdapterRegistry>,
    config: ScannerConfig,
    /// One scan per wallet at a time. Separate from the ledger's balance locks.
    scan_locks: WalletLocks,
}

/// DEPOSIT row for `raw` landing in `wallet`
fn deposit_row(wallet: &Wallet, raw: &RawTransfer, status: TxStatus) -> Transaction {
    let now = Utc::now();
    Transaction {
        id: uuid::Uuid::new_v4(),
        wallet_id: wallet.id,
        direction: Direction::Deposit,
        from_address: raw.from.clone(),
        to_address: raw.to.clone(),
        amount: raw.amount.unwrap_or_default(),
        fee: raw.fee,
        status,
        tx_hash: Some(raw.hash.clone()),
        block_position: Some(raw.logical_time),
        confirmations: raw.confirmations,
        memo: raw.memo.clone(),
        error_message: None,
        created_at: now,
        updated_at: now,
        confirmed_at: (status == TxStatus::Confirmed).then_some(now),
    }
}

impl DepositScanner {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        adapters: Arc<AdapterRegistry>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            ledger,
            adapters,
            config,
            scan_locks: WalletLocks::new(),
        }
    }

    /// Scan one wallet. Idempotent; safe to call concurrently for different
    /// wallets, serialized for the same wallet.
    pub async fn scan(&self, wallet_id: WalletId) -> CustodyResult<ScanReport> {
        let _scan = self.scan_locks.lock(wallet_id).await;

        // reload under the scan lock, the caller's copy may hold an old cursor
        let wallet = self
            .ledger
            .store()
            .get_wallet(wallet_id)
            .await?
            .ok_or(CustodyError::WalletNotFound(wallet_id))?;
        let adapter = self.adapters.get(wallet.network)?;
        let start = wallet.cursor.clone();

        let mut batch = with_timeout(
            self.config.adapter_timeout,
            adapter.list_transactions_since(&wallet.address, &start, self.config.batch_limit),
        )
        .await?;

        let mut report = ScanReport {
            fetched: batch.len(),
            cursor: start.clone(),
            ..Default::default()
        };
        if batch.is_empty() {
            debug!(wallet_id = %wallet.id, cursor = %start, "No new transfers");
            return Ok(report);
        }

        if !batch.is_sorted_by_key(|t| t.logical_time) {
            warn!(
                wallet_id = %wallet.id,
                network = %wallet.network,
                "Adapter returned transfers out of chain order"
            );
            batch.sort_by_key(|t| t.logical_time);
        }

        let mut next = start.clone();
        let mut last_position: Option<i64> = None;
        let mut failure = None;

        for raw in &batch {
            if !start.precedes(raw.logical_time) {
                debug!(
                    wallet_id = %wallet.id,
                    tx_hash = %raw.hash,
                    position = raw.logical_time,
                    cursor = %start,
                    "Skipping transfer at or before cursor"
                );
                report.skipped += 1;
                continue;
            }
            if last_position == Some(raw.logical_time) {
                warn!(
                    wallet_id = %wallet.id,
                    position = raw.logical_time,
                    "Adapter returned two transfers at one position"
                );
            }
            last_position = Some(raw.logical_time);

            match self.handle(&wallet, raw).await {
                Ok(Handled::Credited) => report.credited += 1,
                Ok(Handled::Pending) => report.pending += 1,
                Ok(Handled::Failed) => report.failed += 1,
                Ok(Handled::Skipped) => report.skipped += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            next.advance_to(raw.logical_time, &raw.hash);
        }

        if next != start {
            report.advanced = self.ledger.store().advance_cursor(wallet.id, &next).await?;
            report.cursor = next;
        }

        if let Some(e) = failure {
            warn!(
                wallet_id = %wallet.id,
                cursor = %report.cursor,
                error = %e,
                "Scan stopped early, remaining transfers retry next cycle"
            );
            return Err(e);
        }

        if report.recorded() > 0 {
            info!(
                wallet_id = %wallet.id,
                network = %wallet.network,
                credited = report.credited,
                pending = report.pending,
                failed = report.failed,
                cursor = %report.cursor,
                "Deposits recorded"
            );
        }
        Ok(report)
    }

    async fn handle(&self, wallet: &Wallet, raw: &RawTransfer) -> CustodyResult<Handled> {
        if !wallet.owns_address(&raw.to) {
            return Ok(Handled::Skipped);
        }
        // another custodied wallet may hold the same hash as its withdrawal
        if self
            .ledger
            .store()
            .find_by_hash(wallet.id, &raw.hash)
            .await?
            .is_some()
        {
            debug!(wallet_id = %wallet.id, tx_hash = %raw.hash, "Transfer already recorded");
            return Ok(Handled::Skipped);
        }

        let result = match raw.amount {
            Some(amount) if amount > Decimal::ZERO => {
                if self
                    .config
                    .is_final(wallet.network, raw.confirmations, raw.confirmed)
                {
                    let tx = deposit_row(wallet, raw, TxStatus::Confirmed);
                    self.ledger.credit(&tx).await.map(|_| Handled::Credited)
                } else {
                    let tx = deposit_row(wallet, raw, TxStatus::Pending);
                    self.ledger.record(&tx).await.map(|_| Handled::Pending)
                }
            }
            _ => {
                let mut tx = deposit_row(wallet, raw, TxStatus::Failed);
                tx.error_message = Some("Transfer carried no value".to_string());
                warn!(wallet_id = %wallet.id, tx_hash = %raw.hash, "Deposit without value recorded as FAILED");
                self.ledger.record(&tx).await.map(|_| Handled::Failed)
            }
        };

        match result {
            // lost a race with another writer for the same hash
            Err(e) if e.is_duplicate() => {
                debug!(wallet_id = %wallet.id, tx_hash = %raw.hash, "Concurrent insert of same hash");
                Ok(Handled::Skipped)
            }
            other => other,
        }
    }
}
