//! Settlement sweep
//!
//! APPROVED -> BROADCASTING is persisted before the adapter is called. Only
//! the writer that wins that CAS broadcasts, so a withdrawal is broadcast at
//! most once no matter how sweeps overlap or crash.
//!
//! Outcome handling:
//! - success: CONFIRMED with the chain hash, balance untouched
//! - explicit rejection: FAILED and the hold released
//! - unknown (timeout, transport error): stays BROADCASTING and is
//!   reconciled against the chain's recent outgoing transfers, paged
//!   backwards to the ambiguity window. `broadcast` is never retried.

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::SettlementConfig;
use super::state::TxStatus;
use crate::chain::{AdapterRegistry, ChainAdapter, RawTransfer, SigningMaterial, with_timeout};
use crate::error::{CustodyError, CustodyResult};
use crate::ledger::BalanceLedger;
use crate::models::{Direction, Transaction, Wallet};
use crate::store::{BalanceOp, StatusChange};
use crate::vault::KeyVault;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Confirmed { tx_hash: String },
    Failed { reason: String },
    /// Broadcast outcome still unknown, left in BROADCASTING
    Unresolved,
    /// Another worker owns this row
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub confirmed: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SettlementReport {
    fn tally(&mut self, result: &CustodyResult<SettleOutcome>) {
        match result {
            Ok(SettleOutcome::Confirmed { .. }) => self.confirmed += 1,
            Ok(SettleOutcome::Failed { .. }) => self.failed += 1,
            Ok(SettleOutcome::Unresolved) => self.unresolved += 1,
            Ok(SettleOutcome::Skipped) => self.skipped += 1,
            Err(_) => self.errors += 1,
        }
    }

    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Settler {
    ledger: Arc<BalanceLedger>,
    adapters: Arc<AdapterRegistry>,
    vault: Arc<dyn KeyVault>,
    config: SettlementConfig,
}

impl Settler {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        adapters: Arc<AdapterRegistry>,
        vault: Arc<dyn KeyVault>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            ledger,
            adapters,
            vault,
            config,
        }
    }

    /// One sweep: reconcile BROADCASTING leftovers, then settle every
    /// APPROVED withdrawal once. Per-row errors are logged, never fatal.
    pub async fn settle_approved_withdrawals(&self) -> CustodyResult<SettlementReport> {
        let mut report = SettlementReport::default();
        let store = self.ledger.store();

        let stuck = store
            .transactions_by_status(
                Direction::Withdrawal,
                TxStatus::Broadcasting,
                self.config.batch_size,
            )
            .await?;
        let results: Vec<_> = stream::iter(stuck)
            .map(|tx| async move { (tx.id, self.reconcile(&tx).await) })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        for (id, result) in &results {
            if let Err(e) = result {
                warn!(tx_id = %id, error = %e, "Reconciliation failed, retrying next sweep");
            }
            report.tally(result);
        }

        let approved = store
            .transactions_by_status(
                Direction::Withdrawal,
                TxStatus::Approved,
                self.config.batch_size,
            )
            .await?;
        let results: Vec<_> = stream::iter(approved)
            .map(|tx| async move { (tx.id, self.settle(&tx).await) })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        for (id, result) in &results {
            if let Err(e) = result {
                error!(tx_id = %id, error = %e, "Settlement failed");
            }
            report.tally(result);
        }

        if !report.is_idle() {
            info!(
                confirmed = report.confirmed,
                failed = report.failed,
                unresolved = report.unresolved,
                errors = report.errors,
                "Settlement sweep finished"
            );
        }
        Ok(report)
    }

    async fn wallet_and_adapter(
        &self,
        tx: &Transaction,
    ) -> CustodyResult<(Wallet, Arc<dyn ChainAdapter>)> {
        let wallet = self
            .ledger
            .store()
            .get_wallet(tx.wallet_id)
            .await?
            .ok_or(CustodyError::WalletNotFound(tx.wallet_id))?;
        let adapter = self.adapters.get(wallet.network)?;
        Ok((wallet, adapter))
    }

    /// Settle one APPROVED withdrawal
    pub async fn settle(&self, tx: &Transaction) -> CustodyResult<SettleOutcome> {
        // lookups first: on error the row stays APPROVED and is retried
        let (wallet, adapter) = self.wallet_and_adapter(tx).await?;

        let claim = StatusChange::to(TxStatus::Broadcasting);
        if !self
            .ledger
            .store()
            .transition(tx.id, TxStatus::Approved, &claim, BalanceOp::None)
            .await?
        {
            debug!(tx_id = %tx.id, "Withdrawal already claimed");
            return Ok(SettleOutcome::Skipped);
        }

        let signer = match self.vault.open(&wallet.encrypted_key) {
            Ok(private_key) => SigningMaterial {
                address: wallet.address.clone(),
                private_key,
            },
            Err(e) => {
                // nothing was sent
                return self
                    .fail(tx, format!("Signing key unavailable: {}", e))
                    .await;
            }
        };

        let sent = with_timeout(
            self.config.adapter_timeout,
            adapter.broadcast(&signer, &tx.to_address, tx.amount, tx.memo.as_deref()),
        )
        .await;

        match sent {
            Ok(tx_hash) => self.confirm(tx, tx_hash, None).await,
            Err(e) if e.is_definitive() => self.fail(tx, format!("Broadcast failed: {}", e)).await,
            Err(e) => {
                warn!(
                    tx_id = %tx.id,
                    error = %e,
                    "Broadcast outcome unknown, reconciling against chain"
                );
                self.reconcile(tx).await
            }
        }
    }

    /// Resolve a BROADCASTING withdrawal by looking for its transfer on chain
    pub async fn reconcile(&self, tx: &Transaction) -> CustodyResult<SettleOutcome> {
        // the caller's copy may predate the claim
        let tx = self
            .ledger
            .store()
            .get_transaction(tx.id)
            .await?
            .ok_or(CustodyError::TransactionNotFound(tx.id))?;
        if tx.status != TxStatus::Broadcasting {
            return Ok(SettleOutcome::Skipped);
        }
        let (wallet, adapter) = self.wallet_and_adapter(&tx).await?;

        let window = chrono::Duration::from_std(self.config.ambiguity_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let since = tx.created_at - window;
        let page_size = self.config.history_page_size.max(1);

        let mut before = None;
        loop {
            let page = with_timeout(
                self.config.adapter_timeout,
                adapter.recent_outgoing(&wallet.address, since, before, page_size),
            )
            .await?;

            if let Some(found) = self.find_unclaimed_match(&tx, &page).await? {
                info!(tx_id = %tx.id, tx_hash = %found.hash, "Matching outgoing transfer found on chain");
                return self.confirm(&tx, found.hash.clone(), Some(found)).await;
            }

            let oldest = page.iter().map(|t| t.logical_time).min();
            match oldest {
                // a short page is the end of the window
                Some(position) if page.len() >= page_size && before != Some(position) => {
                    before = Some(position);
                }
                _ => break,
            }
        }

        let stuck_for = (Utc::now() - tx.updated_at).to_std().unwrap_or_default();
        if stuck_for >= self.config.stale_broadcast {
            return self
                .fail(
                    &tx,
                    format!(
                        "Broadcast outcome unknown and no matching transfer on chain after {}s",
                        stuck_for.as_secs()
                    ),
                )
                .await;
        }

        debug!(tx_id = %tx.id, "No matching transfer yet, leaving BROADCASTING");
        Ok(SettleOutcome::Unresolved)
    }

    /// First outgoing transfer to the same destination for the same amount
    /// whose hash is not already attributed to another row of this wallet.
    /// The receiving side's row, if custodied here, does not count.
    async fn find_unclaimed_match<'a>(
        &self,
        tx: &Transaction,
        sent: &'a [RawTransfer],
    ) -> CustodyResult<Option<&'a RawTransfer>> {
        for candidate in sent {
            if !candidate.to.eq_ignore_ascii_case(&tx.to_address)
                || candidate.amount != Some(tx.amount)
            {
                continue;
            }
            let owner = self
                .ledger
                .store()
                .find_by_hash(tx.wallet_id, &candidate.hash)
                .await?;
            if owner.is_none_or(|row| row.id == tx.id) {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    async fn confirm(
        &self,
        tx: &Transaction,
        tx_hash: String,
        seen: Option<&RawTransfer>,
    ) -> CustodyResult<SettleOutcome> {
        let mut change = StatusChange::to(TxStatus::Confirmed)
            .hash(tx_hash.clone())
            .confirmed_now();
        if let Some(transfer) = seen {
            change = change
                .position(transfer.logical_time)
                .confirmations(transfer.confirmations);
        }

        if !self
            .ledger
            .store()
            .transition(tx.id, TxStatus::Broadcasting, &change, BalanceOp::None)
            .await?
        {
            warn!(tx_id = %tx.id, tx_hash = %tx_hash, "Withdrawal left BROADCASTING before confirm");
            return Ok(SettleOutcome::Skipped);
        }

        info!(
            tx_id = %tx.id,
            tx_hash = %tx_hash,
            amount = %tx.amount,
            to = %tx.to_address,
            "Withdrawal confirmed"
        );
        Ok(SettleOutcome::Confirmed { tx_hash })
    }

    async fn fail(&self, tx: &Transaction, reason: String) -> CustodyResult<SettleOutcome> {
        let change = StatusChange::to(TxStatus::Failed).error(reason.clone());
        if !self
            .ledger
            .release(tx, TxStatus::Broadcasting, &change)
            .await?
        {
            return Ok(SettleOutcome::Skipped);
        }

        warn!(
            tx_id = %tx.id,
            amount = %tx.amount,
            reason = %reason,
            "Withdrawal failed, hold released"
        );
        Ok(SettleOutcome::Failed { reason })
    }
}
