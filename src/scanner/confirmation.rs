//! Confirmation Refresher
//!
//! Deposits first seen before the chain reported them final sit in PENDING
//! without balance effect. Each pass re-queries their confirmation status and
//! credits the ones that became final: PENDING -> CONFIRMED (+credit).
//! A deposit the chain no longer knows (reorganized away) moves to FAILED
//! so it stops holding a slot in the oldest-first batch.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::ScannerConfig;
use crate::chain::{AdapterRegistry, ChainError, with_timeout};
use crate::error::{CustodyError, CustodyResult};
use crate::ledger::BalanceLedger;
use crate::models::{Direction, Transaction};
use crate::settlement::state::TxStatus;
use crate::store::{BalanceOp, StatusChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Became final and was credited
    Credited,
    /// Still waiting. Confirmation count may have moved.
    Waiting { confirmations: i32 },
    /// Someone else moved the row first
    Superseded,
    /// The chain no longer knows the hash. Marked FAILED, never credited.
    Dropped,
}

pub struct ConfirmationRefresher {
    ledger: Arc<BalanceLedger>,
    adapters: Arc<AdapterRegistry>,
    config: ScannerConfig,
}

impl ConfirmationRefresher {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        adapters: Arc<AdapterRegistry>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            ledger,
            adapters,
            config,
        }
    }

    /// PENDING deposits, oldest first
    pub async fn pending_deposits(&self, limit: usize) -> CustodyResult<Vec<Transaction>> {
        Ok(self
            .ledger
            .store()
            .transactions_by_status(Direction::Deposit, TxStatus::Pending, limit)
            .await?)
    }

    pub async fn refresh(&self, tx: &Transaction) -> CustodyResult<RefreshOutcome> {
        let Some(hash) = tx.tx_hash.as_deref() else {
            return Err(CustodyError::Consistency(format!(
                "pending deposit {} has no chain hash",
                tx.id
            )));
        };
        let wallet = self
            .ledger
            .store()
            .get_wallet(tx.wallet_id)
            .await?
            .ok_or(CustodyError::WalletNotFound(tx.wallet_id))?;
        let adapter = self.adapters.get(wallet.network)?;

        let status = match with_timeout(
            self.config.adapter_timeout,
            adapter.confirmation_status(hash),
        )
        .await
        {
            Ok(status) => status,
            Err(ChainError::TxNotFound(_)) => return self.drop_vanished(tx, hash).await,
            Err(e) => return Err(e.into()),
        };

        if !self
            .config
            .is_final(wallet.network, status.confirmations, status.confirmed)
        {
            if status.confirmations != tx.confirmations {
                self.ledger
                    .store()
                    .update_confirmations(tx.id, status.confirmations)
                    .await?;
                debug!(
                    tx_id = %tx.id,
                    tx_hash = %hash,
                    confirmations = status.confirmations,
                    "Deposit confirmations updated"
                );
            }
            return Ok(RefreshOutcome::Waiting {
                confirmations: status.confirmations,
            });
        }

        let change = StatusChange::to(TxStatus::Confirmed)
            .confirmations(status.confirmations)
            .confirmed_now();
        if !self
            .ledger
            .credit_recorded(tx, TxStatus::Pending, &change)
            .await?
        {
            return Ok(RefreshOutcome::Superseded);
        }

        info!(
            tx_id = %tx.id,
            wallet_id = %tx.wallet_id,
            tx_hash = %hash,
            amount = %tx.amount,
            "Deposit confirmed and credited"
        );
        Ok(RefreshOutcome::Credited)
    }

    async fn drop_vanished(&self, tx: &Transaction, hash: &str) -> CustodyResult<RefreshOutcome> {
        let change = StatusChange::to(TxStatus::Failed).error("Transfer no longer known to the chain");
        if !self
            .ledger
            .store()
            .transition(tx.id, TxStatus::Pending, &change, BalanceOp::None)
            .await?
        {
            return Ok(RefreshOutcome::Superseded);
        }
        warn!(
            tx_id = %tx.id,
            wallet_id = %tx.wallet_id,
            tx_hash = %hash,
            amount = %tx.amount,
            "Pending deposit vanished from chain, marked FAILED"
        );
        Ok(RefreshOutcome::Dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimulatedChain;
    use crate::core_types::Network;
    use crate::models::Wallet;
    use crate::scanner::DepositScanner;
    use crate::store::{LedgerStore, MemoryStore};
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_pending_deposit_credited_after_confirmation() {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(SimulatedChain::new(Network::EthereumSepolia).with_required_confirmations(3));
        let wallet = Wallet::new(
            uuid::Uuid::new_v4(),
            Network::EthereumSepolia,
            chain.external_address("w"),
            "k".into(),
            "p".into(),
        );
        store.insert_wallet(&wallet).await.unwrap();

        let mut registry = AdapterRegistry::new();
        registry.register(chain.clone());
        let registry = Arc::new(registry);
        let ledger = Arc::new(BalanceLedger::new(store));
        let scanner = DepositScanner::new(ledger.clone(), registry.clone(), ScannerConfig::default());
        let refresher = ConfirmationRefresher::new(ledger.clone(), registry, ScannerConfig::default());

        let transfer = chain
            .deposit_unconfirmed(&wallet.address, Decimal::from(9))
            .unwrap();
        scanner.scan(wallet.id).await.unwrap();

        let pending = refresher.pending_deposits(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            refresher.refresh(&pending[0]).await.unwrap(),
            RefreshOutcome::Waiting { confirmations: 0 }
        );
        assert_eq!(ledger.current_balance(wallet.id).await.unwrap(), Decimal::ZERO);

        chain.confirm(&transfer.hash).unwrap();
        assert_eq!(
            refresher.refresh(&pending[0]).await.unwrap(),
            RefreshOutcome::Credited
        );
        // stale snapshot of the same row cannot credit twice
        assert_eq!(
            refresher.refresh(&pending[0]).await.unwrap(),
            RefreshOutcome::Superseded
        );

        assert_eq!(ledger.current_balance(wallet.id).await.unwrap(), Decimal::from(9));
        let row = ledger.store().get_transaction(pending[0].id).await.unwrap().unwrap();
        assert_eq!(row.status, TxStatus::Confirmed);
        assert_eq!(row.confirmations, 3);
        assert!(refresher.pending_deposits(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reorganized_deposit_is_failed() {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(SimulatedChain::new(Network::Tron));
        let wallet = Wallet::new(
            uuid::Uuid::new_v4(),
            Network::Tron,
            chain.external_address("w"),
            "k".into(),
            "p".into(),
        );
        store.insert_wallet(&wallet).await.unwrap();

        let mut registry = AdapterRegistry::new();
        registry.register(chain.clone());
        let registry = Arc::new(registry);
        let ledger = Arc::new(BalanceLedger::new(store));
        let scanner = DepositScanner::new(ledger.clone(), registry.clone(), ScannerConfig::default());
        let refresher = ConfirmationRefresher::new(ledger.clone(), registry, ScannerConfig::default());

        let vanished = chain
            .deposit_unconfirmed(&wallet.address, Decimal::from(5))
            .unwrap();
        let kept = chain
            .deposit_unconfirmed(&wallet.address, Decimal::from(2))
            .unwrap();
        scanner.scan(wallet.id).await.unwrap();
        chain.reorg_out(&vanished.hash).unwrap();
        chain.confirm(&kept.hash).unwrap();

        // oldest first: the vanished deposit leads the batch
        let batch = refresher.pending_deposits(1).await.unwrap();
        assert_eq!(batch[0].tx_hash.as_deref(), Some(vanished.hash.as_str()));
        assert_eq!(refresher.refresh(&batch[0]).await.unwrap(), RefreshOutcome::Dropped);

        let row = ledger.store().get_transaction(batch[0].id).await.unwrap().unwrap();
        assert_eq!(row.status, TxStatus::Failed);
        assert!(row.error_message.unwrap().contains("no longer known"));

        // the next batch reaches the deposit behind it
        let batch = refresher.pending_deposits(1).await.unwrap();
        assert_eq!(batch[0].tx_hash.as_deref(), Some(kept.hash.as_str()));
        assert_eq!(refresher.refresh(&batch[0]).await.unwrap(), RefreshOutcome::Credited);
        assert_eq!(ledger.current_balance(wallet.id).await.unwrap(), Decimal::from(2));
        assert!(ledger.audit(wallet.id).await.unwrap().is_consistent());
    }
}
