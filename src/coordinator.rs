//! Coordinator
//!
//! Periodic task runner with three independent sweeps:
//! deposit scanning over active wallets, withdrawal settlement, and
//! confirmation refresh of PENDING deposits. Work items inside a sweep run
//! concurrently up to `max_concurrency`. A failing wallet or withdrawal is
//! logged and never aborts the sweep for the others.

use futures::StreamExt;
use futures::stream;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core_types::WalletId;
use crate::ledger::BalanceLedger;
use crate::scanner::{ConfirmationRefresher, DepositScanner, RefreshOutcome};
use crate::settlement::{SettlementReport, Settler};

/// Configuration for the periodic sweeps
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub scan_interval: Duration,
    pub settlement_interval: Duration,
    pub confirmation_interval: Duration,
    pub max_concurrency: usize,
    /// PENDING deposits refreshed per sweep
    pub confirmation_batch: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(15),
            settlement_interval: Duration::from_secs(10),
            confirmation_interval: Duration::from_secs(30),
            max_concurrency: 8,
            confirmation_batch: 100,
        }
    }
}

impl From<&SchedulerConfig> for CoordinatorConfig {
    fn from(c: &SchedulerConfig) -> Self {
        Self {
            scan_interval: Duration::from_millis(c.scan_interval_ms),
            settlement_interval: Duration::from_millis(c.settlement_interval_ms),
            confirmation_interval: Duration::from_millis(c.confirmation_interval_ms),
            max_concurrency: c.max_concurrency.max(1),
            confirmation_batch: c.scan_batch_limit,
        }
    }
}

/// Per-item tally of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
}

pub struct Coordinator {
    ledger: Arc<BalanceLedger>,
    scanner: Arc<DepositScanner>,
    refresher: Arc<ConfirmationRefresher>,
    settler: Arc<Settler>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        scanner: Arc<DepositScanner>,
        refresher: Arc<ConfirmationRefresher>,
        settler: Arc<Settler>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            ledger,
            scanner,
            refresher,
            settler,
            config,
        }
    }

    /// Scan every active wallet once
    pub async fn scan_sweep(&self) -> SweepReport {
        let wallets = match self.ledger.store().active_wallets().await {
            Ok(wallets) => wallets,
            Err(e) => {
                error!(error = %e, "Failed to load active wallets");
                return SweepReport::default();
            }
        };

        let processed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        stream::iter(wallets)
            .for_each_concurrent(self.config.max_concurrency, |wallet| {
                let (processed, failed) = (&processed, &failed);
                async move {
                    processed.fetch_add(1, Ordering::Relaxed);
                    match self.scanner.scan(wallet.id).await {
                        Ok(report) if report.recorded() > 0 => self.audit_wallet(wallet.id).await,
                        Ok(_) => {}
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                wallet_id = %wallet.id,
                                network = %wallet.network,
                                code = e.code(),
                                error = %e,
                                "Wallet scan failed, retrying next cycle"
                            );
                        }
                    }
                }
            })
            .await;

        let report = SweepReport {
            processed: processed.into_inner(),
            failed: failed.into_inner(),
        };
        debug!(wallets = report.processed, failed = report.failed, "Scan sweep done");
        report
    }

    /// Settle APPROVED withdrawals (and reconcile BROADCASTING ones) once
    pub async fn settlement_sweep(&self) -> SettlementReport {
        match self.settler.settle_approved_withdrawals().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Settlement sweep failed");
                SettlementReport::default()
            }
        }
    }

    /// Re-check PENDING deposits once
    pub async fn confirmation_sweep(&self) -> SweepReport {
        let pending = match self
            .refresher
            .pending_deposits(self.config.confirmation_batch)
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to load pending deposits");
                return SweepReport::default();
            }
        };

        let processed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        stream::iter(pending)
            .for_each_concurrent(self.config.max_concurrency, |tx| {
                let (processed, failed) = (&processed, &failed);
                async move {
                    processed.fetch_add(1, Ordering::Relaxed);
                    match self.refresher.refresh(&tx).await {
                        Ok(RefreshOutcome::Credited) => self.audit_wallet(tx.wallet_id).await,
                        Ok(_) => {}
                        Err(e) => {
                            failed.fetch_add(1, Ordering::Relaxed);
                            warn!(tx_id = %tx.id, error = %e, "Confirmation refresh failed");
                        }
                    }
                }
            })
            .await;

        SweepReport {
            processed: processed.into_inner(),
            failed: failed.into_inner(),
        }
    }

    /// Log any drift between the stored balance and the transaction rows
    pub async fn audit_wallet(&self, wallet_id: WalletId) {
        match self.ledger.audit(wallet_id).await {
            Ok(audit) if !audit.is_consistent() => {
                error!(
                    wallet_id = %wallet_id,
                    recorded = %audit.recorded,
                    expected = %audit.expected(),
                    drift = %audit.drift(),
                    "Balance invariant violated"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(wallet_id = %wallet_id, error = %e, "Balance audit failed"),
        }
    }

    /// Start the three sweep loops. They stop when `shutdown` flips to true
    /// or its sender is dropped.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            settlement_interval_ms = self.config.settlement_interval.as_millis() as u64,
            confirmation_interval_ms = self.config.confirmation_interval.as_millis() as u64,
            max_concurrency = self.config.max_concurrency,
            "Starting coordinator"
        );

        let scan = {
            let me = self.clone();
            tokio::spawn(periodic(
                "scan",
                self.config.scan_interval,
                shutdown.clone(),
                move || {
                    let me = me.clone();
                    async move {
                        me.scan_sweep().await;
                    }
                },
            ))
        };
        let settle = {
            let me = self.clone();
            tokio::spawn(periodic(
                "settlement",
                self.config.settlement_interval,
                shutdown.clone(),
                move || {
                    let me = me.clone();
                    async move {
                        me.settlement_sweep().await;
                    }
                },
            ))
        };
        let confirm = {
            let me = self.clone();
            tokio::spawn(periodic(
                "confirmation",
                self.config.confirmation_interval,
                shutdown,
                move || {
                    let me = me.clone();
                    async move {
                        me.confirmation_sweep().await;
                    }
                },
            ))
        };

        vec![scan, settle, confirm]
    }
}

/// Run `sweep` every `period` until shutdown. A sweep is never started
/// while the previous one of the same kind is still running.
async fn periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    sweep: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!(sweep = name, "Sweep loop stopped");
}
