use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core_types::WalletId;

/// Per-wallet mutex registry
///
/// At most one in-flight balance mutation per wallet. The scanner keeps a
/// separate registry so a wallet is never scanned twice at once.
#[derive(Debug, Default)]
pub struct WalletLocks {
    locks: DashMap<WalletId, Arc<Mutex<()>>>,
}

impl WalletLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, wallet_id: WalletId) -> Arc<Mutex<()>> {
        // the shard guard is dropped before anyone awaits on the mutex
        self.locks.entry(wallet_id).or_default().value().clone()
    }

    pub async fn lock(&self, wallet_id: WalletId) -> OwnedMutexGuard<()> {
        self.slot(wallet_id).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_wallet_serializes() {
        let locks = WalletLocks::new();
        let id = uuid::Uuid::new_v4();

        let guard = locks.lock(id).await;
        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock(id)).await;
        assert!(blocked.is_err());
        drop(guard);
        let free = tokio::time::timeout(Duration::from_millis(50), locks.lock(id)).await;
        assert!(free.is_ok());
    }

    #[tokio::test]
    async fn test_different_wallets_do_not_block() {
        let locks = WalletLocks::new();
        let _a = locks.lock(uuid::Uuid::new_v4()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(uuid::Uuid::new_v4()))
            .await;
        assert!(b.is_ok());
    }
}
