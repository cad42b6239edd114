//! Wallet provisioning and queries
//!
//! One wallet per user and network. Keys are generated by the network's
//! adapter and sealed by the vault before they touch storage.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use crate::chain::{AdapterRegistry, with_timeout};
use crate::core_types::{Network, TransactionId, UserId, WalletId};
use crate::error::{CustodyError, CustodyResult};
use crate::ledger::BalanceLedger;
use crate::models::{Transaction, Wallet};
use crate::vault::KeyVault;

pub struct WalletService {
    ledger: Arc<BalanceLedger>,
    adapters: Arc<AdapterRegistry>,
    vault: Arc<dyn KeyVault>,
    adapter_timeout: std::time::Duration,
}

impl WalletService {
    pub fn new(
        ledger: Arc<BalanceLedger>,
        adapters: Arc<AdapterRegistry>,
        vault: Arc<dyn KeyVault>,
        adapter_timeout: std::time::Duration,
    ) -> Self {
        Self {
            ledger,
            adapters,
            vault,
            adapter_timeout,
        }
    }

    /// New active wallet with zero balance and a genesis scan cursor
    pub async fn provision_wallet(
        &self,
        user_id: UserId,
        network: Network,
    ) -> CustodyResult<Wallet> {
        let store = self.ledger.store();
        if store.find_wallet(user_id, network).await?.is_some() {
            return Err(CustodyError::DuplicateWallet { user_id, network });
        }
        let adapter = self.adapters.get(network)?;

        let keys = with_timeout(self.adapter_timeout, adapter.generate_keypair()).await?;
        let sealed = self.vault.seal(&keys.private_key)?;
        let wallet = Wallet::new(user_id, network, keys.address, sealed, keys.public_key);

        // the unique (user, network) constraint settles concurrent requests
        store.insert_wallet(&wallet).await?;

        info!(
            wallet_id = %wallet.id,
            user_id = %user_id,
            network = %network,
            address = %wallet.address,
            "Wallet provisioned"
        );
        Ok(wallet)
    }

    /// Stop scanning a wallet. Wallets are never deleted.
    pub async fn deactivate_wallet(&self, id: WalletId) -> CustodyResult<()> {
        self.ledger.store().set_wallet_active(id, false).await?;
        info!(wallet_id = %id, "Wallet deactivated");
        Ok(())
    }

    pub async fn wallet(&self, id: WalletId) -> CustodyResult<Wallet> {
        self.ledger
            .store()
            .get_wallet(id)
            .await?
            .ok_or(CustodyError::WalletNotFound(id))
    }

    pub async fn wallet_for(&self, user_id: UserId, network: Network) -> CustodyResult<Wallet> {
        self.ledger
            .store()
            .find_wallet(user_id, network)
            .await?
            .ok_or(CustodyError::NoWalletForUser { user_id, network })
    }

    /// Newest first
    pub async fn wallet_transactions(&self, id: WalletId) -> CustodyResult<Vec<Transaction>> {
        // distinguish "no wallet" from "no history"
        self.wallet(id).await?;
        Ok(self.ledger.store().wallet_transactions(id).await?)
    }

    pub async fn transaction(&self, id: TransactionId) -> CustodyResult<Transaction> {
        self.ledger
            .store()
            .get_transaction(id)
            .await?
            .ok_or(CustodyError::TransactionNotFound(id))
    }

    pub async fn user_transactions(&self, user_id: UserId) -> CustodyResult<Vec<Transaction>> {
        Ok(self.ledger.store().user_transactions(user_id).await?)
    }

    /// Balance the node reports for the wallet address. Reporting only,
    /// the ledger is never adjusted from it.
    pub async fn on_chain_balance(&self, id: WalletId) -> CustodyResult<Decimal> {
        let wallet = self.wallet(id).await?;
        let adapter = self.adapters.get(wallet.network)?;
        Ok(with_timeout(self.adapter_timeout, adapter.balance_of(&wallet.address)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainAdapter, SimulatedChain};
    use crate::store::MemoryStore;
    use crate::vault::AesGcmVault;
    use std::time::Duration;

    fn service() -> (WalletService, Arc<SimulatedChain>, Arc<AesGcmVault>) {
        let chain = Arc::new(SimulatedChain::new(Network::Ton));
        let mut registry = AdapterRegistry::new();
        registry.register(chain.clone());
        let vault = Arc::new(AesGcmVault::ephemeral());
        let ledger = Arc::new(BalanceLedger::new(Arc::new(MemoryStore::new())));
        let service = WalletService::new(
            ledger,
            Arc::new(registry),
            vault.clone(),
            Duration::from_secs(1),
        );
        (service, chain, vault)
    }

    #[tokio::test]
    async fn test_provision_wallet() {
        let (service, chain, vault) = service();
        let user = uuid::Uuid::new_v4();

        let wallet = service.provision_wallet(user, Network::Ton).await.unwrap();
        assert!(wallet.active);
        assert_eq!(wallet.balance, Decimal::ZERO);
        assert!(chain.is_valid_address(&wallet.address));
        // sealed key opens back to a 32-byte hex key
        assert_eq!(vault.open(&wallet.encrypted_key).unwrap().len(), 64);

        let found = service.wallet_for(user, Network::Ton).await.unwrap();
        assert_eq!(found.id, wallet.id);
    }

    #[tokio::test]
    async fn test_one_wallet_per_network() {
        let (service, _, _) = service();
        let user = uuid::Uuid::new_v4();
        service.provision_wallet(user, Network::Ton).await.unwrap();

        let dup = service.provision_wallet(user, Network::Ton).await.unwrap_err();
        assert_eq!(dup.code(), "DUPLICATE_WALLET");

        let unsupported = service.provision_wallet(user, Network::Tron).await.unwrap_err();
        assert_eq!(unsupported.code(), "UNSUPPORTED_NETWORK");
    }

    #[tokio::test]
    async fn test_deactivate_keeps_wallet() {
        let (service, _, _) = service();
        let wallet = service
            .provision_wallet(uuid::Uuid::new_v4(), Network::Ton)
            .await
            .unwrap();

        service.deactivate_wallet(wallet.id).await.unwrap();
        assert!(!service.wallet(wallet.id).await.unwrap().active);
        assert!(service.wallet_transactions(wallet.id).await.unwrap().is_empty());

        let missing = service.deactivate_wallet(uuid::Uuid::new_v4()).await.unwrap_err();
        assert_eq!(missing.code(), "WALLET_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_on_chain_balance_is_read_only() {
        let (service, chain, _) = service();
        let wallet = service
            .provision_wallet(uuid::Uuid::new_v4(), Network::Ton)
            .await
            .unwrap();
        chain.deposit(&wallet.address, Decimal::from(7)).unwrap();

        assert_eq!(service.on_chain_balance(wallet.id).await.unwrap(), Decimal::from(7));
        assert_eq!(service.wallet(wallet.id).await.unwrap().balance, Decimal::ZERO);
    }
}
