//! Withdrawal requests
//!
//! Create places the hold (debit-on-create) so concurrent requests can never
//! overdraw a wallet. Approve is a separate explicit step that must repeat
//! the recorded destination and amount.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

use super::state::TxStatus;
use crate::chain::AdapterRegistry;
use crate::core_types::{Network, TransactionId, UserId, WalletId};
use crate::error::{CustodyError, CustodyResult, ValidationError};
use crate::ledger::BalanceLedger;
use crate::models::Transaction;
use crate::store::{BalanceOp, StatusChange};

pub struct WithdrawalService {
    ledger: Arc<BalanceLedger>,
    adapters: Arc<AdapterRegistry>,
}

impl WithdrawalService {
    pub fn new(ledger: Arc<BalanceLedger>, adapters: Arc<AdapterRegistry>) -> Self {
        Self { ledger, adapters }
    }

    /// PENDING withdrawal with the amount held from the wallet balance
    pub async fn create_withdrawal(
        &self,
        wallet_id: WalletId,
        to_address: &str,
        amount: Decimal,
        memo: Option<String>,
    ) -> CustodyResult<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount.into());
        }
        let wallet = self
            .ledger
            .store()
            .get_wallet(wallet_id)
            .await?
            .ok_or(CustodyError::WalletNotFound(wallet_id))?;
        if !wallet.active {
            return Err(ValidationError::WalletInactive(wallet_id).into());
        }
        let adapter = self.adapters.get(wallet.network)?;
        // a send to itself would carry one hash twice in the same wallet
        if !adapter.is_valid_address(to_address) || wallet.owns_address(to_address) {
            return Err(ValidationError::InvalidAddress(to_address.to_string()).into());
        }

        let tx = Transaction::withdrawal(&wallet, to_address, amount, memo);
        let balance = self.ledger.hold_and_debit(&tx).await?;

        info!(
            tx_id = %tx.id,
            wallet_id = %wallet.id,
            network = %wallet.network,
            to = %to_address,
            amount = %amount,
            balance = %balance,
            "Withdrawal created, funds held"
        );
        Ok(tx)
    }

    /// `create_withdrawal` addressed by owner and network
    pub async fn create_withdrawal_for(
        &self,
        user_id: UserId,
        network: Network,
        to_address: &str,
        amount: Decimal,
        memo: Option<String>,
    ) -> CustodyResult<Transaction> {
        let wallet = self
            .ledger
            .store()
            .find_wallet(user_id, network)
            .await?
            .ok_or(CustodyError::NoWalletForUser { user_id, network })?;
        self.create_withdrawal(wallet.id, to_address, amount, memo)
            .await
    }

    /// PENDING -> APPROVED. Destination and amount must match the request.
    pub async fn approve_withdrawal(
        &self,
        id: TransactionId,
        to_address: &str,
        amount: Decimal,
    ) -> CustodyResult<Transaction> {
        let tx = self.load_withdrawal(id).await?;
        if tx.status != TxStatus::Pending {
            return Err(invalid_state(&tx, "approve"));
        }
        if tx.amount != amount || !tx.to_address.eq_ignore_ascii_case(to_address) {
            return Err(ValidationError::ApprovalMismatch.into());
        }

        let change = StatusChange::to(TxStatus::Approved);
        if !self
            .ledger
            .store()
            .transition(id, TxStatus::Pending, &change, BalanceOp::None)
            .await?
        {
            return Err(self.lost_race(id, "approve").await);
        }

        info!(tx_id = %id, amount = %amount, "Withdrawal approved");
        self.load_withdrawal(id).await
    }

    /// PENDING -> CANCELLED, hold released
    pub async fn cancel_withdrawal(&self, id: TransactionId) -> CustodyResult<Transaction> {
        let tx = self.load_withdrawal(id).await?;
        if tx.status != TxStatus::Pending {
            return Err(invalid_state(&tx, "cancel"));
        }

        let change = StatusChange::to(TxStatus::Cancelled);
        if !self.ledger.release(&tx, TxStatus::Pending, &change).await? {
            return Err(self.lost_race(id, "cancel").await);
        }

        info!(tx_id = %id, amount = %tx.amount, "Withdrawal cancelled, hold released");
        self.load_withdrawal(id).await
    }

    /// PENDING | APPROVED -> REJECTED, hold released
    pub async fn reject_withdrawal(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> CustodyResult<Transaction> {
        let tx = self.load_withdrawal(id).await?;
        if !matches!(tx.status, TxStatus::Pending | TxStatus::Approved) {
            return Err(invalid_state(&tx, "reject"));
        }

        let change = StatusChange::to(TxStatus::Rejected).error(reason);
        if !self.ledger.release(&tx, tx.status, &change).await? {
            return Err(self.lost_race(id, "reject").await);
        }

        info!(tx_id = %id, reason = %reason, "Withdrawal rejected, hold released");
        self.load_withdrawal(id).await
    }

    async fn load_withdrawal(&self, id: TransactionId) -> CustodyResult<Transaction> {
        let tx = self
            .ledger
            .store()
            .get_transaction(id)
            .await?
            .ok_or(CustodyError::TransactionNotFound(id))?;
        if !tx.is_withdrawal() {
            return Err(ValidationError::NotAWithdrawal(id).into());
        }
        Ok(tx)
    }

    /// CAS lost: report whatever state the winner left behind
    async fn lost_race(&self, id: TransactionId, action: &'static str) -> CustodyError {
        match self.load_withdrawal(id).await {
            Ok(current) => invalid_state(&current, action),
            Err(e) => e,
        }
    }
}

fn invalid_state(tx: &Transaction, action: &'static str) -> CustodyError {
    ValidationError::InvalidState {
        id: tx.id,
        status: tx.status,
        action,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::SimulatedChain;
    use crate::models::{Direction, Wallet};
    use crate::store::{LedgerStore, MemoryStore};

    struct Fixture {
        service: WithdrawalService,
        ledger: Arc<BalanceLedger>,
        chain: Arc<SimulatedChain>,
        wallet: Wallet,
    }

    async fn fixture(balance: i64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let chain = Arc::new(SimulatedChain::new(Network::Tron));
        let wallet = Wallet::new(
            uuid::Uuid::new_v4(),
            Network::Tron,
            chain.external_address("custody"),
            "k".into(),
            "p".into(),
        );
        store.insert_wallet(&wallet).await.unwrap();

        let ledger = Arc::new(BalanceLedger::new(store));
        if balance > 0 {
            let mut seed = Transaction::withdrawal(&wallet, &wallet.address, Decimal::from(balance), None);
            seed.direction = Direction::Deposit;
            seed.status = TxStatus::Confirmed;
            seed.tx_hash = Some("seed".into());
            ledger.credit(&seed).await.unwrap();
        }

        let mut registry = AdapterRegistry::new();
        registry.register(chain.clone());
        Fixture {
            service: WithdrawalService::new(ledger.clone(), Arc::new(registry)),
            ledger,
            chain,
            wallet,
        }
    }

    #[tokio::test]
    async fn test_create_holds_funds() {
        let f = fixture(100).await;
        let dest = f.chain.external_address("X");

        let tx = f
            .service
            .create_withdrawal(f.wallet.id, &dest, Decimal::from(30), None)
            .await
            .unwrap();

        assert_eq!(tx.status, TxStatus::Pending);
        assert_eq!(
            f.ledger.current_balance(f.wallet.id).await.unwrap(),
            Decimal::from(70)
        );
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = fixture(10).await;
        let dest = f.chain.external_address("X");

        let err = f
            .service
            .create_withdrawal(f.wallet.id, &dest, Decimal::from(11), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");

        let err = f
            .service
            .create_withdrawal(f.wallet.id, "not-an-address", Decimal::ONE, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ADDRESS");

        let err = f
            .service
            .create_withdrawal(f.wallet.id, &f.wallet.address, Decimal::ONE, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ADDRESS");

        let err = f
            .service
            .create_withdrawal(f.wallet.id, &dest, Decimal::ZERO, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");

        // nothing was held
        assert_eq!(
            f.ledger.current_balance(f.wallet.id).await.unwrap(),
            Decimal::from(10)
        );
    }

    #[tokio::test]
    async fn test_create_by_owner_and_network() {
        let f = fixture(50).await;
        let dest = f.chain.external_address("X");

        let tx = f
            .service
            .create_withdrawal_for(f.wallet.user_id, Network::Tron, &dest, Decimal::from(20), None)
            .await
            .unwrap();
        assert_eq!(tx.wallet_id, f.wallet.id);
        assert_eq!(
            f.ledger.current_balance(f.wallet.id).await.unwrap(),
            Decimal::from(30)
        );

        let err = f
            .service
            .create_withdrawal_for(f.wallet.user_id, Network::Ton, &dest, Decimal::ONE, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CustodyError::NoWalletForUser { .. }));
        assert_eq!(err.code(), "WALLET_NOT_FOUND");

        let err = f
            .service
            .create_withdrawal_for(uuid::Uuid::new_v4(), Network::Tron, &dest, Decimal::ONE, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WALLET_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_inactive_wallet_cannot_withdraw() {
        let f = fixture(10).await;
        f.ledger
            .store()
            .set_wallet_active(f.wallet.id, false)
            .await
            .unwrap();

        let dest = f.chain.external_address("X");
        let err = f
            .service
            .create_withdrawal(f.wallet.id, &dest, Decimal::ONE, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "WALLET_INACTIVE");
    }

    #[tokio::test]
    async fn test_approve_requires_exact_match() {
        let f = fixture(100).await;
        let dest = f.chain.external_address("X");
        let other = f.chain.external_address("Y");
        let tx = f
            .service
            .create_withdrawal(f.wallet.id, &dest, Decimal::from(30), None)
            .await
            .unwrap();

        let wrong_amount = f
            .service
            .approve_withdrawal(tx.id, &dest, Decimal::from(31))
            .await
            .unwrap_err();
        assert_eq!(wrong_amount.code(), "APPROVAL_MISMATCH");

        let wrong_address = f
            .service
            .approve_withdrawal(tx.id, &other, Decimal::from(30))
            .await
            .unwrap_err();
        assert_eq!(wrong_address.code(), "APPROVAL_MISMATCH");

        let row = f.ledger.store().get_transaction(tx.id).await.unwrap().unwrap();
        assert_eq!(row.status, TxStatus::Pending);

        let approved = f
            .service
            .approve_withdrawal(tx.id, &dest.to_uppercase(), Decimal::from(30))
            .await
            .unwrap();
        assert_eq!(approved.status, TxStatus::Approved);

        // second approval is a state error, not a silent success
        let again = f
            .service
            .approve_withdrawal(tx.id, &dest, Decimal::from(30))
            .await
            .unwrap_err();
        assert_eq!(again.code(), "INVALID_STATE_TRANSITION");
    }

    #[tokio::test]
    async fn test_cancel_and_reject_release() {
        let f = fixture(100).await;
        let dest = f.chain.external_address("X");

        let a = f
            .service
            .create_withdrawal(f.wallet.id, &dest, Decimal::from(30), None)
            .await
            .unwrap();
        let b = f
            .service
            .create_withdrawal(f.wallet.id, &dest, Decimal::from(20), Some("rent".into()))
            .await
            .unwrap();
        assert_eq!(
            f.ledger.current_balance(f.wallet.id).await.unwrap(),
            Decimal::from(50)
        );

        let cancelled = f.service.cancel_withdrawal(a.id).await.unwrap();
        assert_eq!(cancelled.status, TxStatus::Cancelled);

        f.service
            .approve_withdrawal(b.id, &dest, Decimal::from(20))
            .await
            .unwrap();
        let rejected = f
            .service
            .reject_withdrawal(b.id, "compliance hold")
            .await
            .unwrap();
        assert_eq!(rejected.status, TxStatus::Rejected);
        assert_eq!(rejected.error_message.as_deref(), Some("compliance hold"));

        assert_eq!(
            f.ledger.current_balance(f.wallet.id).await.unwrap(),
            Decimal::from(100)
        );

        // terminal rows stay terminal
        let err = f.service.cancel_withdrawal(b.id).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
        assert!(f.ledger.audit(f.wallet.id).await.unwrap().is_consistent());
    }

    #[tokio::test]
    async fn test_deposit_rows_are_not_withdrawals() {
        let f = fixture(5).await;
        let deposit = f.ledger.store().wallet_transactions(f.wallet.id).await.unwrap();
        let err = f.service.cancel_withdrawal(deposit[0].id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_A_WITHDRAWAL");

        let err = f
            .service
            .cancel_withdrawal(uuid::Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSACTION_NOT_FOUND");
    }
}
