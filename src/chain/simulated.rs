//! In-memory chain
//!
//! A programmable adapter for any network: deposits and confirmations are
//! pushed by the caller, broadcast outcomes can be scripted, listing and
//! history failures injected, and transfers reorganized away. Addresses are derived deterministically from md5 so
//! they look like the real network's format.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::adapter::{
    ChainAdapter, ChainError, ConfirmationStatus, KeyPair, RawTransfer, SigningMaterial,
};
use crate::core_types::Network;
use crate::models::ScanCursor;

/// Scripted result of the next `broadcast` call
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastOutcome {
    /// Lands on chain and returns the hash
    Accept,
    /// Refused by the node, nothing sent
    Reject(String),
    /// Never answers. `landed` decides whether the transfer reached the chain.
    Stall { landed: bool },
    /// Connection drops after sending. `landed` as above.
    Drop { landed: bool },
}

#[derive(Debug, Default)]
struct ChainState {
    height: i64,
    transfers: Vec<RawTransfer>,
    balances: HashMap<String, Decimal>,
    outcomes: VecDeque<BroadcastOutcome>,
    listings: VecDeque<Result<Vec<RawTransfer>, ChainError>>,
    outgoing_failures: VecDeque<ChainError>,
    broadcasts: usize,
}

#[derive(Debug)]
pub struct SimulatedChain {
    network: Network,
    /// Confirmations reported for a transfer once it is final
    required_confirmations: i32,
    seed: AtomicU64,
    state: Mutex<ChainState>,
}

const STALL: Duration = Duration::from_secs(3600);

impl SimulatedChain {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            required_confirmations: 1,
            seed: AtomicU64::new(0),
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn with_required_confirmations(mut self, confirmations: i32) -> Self {
        self.required_confirmations = confirmations;
        self
    }

    fn state(&self) -> Result<std::sync::MutexGuard<'_, ChainState>, ChainError> {
        self.state
            .lock()
            .map_err(|_| ChainError::Network("simulated node poisoned".to_string()))
    }

    fn derive_hex(seed: &str, len: usize) -> String {
        let mut out = String::with_capacity(len + 32);
        let mut round = 0u32;
        while out.len() < len {
            out.push_str(&format!("{:x}", md5::compute(format!("{}:{}", seed, round))));
            round += 1;
        }
        out.truncate(len);
        out
    }

    fn derive_address(&self, seed: &str) -> String {
        match self.network {
            Network::EthereumSepolia => format!("0x{}", Self::derive_hex(seed, 40)),
            Network::Tron => format!("T{}", Self::derive_hex(seed, 33)),
            Network::Ton => format!("EQ{}", Self::derive_hex(seed, 46)),
        }
    }

    fn next_hash(&self) -> String {
        let n = self.seed.fetch_add(1, Ordering::Relaxed);
        let body = Self::derive_hex(&format!("{}-tx-{}", self.network, n), 64);
        match self.network {
            Network::EthereumSepolia => format!("0x{}", body),
            _ => body,
        }
    }

    /// Address for an external counterparty, valid for this network
    pub fn external_address(&self, label: &str) -> String {
        self.derive_address(&format!("external-{}", label))
    }

    fn push_transfer(
        &self,
        state: &mut ChainState,
        from: Option<String>,
        to: &str,
        amount: Option<Decimal>,
        confirmed: bool,
        memo: Option<String>,
    ) -> RawTransfer {
        state.height += 1;
        let transfer = RawTransfer {
            hash: self.next_hash(),
            from: from.clone(),
            to: to.to_string(),
            amount,
            fee: None,
            logical_time: state.height,
            confirmations: if confirmed {
                self.required_confirmations
            } else {
                0
            },
            confirmed,
            memo,
            timestamp: Utc::now(),
        };
        if let Some(value) = amount {
            *state.balances.entry(to.to_lowercase()).or_default() += value;
            if let Some(sender) = from {
                *state.balances.entry(sender.to_lowercase()).or_default() -= value;
            }
        }
        state.transfers.push(transfer.clone());
        transfer
    }

    /// Final incoming transfer from an external address
    pub fn deposit(&self, to: &str, amount: Decimal) -> Result<RawTransfer, ChainError> {
        let from = self.external_address("faucet");
        let mut state = self.state()?;
        Ok(self.push_transfer(&mut state, Some(from), to, Some(amount), true, None))
    }

    /// Incoming transfer the node does not yet report as final
    pub fn deposit_unconfirmed(
        &self,
        to: &str,
        amount: Decimal,
    ) -> Result<RawTransfer, ChainError> {
        let from = self.external_address("faucet");
        let mut state = self.state()?;
        Ok(self.push_transfer(&mut state, Some(from), to, Some(amount), false, None))
    }

    /// Incoming message that carried no value
    pub fn deposit_without_value(&self, to: &str) -> Result<RawTransfer, ChainError> {
        let from = self.external_address("faucet");
        let mut state = self.state()?;
        Ok(self.push_transfer(&mut state, Some(from), to, None, true, None))
    }

    /// Mark a transfer final
    pub fn confirm(&self, tx_hash: &str) -> Result<(), ChainError> {
        let required = self.required_confirmations;
        let mut state = self.state()?;
        let transfer = state
            .transfers
            .iter_mut()
            .find(|t| t.hash == tx_hash)
            .ok_or_else(|| ChainError::TxNotFound(tx_hash.to_string()))?;
        transfer.confirmed = true;
        transfer.confirmations = required;
        Ok(())
    }

    /// Queue the result of the next `broadcast`. Unscripted calls accept.
    pub fn script_broadcast(&self, outcome: BroadcastOutcome) -> Result<(), ChainError> {
        self.state()?.outcomes.push_back(outcome);
        Ok(())
    }

    /// Queue a verbatim `list_transactions_since` response
    pub fn script_listing(
        &self,
        response: Result<Vec<RawTransfer>, ChainError>,
    ) -> Result<(), ChainError> {
        self.state()?.listings.push_back(response);
        Ok(())
    }

    /// Fail the next `recent_outgoing` call with `error`
    pub fn script_outgoing_failure(&self, error: ChainError) -> Result<(), ChainError> {
        self.state()?.outgoing_failures.push_back(error);
        Ok(())
    }

    /// Drop a transfer from the chain as a reorg would, undoing its balance
    /// effect. Later lookups of the hash report `TxNotFound`.
    pub fn reorg_out(&self, tx_hash: &str) -> Result<RawTransfer, ChainError> {
        let mut state = self.state()?;
        let index = state
            .transfers
            .iter()
            .position(|t| t.hash == tx_hash)
            .ok_or_else(|| ChainError::TxNotFound(tx_hash.to_string()))?;
        let removed = state.transfers.remove(index);
        if let Some(value) = removed.amount {
            *state.balances.entry(removed.to.to_lowercase()).or_default() -= value;
            if let Some(sender) = &removed.from {
                *state.balances.entry(sender.to_lowercase()).or_default() += value;
            }
        }
        Ok(removed)
    }

    pub fn broadcast_count(&self) -> usize {
        self.state().map(|s| s.broadcasts).unwrap_or_default()
    }

    /// Outgoing transfers recorded on chain from `address`
    pub fn sent_from(&self, address: &str) -> Vec<RawTransfer> {
        self.state()
            .map(|s| {
                s.transfers
                    .iter()
                    .filter(|t| {
                        t.from
                            .as_deref()
                            .is_some_and(|f| f.eq_ignore_ascii_case(address))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChainAdapter for SimulatedChain {
    fn network(&self) -> Network {
        self.network
    }

    async fn generate_keypair(&self) -> Result<KeyPair, ChainError> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let private_key = hex::encode(secret);
        let public_key = format!("{:x}", md5::compute(&private_key));
        Ok(KeyPair {
            address: self.derive_address(&public_key),
            public_key,
            private_key,
        })
    }

    async fn balance_of(&self, address: &str) -> Result<Decimal, ChainError> {
        if !self.is_valid_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let state = self.state()?;
        Ok(state
            .balances
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or_default())
    }

    fn is_valid_address(&self, address: &str) -> bool {
        let (prefix_ok, body, len) = match self.network {
            Network::EthereumSepolia => (address.starts_with("0x"), address.get(2..), 40),
            Network::Tron => (address.starts_with('T'), address.get(1..), 33),
            Network::Ton => (
                address.starts_with("EQ") || address.starts_with("UQ"),
                address.get(2..),
                46,
            ),
        };
        prefix_ok
            && body.is_some_and(|b| b.len() == len && b.chars().all(|c| c.is_ascii_alphanumeric()))
    }

    async fn list_transactions_since(
        &self,
        address: &str,
        cursor: &ScanCursor,
        limit: usize,
    ) -> Result<Vec<RawTransfer>, ChainError> {
        let mut state = self.state()?;
        if let Some(scripted) = state.listings.pop_front() {
            return scripted;
        }
        let mut batch: Vec<RawTransfer> = state
            .transfers
            .iter()
            .filter(|t| t.logical_time > cursor.logical_time)
            .filter(|t| {
                t.to.eq_ignore_ascii_case(address)
                    || t.from
                        .as_deref()
                        .is_some_and(|f| f.eq_ignore_ascii_case(address))
            })
            .cloned()
            .collect();
        batch.sort_by_key(|t| t.logical_time);
        batch.truncate(limit);
        Ok(batch)
    }

    async fn broadcast(
        &self,
        signer: &SigningMaterial,
        to: &str,
        amount: Decimal,
        memo: Option<&str>,
    ) -> Result<String, ChainError> {
        let outcome = {
            let mut state = self.state()?;
            state.broadcasts += 1;
            let outcome = state
                .outcomes
                .pop_front()
                .unwrap_or(BroadcastOutcome::Accept);

            if let BroadcastOutcome::Reject(reason) = &outcome {
                return Err(ChainError::Rejected(reason.clone()));
            }
            if !self.is_valid_address(to) {
                return Err(ChainError::InvalidAddress(to.to_string()));
            }
            let available = state
                .balances
                .get(&signer.address.to_lowercase())
                .copied()
                .unwrap_or_default();
            if available < amount {
                return Err(ChainError::InsufficientFunds);
            }

            let lands = match &outcome {
                BroadcastOutcome::Accept => true,
                BroadcastOutcome::Stall { landed } | BroadcastOutcome::Drop { landed } => *landed,
                BroadcastOutcome::Reject(_) => false,
            };
            let hash = if lands {
                let sent = self.push_transfer(
                    &mut state,
                    Some(signer.address.clone()),
                    to,
                    Some(amount),
                    true,
                    memo.map(str::to_string),
                );
                Some(sent.hash)
            } else {
                None
            };
            (outcome, hash)
        };

        match outcome {
            (BroadcastOutcome::Stall { .. }, _) => {
                tokio::time::sleep(STALL).await;
                Err(ChainError::Timeout(STALL))
            }
            (BroadcastOutcome::Drop { .. }, _) => {
                Err(ChainError::Network("connection reset by peer".to_string()))
            }
            (_, Some(hash)) => Ok(hash),
            (_, None) => Err(ChainError::Network("transfer not accepted".to_string())),
        }
    }

    async fn confirmation_status(&self, tx_hash: &str) -> Result<ConfirmationStatus, ChainError> {
        let state = self.state()?;
        state
            .transfers
            .iter()
            .find(|t| t.hash == tx_hash)
            .map(|t| ConfirmationStatus {
                confirmations: t.confirmations,
                confirmed: t.confirmed,
            })
            .ok_or_else(|| ChainError::TxNotFound(tx_hash.to_string()))
    }

    async fn recent_outgoing(
        &self,
        from: &str,
        since: DateTime<Utc>,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RawTransfer>, ChainError> {
        let mut state = self.state()?;
        if let Some(error) = state.outgoing_failures.pop_front() {
            return Err(error);
        }
        let mut sent: Vec<RawTransfer> = state
            .transfers
            .iter()
            .filter(|t| t.timestamp >= since)
            .filter(|t| before.is_none_or(|b| t.logical_time < b))
            .filter(|t| {
                t.from
                    .as_deref()
                    .is_some_and(|f| f.eq_ignore_ascii_case(from))
            })
            .cloned()
            .collect();
        sent.sort_by_key(|t| std::cmp::Reverse(t.logical_time));
        sent.truncate(limit);
        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generated_addresses_are_valid() {
        for network in Network::all() {
            let chain = SimulatedChain::new(network);
            let keys = chain.generate_keypair().await.unwrap();
            assert!(chain.is_valid_address(&keys.address), "{}", keys.address);
            assert!(chain.is_valid_address(&chain.external_address("x")));
        }
    }

    #[test]
    fn test_address_validation() {
        let eth = SimulatedChain::new(Network::EthereumSepolia);
        assert!(!eth.is_valid_address("0x1234"));
        assert!(!eth.is_valid_address("T0000000000000000000000000000000000"));

        let tron = SimulatedChain::new(Network::Tron);
        assert!(!tron.is_valid_address("0xabc"));
        assert!(!tron.is_valid_address(""));
    }

    #[tokio::test]
    async fn test_listing_respects_cursor_and_limit() {
        let chain = SimulatedChain::new(Network::Ton);
        let addr = chain.external_address("wallet");
        for _ in 0..5 {
            chain.deposit(&addr, Decimal::ONE).unwrap();
        }

        let batch = chain
            .list_transactions_since(&addr, &ScanCursor::new(2, "x"), 2)
            .await
            .unwrap();
        let positions: Vec<_> = batch.iter().map(|t| t.logical_time).collect();
        assert_eq!(positions, vec![3, 4]);
        assert_eq!(chain.balance_of(&addr).await.unwrap(), Decimal::from(5));
    }

    #[tokio::test]
    async fn test_broadcast_requires_funds() {
        let chain = SimulatedChain::new(Network::Tron);
        let keys = chain.generate_keypair().await.unwrap();
        let signer = SigningMaterial {
            address: keys.address.clone(),
            private_key: keys.private_key,
        };
        let dest = chain.external_address("dest");

        let err = chain
            .broadcast(&signer, &dest, Decimal::ONE, None)
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::InsufficientFunds);

        chain.deposit(&keys.address, Decimal::from(2)).unwrap();
        let hash = chain
            .broadcast(&signer, &dest, Decimal::ONE, Some("memo"))
            .await
            .unwrap();
        assert_eq!(chain.sent_from(&keys.address)[0].hash, hash);
        assert_eq!(chain.broadcast_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_broadcast_can_still_land() {
        let chain = SimulatedChain::new(Network::Ton);
        let keys = chain.generate_keypair().await.unwrap();
        chain.deposit(&keys.address, Decimal::from(10)).unwrap();
        chain
            .script_broadcast(BroadcastOutcome::Drop { landed: true })
            .unwrap();

        let signer = SigningMaterial {
            address: keys.address.clone(),
            private_key: keys.private_key,
        };
        let dest = chain.external_address("dest");
        let err = chain
            .broadcast(&signer, &dest, Decimal::from(4), None)
            .await
            .unwrap_err();
        assert!(!err.is_definitive());

        let since = Utc::now() - chrono::Duration::minutes(1);
        let sent = chain
            .recent_outgoing(&keys.address, since, None, 10)
            .await
            .unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].amount, Some(Decimal::from(4)));
    }

    #[tokio::test]
    async fn test_outgoing_history_pages_backwards() {
        let chain = SimulatedChain::new(Network::Tron);
        let keys = chain.generate_keypair().await.unwrap();
        chain.deposit(&keys.address, Decimal::from(10)).unwrap();
        let signer = SigningMaterial {
            address: keys.address.clone(),
            private_key: keys.private_key,
        };
        let dest = chain.external_address("dest");
        for _ in 0..5 {
            chain
                .broadcast(&signer, &dest, Decimal::ONE, None)
                .await
                .unwrap();
        }
        let since = Utc::now() - chrono::Duration::minutes(1);

        let first = chain
            .recent_outgoing(&keys.address, since, None, 2)
            .await
            .unwrap();
        let positions: Vec<_> = first.iter().map(|t| t.logical_time).collect();
        assert_eq!(positions, vec![6, 5]);

        let second = chain
            .recent_outgoing(&keys.address, since, Some(5), 10)
            .await
            .unwrap();
        let positions: Vec<_> = second.iter().map(|t| t.logical_time).collect();
        assert_eq!(positions, vec![4, 3, 2]);

        chain
            .script_outgoing_failure(ChainError::Network("rpc down".into()))
            .unwrap();
        assert!(
            chain
                .recent_outgoing(&keys.address, since, None, 2)
                .await
                .is_err()
        );
        assert_eq!(
            chain
                .recent_outgoing(&keys.address, since, None, 2)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_reorg_removes_transfer() {
        let chain = SimulatedChain::new(Network::Ton);
        let addr = chain.external_address("w");
        let tx = chain.deposit_unconfirmed(&addr, Decimal::from(3)).unwrap();

        chain.reorg_out(&tx.hash).unwrap();
        assert!(matches!(
            chain.confirmation_status(&tx.hash).await,
            Err(ChainError::TxNotFound(_))
        ));
        assert_eq!(chain.balance_of(&addr).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_confirmation_status() {
        let chain = SimulatedChain::new(Network::EthereumSepolia).with_required_confirmations(12);
        let addr = chain.external_address("w");
        let tx = chain.deposit_unconfirmed(&addr, Decimal::ONE).unwrap();

        let status = chain.confirmation_status(&tx.hash).await.unwrap();
        assert!(!status.confirmed);

        chain.confirm(&tx.hash).unwrap();
        let status = chain.confirmation_status(&tx.hash).await.unwrap();
        assert!(status.confirmed);
        assert_eq!(status.confirmations, 12);

        assert!(matches!(
            chain.confirmation_status("missing").await,
            Err(ChainError::TxNotFound(_))
        ));
    }
}
