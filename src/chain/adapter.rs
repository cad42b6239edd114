use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::core_types::Network;
use crate::models::ScanCursor;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChainError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Adapter call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Rejected by chain: {0}")]
    Rejected(String),

    #[error("Insufficient on-chain funds")]
    InsufficientFunds,

    #[error("Transaction not found: {0}")]
    TxNotFound(String),

    #[error("Malformed node response: {0}")]
    Parse(String),
}

impl ChainError {
    /// The chain explicitly refused the request, so nothing was sent.
    ///
    /// Everything else (timeouts, transport and parse failures) leaves the
    /// outcome of a broadcast unknown.
    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidAddress(_) | ChainError::Rejected(_) | ChainError::InsufficientFunds
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChainError::Network(_) => "CHAIN_NETWORK_ERROR",
            ChainError::Timeout(_) => "CHAIN_TIMEOUT",
            ChainError::InvalidAddress(_) => "INVALID_ADDRESS",
            ChainError::Rejected(_) => "CHAIN_REJECTED",
            ChainError::InsufficientFunds => "CHAIN_INSUFFICIENT_FUNDS",
            ChainError::TxNotFound(_) => "CHAIN_TX_NOT_FOUND",
            ChainError::Parse(_) => "CHAIN_PARSE_ERROR",
        }
    }
}

/// Freshly generated keypair. The private key leaves this struct only
/// through the vault.
#[derive(Clone)]
pub struct KeyPair {
    pub address: String,
    pub public_key: String,
    pub private_key: String,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Decrypted key material handed to `broadcast`
#[derive(Clone)]
pub struct SigningMaterial {
    pub address: String,
    pub private_key: String,
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A transfer as reported by the node
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransfer {
    pub hash: String,
    pub from: Option<String>,
    pub to: String,
    /// `None` when the transfer carried no value (e.g. a bounced message)
    pub amount: Option<Decimal>,
    pub fee: Option<Decimal>,
    /// Block number or logical time, strictly increasing per address
    pub logical_time: i64,
    pub confirmations: i32,
    /// Chain already reports this transfer as final
    pub confirmed: bool,
    pub memo: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Result of `confirmation_status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationStatus {
    pub confirmations: i32,
    pub confirmed: bool,
}

/// Unified interface to one blockchain network
#[async_trait]
pub trait ChainAdapter: Send + Sync + fmt::Debug {
    /// Network this adapter is bound to
    fn network(&self) -> Network;

    /// Generate a new keypair for a custodied wallet
    async fn generate_keypair(&self) -> Result<KeyPair, ChainError>;

    /// Native balance of `address` as seen by the node
    async fn balance_of(&self, address: &str) -> Result<Decimal, ChainError>;

    /// Validate an address format
    fn is_valid_address(&self, address: &str) -> bool;

    /// Transfers touching `address` after `cursor`, oldest first, at most `limit`.
    ///
    /// Callers must not trust the ordering or the cursor filter blindly.
    async fn list_transactions_since(
        &self,
        address: &str,
        cursor: &ScanCursor,
        limit: usize,
    ) -> Result<Vec<RawTransfer>, ChainError>;

    /// Sign and broadcast a payment. Returns the chain tx hash.
    async fn broadcast(
        &self,
        signer: &SigningMaterial,
        to: &str,
        amount: Decimal,
        memo: Option<&str>,
    ) -> Result<String, ChainError>;

    async fn confirmation_status(&self, tx_hash: &str) -> Result<ConfirmationStatus, ChainError>;

    /// Outgoing transfers from `from` since `since`, newest first, at most
    /// `limit`. With `before` set only transfers strictly below that logical
    /// time are returned, so callers page backwards by passing the oldest
    /// position of the previous page.
    ///
    /// Used to find out whether an unacknowledged broadcast landed.
    async fn recent_outgoing(
        &self,
        from: &str,
        since: DateTime<Utc>,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RawTransfer>, ChainError>;
}

/// Bound an adapter call. Expiry maps to `ChainError::Timeout`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ChainError>
where
    F: Future<Output = Result<T, ChainError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ChainError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitive_errors() {
        assert!(ChainError::Rejected("nonce too low".into()).is_definitive());
        assert!(ChainError::InsufficientFunds.is_definitive());
        assert!(ChainError::InvalidAddress("x".into()).is_definitive());

        assert!(!ChainError::Timeout(Duration::from_secs(5)).is_definitive());
        assert!(!ChainError::Network("connection reset".into()).is_definitive());
        assert!(!ChainError::Parse("bad json".into()).is_definitive());
    }

    #[test]
    fn test_signing_material_debug_redacts_key() {
        let signer = SigningMaterial {
            address: "0xabc".into(),
            private_key: "deadbeef".into(),
        };
        let out = format!("{:?}", signer);
        assert!(out.contains("0xabc"));
        assert!(!out.contains("deadbeef"));
    }

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ChainError>(1)
        };
        let result = with_timeout(Duration::from_millis(10), slow).await;
        assert_eq!(result, Err(ChainError::Timeout(Duration::from_millis(10))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let fast = async { Err::<i32, _>(ChainError::InsufficientFunds) };
        let result = with_timeout(Duration::from_secs(1), fast).await;
        assert_eq!(result, Err(ChainError::InsufficientFunds));
    }
}
