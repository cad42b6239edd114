//! Custody Error Types
//!
//! `CustodyError` is what callers of the custody core see. Adapter, store and
//! vault failures keep their own enums and are folded in here.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::chain::ChainError;
use crate::core_types::{Network, TransactionId, UserId, WalletId};
use crate::settlement::state::TxStatus;
use crate::store::StoreError;
use crate::vault::VaultError;

/// Synchronous rejections. No state changes when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid destination address: {0}")]
    InvalidAddress(String),

    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Approval does not match the recorded withdrawal")]
    ApprovalMismatch,

    #[error("Wallet {0} is not active")]
    WalletInactive(WalletId),

    #[error("Transaction {id} is {status}, cannot {action}")]
    InvalidState {
        id: TransactionId,
        status: TxStatus,
        action: &'static str,
    },

    #[error("Transaction {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: TransactionId,
        from: TxStatus,
        to: TxStatus,
    },

    #[error("Transaction {0} is not a withdrawal")]
    NotAWithdrawal(TransactionId),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::InvalidAmount => "INVALID_AMOUNT",
            ValidationError::InvalidAddress(_) => "INVALID_ADDRESS",
            ValidationError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            ValidationError::ApprovalMismatch => "APPROVAL_MISMATCH",
            ValidationError::WalletInactive(_) => "WALLET_INACTIVE",
            ValidationError::InvalidState { .. } | ValidationError::IllegalTransition { .. } => {
                "INVALID_STATE_TRANSITION"
            }
            ValidationError::NotAWithdrawal(_) => "NOT_A_WITHDRAWAL",
        }
    }
}

/// Custody core error
#[derive(Error, Debug)]
pub enum CustodyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Chain adapter error: {0}")]
    Adapter(#[from] ChainError),

    /// Duplicate chain hash. Callers that race on the same transfer treat
    /// this as a no-op.
    #[error("Consistency error: transaction hash {0} already recorded")]
    Consistency(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Wallet not found: {0}")]
    WalletNotFound(WalletId),

    #[error("User {user_id} has no {network} wallet")]
    NoWalletForUser { user_id: UserId, network: Network },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("User {user_id} already has a {network} wallet")]
    DuplicateWallet { user_id: UserId, network: Network },

    #[error("No chain adapter registered for {0}")]
    UnsupportedNetwork(Network),
}

impl CustodyError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CustodyError::Validation(e) => e.code(),
            CustodyError::Adapter(e) => e.code(),
            CustodyError::Consistency(_) => "DUPLICATE_TX_HASH",
            CustodyError::Store(_) => "STORE_ERROR",
            CustodyError::Vault(_) => "VAULT_ERROR",
            CustodyError::WalletNotFound(_) | CustodyError::NoWalletForUser { .. } => {
                "WALLET_NOT_FOUND"
            }
            CustodyError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            CustodyError::DuplicateWallet { .. } => "DUPLICATE_WALLET",
            CustodyError::UnsupportedNetwork(_) => "UNSUPPORTED_NETWORK",
        }
    }

    /// Benign race on an already recorded chain hash
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CustodyError::Consistency(_))
    }
}

impl From<StoreError> for CustodyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateHash(hash) => CustodyError::Consistency(hash),
            StoreError::InsufficientBalance {
                available,
                requested,
            } => ValidationError::InsufficientBalance {
                available,
                requested,
            }
            .into(),
            StoreError::IllegalTransition { id, from, to } => {
                ValidationError::IllegalTransition { id, from, to }.into()
            }
            StoreError::WalletNotFound(id) => CustodyError::WalletNotFound(id),
            StoreError::TransactionNotFound(id) => CustodyError::TransactionNotFound(id),
            StoreError::DuplicateWallet { user_id, network } => {
                CustodyError::DuplicateWallet { user_id, network }
            }
            other => CustodyError::Store(other),
        }
    }
}

pub type CustodyResult<T> = Result<T, CustodyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let dup: CustodyError = StoreError::DuplicateHash("0xabc".into()).into();
        assert!(dup.is_duplicate());
        assert_eq!(dup.code(), "DUPLICATE_TX_HASH");

        let short: CustodyError = StoreError::InsufficientBalance {
            available: Decimal::from(10),
            requested: Decimal::from(30),
        }
        .into();
        assert_eq!(short.code(), "INSUFFICIENT_BALANCE");
        assert!(matches!(short, CustodyError::Validation(_)));

        let illegal: CustodyError = StoreError::IllegalTransition {
            id: uuid::Uuid::nil(),
            from: TxStatus::Approved,
            to: TxStatus::Confirmed,
        }
        .into();
        assert_eq!(illegal.code(), "INVALID_STATE_TRANSITION");
        assert!(matches!(illegal, CustodyError::Validation(_)));

        let db: CustodyError = StoreError::Database("connection reset".into()).into();
        assert_eq!(db.code(), "STORE_ERROR");
    }

    #[test]
    fn test_validation_message() {
        let err = ValidationError::InvalidState {
            id: uuid::Uuid::nil(),
            status: TxStatus::Confirmed,
            action: "approve",
        };
        assert!(err.to_string().contains("CONFIRMED"));
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }
}
