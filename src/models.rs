//! Ledger entities: wallets, transactions and the scan cursor.
//!
//! A wallet owns its transactions; `Transaction::wallet_id` is a lookup key
//! only. Balance is never assigned outside the ledger's balance operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core_types::{Network, TransactionId, UserId, WalletId};
use crate::settlement::state::TxStatus;

/// Resume point of a wallet's deposit scan
///
/// Exclusive lower bound of the next scan window. Only moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanCursor {
    pub logical_time: i64,
    pub hash: String,
}

impl ScanCursor {
    pub fn new(logical_time: i64, hash: impl Into<String>) -> Self {
        Self {
            logical_time,
            hash: hash.into(),
        }
    }

    /// Cursor of a freshly provisioned wallet
    pub fn genesis() -> Self {
        Self::default()
    }

    /// Whether a transfer at `position` lies inside the next scan window
    #[inline]
    pub fn precedes(&self, position: i64) -> bool {
        position > self.logical_time
    }

    /// Move forward to `(position, hash)`. Returns false (and leaves the
    /// cursor untouched) when that would not be an advance.
    pub fn advance_to(&mut self, position: i64, hash: &str) -> bool {
        if !self.precedes(position) {
            return false;
        }
        self.logical_time = position;
        self.hash = hash.to_string();
        true
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.logical_time, self.hash)
    }
}

/// Transaction direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum Direction {
    Deposit = 1,
    Withdrawal = 2,
}

impl Direction {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Direction::Deposit),
            2 => Some(Direction::Withdrawal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Deposit => "DEPOSIT",
            Direction::Withdrawal => "WITHDRAWAL",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Custodied wallet on one network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub network: Network,
    pub address: String,
    /// Private key sealed by the vault. Never logged.
    #[serde(skip_serializing)]
    pub encrypted_key: String,
    pub public_key: String,
    pub balance: Decimal,
    pub active: bool,
    pub cursor: ScanCursor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// New active wallet with zero balance and genesis cursor
    pub fn new(
        user_id: UserId,
        network: Network,
        address: String,
        encrypted_key: String,
        public_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            user_id,
            network,
            address,
            encrypted_key,
            public_key,
            balance: Decimal::ZERO,
            active: true,
            cursor: ScanCursor::genesis(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Chain addresses are compared case-insensitively
    pub fn owns_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

/// Ledger transaction row
///
/// Created once. Afterwards only status, confirmations, tx_hash,
/// block_position, confirmed_at and error_message change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub direction: Direction,
    pub from_address: Option<String>,
    pub to_address: String,
    pub amount: Decimal,
    pub fee: Option<Decimal>,
    pub status: TxStatus,
    pub tx_hash: Option<String>,
    pub block_position: Option<i64>,
    pub confirmations: i32,
    pub memo: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// PENDING withdrawal from `wallet` to `to_address`
    pub fn withdrawal(
        wallet: &Wallet,
        to_address: &str,
        amount: Decimal,
        memo: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4(),
            wallet_id: wallet.id,
            direction: Direction::Withdrawal,
            from_address: Some(wallet.address.clone()),
            to_address: to_address.to_string(),
            amount,
            fee: None,
            status: TxStatus::Pending,
            tx_hash: None,
            block_position: None,
            confirmations: 0,
            memo,
            error_message: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        }
    }

    #[inline]
    pub fn is_withdrawal(&self) -> bool {
        self.direction == Direction::Withdrawal
    }
}
