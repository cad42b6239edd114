//! Transaction State Definitions
//!
//! State IDs are stored in PostgreSQL as SMALLINT.

use std::fmt;

use crate::models::Direction;

/// Transaction status
///
/// Withdrawals: `PENDING -> APPROVED -> BROADCASTING -> CONFIRMED | FAILED`,
/// with `REJECTED` / `CANCELLED` for requests that never reach broadcast.
/// Deposits: `PENDING -> CONFIRMED`, or `FAILED` when the transfer carried no value.
///
/// Terminal states: CONFIRMED (40), FAILED (-10), REJECTED (-20), CANCELLED (-30)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TxStatus {
    /// Withdrawal: hold placed, awaiting approval. Deposit: seen, not yet final.
    Pending = 0,

    /// Withdrawal approved, waiting for the settlement sweep
    Approved = 10,

    /// Broadcast claimed (persist-before-call). Outcome may be unknown.
    Broadcasting = 20,

    /// Terminal: on chain
    Confirmed = 40,

    /// Terminal: broadcast failed (hold released) or deposit without value
    Failed = -10,

    /// Terminal: refused by an operator (hold released)
    Rejected = -20,

    /// Terminal: withdrawn by the requester before approval (hold released)
    Cancelled = -30,
}

impl TxStatus {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TxStatus::Confirmed | TxStatus::Failed | TxStatus::Rejected | TxStatus::Cancelled
        )
    }

    /// Withdrawal states whose amount is still deducted from the wallet balance
    #[inline]
    pub fn holds_funds(&self) -> bool {
        matches!(
            self,
            TxStatus::Pending | TxStatus::Approved | TxStatus::Broadcasting | TxStatus::Confirmed
        )
    }

    /// Legal transitions for a row of the given direction. Enforced by
    /// every `LedgerStore::transition`.
    pub fn can_transition_to(&self, direction: Direction, next: TxStatus) -> bool {
        use TxStatus::*;
        match direction {
            Direction::Withdrawal => matches!(
                (self, next),
                (Pending, Approved)
                    | (Pending, Rejected)
                    | (Pending, Cancelled)
                    | (Approved, Broadcasting)
                    | (Approved, Rejected)
                    | (Broadcasting, Confirmed)
                    | (Broadcasting, Failed)
            ),
            Direction::Deposit => matches!((self, next), (Pending, Confirmed) | (Pending, Failed)),
        }
    }

    /// Get the numeric state ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL state ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TxStatus::Pending),
            10 => Some(TxStatus::Approved),
            20 => Some(TxStatus::Broadcasting),
            40 => Some(TxStatus::Confirmed),
            -10 => Some(TxStatus::Failed),
            -20 => Some(TxStatus::Rejected),
            -30 => Some(TxStatus::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "PENDING",
            TxStatus::Approved => "APPROVED",
            TxStatus::Broadcasting => "BROADCASTING",
            TxStatus::Confirmed => "CONFIRMED",
            TxStatus::Failed => "FAILED",
            TxStatus::Rejected => "REJECTED",
            TxStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for TxStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        TxStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TxStatus::Confirmed.is_terminal());
        assert!(TxStatus::Failed.is_terminal());
        assert!(TxStatus::Rejected.is_terminal());
        assert!(TxStatus::Cancelled.is_terminal());

        assert!(!TxStatus::Pending.is_terminal());
        assert!(!TxStatus::Approved.is_terminal());
        assert!(!TxStatus::Broadcasting.is_terminal());
    }

    #[test]
    fn test_holding_states() {
        assert!(TxStatus::Pending.holds_funds());
        assert!(TxStatus::Approved.holds_funds());
        assert!(TxStatus::Broadcasting.holds_funds());
        assert!(TxStatus::Confirmed.holds_funds());

        assert!(!TxStatus::Failed.holds_funds());
        assert!(!TxStatus::Rejected.holds_funds());
        assert!(!TxStatus::Cancelled.holds_funds());
    }

    #[test]
    fn test_withdrawal_transitions() {
        let w = Direction::Withdrawal;
        assert!(TxStatus::Pending.can_transition_to(w, TxStatus::Approved));
        assert!(TxStatus::Approved.can_transition_to(w, TxStatus::Broadcasting));
        assert!(TxStatus::Broadcasting.can_transition_to(w, TxStatus::Failed));

        // never skip the broadcast claim
        assert!(!TxStatus::Approved.can_transition_to(w, TxStatus::Confirmed));
        assert!(!TxStatus::Pending.can_transition_to(w, TxStatus::Confirmed));
        assert!(!TxStatus::Pending.can_transition_to(w, TxStatus::Broadcasting));
        // terminal states are final
        assert!(!TxStatus::Confirmed.can_transition_to(w, TxStatus::Failed));
        assert!(!TxStatus::Failed.can_transition_to(w, TxStatus::Approved));
    }

    #[test]
    fn test_deposit_transitions() {
        let d = Direction::Deposit;
        assert!(TxStatus::Pending.can_transition_to(d, TxStatus::Confirmed));
        assert!(TxStatus::Pending.can_transition_to(d, TxStatus::Failed));

        assert!(!TxStatus::Pending.can_transition_to(d, TxStatus::Approved));
        assert!(!TxStatus::Confirmed.can_transition_to(d, TxStatus::Failed));
        assert!(!TxStatus::Failed.can_transition_to(d, TxStatus::Confirmed));
    }

    #[test]
    fn test_state_id_roundtrip() {
        let states = [
            TxStatus::Pending,
            TxStatus::Approved,
            TxStatus::Broadcasting,
            TxStatus::Confirmed,
            TxStatus::Failed,
            TxStatus::Rejected,
            TxStatus::Cancelled,
        ];

        for state in states {
            assert_eq!(TxStatus::from_id(state.id()), Some(state));
        }
        assert!(TxStatus::from_id(999).is_none());
    }
}
