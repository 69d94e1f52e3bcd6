//! Error taxonomy for the room ledger and settlement engine.
//!
//! Every operation reports one of these kinds synchronously to its
//! caller; nothing is swallowed. `TransferFailed` is recorded per winner
//! during distribution and never aborts the other winners.

use thiserror::Error;
use uuid::Uuid;

use crate::models::RoomStatus;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("room {0} not found")]
    NotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("operation not valid while room is {0}")]
    InvalidState(RoomStatus),

    #[error("caller {0} is not authorized for this operation")]
    Unauthorized(String),

    #[error("account already holds a stake in this room")]
    DuplicateStake,

    #[error("room has already been settled")]
    AlreadySettled,

    #[error("transfer of {amount} to {account} failed: {reason}")]
    TransferFailed {
        account: String,
        amount: u64,
        reason: String,
    },

    #[error("stake total overflow")]
    Overflow,
}

pub type LedgerResult<T> = Result<T, LedgerError>;
