//! Funds movement collaborator.
//!
//! Settlement commits first; delivery happens here. The core does not
//! know how funds actually move — callers hand the engine anything that
//! implements [`FundsTransfer`]. A delivery failure is scoped to its one
//! winner: the owed amount is already on the ledger and stays claimable
//! by an out-of-band retry.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::error::LedgerError;

/// Why a single transfer did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransferError(pub String);

/// Capability to move funds to an account. Implementations may be slow
/// or flaky; the engine never retries in-band.
#[async_trait]
pub trait FundsTransfer: Send + Sync {
    async fn transfer(&self, account: &str, amount: u64) -> Result<(), TransferError>;
}

/// Delivery outcome for one winner.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub account: String,
    pub amount: u64,
    /// `TransferFailed` when delivery did not complete; None otherwise.
    pub error: Option<LedgerError>,
}

impl TransferOutcome {
    pub fn delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// In-memory balance book for demos and tests.
#[derive(Debug, Default)]
pub struct PaperTreasury {
    balances: Mutex<HashMap<String, u64>>,
}

impl PaperTreasury {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &str) -> u64 {
        self.balances.lock().get(account).copied().unwrap_or(0)
    }

    /// Snapshot of every account balance, for display.
    pub fn balances(&self) -> HashMap<String, u64> {
        self.balances.lock().clone()
    }
}

#[async_trait]
impl FundsTransfer for PaperTreasury {
    async fn transfer(&self, account: &str, amount: u64) -> Result<(), TransferError> {
        let mut balances = self.balances.lock();
        let entry = balances.entry(account.to_string()).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| TransferError("balance overflow".to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_paper_treasury_accumulates() {
        let treasury = PaperTreasury::new();
        assert_eq!(treasury.balance("bob"), 0);

        treasury.transfer("bob", 100).await.unwrap();
        treasury.transfer("bob", 50).await.unwrap();
        assert_eq!(treasury.balance("bob"), 150);
        assert_eq!(treasury.balances().len(), 1);
    }

    #[tokio::test]
    async fn test_paper_treasury_overflow_reported() {
        let treasury = PaperTreasury::new();
        treasury.transfer("bob", u64::MAX).await.unwrap();

        let err = treasury.transfer("bob", 1).await.unwrap_err();
        assert_eq!(err, TransferError("balance overflow".to_string()));
        // The failed credit must not corrupt the balance.
        assert_eq!(treasury.balance("bob"), u64::MAX);
    }
}
