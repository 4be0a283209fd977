//! Transaction receipts returned by the chain connector.
//!
//! A [`TxReceipt`] is stored on the operation when it completes, so the
//! audit trail links every COMPLETED operation to the target-chain effect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::OperationId;

/// Confirmation of a transfer performed on the target chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Connector-assigned transaction identifier.
    pub tx_id: Uuid,
    /// The operation this transfer fulfils.
    pub operation_id: OperationId,
    /// Which dispatch attempt produced it (1-based).
    pub attempt: u32,
    /// When the target chain confirmed the transfer.
    pub confirmed_at: DateTime<Utc>,
}

impl TxReceipt {
    #[must_use]
    pub fn new(operation_id: OperationId, attempt: u32, confirmed_at: DateTime<Utc>) -> Self {
        Self {
            tx_id: Uuid::now_v7(),
            operation_id,
            attempt,
            confirmed_at,
        }
    }
}

impl std::fmt::Display for TxReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx:{} ({} attempt {})", self.tx_id, self.operation_id, self.attempt)
    }
}
