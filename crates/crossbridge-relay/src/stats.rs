//! Audit counters for external observability.
//!
//! Computed on demand from the store so they can never drift from the
//! operations they describe.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crossbridge_types::{Operation, OperationKind, OperationStatus};

/// Point-in-time bridge statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeStats {
    /// Ids ever assigned, including discarded ones.
    pub operations_created: u64,
    /// Live operations by kind.
    pub by_kind: BTreeMap<OperationKind, u64>,
    /// Live operations by status.
    pub by_status: BTreeMap<OperationStatus, u64>,
    /// Mean creation → completion time over COMPLETED operations, in ms.
    pub average_completion_ms: Option<i64>,
    /// Withdrawals refused by the timelock.
    pub timelock_rejections: u64,
    /// Operations that failed at least once, with a permanent classification
    /// on the latest failure.
    pub permanent_failures: u64,
    pub messages_sent: u64,
    pub messages_delivered: u64,
}

impl BridgeStats {
    /// Fold a snapshot of operations into counts.
    #[must_use]
    pub fn from_operations(operations: &[Operation]) -> Self {
        let mut stats = Self::default();
        for kind in OperationKind::ALL {
            stats.by_kind.insert(kind, 0);
        }
        for status in OperationStatus::ALL {
            stats.by_status.insert(status, 0);
        }

        let mut completion_total_ms: i64 = 0;
        let mut completed: i64 = 0;
        for operation in operations {
            *stats.by_kind.entry(operation.kind).or_insert(0) += 1;
            *stats.by_status.entry(operation.status).or_insert(0) += 1;
            if let Some(elapsed) = operation.time_to_completion() {
                completion_total_ms = completion_total_ms.saturating_add(elapsed.num_milliseconds());
                completed += 1;
            }
            if operation.status == OperationStatus::Failed
                && operation.last_failure.as_ref().is_some_and(|f| f.permanent)
            {
                stats.permanent_failures += 1;
            }
        }
        if completed > 0 {
            stats.average_completion_ms = Some(completion_total_ms / completed);
        }
        stats
    }

    #[must_use]
    pub fn count_kind(&self, kind: OperationKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn count_status(&self, status: OperationStatus) -> u64 {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}
