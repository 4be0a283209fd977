//! Batch coordinator and operation intake.
//!
//! A batch is a bounded list of independent items. The size ceiling is
//! checked first, so an oversized batch has no side effects at all. After
//! that every item runs on its own: one bad item never rolls back or
//! blocks the rest, and no lock is held across items.

use std::sync::Arc;

use crossbridge_ledger::OperationStore;
use crossbridge_types::{BridgeError, OperationId, OperationRequest, Result, TxReceipt};

use crate::executor::TransferExecutor;
use crate::timelock::WithdrawalTimelock;

/// Submits and executes operations singly or in bounded batches.
pub struct BatchCoordinator {
    store: Arc<OperationStore>,
    timelock: Arc<WithdrawalTimelock>,
    executor: Arc<TransferExecutor>,
    max_batch_size: usize,
}

impl BatchCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<OperationStore>,
        timelock: Arc<WithdrawalTimelock>,
        executor: Arc<TransferExecutor>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            store,
            timelock,
            executor,
            max_batch_size,
        }
    }

    /// Register one request. Withdrawal requests stamp the initiator's
    /// timelock at creation time.
    ///
    /// # Errors
    /// Request validation errors from the store.
    pub fn submit(&self, request: OperationRequest) -> Result<OperationId> {
        let timelocked = request.kind.requires_timelock();
        let initiator = request.initiator.clone();
        let id = self.store.create(request)?;
        if timelocked {
            let created_at = self.store.get(id)?.created_at;
            self.timelock.record(&initiator, created_at);
        }
        Ok(id)
    }

    /// Submit every request independently.
    ///
    /// # Errors
    /// `BatchTooLarge` if `requests` exceeds the ceiling; nothing is created.
    pub fn submit_batch(&self, requests: Vec<OperationRequest>) -> Result<Vec<Result<OperationId>>> {
        self.check_size(requests.len())?;
        let results: Vec<Result<OperationId>> =
            requests.into_iter().map(|request| self.submit(request)).collect();
        log_batch("submit", &results);
        Ok(results)
    }

    /// Execute every id independently.
    ///
    /// # Errors
    /// `BatchTooLarge` if `ids` exceeds the ceiling; nothing is executed.
    pub fn execute_batch(&self, ids: &[OperationId]) -> Result<Vec<Result<TxReceipt>>> {
        self.check_size(ids.len())?;
        let results: Vec<Result<TxReceipt>> =
            ids.iter().map(|id| self.executor.execute(*id)).collect();
        log_batch("execute", &results);
        Ok(results)
    }

    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_batch_size {
            tracing::warn!(size, max = self.max_batch_size, "Batch rejected: too large");
            return Err(BridgeError::BatchTooLarge {
                size,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }
}

fn log_batch<T>(kind: &str, results: &[Result<T>]) {
    let ok = results.iter().filter(|r| r.is_ok()).count();
    tracing::info!(
        batch = kind,
        items = results.len(),
        ok,
        failed = results.len() - ok,
        "Batch processed"
    );
}
