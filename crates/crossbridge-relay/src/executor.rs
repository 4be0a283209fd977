//! Transfer executor: drives an approved operation through the chain
//! connector exactly once per attempt.
//!
//! 1. Fast-fail on a snapshot (COMPLETED → `AlreadyProcessed`, no connector
//!    call at all)
//! 2. Under the operation lock: re-check status, re-count quorum, reserve
//!    the withdrawal timelock against the operation's own request time,
//!    PENDING → VALIDATING (this is the claim; a concurrent caller now sees
//!    VALIDATING and backs off, and the journaled transition bumps the
//!    attempt number)
//! 3. Lock released. Read the initiator's balance for withdrawals, call
//!    `submit_transfer` with `(operation, attempt)` as the idempotency key
//! 4. Under the lock again: VALIDATING → COMPLETED (commit timelock) or
//!    VALIDATING → FAILED (release timelock)
//!
//! The operation lock is never held across a connector call.

use std::sync::Arc;

use crossbridge_ledger::{OperationEntry, OperationStore};
use crossbridge_types::{
    BridgeError, ChainConnector, Clock, ConnectorError, FailureRecord, Operation, OperationId,
    OperationKind, OperationStatus, Result, TransferAsset, TransferInstruction, TxReceipt,
};

use crate::consensus::{unknown_if_missing, ConsensusGate};
use crate::timelock::WithdrawalTimelock;

/// Executes operations that passed consensus (and the timelock).
pub struct TransferExecutor {
    store: Arc<OperationStore>,
    gate: Arc<ConsensusGate>,
    timelock: Arc<WithdrawalTimelock>,
    connector: Arc<dyn ChainConnector>,
    clock: Arc<dyn Clock>,
}

impl TransferExecutor {
    #[must_use]
    pub fn new(
        store: Arc<OperationStore>,
        gate: Arc<ConsensusGate>,
        timelock: Arc<WithdrawalTimelock>,
        connector: Arc<dyn ChainConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gate,
            timelock,
            connector,
            clock,
        }
    }

    /// Execute one operation.
    ///
    /// # Errors
    /// - `UnknownOperation` for an unknown id
    /// - `AlreadyProcessed` if COMPLETED (connector untouched)
    /// - `ExecutionInProgress` if another caller is dispatching it
    /// - `AlreadyFinalized` if ABANDONED, `IllegalTransition` if FAILED
    ///   (retry first)
    /// - `QuorumNotReached`, `DelayNotMet`: operation stays PENDING
    /// - `InsufficientBalance`, `ExecutionFailed`: operation is now FAILED
    pub fn execute(&self, id: OperationId) -> Result<TxReceipt> {
        // ── Fast path ───────────────────────────────────────────────────
        let snapshot = self
            .store
            .get(id)
            .map_err(|err| unknown_if_missing(err, id))?;
        check_executable(&snapshot)?;

        // ── Arm: gates + claim, under the operation lock ────────────────
        let now = self.clock.now();
        let instruction = self
            .store
            .modify(id, |entry| self.arm(entry, now))
            .map_err(|err| unknown_if_missing(err, id))?;
        self.connector.emit_event(id, OperationStatus::Validating);

        tracing::debug!(
            operation_id = %id,
            attempt = instruction.attempt,
            kind = %instruction.kind,
            "Dispatching to connector"
        );

        // ── Dispatch: lock released ─────────────────────────────────────
        match self.dispatch_transfer(&instruction) {
            Ok(receipt) => self.finish_completed(&instruction, receipt),
            Err(err) => self.finish_failed(&instruction, &err),
        }
    }

    fn arm(
        &self,
        entry: &mut OperationEntry<'_>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<TransferInstruction> {
        let operation = entry.operation();
        check_executable(operation)?;

        // Re-counted here, not trusted from the snapshot: votes and
        // revocations may have landed in between.
        self.gate.tally(operation).require(operation.id)?;

        let timelocked = operation.kind.requires_timelock();
        let initiator = operation.initiator.clone();
        if timelocked {
            self.timelock
                .reserve(&initiator, operation.created_at, now)?;
        }

        if let Err(err) = entry.transition(OperationStatus::Validating) {
            if timelocked {
                self.timelock.release(&initiator);
            }
            return Err(err);
        }

        let operation = entry.operation();
        Ok(TransferInstruction {
            operation_id: operation.id,
            attempt: operation.attempts,
            kind: operation.kind,
            initiator,
            recipient: operation.recipient.clone(),
            asset: operation.transfer_asset(),
        })
    }

    fn dispatch_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> std::result::Result<TxReceipt, ConnectorError> {
        if instruction.kind == OperationKind::TokenWithdrawal {
            if let TransferAsset::Tokens(amount) = instruction.asset {
                // Read fresh on every attempt; balances are never cached.
                let available = self.connector.query_balance(&instruction.initiator)?;
                if available < amount {
                    return Err(ConnectorError::InsufficientBalance {
                        needed: amount,
                        available,
                    });
                }
            }
        }
        self.connector.submit_transfer(instruction)
    }

    fn finish_completed(
        &self,
        instruction: &TransferInstruction,
        receipt: TxReceipt,
    ) -> Result<TxReceipt> {
        let id = instruction.operation_id;
        if instruction.kind.requires_timelock() {
            self.timelock.commit(&instruction.initiator, self.clock.now());
        }
        self.store
            .modify(id, |entry| entry.complete(receipt.clone()))?;
        self.connector.emit_event(id, OperationStatus::Completed);

        tracing::info!(
            operation_id = %id,
            attempt = instruction.attempt,
            kind = %instruction.kind,
            tx_id = %receipt.tx_id,
            "Operation completed"
        );
        Ok(receipt)
    }

    fn finish_failed(&self, instruction: &TransferInstruction, err: &ConnectorError) -> Result<TxReceipt> {
        let id = instruction.operation_id;
        let failure = FailureRecord {
            reason: err.to_string(),
            permanent: err.is_permanent(),
            attempt: instruction.attempt,
            failed_at: self.clock.now(),
        };
        if instruction.kind.requires_timelock() {
            self.timelock.release(&instruction.initiator);
        }
        self.store
            .modify(id, |entry| entry.fail(failure.clone()))?;
        self.connector.emit_event(id, OperationStatus::Failed);

        tracing::warn!(
            operation_id = %id,
            attempt = instruction.attempt,
            permanent = failure.permanent,
            reason = %failure.reason,
            "Operation failed"
        );

        Err(match err {
            ConnectorError::InsufficientBalance { needed, available } => {
                BridgeError::InsufficientBalance {
                    needed: *needed,
                    available: *available,
                }
            }
            _ => BridgeError::ExecutionFailed {
                id,
                reason: failure.reason,
                permanent: failure.permanent,
            },
        })
    }
}

fn check_executable(operation: &Operation) -> Result<()> {
    let id = operation.id;
    match operation.status {
        OperationStatus::Pending => Ok(()),
        OperationStatus::Completed => Err(BridgeError::AlreadyProcessed(id)),
        OperationStatus::Validating => Err(BridgeError::ExecutionInProgress(id)),
        OperationStatus::Abandoned => Err(BridgeError::AlreadyFinalized {
            id,
            status: OperationStatus::Abandoned,
        }),
        OperationStatus::Failed => Err(BridgeError::IllegalTransition {
            id,
            from: OperationStatus::Failed,
            to: OperationStatus::Validating,
        }),
    }
}
