//! Retry and recovery for failed operations.
//!
//! A FAILED operation can be re-armed (FAILED → PENDING) without being
//! resubmitted. Whether validators must approve again is a policy choice
//! ([`RetryVotePolicy`]). The retry budget never fails an operation on its
//! own: when it runs out the refusal is logged and journaled, and an
//! operator decides whether to abandon.

use std::sync::Arc;

use crossbridge_ledger::OperationStore;
use crossbridge_types::{
    BridgeError, OperationId, OperationStatus, Result, RetryPolicy, RetryVotePolicy,
};

use crate::consensus::unknown_if_missing;

/// How a failure should be treated by whoever decides on the next retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Likely to succeed if simply retried.
    Transient,
    /// Unlikely to succeed without an external change (funds, contract).
    Permanent,
    /// Not failed.
    None,
}

/// Re-arms FAILED operations and records operator decisions.
pub struct RecoveryController {
    store: Arc<OperationStore>,
    policy: RetryPolicy,
}

impl RecoveryController {
    #[must_use]
    pub fn new(store: Arc<OperationStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// FAILED → PENDING.
    ///
    /// # Errors
    /// - `UnknownOperation` for an unknown id
    /// - `IllegalTransition` unless FAILED
    /// - `RetryLimitExceeded` if the budget is spent; the operation stays
    ///   FAILED and the refusal is journaled
    pub fn retry(&self, id: OperationId) -> Result<()> {
        let policy = self.policy;
        let outcome = self.store.modify(id, |entry| {
            let operation = entry.operation();
            if operation.status != OperationStatus::Failed {
                return Err(BridgeError::IllegalTransition {
                    id,
                    from: operation.status,
                    to: OperationStatus::Pending,
                });
            }

            let retries = operation.retries;
            if let Some(max) = policy.max_retries {
                if retries >= max {
                    entry.note_retry_limit(max)?;
                    return Err(BridgeError::RetryLimitExceeded {
                        id,
                        attempts: retries,
                        max,
                    });
                }
            }

            if policy.vote_policy == RetryVotePolicy::Clear {
                entry.clear_votes()?;
            }
            entry.transition(OperationStatus::Pending)?;
            Ok(retries + 1)
        });

        match outcome {
            Ok(retry) => {
                tracing::info!(
                    operation_id = %id,
                    retry,
                    votes = ?policy.vote_policy,
                    "Operation re-armed"
                );
                Ok(())
            }
            Err(BridgeError::RetryLimitExceeded { id, attempts, max }) => {
                tracing::warn!(
                    operation_id = %id,
                    retries = attempts,
                    max,
                    "Retry limit reached; operator review required"
                );
                Err(BridgeError::RetryLimitExceeded { id, attempts, max })
            }
            Err(err) => Err(unknown_if_missing(err, id)),
        }
    }

    /// FAILED → ABANDONED. Terminal.
    ///
    /// # Errors
    /// `UnknownOperation`, or `IllegalTransition` unless FAILED.
    pub fn abandon(&self, id: OperationId) -> Result<()> {
        self.store
            .transition(id, OperationStatus::Abandoned)
            .map_err(|err| unknown_if_missing(err, id))?;
        tracing::warn!(operation_id = %id, "Operation abandoned");
        Ok(())
    }

    /// Classify the operation's last failure.
    ///
    /// # Errors
    /// `UnknownOperation`.
    pub fn classify(&self, id: OperationId) -> Result<FailureClass> {
        let operation = self
            .store
            .get(id)
            .map_err(|err| unknown_if_missing(err, id))?;
        if operation.status != OperationStatus::Failed {
            return Ok(FailureClass::None);
        }
        Ok(match operation.last_failure {
            Some(failure) if failure.permanent => FailureClass::Permanent,
            _ => FailureClass::Transient,
        })
    }

    /// Retries left for `id`, `None` if unlimited.
    ///
    /// # Errors
    /// `UnknownOperation`.
    pub fn retries_left(&self, id: OperationId) -> Result<Option<u32>> {
        let operation = self
            .store
            .get(id)
            .map_err(|err| unknown_if_missing(err, id))?;
        Ok(self
            .policy
            .max_retries
            .map(|max| max.saturating_sub(operation.retries)))
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}
