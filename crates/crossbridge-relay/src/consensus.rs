//! # Consensus Gate
//!
//! Records validator votes through the store and decides whether an
//! operation has quorum. Only approvals from validators that are
//! registered *right now* count, against a threshold computed from the
//! current registry size.

use std::sync::Arc;

use crossbridge_ledger::{OperationStore, ValidatorRegistry};
use crossbridge_types::{
    BridgeError, Clock, Operation, OperationId, QuorumPolicy, Result, ValidatorId, ValidatorVote,
};

/// Outcome of counting votes for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumTally {
    pub approvals: usize,
    pub threshold: usize,
}

impl QuorumTally {
    #[must_use]
    pub fn reached(self) -> bool {
        self.approvals >= self.threshold
    }

    /// `Ok` if reached, else `QuorumNotReached` for `id`.
    ///
    /// # Errors
    /// `QuorumNotReached`.
    pub fn require(self, id: OperationId) -> Result<()> {
        if self.reached() {
            Ok(())
        } else {
            Err(BridgeError::QuorumNotReached {
                id,
                approvals: self.approvals,
                threshold: self.threshold,
            })
        }
    }
}

/// Vote intake and quorum decisions.
pub struct ConsensusGate {
    store: Arc<OperationStore>,
    registry: Arc<ValidatorRegistry>,
    policy: QuorumPolicy,
    clock: Arc<dyn Clock>,
}

impl ConsensusGate {
    #[must_use]
    pub fn new(
        store: Arc<OperationStore>,
        registry: Arc<ValidatorRegistry>,
        policy: QuorumPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            registry,
            policy,
            clock,
        }
    }

    /// Record `validator`'s verdict on `operation_id`. A repeat vote by the
    /// same validator replaces the earlier one.
    ///
    /// # Errors
    /// - `NotAValidator` if `validator` is not registered
    /// - `UnknownOperation` if the id does not exist
    /// - `AlreadyFinalized` if the operation is COMPLETED, FAILED or ABANDONED
    pub fn vote(
        &self,
        operation_id: OperationId,
        validator: &ValidatorId,
        approved: bool,
    ) -> Result<()> {
        self.registry.require_validator(validator)?;

        let vote = ValidatorVote {
            operation_id,
            validator_id: validator.clone(),
            approved,
            cast_at: self.clock.now(),
        };
        self.store
            .modify(operation_id, |entry| entry.record_vote(vote))
            .map_err(|err| unknown_if_missing(err, operation_id))?;

        tracing::debug!(
            operation_id = %operation_id,
            validator = %validator,
            approved,
            "Vote recorded"
        );
        Ok(())
    }

    /// Whether the operation currently has enough approvals.
    ///
    /// # Errors
    /// `UnknownOperation` if the id does not exist.
    pub fn has_quorum(&self, operation_id: OperationId) -> Result<bool> {
        let operation = self
            .store
            .get(operation_id)
            .map_err(|err| unknown_if_missing(err, operation_id))?;
        Ok(self.tally(&operation).reached())
    }

    /// Count approvals on `operation` against the live registry.
    ///
    /// Callers that are about to act on the result should call this while
    /// holding the operation's lock (inside `OperationStore::modify`).
    pub fn tally(&self, operation: &Operation) -> QuorumTally {
        let approvals = operation
            .approvals()
            .filter(|validator| self.registry.is_validator(validator))
            .count();
        QuorumTally {
            approvals,
            threshold: self.policy.threshold(self.registry.validator_count()),
        }
    }

    #[must_use]
    pub fn policy(&self) -> QuorumPolicy {
        self.policy
    }
}

/// Votes and executions report a missing id as `UnknownOperation`.
pub(crate) fn unknown_if_missing(err: BridgeError, id: OperationId) -> BridgeError {
    match err {
        BridgeError::NotFound(_) => BridgeError::UnknownOperation(id),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbridge_types::{ManualClock, OperationRequest, OperationStatus};

    struct Fixture {
        store: Arc<OperationStore>,
        registry: Arc<ValidatorRegistry>,
        gate: ConsensusGate,
    }

    fn fixture(validators: &[&str], policy: QuorumPolicy) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::epoch());
        let store = Arc::new(OperationStore::in_memory(Arc::clone(&clock)));
        let registry = Arc::new(ValidatorRegistry::new());
        for v in validators {
            registry.grant(ValidatorId::new(*v)).unwrap();
        }
        let gate = ConsensusGate::new(Arc::clone(&store), Arc::clone(&registry), policy, clock);
        Fixture {
            store,
            registry,
            gate,
        }
    }

    fn v(id: &str) -> ValidatorId {
        ValidatorId::new(id)
    }

    #[test]
    fn single_validator_quorum() {
        let f = fixture(&["v1"], QuorumPolicy::Majority);
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        assert!(!f.gate.has_quorum(id).unwrap());
        f.gate.vote(id, &v("v1"), true).unwrap();
        assert!(f.gate.has_quorum(id).unwrap());
    }

    #[test]
    fn majority_of_three_needs_two() {
        let f = fixture(&["v1", "v2", "v3"], QuorumPolicy::Majority);
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        f.gate.vote(id, &v("v1"), true).unwrap();
        f.gate.vote(id, &v("v2"), false).unwrap();
        assert!(!f.gate.has_quorum(id).unwrap());
        f.gate.vote(id, &v("v3"), true).unwrap();
        assert!(f.gate.has_quorum(id).unwrap());
    }

    #[test]
    fn revote_overwrites() {
        let f = fixture(&["v1"], QuorumPolicy::Majority);
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        f.gate.vote(id, &v("v1"), true).unwrap();
        f.gate.vote(id, &v("v1"), false).unwrap();
        assert!(!f.gate.has_quorum(id).unwrap());
        assert_eq!(f.store.get(id).unwrap().votes.len(), 1);
    }

    #[test]
    fn non_validator_rejected() {
        let f = fixture(&["v1"], QuorumPolicy::Majority);
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        let err = f.gate.vote(id, &v("mallory"), true).unwrap_err();
        assert!(matches!(err, BridgeError::NotAValidator(_)));
    }

    #[test]
    fn unknown_operation_rejected() {
        let f = fixture(&["v1"], QuorumPolicy::Majority);
        let err = f.gate.vote(OperationId(9), &v("v1"), true).unwrap_err();
        assert!(matches!(err, BridgeError::UnknownOperation(OperationId(9))));
        assert!(matches!(
            f.gate.has_quorum(OperationId(9)),
            Err(BridgeError::UnknownOperation(_))
        ));
    }

    #[test]
    fn finalized_operation_rejects_votes() {
        let f = fixture(&["v1"], QuorumPolicy::Majority);
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        f.store.transition(id, OperationStatus::Validating).unwrap();
        f.store.transition(id, OperationStatus::Failed).unwrap();
        let err = f.gate.vote(id, &v("v1"), true).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::AlreadyFinalized {
                status: OperationStatus::Failed,
                ..
            }
        ));
    }

    #[test]
    fn revoked_validator_stops_counting() {
        let f = fixture(&["v1", "v2", "v3"], QuorumPolicy::Majority);
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        f.gate.vote(id, &v("v1"), true).unwrap();
        f.gate.vote(id, &v("v2"), true).unwrap();
        assert!(f.gate.has_quorum(id).unwrap());

        // 2 validators left, threshold 2, only v1's approval still counts
        f.registry.revoke(&v("v2"));
        let op = f.store.get(id).unwrap();
        assert_eq!(
            f.gate.tally(&op),
            QuorumTally {
                approvals: 1,
                threshold: 2
            }
        );
        assert!(!f.gate.has_quorum(id).unwrap());
        assert!(f.gate.vote(id, &v("v2"), true).is_err());
    }

    #[test]
    fn fixed_quorum() {
        let f = fixture(&["v1", "v2", "v3", "v4"], QuorumPolicy::Fixed { approvals: 1 });
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        f.gate.vote(id, &v("v4"), true).unwrap();
        assert!(f.gate.has_quorum(id).unwrap());
    }

    #[test]
    fn empty_registry_never_reaches_quorum() {
        let f = fixture(&[], QuorumPolicy::Majority);
        let id = f.store.create(OperationRequest::dummy_deposit("0xa1", 100)).unwrap();
        let op = f.store.get(id).unwrap();
        assert!(!f.gate.tally(&op).reached());
        assert!(matches!(
            f.gate.tally(&op).require(id),
            Err(BridgeError::QuorumNotReached { threshold: 1, .. })
        ));
    }
}
