//! # Operation Store
//!
//! Owns every [`Operation`] and every status change. Other components read
//! clones and mutate only through [`OperationStore::modify`], which hands
//! out an [`OperationEntry`] while holding that operation's lock.
//!
//! ## Locking
//!
//! - One `parking_lot::Mutex` per operation, held in a `DashMap`. There is
//!   no store-wide lock; two operations never contend.
//! - Creation is serialized by the id sequence lock so `Created` records
//!   reach the journal in id order.
//! - Lock order: operation → journal. Nothing that holds a journal lock
//!   ever takes an operation lock.
//!
//! ## Journal first
//!
//! Each mutation is applied to a scratch copy, appended to the journal,
//! and only then swapped in. A journal failure leaves memory untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use crossbridge_types::{
    AccountId, BridgeError, Clock, FailureRecord, Operation, OperationId, OperationRequest,
    OperationStatus, Result, TxReceipt, ValidatorVote,
};

use crate::journal::{JournalEvent, JournalRecord, JournalSink, MemoryJournal};

/// `None` once the operation has been discarded.
type Slot = Arc<Mutex<Option<Operation>>>;

/// Concurrent, journaled registry of bridge operations.
pub struct OperationStore {
    operations: DashMap<OperationId, Slot>,
    /// Ids per initiator, ascending.
    by_initiator: DashMap<AccountId, Vec<OperationId>>,
    /// Next id to assign. Owned here and nowhere else.
    sequence: Mutex<OperationId>,
    journal: Arc<dyn JournalSink>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for OperationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStore")
            .field("live", &self.operations.len())
            .field("next_id", &*self.sequence.lock())
            .finish_non_exhaustive()
    }
}

impl OperationStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, journal: Arc<dyn JournalSink>) -> Self {
        Self {
            operations: DashMap::new(),
            by_initiator: DashMap::new(),
            sequence: Mutex::new(OperationId(0)),
            journal,
            clock,
        }
    }

    /// Store backed by a fresh [`MemoryJournal`].
    #[must_use]
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, Arc::new(MemoryJournal::new()))
    }

    /// Validate `request` and register it as a PENDING operation.
    ///
    /// # Errors
    /// `InvalidAmount`, `InvalidRecipient` or `InvalidRequest` from request
    /// validation; `Io`/`Serialization` if the journal write fails.
    pub fn create(&self, request: OperationRequest) -> Result<OperationId> {
        request.validate()?;

        let now = self.clock.now();
        let mut next = self.sequence.lock();
        let id = *next;
        let operation = Operation::from_request(id, request, now);

        self.journal.append(
            now,
            JournalEvent::Created {
                operation: Box::new(operation.clone()),
            },
        )?;

        tracing::debug!(
            operation_id = %id,
            kind = %operation.kind,
            initiator = %operation.initiator,
            "Operation created"
        );

        self.by_initiator
            .entry(operation.initiator.clone())
            .or_default()
            .push(id);
        self.operations
            .insert(id, Arc::new(Mutex::new(Some(operation))));
        *next = id.next();
        Ok(id)
    }

    /// Clone of the operation's current state.
    ///
    /// # Errors
    /// `NotFound` if the id was never assigned or was discarded.
    pub fn get(&self, id: OperationId) -> Result<Operation> {
        let slot = self.slot(id)?;
        let guard = slot.lock();
        guard.clone().ok_or(BridgeError::NotFound(id))
    }

    #[must_use]
    pub fn contains(&self, id: OperationId) -> bool {
        self.get(id).is_ok()
    }

    /// Move an operation to `to`, if the transition table allows it.
    ///
    /// # Errors
    /// `NotFound`, or `IllegalTransition` for any edge not in
    /// PENDING→VALIDATING, VALIDATING→COMPLETED|FAILED,
    /// FAILED→PENDING|ABANDONED.
    pub fn transition(&self, id: OperationId, to: OperationStatus) -> Result<Operation> {
        self.modify(id, |entry| {
            entry.transition(to)?;
            Ok(entry.operation().clone())
        })
    }

    /// Run `f` with exclusive access to one operation.
    ///
    /// The lock is held for the duration of `f`; keep it short and never
    /// call out to a chain connector from inside.
    ///
    /// # Errors
    /// `NotFound`, or whatever `f` returns.
    pub fn modify<T>(
        &self,
        id: OperationId,
        f: impl FnOnce(&mut OperationEntry<'_>) -> Result<T>,
    ) -> Result<T> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock();
        let operation = guard.as_mut().ok_or(BridgeError::NotFound(id))?;
        let mut entry = OperationEntry {
            operation,
            journal: self.journal.as_ref(),
            clock: self.clock.as_ref(),
        };
        f(&mut entry)
    }

    /// Withdraw a PENDING operation that nobody has voted on.
    ///
    /// Only the initiator may discard. The id is not reused.
    ///
    /// # Errors
    /// `NotFound`, or `CannotDiscard` if the operation has votes, has
    /// already been dispatched, is not PENDING, or `by` is not the initiator.
    pub fn discard(&self, id: OperationId, by: &AccountId) -> Result<()> {
        let slot = self.slot(id)?;
        let mut guard = slot.lock();
        let operation = guard.as_ref().ok_or(BridgeError::NotFound(id))?;
        check_discardable(operation, by)?;

        let initiator = operation.initiator.clone();
        self.journal.append(
            self.clock.now(),
            JournalEvent::Discarded { id, by: by.clone() },
        )?;
        *guard = None;
        drop(guard);

        self.operations.remove(&id);
        if let Some(mut ids) = self.by_initiator.get_mut(&initiator) {
            ids.retain(|existing| *existing != id);
        }
        tracing::info!(operation_id = %id, by = %by, "Operation discarded");
        Ok(())
    }

    /// Ids initiated by `account`, ascending. Discarded ids are omitted.
    pub fn operations_of(&self, account: &AccountId) -> Vec<OperationId> {
        self.by_initiator
            .get(account)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Number of ids ever assigned (the next id to be handed out).
    pub fn operation_count(&self) -> u64 {
        self.sequence.lock().0
    }

    /// Number of live (not discarded) operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// The sink this store journals to. Other bridge state shares it so
    /// one record sequence covers everything.
    pub fn journal(&self) -> Arc<dyn JournalSink> {
        Arc::clone(&self.journal)
    }

    /// Consistent-per-operation copy of every live operation, by id.
    pub fn snapshot(&self) -> Vec<Operation> {
        let slots: Vec<Slot> = self
            .operations
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut operations: Vec<Operation> =
            slots.iter().filter_map(|slot| slot.lock().clone()).collect();
        operations.sort_by_key(|op| op.id);
        operations
    }

    /// Ids currently in `status`, ascending.
    ///
    /// After a restart, operations found in VALIDATING were mid-dispatch
    /// when the process stopped and need operator attention.
    pub fn ids_in_status(&self, status: OperationStatus) -> Vec<OperationId> {
        self.snapshot()
            .into_iter()
            .filter(|op| op.status == status)
            .map(|op| op.id)
            .collect()
    }

    /// Rebuild a store from journal records.
    ///
    /// `journal` receives all *future* records; it should already contain
    /// `records` (e.g. [`crate::FileJournal::open`] on the same file).
    ///
    /// # Errors
    /// `JournalCorrupted` on a sequence gap, an id gap or out-of-order id,
    /// an event for an unknown operation, or a transition the operation
    /// could not have made. This is a startup failure, not a runtime one.
    pub fn replay(
        records: &[JournalRecord],
        clock: Arc<dyn Clock>,
        journal: Arc<dyn JournalSink>,
    ) -> Result<Self> {
        let store = Self::new(clock, journal);

        for (expected_seq, record) in (0u64..).zip(records) {
            if record.seq != expected_seq {
                return Err(corrupted(
                    record.seq,
                    &format!("expected seq {expected_seq}"),
                ));
            }
            store.replay_one(record)?;
        }

        tracing::info!(
            records = records.len(),
            operations = store.len(),
            next_id = store.operation_count(),
            "Operation store replayed"
        );
        Ok(store)
    }

    fn replay_one(&self, record: &JournalRecord) -> Result<()> {
        match &record.event {
            JournalEvent::Created { operation } => {
                let mut next = self.sequence.lock();
                if operation.id != *next {
                    return Err(corrupted(
                        record.seq,
                        &format!("expected {}, found {}", *next, operation.id),
                    ));
                }
                if operation.status != OperationStatus::Pending {
                    return Err(corrupted(record.seq, "created in non-PENDING status"));
                }
                self.by_initiator
                    .entry(operation.initiator.clone())
                    .or_default()
                    .push(operation.id);
                self.operations.insert(
                    operation.id,
                    Arc::new(Mutex::new(Some(operation.as_ref().clone()))),
                );
                *next = operation.id.next();
                Ok(())
            }
            JournalEvent::Discarded { id, by } => {
                let slot = self
                    .slot(*id)
                    .map_err(|e| corrupted(record.seq, &e.to_string()))?;
                let mut guard = slot.lock();
                let operation = guard
                    .as_ref()
                    .ok_or_else(|| corrupted(record.seq, "discard of discarded operation"))?;
                check_discardable(operation, by).map_err(|e| corrupted(record.seq, &e.to_string()))?;
                let initiator = operation.initiator.clone();
                *guard = None;
                drop(guard);
                self.operations.remove(id);
                if let Some(mut ids) = self.by_initiator.get_mut(&initiator) {
                    ids.retain(|existing| existing != id);
                }
                Ok(())
            }
            event => {
                // message events belong to the message channel
                let Some(id) = event.operation_id() else {
                    return Ok(());
                };
                let slot = self
                    .slot(id)
                    .map_err(|e| corrupted(record.seq, &e.to_string()))?;
                let mut guard = slot.lock();
                let operation = guard
                    .as_mut()
                    .ok_or_else(|| corrupted(record.seq, "event for discarded operation"))?;
                apply(operation, event, record.at).map_err(|e| corrupted(record.seq, &e.to_string()))
            }
        }
    }

    fn slot(&self, id: OperationId) -> Result<Slot> {
        self.operations
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(BridgeError::NotFound(id))
    }
}

/// Exclusive handle on one operation, valid inside [`OperationStore::modify`].
///
/// Every mutator journals before it changes memory.
pub struct OperationEntry<'a> {
    operation: &'a mut Operation,
    journal: &'a dyn JournalSink,
    clock: &'a dyn Clock,
}

impl OperationEntry<'_> {
    #[must_use]
    pub fn operation(&self) -> &Operation {
        self.operation
    }

    /// # Errors
    /// `IllegalTransition` if `to` is not reachable from the current status.
    pub fn transition(&mut self, to: OperationStatus) -> Result<()> {
        let event = JournalEvent::Transitioned {
            id: self.operation.id,
            from: self.operation.status,
            to,
        };
        self.commit(event)
    }

    /// VALIDATING → COMPLETED, storing the connector receipt.
    ///
    /// # Errors
    /// `IllegalTransition` unless VALIDATING.
    pub fn complete(&mut self, receipt: TxReceipt) -> Result<()> {
        self.commit(JournalEvent::Completed {
            id: self.operation.id,
            receipt,
        })
    }

    /// VALIDATING → FAILED, storing why.
    ///
    /// # Errors
    /// `IllegalTransition` unless VALIDATING.
    pub fn fail(&mut self, failure: FailureRecord) -> Result<()> {
        self.commit(JournalEvent::ExecutionFailed {
            id: self.operation.id,
            failure,
        })
    }

    /// # Errors
    /// `AlreadyFinalized` unless PENDING or VALIDATING.
    pub fn record_vote(&mut self, vote: ValidatorVote) -> Result<()> {
        self.commit(JournalEvent::VoteCast { vote })
    }

    /// # Errors
    /// `AlreadyFinalized` on a terminal operation.
    pub fn clear_votes(&mut self) -> Result<()> {
        self.commit(JournalEvent::VotesCleared {
            id: self.operation.id,
        })
    }

    /// Leave an audit record that the retry budget is spent.
    pub fn note_retry_limit(&mut self, max: u32) -> Result<()> {
        self.commit(JournalEvent::RetryLimitReached {
            id: self.operation.id,
            retries: self.operation.retries,
            max,
        })
    }

    fn commit(&mut self, event: JournalEvent) -> Result<()> {
        let at = self.clock.now();
        let mut next = self.operation.clone();
        apply(&mut next, &event, at)?;
        self.journal.append(at, event)?;
        *self.operation = next;
        Ok(())
    }
}

// ── Event application ────────────────────────────────────────────────────
// Shared by live mutation and replay, so both follow the same rules.

fn apply(operation: &mut Operation, event: &JournalEvent, at: DateTime<Utc>) -> Result<()> {
    match event {
        JournalEvent::Created { .. }
        | JournalEvent::Discarded { .. }
        | JournalEvent::MessageSent { .. }
        | JournalEvent::MessageDelivered { .. }
        | JournalEvent::MessageRecoveryOpened { .. }
        | JournalEvent::MessageRecoveryAttemptFailed { .. }
        | JournalEvent::MessageRecovered { .. } => Err(BridgeError::Internal(format!(
            "{} cannot be applied to an existing operation",
            operation.id
        ))),
        JournalEvent::Transitioned { from, to, .. } => {
            if operation.status != *from {
                return Err(BridgeError::IllegalTransition {
                    id: operation.id,
                    from: operation.status,
                    to: *to,
                });
            }
            set_status(operation, *to, at)
        }
        JournalEvent::VoteCast { vote } => {
            if !operation.status.accepts_votes() {
                return Err(BridgeError::AlreadyFinalized {
                    id: operation.id,
                    status: operation.status,
                });
            }
            operation.record_vote(vote.clone());
            Ok(())
        }
        JournalEvent::VotesCleared { .. } => {
            if operation.status.is_terminal() {
                return Err(BridgeError::AlreadyFinalized {
                    id: operation.id,
                    status: operation.status,
                });
            }
            operation.votes.clear();
            Ok(())
        }
        JournalEvent::Completed { receipt, .. } => {
            set_status(operation, OperationStatus::Completed, at)?;
            operation.receipt = Some(receipt.clone());
            Ok(())
        }
        JournalEvent::ExecutionFailed { failure, .. } => {
            set_status(operation, OperationStatus::Failed, at)?;
            operation.last_failure = Some(failure.clone());
            Ok(())
        }
        JournalEvent::RetryLimitReached { .. } => Ok(()),
    }
}

fn set_status(operation: &mut Operation, to: OperationStatus, at: DateTime<Utc>) -> Result<()> {
    let from = operation.status;
    if !from.can_transition_to(to) {
        return Err(BridgeError::IllegalTransition {
            id: operation.id,
            from,
            to,
        });
    }
    match to {
        OperationStatus::Validating => {
            operation.attempts += 1;
            operation.validated_at.get_or_insert(at);
        }
        OperationStatus::Completed => {
            operation.completed_at.get_or_insert(at);
        }
        OperationStatus::Pending => {
            operation.retries += 1;
        }
        OperationStatus::Failed | OperationStatus::Abandoned => {}
    }
    operation.status = to;
    Ok(())
}

fn check_discardable(operation: &Operation, by: &AccountId) -> Result<()> {
    let id = operation.id;
    let reason = if operation.initiator != *by {
        Some(format!("{by} is not the initiator"))
    } else if operation.status != OperationStatus::Pending {
        Some(format!("status is {}", operation.status))
    } else if operation.has_votes() {
        Some(format!("{} vote(s) already cast", operation.votes.len()))
    } else if operation.attempts > 0 {
        Some("operation was already dispatched".to_string())
    } else {
        None
    };
    match reason {
        Some(reason) => Err(BridgeError::CannotDiscard { id, reason }),
        None => Ok(()),
    }
}

fn corrupted(seq: u64, detail: &str) -> BridgeError {
    BridgeError::JournalCorrupted {
        reason: format!("record {seq}: {detail}"),
    }
}
