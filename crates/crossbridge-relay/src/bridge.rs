//! The [`Bridge`]: one coordinator wiring every component together.
//!
//! This is the surface an API or CLI layer talks to. It adds the
//! cross-cutting controls the components don't know about:
//! - the pause switch (blocks submission and execution, not votes, reads or
//!   operator recovery)
//! - operator checks on administrative calls

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbridge_ledger::{
    JournalRecord, JournalSink, MemoryJournal, OperationStore, ValidatorRegistry,
};
use crossbridge_types::{
    AccountId, BridgeConfig, BridgeError, ChainConnector, Clock, MessageId, Operation,
    OperationId, OperationRequest, Result, TxReceipt, ValidatorId,
};

use crate::batch::BatchCoordinator;
use crate::consensus::ConsensusGate;
use crate::executor::TransferExecutor;
use crate::message::{DeliveryRecord, MessageChannel, MessageRecovery};
use crate::recovery::{FailureClass, RecoveryController};
use crate::stats::BridgeStats;
use crate::timelock::WithdrawalTimelock;

/// Bridge coordination core.
pub struct Bridge {
    config: BridgeConfig,
    store: Arc<OperationStore>,
    registry: Arc<ValidatorRegistry>,
    gate: Arc<ConsensusGate>,
    timelock: Arc<WithdrawalTimelock>,
    executor: Arc<TransferExecutor>,
    recovery: RecoveryController,
    channel: MessageChannel,
    batch: BatchCoordinator,
    paused: AtomicBool,
}

impl Bridge {
    /// In-memory bridge with `operator` as the initial operator.
    ///
    /// # Errors
    /// `Configuration` if `config` is out of range.
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn ChainConnector>,
        clock: Arc<dyn Clock>,
        operator: AccountId,
    ) -> Result<Self> {
        let registry = Arc::new(ValidatorRegistry::with_operator(operator));
        Self::replay(
            config,
            &[],
            Arc::new(MemoryJournal::new()),
            registry,
            connector,
            clock,
        )
    }

    /// Rebuild a bridge from journal records, operations and messages alike.
    ///
    /// `journal` receives all future records and should already hold
    /// `records` (e.g. the sink returned by `FileJournal::open`).
    ///
    /// # Errors
    /// `Configuration` if `config` is out of range, `JournalCorrupted` if
    /// the records cannot be replayed.
    pub fn replay(
        config: BridgeConfig,
        records: &[JournalRecord],
        journal: Arc<dyn JournalSink>,
        registry: Arc<ValidatorRegistry>,
        connector: Arc<dyn ChainConnector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(OperationStore::replay(
            records,
            Arc::clone(&clock),
            Arc::clone(&journal),
        )?);
        let channel = MessageChannel::replay(records, Arc::clone(&clock), journal)?;

        let gate = Arc::new(ConsensusGate::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.quorum,
            Arc::clone(&clock),
        ));
        let timelock = Arc::new(WithdrawalTimelock::new(config.timelock));
        // A restarted bridge must not forget pending withdrawal stamps.
        for operation in store.snapshot() {
            if operation.kind.requires_timelock() {
                timelock.record(&operation.initiator, operation.created_at);
                if let Some(completed_at) = operation.completed_at {
                    timelock.record(&operation.initiator, completed_at);
                }
            }
        }
        let executor = Arc::new(TransferExecutor::new(
            Arc::clone(&store),
            Arc::clone(&gate),
            Arc::clone(&timelock),
            connector,
            Arc::clone(&clock),
        ));
        let recovery = RecoveryController::new(Arc::clone(&store), config.retry);
        let batch = BatchCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&timelock),
            Arc::clone(&executor),
            config.max_batch_size,
        );

        tracing::info!(
            quorum = ?config.quorum,
            withdrawal_delay_secs = config.timelock.withdrawal_delay_secs,
            max_batch_size = config.max_batch_size,
            operations = store.operation_count(),
            messages_delivered = channel.delivered_count(),
            "Bridge initialised"
        );

        Ok(Self {
            config,
            store,
            registry,
            gate,
            timelock,
            executor,
            recovery,
            channel,
            batch,
            paused: AtomicBool::new(false),
        })
    }

    // ── Submission ──────────────────────────────────────────────────────

    /// # Errors
    /// `BridgePaused`, or request validation errors.
    pub fn submit(&self, request: OperationRequest) -> Result<OperationId> {
        self.ensure_running()?;
        self.batch.submit(request)
    }

    /// # Errors
    /// `BridgePaused` or `BatchTooLarge` for the whole batch; per-item
    /// errors are in the returned vector.
    pub fn submit_batch(
        &self,
        requests: Vec<OperationRequest>,
    ) -> Result<Vec<Result<OperationId>>> {
        self.ensure_running()?;
        self.batch.submit_batch(requests)
    }

    /// Withdraw a PENDING operation nobody has voted on. Initiator only.
    ///
    /// # Errors
    /// `NotFound` or `CannotDiscard`.
    pub fn discard(&self, caller: &AccountId, id: OperationId) -> Result<()> {
        self.store.discard(id, caller)
    }

    // ── Consensus ───────────────────────────────────────────────────────

    /// # Errors
    /// `NotAValidator`, `UnknownOperation`, `AlreadyFinalized`.
    pub fn vote(&self, id: OperationId, validator: &ValidatorId, approved: bool) -> Result<()> {
        self.gate.vote(id, validator, approved)
    }

    /// # Errors
    /// `UnknownOperation`.
    pub fn has_quorum(&self, id: OperationId) -> Result<bool> {
        self.gate.has_quorum(id)
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// # Errors
    /// `BridgePaused`, or anything [`TransferExecutor::execute`] returns.
    pub fn execute(&self, id: OperationId) -> Result<TxReceipt> {
        self.ensure_running()?;
        self.executor.execute(id)
    }

    /// # Errors
    /// `BridgePaused` or `BatchTooLarge`.
    pub fn execute_batch(&self, ids: &[OperationId]) -> Result<Vec<Result<TxReceipt>>> {
        self.ensure_running()?;
        self.batch.execute_batch(ids)
    }

    // ── Recovery (operator) ─────────────────────────────────────────────

    /// # Errors
    /// `NotAnOperator`, or anything [`RecoveryController::retry`] returns.
    pub fn retry(&self, operator: &AccountId, id: OperationId) -> Result<()> {
        self.registry.require_operator(operator)?;
        self.recovery.retry(id)
    }

    /// # Errors
    /// `NotAnOperator`, `UnknownOperation`, `IllegalTransition`.
    pub fn abandon(&self, operator: &AccountId, id: OperationId) -> Result<()> {
        self.registry.require_operator(operator)?;
        self.recovery.abandon(id)
    }

    /// # Errors
    /// `UnknownOperation`.
    pub fn failure_class(&self, id: OperationId) -> Result<FailureClass> {
        self.recovery.classify(id)
    }

    // ── Messages ────────────────────────────────────────────────────────

    /// # Errors
    /// `MessageIdMismatch`, `InvalidRequest`.
    pub fn send_message(&self, message_id: MessageId, payload: &[u8]) -> Result<()> {
        self.channel.send(message_id, payload)
    }

    /// # Errors
    /// `MessageIdMismatch`, `InvalidRecipient`, `MessageAlreadyProcessed`.
    pub fn deliver_message(
        &self,
        message_id: MessageId,
        sender: &AccountId,
        recipient: &AccountId,
        payload: &[u8],
    ) -> Result<()> {
        self.channel.deliver(message_id, sender, recipient, payload)
    }

    pub fn is_message_processed(&self, message_id: &MessageId) -> bool {
        self.channel.is_processed(message_id)
    }

    pub fn message_delivery(&self, message_id: &MessageId) -> Option<DeliveryRecord> {
        self.channel.delivery(message_id)
    }

    /// Open a recovery for a sent message that never arrived.
    ///
    /// # Errors
    /// `NotAnOperator`, or `InvalidRequest` if the message is unknown,
    /// delivered, or already has a recovery.
    pub fn initiate_message_recovery(
        &self,
        operator: &AccountId,
        message_id: MessageId,
        reason: &str,
    ) -> Result<MessageRecovery> {
        self.registry.require_operator(operator)?;
        self.channel.initiate_recovery(message_id, reason, operator)
    }

    /// Re-attempt delivery of a message under recovery.
    ///
    /// # Errors
    /// `NotAnOperator`, `InvalidRequest` without an open recovery, or the
    /// delivery error (counted against the recovery).
    pub fn retry_message_recovery(
        &self,
        operator: &AccountId,
        message_id: MessageId,
        sender: &AccountId,
        recipient: &AccountId,
        payload: &[u8],
    ) -> Result<MessageRecovery> {
        self.registry.require_operator(operator)?;
        self.channel
            .retry_recovery(message_id, sender, recipient, payload, operator)
    }

    /// # Errors
    /// `NotAnOperator`, `InvalidRequest` without an open recovery.
    pub fn mark_message_recovered(
        &self,
        operator: &AccountId,
        message_id: MessageId,
        note: &str,
    ) -> Result<MessageRecovery> {
        self.registry.require_operator(operator)?;
        self.channel.mark_recovered(message_id, note, operator)
    }

    pub fn message_recovery(&self, message_id: &MessageId) -> Option<MessageRecovery> {
        self.channel.recovery_log(message_id)
    }

    pub fn open_message_recoveries(&self) -> Vec<MessageId> {
        self.channel.open_recoveries()
    }

    // ── Administration (operator) ───────────────────────────────────────

    /// # Errors
    /// `NotAnOperator`.
    pub fn pause(&self, operator: &AccountId) -> Result<()> {
        self.registry.require_operator(operator)?;
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::warn!(operator = %operator, "Bridge paused");
        }
        Ok(())
    }

    /// # Errors
    /// `NotAnOperator`.
    pub fn unpause(&self, operator: &AccountId) -> Result<()> {
        self.registry.require_operator(operator)?;
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::info!(operator = %operator, "Bridge unpaused");
        }
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// # Errors
    /// `NotAnOperator`, `InvalidRequest`.
    pub fn grant_validator(&self, operator: &AccountId, validator: ValidatorId) -> Result<bool> {
        self.registry.require_operator(operator)?;
        self.registry.grant(validator)
    }

    /// # Errors
    /// `NotAnOperator`.
    pub fn revoke_validator(&self, operator: &AccountId, validator: &ValidatorId) -> Result<bool> {
        self.registry.require_operator(operator)?;
        Ok(self.registry.revoke(validator))
    }

    /// # Errors
    /// `NotAnOperator`, `InvalidRequest`.
    pub fn grant_operator(&self, operator: &AccountId, account: AccountId) -> Result<bool> {
        self.registry.require_operator(operator)?;
        self.registry.grant_operator(account)
    }

    /// # Errors
    /// `NotAnOperator`.
    pub fn revoke_operator(&self, operator: &AccountId, account: &AccountId) -> Result<bool> {
        self.registry.require_operator(operator)?;
        Ok(self.registry.revoke_operator(account))
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// # Errors
    /// `NotFound`.
    pub fn operation(&self, id: OperationId) -> Result<Operation> {
        self.store.get(id)
    }

    pub fn operations_of(&self, account: &AccountId) -> Vec<OperationId> {
        self.store.operations_of(account)
    }

    pub fn operation_count(&self) -> u64 {
        self.store.operation_count()
    }

    pub fn stats(&self) -> BridgeStats {
        let mut stats = BridgeStats::from_operations(&self.store.snapshot());
        stats.operations_created = self.store.operation_count();
        stats.timelock_rejections = self.timelock.rejections();
        stats.messages_sent = self.channel.sent_count() as u64;
        stats.messages_delivered = self.channel.delivered_count() as u64;
        stats
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<OperationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    pub fn timelock(&self) -> &Arc<WithdrawalTimelock> {
        &self.timelock
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_paused() {
            Err(BridgeError::BridgePaused)
        } else {
            Ok(())
        }
    }
}
