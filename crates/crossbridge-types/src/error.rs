//! Error types for the Crossbridge coordination core.
//!
//! All errors use the `XB_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (client mistakes, never retried automatically)
//! - 2xx: Lifecycle errors (state machine)
//! - 3xx: Temporal errors (withdrawal timelock)
//! - 4xx: Consensus errors
//! - 5xx: Execution errors
//! - 6xx: Replay errors
//! - 7xx: Capacity errors
//! - 8xx: Control errors (pause, roles, retry budget)
//! - 9xx: General / internal errors

use std::time::Duration;

use thiserror::Error;

use crate::{AccountId, MessageId, OperationId, OperationStatus, ValidatorId};

/// Central error enum for all Crossbridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// A token operation was submitted with a zero amount.
    #[error("XB_ERR_100: Invalid amount: token operations require amount > 0")]
    InvalidAmount,

    /// The recipient is a null or empty address.
    #[error("XB_ERR_101: Invalid recipient: null or empty address")]
    InvalidRecipient,

    /// The request is structurally invalid (missing asset, empty payload, ...).
    #[error("XB_ERR_102: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The caller is not a registered validator.
    #[error("XB_ERR_103: Not a validator: {0}")]
    NotAValidator(ValidatorId),

    /// The caller does not hold the operator role.
    #[error("XB_ERR_104: Not an operator: {0}")]
    NotAnOperator(AccountId),

    /// A vote or execution referenced an operation id that does not exist.
    #[error("XB_ERR_105: Unknown operation: {0}")]
    UnknownOperation(OperationId),

    /// Lookup of an operation that does not exist.
    #[error("XB_ERR_106: Operation not found: {0}")]
    NotFound(OperationId),

    /// The message id does not match the payload it claims to identify.
    #[error("XB_ERR_107: Message id mismatch: {0} is not the hash of the payload")]
    MessageIdMismatch(MessageId),

    // =================================================================
    // Lifecycle Errors (2xx)
    // =================================================================
    /// The requested status change is not in the transition table.
    #[error("XB_ERR_200: Illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// The operation already reached a state that accepts no more votes.
    #[error("XB_ERR_201: Operation already finalized: {id} is {status}")]
    AlreadyFinalized {
        id: OperationId,
        status: OperationStatus,
    },

    /// Another caller is currently executing this operation.
    #[error("XB_ERR_202: Execution already in progress for {0}")]
    ExecutionInProgress(OperationId),

    /// The operation cannot be discarded (not pending, voted on, or wrong caller).
    #[error("XB_ERR_203: Cannot discard {id}: {reason}")]
    CannotDiscard { id: OperationId, reason: String },

    // =================================================================
    // Temporal Errors (3xx)
    // =================================================================
    /// The withdrawal timelock has not elapsed for this user yet.
    #[error("XB_ERR_300: Withdrawal delay not met: {}s remaining", .remaining.as_secs())]
    DelayNotMet { remaining: Duration },

    /// Another withdrawal for this user passed the timelock and is being
    /// dispatched. Its outcome decides the next eligible time.
    #[error("XB_ERR_301: Withdrawal already in flight for {0}")]
    WithdrawalInFlight(AccountId),

    // =================================================================
    // Consensus Errors (4xx)
    // =================================================================
    /// Not enough approvals from registered validators yet.
    #[error("XB_ERR_400: Quorum not reached for {id}: {approvals}/{threshold} approvals")]
    QuorumNotReached {
        id: OperationId,
        approvals: usize,
        threshold: usize,
    },

    // =================================================================
    // Execution Errors (5xx)
    // =================================================================
    /// The chain connector failed; the operation is now FAILED.
    ///
    /// `permanent` flags failures unlikely to succeed on a naive retry
    /// (insufficient funds, contract revert). They remain retryable.
    #[error("XB_ERR_500: Execution failed for {id}: {reason}")]
    ExecutionFailed {
        id: OperationId,
        reason: String,
        permanent: bool,
    },

    /// The initiator's balance on the source chain cannot cover a withdrawal.
    #[error("XB_ERR_501: Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u128, available: u128 },

    // =================================================================
    // Replay Errors (6xx)
    // =================================================================
    /// The operation was already completed; it is never executed twice.
    #[error("XB_ERR_600: Operation already processed: {0}")]
    AlreadyProcessed(OperationId),

    /// The message was already delivered on this side.
    #[error("XB_ERR_601: Message already processed: {0}")]
    MessageAlreadyProcessed(MessageId),

    // =================================================================
    // Capacity Errors (7xx)
    // =================================================================
    /// The batch exceeds the configured ceiling; nothing was processed.
    #[error("XB_ERR_700: Batch too large: {size} items, max {max}")]
    BatchTooLarge { size: usize, max: usize },

    // =================================================================
    // Control Errors (8xx)
    // =================================================================
    /// The bridge is paused by an operator.
    #[error("XB_ERR_800: Bridge is paused")]
    BridgePaused,

    /// The retry budget for this operation is spent; operator review required.
    #[error("XB_ERR_801: Retry limit reached for {id}: {attempts} attempts, max {max}")]
    RetryLimitExceeded {
        id: OperationId,
        attempts: u32,
        max: u32,
    },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("XB_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("XB_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, out-of-range values, etc.).
    #[error("XB_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (journal file, disk).
    #[error("XB_ERR_903: I/O error: {0}")]
    Io(String),

    /// The persisted journal violates a store invariant. Fatal at startup.
    #[error("XB_ERR_904: Journal corrupted: {reason}")]
    JournalCorrupted { reason: String },
}

impl BridgeError {
    /// Whether this error means "try again later" rather than "this is wrong".
    ///
    /// Temporal and consensus errors leave the operation untouched.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DelayNotMet { .. }
                | Self::WithdrawalInFlight(_)
                | Self::QuorumNotReached { .. }
                | Self::ExecutionInProgress(_)
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, BridgeError>;

// Conversion from std::io::Error
impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
