//! # Operation: the unit of work moved across the bridge
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  quorum (+timelock)  ┌────────────┐  connector ok  ┌───────────┐
//!   │ PENDING ├─────────────────────▶│ VALIDATING ├───────────────▶│ COMPLETED │
//!   └────▲────┘                      └─────┬──────┘                └───────────┘
//!        │ retry                           │ connector error
//!        │                           ┌─────▼──┐   operator    ┌───────────┐
//!        └───────────────────────────┤ FAILED ├──────────────▶│ ABANDONED │
//!                                    └────────┘               └───────────┘
//! ```
//!
//! `COMPLETED` and `ABANDONED` are terminal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    constants, AccountId, BridgeError, CertificateId, OperationId, Result, TransferAsset,
    TxReceipt, ValidatorId,
};

/// What an operation moves across the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OperationKind {
    /// L1 → L2 fungible token transfer.
    TokenDeposit,
    /// L2 → L1 fungible token transfer. The only timelocked direction.
    TokenWithdrawal,
    /// Non-fungible certificate transfer.
    CertificateBridge,
    /// Opaque payload delivery.
    Message,
}

impl OperationKind {
    pub const ALL: [Self; 4] = [
        Self::TokenDeposit,
        Self::TokenWithdrawal,
        Self::CertificateBridge,
        Self::Message,
    ];

    /// Token kinds carry an amount.
    #[must_use]
    pub fn is_token(self) -> bool {
        matches!(self, Self::TokenDeposit | Self::TokenWithdrawal)
    }

    /// Only withdrawals consult the withdrawal timelock.
    #[must_use]
    pub fn requires_timelock(self) -> bool {
        self == Self::TokenWithdrawal
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenDeposit => write!(f, "TOKEN_DEPOSIT"),
            Self::TokenWithdrawal => write!(f, "TOKEN_WITHDRAWAL"),
            Self::CertificateBridge => write!(f, "CERTIFICATE_BRIDGE"),
            Self::Message => write!(f, "MESSAGE"),
        }
    }
}

/// Lifecycle status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    Validating,
    Completed,
    Failed,
    /// Operator-declared terminal state for a failed operation.
    Abandoned,
}

impl OperationStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Validating,
        Self::Completed,
        Self::Failed,
        Self::Abandoned,
    ];

    /// Can an operation move from this status to `target`?
    #[must_use]
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Validating)
                | (Self::Validating, Self::Completed | Self::Failed)
                | (Self::Failed, Self::Pending | Self::Abandoned)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Abandoned)
    }

    /// Votes are only accepted while the operation is still in flight.
    #[must_use]
    pub fn accepts_votes(self) -> bool {
        matches!(self, Self::Pending | Self::Validating)
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Validating => write!(f, "VALIDATING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Abandoned => write!(f, "ABANDONED"),
        }
    }
}

/// A single validator's binary verdict on an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorVote {
    pub operation_id: OperationId,
    pub validator_id: ValidatorId,
    pub approved: bool,
    pub cast_at: DateTime<Utc>,
}

/// Why the last execution attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub reason: String,
    /// Unlikely to succeed on a naive retry (still retryable).
    pub permanent: bool,
    pub attempt: u32,
    pub failed_at: DateTime<Utc>,
}

/// Client-facing submission: what to move, from whom, to whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub initiator: AccountId,
    pub recipient: AccountId,
    pub amount: Option<u128>,
    pub asset_ref: Option<CertificateId>,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl OperationRequest {
    #[must_use]
    pub fn token_deposit(initiator: AccountId, recipient: AccountId, amount: u128) -> Self {
        Self {
            kind: OperationKind::TokenDeposit,
            initiator,
            recipient,
            amount: Some(amount),
            asset_ref: None,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn token_withdrawal(initiator: AccountId, recipient: AccountId, amount: u128) -> Self {
        Self {
            kind: OperationKind::TokenWithdrawal,
            initiator,
            recipient,
            amount: Some(amount),
            asset_ref: None,
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn certificate_bridge(
        initiator: AccountId,
        recipient: AccountId,
        certificate: CertificateId,
    ) -> Self {
        Self {
            kind: OperationKind::CertificateBridge,
            initiator,
            recipient,
            amount: None,
            asset_ref: Some(certificate),
            payload: Vec::new(),
        }
    }

    #[must_use]
    pub fn message(initiator: AccountId, recipient: AccountId, payload: Vec<u8>) -> Self {
        Self {
            kind: OperationKind::Message,
            initiator,
            recipient,
            amount: None,
            asset_ref: None,
            payload,
        }
    }

    /// Attach opaque metadata (e.g. a certificate URI) to a non-message request.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Structural validation performed before an id is assigned.
    ///
    /// # Errors
    /// - `InvalidRecipient` if the recipient is a null address
    /// - `InvalidAmount` if a token request has no amount or amount 0
    /// - `InvalidRequest` for missing certificates, empty messages, oversized
    ///   payloads, a null initiator, or fields that don't belong to the kind
    pub fn validate(&self) -> Result<()> {
        if self.recipient.is_null() {
            return Err(BridgeError::InvalidRecipient);
        }
        if self.initiator.is_null() {
            return Err(BridgeError::InvalidRequest {
                reason: "initiator must not be a null address".to_string(),
            });
        }
        if self.payload.len() > constants::MAX_PAYLOAD_BYTES {
            return Err(BridgeError::InvalidRequest {
                reason: format!(
                    "payload of {} bytes exceeds maximum {}",
                    self.payload.len(),
                    constants::MAX_PAYLOAD_BYTES
                ),
            });
        }

        match self.kind {
            OperationKind::TokenDeposit | OperationKind::TokenWithdrawal => {
                match self.amount {
                    Some(amount) if amount > 0 => {}
                    _ => return Err(BridgeError::InvalidAmount),
                }
                if self.asset_ref.is_some() {
                    return Err(BridgeError::InvalidRequest {
                        reason: format!("{} does not carry a certificate", self.kind),
                    });
                }
            }
            OperationKind::CertificateBridge => {
                if self.asset_ref.is_none() {
                    return Err(BridgeError::InvalidRequest {
                        reason: "certificate bridge requires asset_ref".to_string(),
                    });
                }
                if self.amount.is_some() {
                    return Err(BridgeError::InvalidRequest {
                        reason: "certificate bridge does not carry an amount".to_string(),
                    });
                }
            }
            OperationKind::Message => {
                if self.payload.is_empty() {
                    return Err(BridgeError::InvalidRequest {
                        reason: "message requires a non-empty payload".to_string(),
                    });
                }
                if self.amount.is_some() || self.asset_ref.is_some() {
                    return Err(BridgeError::InvalidRequest {
                        reason: "message carries neither amount nor asset_ref".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A bridge operation tracked through its lifecycle.
///
/// Owned exclusively by the operation store; everything else sees clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub initiator: AccountId,
    pub recipient: AccountId,
    pub amount: Option<u128>,
    pub asset_ref: Option<CertificateId>,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// One vote per validator; a later vote overwrites an earlier one.
    pub votes: BTreeMap<ValidatorId, ValidatorVote>,
    /// Number of connector dispatches made so far.
    pub attempts: u32,
    /// Number of times the operation was re-armed from FAILED.
    pub retries: u32,
    pub last_failure: Option<FailureRecord>,
    pub receipt: Option<TxReceipt>,
}

impl Operation {
    /// Build a fresh PENDING operation from a validated request.
    #[must_use]
    pub fn from_request(id: OperationId, request: OperationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            kind: request.kind,
            status: OperationStatus::Pending,
            initiator: request.initiator,
            recipient: request.recipient,
            amount: request.amount,
            asset_ref: request.asset_ref,
            payload: request.payload,
            created_at: now,
            validated_at: None,
            completed_at: None,
            votes: BTreeMap::new(),
            attempts: 0,
            retries: 0,
            last_failure: None,
            receipt: None,
        }
    }

    /// Validators who approved, in id order.
    pub fn approvals(&self) -> impl Iterator<Item = &ValidatorId> {
        self.votes
            .values()
            .filter(|vote| vote.approved)
            .map(|vote| &vote.validator_id)
    }

    /// Record a vote, replacing any earlier vote by the same validator.
    pub fn record_vote(&mut self, vote: ValidatorVote) {
        self.votes.insert(vote.validator_id.clone(), vote);
    }

    #[must_use]
    pub fn has_votes(&self) -> bool {
        !self.votes.is_empty()
    }

    /// What the connector must move for this operation.
    #[must_use]
    pub fn transfer_asset(&self) -> TransferAsset {
        match (self.kind, self.amount, self.asset_ref) {
            (OperationKind::TokenDeposit | OperationKind::TokenWithdrawal, Some(amount), _) => {
                TransferAsset::Tokens(amount)
            }
            (OperationKind::CertificateBridge, _, Some(certificate)) => TransferAsset::Certificate {
                certificate,
                metadata: self.payload.clone(),
            },
            _ => TransferAsset::Payload(self.payload.clone()),
        }
    }

    /// Elapsed time from creation to completion, if completed.
    #[must_use]
    pub fn time_to_completion(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }
}

/// Test helpers.
#[cfg(any(test, feature = "test-helpers"))]
impl OperationRequest {
    /// Deposit of `amount` from `user` to itself.
    pub fn dummy_deposit(user: &str, amount: u128) -> Self {
        Self::token_deposit(AccountId::new(user), AccountId::new(user), amount)
    }

    /// Withdrawal of `amount` from `user` to itself.
    pub fn dummy_withdrawal(user: &str, amount: u128) -> Self {
        Self::token_withdrawal(AccountId::new(user), AccountId::new(user), amount)
    }
}
