//! The chain boundary.
//!
//! A [`ChainConnector`] performs the actual target-chain effect for an
//! operation that passed consensus. The coordination core never talks to a
//! chain directly; real connectors (EVM, Cosmos, ...) live outside this
//! workspace and implement this trait.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AccountId, CertificateId, OperationId, OperationKind, OperationStatus, TxReceipt};

/// What a connector should move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferAsset {
    /// Fungible tokens, in the token's smallest unit.
    Tokens(u128),
    /// A non-fungible certificate with its opaque metadata.
    Certificate {
        certificate: CertificateId,
        metadata: Vec<u8>,
    },
    /// Raw message payload.
    Payload(Vec<u8>),
}

/// Everything a connector needs to perform one dispatch.
///
/// `(operation_id, attempt)` uniquely identifies a dispatch; connectors may
/// use it as an idempotency key on the target chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub operation_id: OperationId,
    pub attempt: u32,
    pub kind: OperationKind,
    pub initiator: AccountId,
    pub recipient: AccountId,
    pub asset: TransferAsset,
}

/// Failure reported by a chain connector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    /// Network hiccup, RPC timeout, nonce race. Likely to succeed on retry.
    #[error("transient connector failure: {reason}")]
    Transient { reason: String },

    /// The source account cannot cover the transfer.
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u128, available: u128 },

    /// The target contract rejected the call.
    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },

    /// Any other failure a retry is not expected to fix.
    #[error("permanent connector failure: {reason}")]
    Permanent { reason: String },
}

impl ConnectorError {
    /// Whether a naive retry is unlikely to help.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::Transient { .. })
    }
}

/// Performs target-chain effects and reports lifecycle events.
///
/// Implementations must be callable from several threads at once. The
/// executor never holds an operation lock while calling into a connector.
pub trait ChainConnector: Send + Sync {
    /// Perform the transfer described by `instruction`.
    ///
    /// # Errors
    /// Any [`ConnectorError`]; the operation is marked FAILED.
    fn submit_transfer(
        &self,
        instruction: &TransferInstruction,
    ) -> std::result::Result<TxReceipt, ConnectorError>;

    /// Balance of `account` on the chain the connector writes from.
    ///
    /// # Errors
    /// A [`ConnectorError`] if the balance cannot be read.
    fn query_balance(&self, account: &AccountId) -> std::result::Result<u128, ConnectorError>;

    /// Observe a lifecycle change. Best effort; failures are not reported.
    fn emit_event(&self, operation_id: OperationId, status: OperationStatus);
}

// ---------------------------------------------------------------------------
// FakeConnector
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-helpers"))]
pub use fake::FakeConnector;

#[cfg(any(test, feature = "test-helpers"))]
mod fake {
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    use chrono::Utc;
    use parking_lot::Mutex;

    use super::{ChainConnector, ConnectorError, TransferAsset, TransferInstruction};
    use crate::{AccountId, CertificateId, OperationId, OperationKind, OperationStatus, TxReceipt};

    #[derive(Debug, Default)]
    struct FakeState {
        balances: HashMap<AccountId, u128>,
        certificates: HashMap<CertificateId, AccountId>,
        submissions: Vec<TransferInstruction>,
        scripted_failures: VecDeque<ConnectorError>,
        events: Vec<(OperationId, OperationStatus)>,
        latency: Option<Duration>,
    }

    /// In-memory connector used in tests.
    ///
    /// Deposits credit the recipient, withdrawals debit the initiator,
    /// certificates change owner. Failures can be scripted with
    /// [`FakeConnector::fail_next`].
    #[derive(Debug, Default)]
    pub struct FakeConnector {
        state: Mutex<FakeState>,
    }

    impl FakeConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_balance(&self, account: &AccountId, amount: u128) {
            self.state.lock().balances.insert(account.clone(), amount);
        }

        pub fn balance(&self, account: &AccountId) -> u128 {
            self.state
                .lock()
                .balances
                .get(account)
                .copied()
                .unwrap_or(0)
        }

        pub fn certificate_owner(&self, certificate: CertificateId) -> Option<AccountId> {
            self.state.lock().certificates.get(&certificate).cloned()
        }

        /// The next `submit_transfer` returns `err` instead of transferring.
        pub fn fail_next(&self, err: ConnectorError) {
            self.state.lock().scripted_failures.push_back(err);
        }

        /// Sleep this long inside every `submit_transfer`.
        pub fn set_latency(&self, latency: Duration) {
            self.state.lock().latency = Some(latency);
        }

        pub fn submissions(&self) -> Vec<TransferInstruction> {
            self.state.lock().submissions.clone()
        }

        pub fn submissions_for(&self, id: OperationId) -> usize {
            self.state
                .lock()
                .submissions
                .iter()
                .filter(|s| s.operation_id == id)
                .count()
        }

        pub fn events(&self) -> Vec<(OperationId, OperationStatus)> {
            self.state.lock().events.clone()
        }
    }

    impl ChainConnector for FakeConnector {
        fn submit_transfer(
            &self,
            instruction: &TransferInstruction,
        ) -> Result<TxReceipt, ConnectorError> {
            let latency = self.state.lock().latency;
            if let Some(latency) = latency {
                std::thread::sleep(latency);
            }

            let mut state = self.state.lock();
            state.submissions.push(instruction.clone());
            if let Some(err) = state.scripted_failures.pop_front() {
                return Err(err);
            }

            match (&instruction.asset, instruction.kind) {
                (TransferAsset::Tokens(amount), OperationKind::TokenWithdrawal) => {
                    let available = state
                        .balances
                        .get(&instruction.initiator)
                        .copied()
                        .unwrap_or(0);
                    if available < *amount {
                        return Err(ConnectorError::InsufficientBalance {
                            needed: *amount,
                            available,
                        });
                    }
                    state
                        .balances
                        .insert(instruction.initiator.clone(), available - amount);
                    *state
                        .balances
                        .entry(instruction.recipient.clone())
                        .or_insert(0) += amount;
                }
                (TransferAsset::Tokens(amount), _) => {
                    *state
                        .balances
                        .entry(instruction.recipient.clone())
                        .or_insert(0) += amount;
                }
                (TransferAsset::Certificate { certificate, .. }, _) => {
                    state
                        .certificates
                        .insert(*certificate, instruction.recipient.clone());
                }
                (TransferAsset::Payload(_), _) => {}
            }

            Ok(TxReceipt::new(
                instruction.operation_id,
                instruction.attempt,
                Utc::now(),
            ))
        }

        fn query_balance(&self, account: &AccountId) -> Result<u128, ConnectorError> {
            Ok(self.balance(account))
        }

        fn emit_event(&self, operation_id: OperationId, status: OperationStatus) {
            self.state.lock().events.push((operation_id, status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(kind: OperationKind, amount: u128) -> TransferInstruction {
        TransferInstruction {
            operation_id: OperationId(1),
            attempt: 1,
            kind,
            initiator: AccountId::new("0xa1"),
            recipient: AccountId::new("0xb2"),
            asset: TransferAsset::Tokens(amount),
        }
    }

    #[test]
    fn classification() {
        assert!(!ConnectorError::Transient { reason: "rpc".into() }.is_permanent());
        assert!(ConnectorError::Reverted { reason: "x".into() }.is_permanent());
        assert!(
            ConnectorError::InsufficientBalance {
                needed: 2,
                available: 1
            }
            .is_permanent()
        );
    }

    #[test]
    fn fake_deposit_credits_recipient() {
        let fake = FakeConnector::new();
        let receipt = fake
            .submit_transfer(&instruction(OperationKind::TokenDeposit, 40))
            .unwrap();
        assert_eq!(receipt.operation_id, OperationId(1));
        assert_eq!(fake.balance(&AccountId::new("0xb2")), 40);
    }

    #[test]
    fn fake_withdrawal_checks_balance() {
        let fake = FakeConnector::new();
        fake.set_balance(&AccountId::new("0xa1"), 10);
        let err = fake
            .submit_transfer(&instruction(OperationKind::TokenWithdrawal, 11))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InsufficientBalance { needed: 11, available: 10 }));

        fake.submit_transfer(&instruction(OperationKind::TokenWithdrawal, 10))
            .unwrap();
        assert_eq!(fake.balance(&AccountId::new("0xa1")), 0);
        assert_eq!(fake.balance(&AccountId::new("0xb2")), 10);
    }

    #[test]
    fn fake_scripted_failure_is_consumed_once() {
        let fake = FakeConnector::new();
        fake.fail_next(ConnectorError::Transient { reason: "timeout".into() });
        assert!(fake.submit_transfer(&instruction(OperationKind::TokenDeposit, 1)).is_err());
        assert!(fake.submit_transfer(&instruction(OperationKind::TokenDeposit, 1)).is_ok());
        assert_eq!(fake.submissions_for(OperationId(1)), 2);
    }
}
