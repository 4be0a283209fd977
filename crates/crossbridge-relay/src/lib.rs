//! # crossbridge-relay
//!
//! **Decision Plane**: everything between "an operation exists" and "the
//! target chain moved".
//!
//! ## Pipeline
//!
//! ```text
//! submit ──▶ Store (PENDING) ──▶ ConsensusGate (votes)
//!                                     │ quorum
//!                                     ▼
//!                        WithdrawalTimelock (withdrawals only)
//!                                     │
//!                                     ▼
//!                 TransferExecutor ──▶ ChainConnector
//!                        │                    │
//!                   COMPLETED              FAILED ──▶ RecoveryController ──▶ PENDING
//! ```
//!
//! Alongside: [`MessageChannel`] (content-addressed payloads, anti-replay,
//! recovery of stuck messages),
//! [`BatchCoordinator`] (bounded per-item batches), [`BridgeStats`].
//! [`Bridge`] wires it all together and adds pause and operator checks.

pub mod batch;
pub mod bridge;
pub mod consensus;
pub mod executor;
pub mod message;
pub mod recovery;
pub mod stats;
pub mod timelock;

pub use batch::BatchCoordinator;
pub use bridge::Bridge;
pub use consensus::{ConsensusGate, QuorumTally};
pub use executor::TransferExecutor;
pub use message::{
    DeliveryRecord, MessageChannel, MessageRecovery, RecoveryStatus, SentMessage,
};
pub use recovery::{FailureClass, RecoveryController};
pub use stats::BridgeStats;
pub use timelock::{WithdrawalTimelock, WithdrawalTimer};
