//! # crossbridge-types
//!
//! Shared types, errors, and configuration for the **Crossbridge**
//! coordination core.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`OperationId`], [`AccountId`], [`ValidatorId`], [`CertificateId`], [`MessageId`]
//! - **Operation model**: [`Operation`], [`OperationKind`], [`OperationStatus`], [`OperationRequest`], [`ValidatorVote`]
//! - **Chain boundary**: [`ChainConnector`], [`ConnectorError`], [`TransferInstruction`], [`TxReceipt`]
//! - **Time**: [`Clock`], [`SystemClock`]
//! - **Configuration**: [`BridgeConfig`], [`QuorumPolicy`], [`TimelockConfig`], [`RetryPolicy`]
//! - **Errors**: [`BridgeError`] with `XB_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults
//!
//! With the `test-helpers` feature, [`ManualClock`] and [`FakeConnector`]
//! are exported for deterministic tests in downstream crates.

pub mod clock;
pub mod config;
pub mod connector;
pub mod constants;
pub mod error;
pub mod ids;
pub mod operation;
pub mod receipt;

// Re-export all primary types at crate root for ergonomic imports:
//   use crossbridge_types::{Operation, OperationKind, BridgeError, ...};

pub use clock::*;
pub use config::*;
pub use connector::*;
pub use error::*;
pub use ids::*;
pub use operation::*;
pub use receipt::*;

// Constants are accessed via `crossbridge_types::constants::FOO`
// (not re-exported to avoid name collisions).
