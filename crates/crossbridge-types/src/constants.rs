//! System-wide constants for the Crossbridge coordination core.

/// Default withdrawal timelock: 7 days, in seconds.
pub const DEFAULT_WITHDRAWAL_DELAY_SECS: u64 = 7 * 24 * 60 * 60;

/// Longest withdrawal timelock a configuration may request (30 days).
pub const MAX_WITHDRAWAL_DELAY_SECS: u64 = 30 * 24 * 60 * 60;

/// Default ceiling on the number of items in a single batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Hard ceiling a configured batch size may not exceed.
pub const MAX_BATCH_SIZE_LIMIT: usize = 10_000;

/// Minimum number of approvals any quorum requires.
pub const MIN_QUORUM: usize = 1;

/// Largest payload accepted on an operation or message (64 KiB).
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Domain tag mixed into every message id hash.
pub const MESSAGE_ID_DOMAIN: &[u8] = b"crossbridge:message:v1:";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Crossbridge";
