//! Configuration for a Crossbridge coordinator.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};

use crate::{constants, BridgeError, Result};

/// How many approvals an operation needs before it may execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuorumPolicy {
    /// Strict majority of the currently registered validators, at least 1.
    #[default]
    Majority,
    /// A fixed number of approvals regardless of validator count.
    Fixed { approvals: usize },
}

impl QuorumPolicy {
    /// Approvals required given `validators` currently registered.
    #[must_use]
    pub fn threshold(self, validators: usize) -> usize {
        match self {
            Self::Majority => (validators / 2 + 1).max(constants::MIN_QUORUM),
            Self::Fixed { approvals } => approvals.max(constants::MIN_QUORUM),
        }
    }
}

/// Withdrawal timelock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelockConfig {
    /// Minimum seconds between two withdrawals by the same user.
    pub withdrawal_delay_secs: u64,
}

impl TimelockConfig {
    #[must_use]
    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.withdrawal_delay_secs).unwrap_or(i64::MAX))
    }
}

impl Default for TimelockConfig {
    fn default() -> Self {
        Self {
            withdrawal_delay_secs: constants::DEFAULT_WITHDRAWAL_DELAY_SECS,
        }
    }
}

/// What happens to collected votes when a failed operation is re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryVotePolicy {
    /// Keep the votes; the retry re-executes against the same consensus.
    #[default]
    Preserve,
    /// Drop all votes; validators must approve again.
    Clear,
}

/// Retry budget for failed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retries per operation. `None` means unlimited.
    pub max_retries: Option<u32>,
    pub vote_policy: RetryVotePolicy,
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub quorum: QuorumPolicy,
    pub timelock: TimelockConfig,
    pub retry: RetryPolicy,
    /// Largest batch accepted by the batch coordinator.
    pub max_batch_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            quorum: QuorumPolicy::default(),
            timelock: TimelockConfig::default(),
            retry: RetryPolicy::default(),
            max_batch_size: constants::DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl BridgeConfig {
    /// Parse and validate a JSON config.
    ///
    /// # Errors
    /// `Configuration` for malformed JSON or out-of-range values.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| BridgeError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is within bounds.
    ///
    /// # Errors
    /// `Configuration` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(BridgeError::Configuration(
                "max_batch_size must be > 0".to_string(),
            ));
        }
        if self.max_batch_size > constants::MAX_BATCH_SIZE_LIMIT {
            return Err(BridgeError::Configuration(format!(
                "max_batch_size {} exceeds limit {}",
                self.max_batch_size,
                constants::MAX_BATCH_SIZE_LIMIT
            )));
        }
        if let QuorumPolicy::Fixed { approvals: 0 } = self.quorum {
            return Err(BridgeError::Configuration(
                "fixed quorum must require at least one approval".to_string(),
            ));
        }
        if self.timelock.withdrawal_delay_secs > constants::MAX_WITHDRAWAL_DELAY_SECS {
            return Err(BridgeError::Configuration(format!(
                "withdrawal_delay_secs {} exceeds 30 days",
                self.timelock.withdrawal_delay_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_threshold() {
        assert_eq!(QuorumPolicy::Majority.threshold(0), 1);
        assert_eq!(QuorumPolicy::Majority.threshold(1), 1);
        assert_eq!(QuorumPolicy::Majority.threshold(2), 2);
        assert_eq!(QuorumPolicy::Majority.threshold(3), 2);
        assert_eq!(QuorumPolicy::Majority.threshold(4), 3);
        assert_eq!(QuorumPolicy::Fixed { approvals: 5 }.threshold(2), 5);
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = BridgeConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timelock.withdrawal_delay_secs, 604_800);
        assert_eq!(cfg.retry.vote_policy, RetryVotePolicy::Preserve);
        assert_eq!(cfg.retry.max_retries, None);
    }

    #[test]
    fn empty_json_is_default() {
        let cfg = BridgeConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, BridgeConfig::default());
    }

    #[test]
    fn json_overrides() {
        let cfg = BridgeConfig::from_json_str(
            r#"{"quorum":{"type":"fixed","approvals":3},"retry":{"max_retries":2,"vote_policy":"clear"},"max_batch_size":10}"#,
        )
        .unwrap();
        assert_eq!(cfg.quorum, QuorumPolicy::Fixed { approvals: 3 });
        assert_eq!(cfg.retry.max_retries, Some(2));
        assert_eq!(cfg.retry.vote_policy, RetryVotePolicy::Clear);
        assert_eq!(cfg.max_batch_size, 10);
    }

    #[test]
    fn out_of_range_rejected() {
        let mut cfg = BridgeConfig::default();
        cfg.max_batch_size = 0;
        assert!(matches!(cfg.validate(), Err(BridgeError::Configuration(_))));

        let mut cfg = BridgeConfig::default();
        cfg.timelock.withdrawal_delay_secs = constants::MAX_WITHDRAWAL_DELAY_SECS + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = BridgeConfig::default();
        cfg.quorum = QuorumPolicy::Fixed { approvals: 0 };
        assert!(cfg.validate().is_err());

        assert!(BridgeConfig::from_json_str("not json").is_err());
    }
}
