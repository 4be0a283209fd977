//! Per-user withdrawal timelock.
//!
//! Blocks a user's withdrawal until `delay` has elapsed since that user's
//! last withdrawal activity. Activity is stamped when a withdrawal is
//! requested and again when one executes, so a withdrawal requested at `T`
//! cannot execute before `T + delay`.
//!
//! Deposits, certificates and messages never consult this lock.
//!
//! The check-then-stamp sequence is atomic per user: [`WithdrawalTimelock::reserve`]
//! marks the user's timer in flight, and the executor then either
//! [`commit`](WithdrawalTimelock::commit)s or [`release`](WithdrawalTimelock::release)s it.
//! A second withdrawal for the same user cannot pass while one is in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crossbridge_types::{AccountId, BridgeError, Result, TimelockConfig};

/// Withdrawal activity for one user. Never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WithdrawalTimer {
    pub last_withdrawal_at: Option<DateTime<Utc>>,
    /// A withdrawal for this user passed the check and is being dispatched.
    pub in_flight: bool,
}

/// Enforces the minimum delay between a user's withdrawals.
#[derive(Debug)]
pub struct WithdrawalTimelock {
    delay: chrono::Duration,
    timers: DashMap<AccountId, WithdrawalTimer>,
    rejections: AtomicU64,
}

impl WithdrawalTimelock {
    #[must_use]
    pub fn new(config: TimelockConfig) -> Self {
        Self {
            delay: config.delay(),
            timers: DashMap::new(),
            rejections: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn delay(&self) -> chrono::Duration {
        self.delay
    }

    /// Would a withdrawal by `user` pass at `now`? Read-only apart from the
    /// rejection counter.
    ///
    /// # Errors
    /// `DelayNotMet` with the remaining wait.
    pub fn check(&self, user: &AccountId, now: DateTime<Utc>) -> Result<()> {
        let timer = self.timer(user);
        self.evaluate(user, &timer, now)
    }

    /// Stamp withdrawal activity for `user` at `at`. Timestamps only move
    /// forward.
    pub fn record(&self, user: &AccountId, at: DateTime<Utc>) {
        let mut timer = self.timers.entry(user.clone()).or_default();
        stamp(&mut timer, at);
    }

    /// Atomically check the delay and mark the user's timer in flight.
    ///
    /// `requested_at` is the withdrawal's own request time. It is stamped
    /// first, so a withdrawal never executes before `requested_at + delay`
    /// even if nobody recorded the request.
    ///
    /// # Errors
    /// - `WithdrawalInFlight` if another withdrawal for this user is being
    ///   dispatched
    /// - `DelayNotMet` if the delay has not elapsed
    pub fn reserve(
        &self,
        user: &AccountId,
        requested_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut timer = self.timers.entry(user.clone()).or_default();
        if timer.in_flight {
            self.rejections.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(user = %user, "Withdrawal blocked: another withdrawal in flight");
            return Err(BridgeError::WithdrawalInFlight(user.clone()));
        }
        stamp(&mut timer, requested_at);
        self.evaluate(user, &timer, now)?;
        timer.in_flight = true;
        Ok(())
    }

    /// The reserved withdrawal executed at `at`.
    pub fn commit(&self, user: &AccountId, at: DateTime<Utc>) {
        let mut timer = self.timers.entry(user.clone()).or_default();
        timer.in_flight = false;
        stamp(&mut timer, at);
    }

    /// The reserved withdrawal did not execute; the stamp is unchanged.
    pub fn release(&self, user: &AccountId) {
        if let Some(mut timer) = self.timers.get_mut(user) {
            timer.in_flight = false;
        }
    }

    pub fn last_withdrawal_at(&self, user: &AccountId) -> Option<DateTime<Utc>> {
        self.timers.get(user).and_then(|t| t.last_withdrawal_at)
    }

    /// Number of withdrawals refused by this lock so far.
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Number of users with a timer.
    pub fn tracked_users(&self) -> usize {
        self.timers.len()
    }

    fn timer(&self, user: &AccountId) -> WithdrawalTimer {
        self.timers.get(user).map(|t| *t).unwrap_or_default()
    }

    fn evaluate(&self, user: &AccountId, timer: &WithdrawalTimer, now: DateTime<Utc>) -> Result<()> {
        let Some(last) = timer.last_withdrawal_at else {
            return Ok(());
        };
        let eligible_at = last + self.delay;
        if now >= eligible_at {
            return Ok(());
        }
        let remaining = to_std(eligible_at - now);
        self.rejections.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            user = %user,
            remaining_secs = remaining.as_secs(),
            "Withdrawal blocked by timelock"
        );
        Err(BridgeError::DelayNotMet { remaining })
    }
}

fn stamp(timer: &mut WithdrawalTimer, at: DateTime<Utc>) {
    timer.last_withdrawal_at = Some(match timer.last_withdrawal_at {
        Some(prev) if prev > at => prev,
        _ => at,
    });
}

fn to_std(duration: chrono::Duration) -> Duration {
    duration.to_std().unwrap_or(Duration::ZERO)
}
