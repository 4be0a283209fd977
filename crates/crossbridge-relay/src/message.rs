//! Message channel: opaque payload delivery keyed by content hash.
//!
//! Independent of the operation sequence. The origin side (`send`) is
//! idempotent; the destination side (`deliver`) accepts each message id
//! exactly once. Ids are always recomputed from the payload, so a caller
//! cannot smuggle a payload under someone else's id.
//!
//! Every change is journaled first, through the same sink as the operation
//! store, and [`MessageChannel::replay`] rebuilds the channel after a
//! restart. A message that was delivered before the restart stays
//! delivered.
//!
//! ## Recovery
//!
//! A message that was sent but never arrived can be put under recovery.
//! Retries go through the normal delivery path; the recovery closes on the
//! first successful (or already-done) delivery, or when an operator closes
//! it by hand. The record stays queryable afterwards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::RefMut;
use serde::{Deserialize, Serialize};

use crossbridge_ledger::{JournalEvent, JournalRecord, JournalSink};
use crossbridge_types::{constants, AccountId, BridgeError, Clock, MessageId, Result};

/// Origin-side record of a sent message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub payload_len: usize,
    pub first_sent_at: DateTime<Utc>,
    /// How many times `send` was called for this id.
    pub sends: u32,
}

/// Destination-side record of a processed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub message_id: MessageId,
    pub sender: AccountId,
    pub recipient: AccountId,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Open,
    Recovered,
}

/// Recovery log entry for one stuck message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecovery {
    pub message_id: MessageId,
    pub reason: String,
    pub initiated_by: AccountId,
    pub initiated_at: DateTime<Utc>,
    /// Failed retries so far.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: RecoveryStatus,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<AccountId>,
    /// Operator note for a manual close; `None` when a retry delivered it.
    pub resolution: Option<String>,
}

impl MessageRecovery {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == RecoveryStatus::Open
    }
}

/// Both ends of the message path.
pub struct MessageChannel {
    sent: DashMap<MessageId, SentMessage>,
    delivered: DashMap<MessageId, DeliveryRecord>,
    recoveries: DashMap<MessageId, MessageRecovery>,
    journal: Arc<dyn JournalSink>,
    clock: Arc<dyn Clock>,
}

impl MessageChannel {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, journal: Arc<dyn JournalSink>) -> Self {
        Self {
            sent: DashMap::new(),
            delivered: DashMap::new(),
            recoveries: DashMap::new(),
            journal,
            clock,
        }
    }

    /// Rebuild the channel from journal records. Operation events are
    /// skipped; `journal` receives future records.
    ///
    /// # Errors
    /// `JournalCorrupted` if the message history is impossible (a second
    /// delivery, a recovery event for a message with no open recovery).
    pub fn replay(
        records: &[JournalRecord],
        clock: Arc<dyn Clock>,
        journal: Arc<dyn JournalSink>,
    ) -> Result<Self> {
        let channel = Self::new(clock, journal);
        for record in records {
            channel.replay_one(record)?;
        }
        tracing::info!(
            sent = channel.sent_count(),
            delivered = channel.delivered_count(),
            recoveries = channel.recoveries.len(),
            "Message channel replayed"
        );
        Ok(channel)
    }

    fn replay_one(&self, record: &JournalRecord) -> Result<()> {
        let at = record.at;
        match &record.event {
            JournalEvent::MessageSent {
                message_id,
                payload_len,
            } => {
                self.sent
                    .entry(*message_id)
                    .and_modify(|sent| sent.sends += 1)
                    .or_insert_with(|| SentMessage {
                        message_id: *message_id,
                        payload_len: *payload_len,
                        first_sent_at: at,
                        sends: 1,
                    });
                Ok(())
            }
            JournalEvent::MessageDelivered {
                message_id,
                sender,
                recipient,
            } => match self.delivered.entry(*message_id) {
                Entry::Occupied(_) => Err(corrupted(record.seq, "second delivery of a message")),
                Entry::Vacant(slot) => {
                    slot.insert(DeliveryRecord {
                        message_id: *message_id,
                        sender: sender.clone(),
                        recipient: recipient.clone(),
                        delivered_at: at,
                    });
                    Ok(())
                }
            },
            JournalEvent::MessageRecoveryOpened {
                message_id,
                reason,
                by,
            } => match self.recoveries.entry(*message_id) {
                Entry::Occupied(_) => Err(corrupted(record.seq, "recovery opened twice")),
                Entry::Vacant(slot) => {
                    slot.insert(opened(*message_id, reason, by, at));
                    Ok(())
                }
            },
            JournalEvent::MessageRecoveryAttemptFailed { message_id, error } => {
                let mut recovery = self.open_recovery(message_id, record.seq)?;
                recovery.attempts += 1;
                recovery.last_error = Some(error.clone());
                Ok(())
            }
            JournalEvent::MessageRecovered {
                message_id,
                by,
                note,
            } => {
                let mut recovery = self.open_recovery(message_id, record.seq)?;
                close(&mut recovery, by, note.clone(), at);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn open_recovery(
        &self,
        message_id: &MessageId,
        seq: u64,
    ) -> Result<RefMut<'_, MessageId, MessageRecovery>> {
        self.recoveries
            .get_mut(message_id)
            .filter(|recovery| recovery.is_open())
            .ok_or_else(|| corrupted(seq, "recovery event without an open recovery"))
    }

    /// Record `payload` as sent under `message_id`. Sending the same payload
    /// again is a successful no-op.
    ///
    /// # Errors
    /// `MessageIdMismatch` if `message_id` is not the payload's hash,
    /// `InvalidRequest` for an empty or oversized payload, `Io` if the
    /// journal write fails.
    pub fn send(&self, message_id: MessageId, payload: &[u8]) -> Result<()> {
        verify(message_id, payload)?;
        let now = self.clock.now();
        let event = JournalEvent::MessageSent {
            message_id,
            payload_len: payload.len(),
        };
        match self.sent.entry(message_id) {
            Entry::Occupied(mut existing) => {
                self.journal.append(now, event)?;
                existing.get_mut().sends += 1;
            }
            Entry::Vacant(slot) => {
                self.journal.append(now, event)?;
                slot.insert(SentMessage {
                    message_id,
                    payload_len: payload.len(),
                    first_sent_at: now,
                    sends: 1,
                });
            }
        }
        tracing::debug!(message = %message_id.short(), "Message sent");
        Ok(())
    }

    /// Hash `payload` and send it. Returns the id.
    ///
    /// # Errors
    /// As [`MessageChannel::send`].
    pub fn send_payload(&self, payload: &[u8]) -> Result<MessageId> {
        let message_id = MessageId::from_payload(payload);
        self.send(message_id, payload)?;
        Ok(message_id)
    }

    /// Process `payload` on the destination side, once.
    ///
    /// # Errors
    /// - `MessageIdMismatch` if `message_id` is not the payload's hash
    /// - `InvalidRecipient` for a null recipient
    /// - `MessageAlreadyProcessed` on any second delivery of the same id
    /// - `Io` if the journal write fails; the message stays undelivered
    pub fn deliver(
        &self,
        message_id: MessageId,
        sender: &AccountId,
        recipient: &AccountId,
        payload: &[u8],
    ) -> Result<()> {
        verify(message_id, payload)?;
        if recipient.is_null() {
            return Err(BridgeError::InvalidRecipient);
        }

        match self.delivered.entry(message_id) {
            Entry::Occupied(_) => {
                tracing::warn!(message = %message_id.short(), sender = %sender, "Replayed message rejected");
                Err(BridgeError::MessageAlreadyProcessed(message_id))
            }
            Entry::Vacant(slot) => {
                let now = self.clock.now();
                self.journal.append(
                    now,
                    JournalEvent::MessageDelivered {
                        message_id,
                        sender: sender.clone(),
                        recipient: recipient.clone(),
                    },
                )?;
                slot.insert(DeliveryRecord {
                    message_id,
                    sender: sender.clone(),
                    recipient: recipient.clone(),
                    delivered_at: now,
                });
                tracing::info!(
                    message = %message_id.short(),
                    sender = %sender,
                    recipient = %recipient,
                    "Message delivered"
                );
                Ok(())
            }
        }
    }

    // ── Recovery ─────────────────────────────────────────────────────────

    /// Open a recovery for a sent message that has not been delivered.
    ///
    /// # Errors
    /// `InvalidRequest` if the message was never sent, is already
    /// delivered, or already has a recovery record.
    pub fn initiate_recovery(
        &self,
        message_id: MessageId,
        reason: &str,
        by: &AccountId,
    ) -> Result<MessageRecovery> {
        if !self.is_sent(&message_id) {
            return Err(invalid(format!("{message_id} was never sent")));
        }
        if self.is_processed(&message_id) {
            return Err(invalid(format!("{message_id} is already delivered")));
        }
        match self.recoveries.entry(message_id) {
            Entry::Occupied(existing) => Err(invalid(if existing.get().is_open() {
                format!("recovery for {message_id} is already open")
            } else {
                format!("recovery for {message_id} is already closed")
            })),
            Entry::Vacant(slot) => {
                let now = self.clock.now();
                self.journal.append(
                    now,
                    JournalEvent::MessageRecoveryOpened {
                        message_id,
                        reason: reason.to_string(),
                        by: by.clone(),
                    },
                )?;
                let recovery = opened(message_id, reason, by, now);
                slot.insert(recovery.clone());
                tracing::info!(
                    message = %message_id.short(),
                    by = %by,
                    reason,
                    "Message recovery opened"
                );
                Ok(recovery)
            }
        }
    }

    /// Re-attempt delivery of a message under recovery.
    ///
    /// A message found already delivered counts as recovered. Any other
    /// delivery error is counted against the recovery, which stays open,
    /// and returned.
    ///
    /// # Errors
    /// `InvalidRequest` if there is no open recovery for `message_id`,
    /// otherwise whatever [`MessageChannel::deliver`] returned.
    pub fn retry_recovery(
        &self,
        message_id: MessageId,
        sender: &AccountId,
        recipient: &AccountId,
        payload: &[u8],
        by: &AccountId,
    ) -> Result<MessageRecovery> {
        self.require_open(message_id)?;
        match self.deliver(message_id, sender, recipient, payload) {
            Ok(()) | Err(BridgeError::MessageAlreadyProcessed(_)) => {
                self.close_recovery(message_id, by, None)
            }
            Err(err) => {
                let mut recovery = self
                    .recoveries
                    .get_mut(&message_id)
                    .filter(|recovery| recovery.is_open())
                    .ok_or_else(|| invalid(format!("no open recovery for {message_id}")))?;
                self.journal.append(
                    self.clock.now(),
                    JournalEvent::MessageRecoveryAttemptFailed {
                        message_id,
                        error: err.to_string(),
                    },
                )?;
                recovery.attempts += 1;
                recovery.last_error = Some(err.to_string());
                tracing::warn!(
                    message = %message_id.short(),
                    attempts = recovery.attempts,
                    error = %err,
                    "Message recovery attempt failed"
                );
                Err(err)
            }
        }
    }

    /// Close an open recovery by hand. Delivery state is unchanged: a
    /// message closed this way can still be delivered once.
    ///
    /// # Errors
    /// `InvalidRequest` if there is no open recovery for `message_id`.
    pub fn mark_recovered(
        &self,
        message_id: MessageId,
        note: &str,
        by: &AccountId,
    ) -> Result<MessageRecovery> {
        self.close_recovery(message_id, by, Some(note.to_string()))
    }

    /// The recovery record for `message_id`, open or closed.
    pub fn recovery_log(&self, message_id: &MessageId) -> Option<MessageRecovery> {
        self.recoveries.get(message_id).map(|r| r.clone())
    }

    /// Ids of every message with an open recovery, ascending.
    pub fn open_recoveries(&self) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self
            .recoveries
            .iter()
            .filter(|entry| entry.is_open())
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        ids
    }

    fn require_open(&self, message_id: MessageId) -> Result<()> {
        match self.recoveries.get(&message_id) {
            Some(recovery) if recovery.is_open() => Ok(()),
            _ => Err(invalid(format!("no open recovery for {message_id}"))),
        }
    }

    fn close_recovery(
        &self,
        message_id: MessageId,
        by: &AccountId,
        note: Option<String>,
    ) -> Result<MessageRecovery> {
        let mut recovery = self
            .recoveries
            .get_mut(&message_id)
            .filter(|recovery| recovery.is_open())
            .ok_or_else(|| invalid(format!("no open recovery for {message_id}")))?;
        let now = self.clock.now();
        self.journal.append(
            now,
            JournalEvent::MessageRecovered {
                message_id,
                by: by.clone(),
                note: note.clone(),
            },
        )?;
        let manual = note.is_some();
        close(&mut recovery, by, note, now);
        tracing::info!(
            message = %message_id.short(),
            by = %by,
            manual,
            attempts = recovery.attempts,
            "Message recovered"
        );
        Ok(recovery.clone())
    }

    pub fn is_sent(&self, message_id: &MessageId) -> bool {
        self.sent.contains_key(message_id)
    }

    pub fn is_processed(&self, message_id: &MessageId) -> bool {
        self.delivered.contains_key(message_id)
    }

    pub fn sent_message(&self, message_id: &MessageId) -> Option<SentMessage> {
        self.sent.get(message_id).map(|s| s.clone())
    }

    pub fn delivery(&self, message_id: &MessageId) -> Option<DeliveryRecord> {
        self.delivered.get(message_id).map(|d| d.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }
}

fn opened(
    message_id: MessageId,
    reason: &str,
    by: &AccountId,
    at: DateTime<Utc>,
) -> MessageRecovery {
    MessageRecovery {
        message_id,
        reason: reason.to_string(),
        initiated_by: by.clone(),
        initiated_at: at,
        attempts: 0,
        last_error: None,
        status: RecoveryStatus::Open,
        resolved_at: None,
        resolved_by: None,
        resolution: None,
    }
}

fn close(recovery: &mut MessageRecovery, by: &AccountId, note: Option<String>, at: DateTime<Utc>) {
    recovery.status = RecoveryStatus::Recovered;
    recovery.resolved_at = Some(at);
    recovery.resolved_by = Some(by.clone());
    recovery.resolution = note;
}

fn invalid(reason: String) -> BridgeError {
    BridgeError::InvalidRequest { reason }
}

fn corrupted(seq: u64, detail: &str) -> BridgeError {
    BridgeError::JournalCorrupted {
        reason: format!("record {seq}: {detail}"),
    }
}

fn verify(message_id: MessageId, payload: &[u8]) -> Result<()> {
    if payload.is_empty() {
        return Err(BridgeError::InvalidRequest {
            reason: "message payload must not be empty".to_string(),
        });
    }
    if payload.len() > constants::MAX_PAYLOAD_BYTES {
        return Err(BridgeError::InvalidRequest {
            reason: format!(
                "payload of {} bytes exceeds maximum {}",
                payload.len(),
                constants::MAX_PAYLOAD_BYTES
            ),
        });
    }
    if MessageId::from_payload(payload) != message_id {
        return Err(BridgeError::MessageIdMismatch(message_id));
    }
    Ok(())
}
