//! Append-only bridge journal.
//!
//! Every mutation of the operation store and the message channel is
//! written to a [`JournalSink`] *before* the in-memory state changes. Records carry a dense sequence
//! number; replaying them in order rebuilds the store exactly.
//!
//! A COMPLETED record is never rewritten: the journal only appends.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crossbridge_types::{
    AccountId, BridgeError, FailureRecord, MessageId, Operation, OperationId, OperationStatus,
    Result, TxReceipt, ValidatorVote,
};

/// One state change of one operation or one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    /// A new operation entered the store in PENDING.
    Created { operation: Box<Operation> },
    /// A status change with no extra payload.
    Transitioned {
        id: OperationId,
        from: OperationStatus,
        to: OperationStatus,
    },
    /// A validator voted (or re-voted).
    VoteCast { vote: ValidatorVote },
    /// All votes were dropped on retry.
    VotesCleared { id: OperationId },
    /// VALIDATING → COMPLETED with the connector receipt.
    Completed { id: OperationId, receipt: TxReceipt },
    /// VALIDATING → FAILED with the failure classification.
    ExecutionFailed {
        id: OperationId,
        failure: FailureRecord,
    },
    /// A retry was refused because the budget is spent.
    RetryLimitReached { id: OperationId, retries: u32, max: u32 },
    /// A PENDING operation without votes was withdrawn by its submitter.
    Discarded { id: OperationId, by: AccountId },
    /// Origin side: a payload was sent (again).
    MessageSent {
        message_id: MessageId,
        payload_len: usize,
    },
    /// Destination side: first and only delivery of a message.
    MessageDelivered {
        message_id: MessageId,
        sender: AccountId,
        recipient: AccountId,
    },
    /// An operator opened a recovery for a stuck message.
    MessageRecoveryOpened {
        message_id: MessageId,
        reason: String,
        by: AccountId,
    },
    /// A recovery retry did not deliver the message.
    MessageRecoveryAttemptFailed { message_id: MessageId, error: String },
    /// A recovery was closed. `note` is set when an operator closed it by hand.
    MessageRecovered {
        message_id: MessageId,
        by: AccountId,
        note: Option<String>,
    },
}

impl JournalEvent {
    /// The operation this event belongs to, `None` for message events.
    #[must_use]
    pub fn operation_id(&self) -> Option<OperationId> {
        match self {
            Self::Created { operation } => Some(operation.id),
            Self::VoteCast { vote } => Some(vote.operation_id),
            Self::Transitioned { id, .. }
            | Self::VotesCleared { id }
            | Self::Completed { id, .. }
            | Self::ExecutionFailed { id, .. }
            | Self::RetryLimitReached { id, .. }
            | Self::Discarded { id, .. } => Some(*id),
            Self::MessageSent { .. }
            | Self::MessageDelivered { .. }
            | Self::MessageRecoveryOpened { .. }
            | Self::MessageRecoveryAttemptFailed { .. }
            | Self::MessageRecovered { .. } => None,
        }
    }

    /// The message this event belongs to, `None` for operation events.
    #[must_use]
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::MessageSent { message_id, .. }
            | Self::MessageDelivered { message_id, .. }
            | Self::MessageRecoveryOpened { message_id, .. }
            | Self::MessageRecoveryAttemptFailed { message_id, .. }
            | Self::MessageRecovered { message_id, .. } => Some(*message_id),
            _ => None,
        }
    }
}

/// A journal line: sequence number, wall time, event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub event: JournalEvent,
}

/// Destination for journal records.
pub trait JournalSink: Send + Sync {
    /// Durably append one event. Returns the assigned sequence number.
    ///
    /// # Errors
    /// `Io` or `Serialization` if the record could not be persisted.
    fn append(&self, at: DateTime<Utc>, event: JournalEvent) -> Result<u64>;

    /// Number of records appended so far.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// MemoryJournal
// ---------------------------------------------------------------------------

/// Journal kept in memory. Default sink for tests and embedded use.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Mutex<Vec<JournalRecord>>,
}

impl MemoryJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from already-persisted records (sequence continues after them).
    #[must_use]
    pub fn from_records(records: Vec<JournalRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }

    /// Copy of every record appended so far.
    pub fn records(&self) -> Vec<JournalRecord> {
        self.records.lock().clone()
    }
}

impl JournalSink for MemoryJournal {
    fn append(&self, at: DateTime<Utc>, event: JournalEvent) -> Result<u64> {
        let mut records = self.records.lock();
        let seq = records.len() as u64;
        records.push(JournalRecord { seq, at, event });
        Ok(seq)
    }

    fn len(&self) -> u64 {
        self.records.lock().len() as u64
    }
}

// ---------------------------------------------------------------------------
// FileJournal
// ---------------------------------------------------------------------------

struct FileState {
    writer: BufWriter<File>,
    next_seq: u64,
    /// A write or sync failed; the file tail is unknown.
    poisoned: bool,
}

/// JSON-lines journal file. One record per line, synced to disk per append.
pub struct FileJournal {
    path: PathBuf,
    state: Mutex<FileState>,
}

impl std::fmt::Debug for FileJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileJournal")
            .field("path", &self.path)
            .field("next_seq", &self.state.lock().next_seq)
            .finish_non_exhaustive()
    }
}

impl FileJournal {
    /// Open (or create) the journal at `path` for appending.
    ///
    /// Returns the journal and the records already in it, ready for
    /// [`crate::OperationStore::replay`].
    ///
    /// # Errors
    /// `Io` if the file cannot be opened, `JournalCorrupted` if an existing
    /// line does not parse or sequence numbers are not dense.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<JournalRecord>)> {
        let path = path.as_ref().to_path_buf();
        let existing = if path.exists() {
            Self::read_all(&path)?
        } else {
            Vec::new()
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let journal = Self {
            path,
            state: Mutex::new(FileState {
                writer: BufWriter::new(file),
                next_seq: existing.len() as u64,
                poisoned: false,
            }),
        };
        tracing::info!(
            path = %journal.path.display(),
            records = existing.len(),
            "Journal opened"
        );
        Ok((journal, existing))
    }

    /// Read every record in a journal file.
    ///
    /// # Errors
    /// `Io` on read failure, `JournalCorrupted` on an unparsable line or a
    /// sequence gap.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<JournalRecord>> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: JournalRecord =
                serde_json::from_str(&line).map_err(|e| BridgeError::JournalCorrupted {
                    reason: format!("line {}: {e}", line_no + 1),
                })?;
            if record.seq != records.len() as u64 {
                return Err(BridgeError::JournalCorrupted {
                    reason: format!(
                        "line {}: expected seq {}, found {}",
                        line_no + 1,
                        records.len(),
                        record.seq
                    ),
                });
            }
            records.push(record);
        }
        Ok(records)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalSink for FileJournal {
    fn append(&self, at: DateTime<Utc>, event: JournalEvent) -> Result<u64> {
        let mut state = self.state.lock();
        let record = JournalRecord {
            seq: state.next_seq,
            at,
            event,
        };
        if state.poisoned {
            return Err(BridgeError::Io(format!(
                "journal {} failed earlier; reopen to recover",
                self.path.display()
            )));
        }
        let line = serde_json::to_string(&record)?;
        if let Err(err) = write_synced(&mut state.writer, &line) {
            state.poisoned = true;
            tracing::error!(path = %self.path.display(), error = %err, "Journal append failed");
            return Err(err.into());
        }
        state.next_seq += 1;
        Ok(record.seq)
    }

    fn len(&self) -> u64 {
        self.state.lock().next_seq
    }
}

fn write_synced(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writeln!(writer, "{line}")?;
    writer.flush()?;
    writer.get_ref().sync_data()
}
