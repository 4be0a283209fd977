//! End-to-end tests through the [`Bridge`] coordinator.
//!
//! Every scenario runs on a manual clock and the in-memory connector:
//! submit -> vote -> (timelock) -> execute -> retry / abandon, plus
//! messages, batches, pause and restart from a journal file.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;
use crossbridge_ledger::{FileJournal, ValidatorRegistry};
use crossbridge_relay::{Bridge, FailureClass};
use crossbridge_types::*;

const DAY: i64 = 24 * 60 * 60;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Helper: a bridge with three validators and one operator.
struct BridgeHarness {
    clock: Arc<ManualClock>,
    connector: Arc<FakeConnector>,
    bridge: Bridge,
    admin: AccountId,
}

impl BridgeHarness {
    fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    fn with_config(config: BridgeConfig) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::epoch());
        let connector = Arc::new(FakeConnector::new());
        let admin = AccountId::new("0xad");
        let bridge = Bridge::new(config, connector.clone(), clock.clone(), admin.clone())
            .expect("default config is valid");
        for v in ["v1", "v2", "v3"] {
            bridge
                .grant_validator(&admin, ValidatorId::new(v))
                .expect("admin may grant");
        }
        Self {
            clock,
            connector,
            bridge,
            admin,
        }
    }

    /// Two of three validators approve.
    fn approve(&self, id: OperationId) {
        for v in ["v1", "v2"] {
            self.bridge
                .vote(id, &ValidatorId::new(v), true)
                .expect("vote should land");
        }
    }

    fn status(&self, id: OperationId) -> OperationStatus {
        self.bridge.operation(id).expect("operation exists").status
    }

    fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }
}

fn withdrawal(from: &str, to: &str, amount: u128) -> OperationRequest {
    OperationRequest::token_withdrawal(AccountId::new(from), AccountId::new(to), amount)
}

// ── Deposits and consensus ──────────────────────────────────────────────

#[test]
fn deposit_needs_quorum_then_executes_once() {
    let h = BridgeHarness::new();
    let user = AccountId::new("0xa1");
    let id = h
        .bridge
        .submit(OperationRequest::token_deposit(user.clone(), user.clone(), 100))
        .unwrap();
    assert_eq!(id, OperationId(0));
    assert_eq!(h.status(id), OperationStatus::Pending);

    h.bridge.vote(id, &ValidatorId::new("v1"), true).unwrap();
    assert!(!h.bridge.has_quorum(id).unwrap());
    let err = h.bridge.execute(id).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::QuorumNotReached {
            approvals: 1,
            threshold: 2,
            ..
        }
    ));
    assert_eq!(h.status(id), OperationStatus::Pending);
    assert!(h.connector.submissions().is_empty());

    h.bridge.vote(id, &ValidatorId::new("v2"), true).unwrap();
    assert!(h.bridge.has_quorum(id).unwrap());
    let receipt = h.bridge.execute(id).unwrap();
    assert_eq!(receipt.operation_id, id);
    assert_eq!(receipt.attempt, 1);

    let op = h.bridge.operation(id).unwrap();
    assert_eq!(op.status, OperationStatus::Completed);
    assert_eq!(op.receipt, Some(receipt));
    assert!(op.validated_at.is_some());
    assert!(op.completed_at.is_some());
    assert_eq!(h.connector.balance(&user), 100);

    // never twice
    assert!(matches!(
        h.bridge.execute(id),
        Err(BridgeError::AlreadyProcessed(_))
    ));
    assert_eq!(h.connector.submissions_for(id), 1);
    assert_eq!(
        h.connector.events(),
        vec![
            (id, OperationStatus::Validating),
            (id, OperationStatus::Completed)
        ]
    );
}

#[test]
fn rejections_and_outsiders_do_not_count() {
    let h = BridgeHarness::new();
    let id = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 5))
        .unwrap();
    h.bridge.vote(id, &ValidatorId::new("v1"), true).unwrap();
    h.bridge.vote(id, &ValidatorId::new("v2"), false).unwrap();
    assert!(matches!(
        h.bridge.vote(id, &ValidatorId::new("mallory"), true),
        Err(BridgeError::NotAValidator(_))
    ));
    assert!(!h.bridge.has_quorum(id).unwrap());

    // changing a vote replaces it
    h.bridge.vote(id, &ValidatorId::new("v2"), true).unwrap();
    assert!(h.bridge.has_quorum(id).unwrap());

    // revoking a validator drops their approval from the count
    h.bridge
        .revoke_validator(&h.admin, &ValidatorId::new("v2"))
        .unwrap();
    // 2 validators left: threshold 2, approvals 1
    assert!(!h.bridge.has_quorum(id).unwrap());
}

#[test]
fn votes_on_unknown_or_completed_operations() {
    let h = BridgeHarness::new();
    assert!(matches!(
        h.bridge.vote(OperationId(42), &ValidatorId::new("v1"), true),
        Err(BridgeError::UnknownOperation(OperationId(42)))
    ));
    assert!(matches!(
        h.bridge.execute(OperationId(42)),
        Err(BridgeError::UnknownOperation(_))
    ));

    let id = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 5))
        .unwrap();
    h.approve(id);
    h.bridge.execute(id).unwrap();
    assert!(matches!(
        h.bridge.vote(id, &ValidatorId::new("v3"), true),
        Err(BridgeError::AlreadyFinalized {
            status: OperationStatus::Completed,
            ..
        })
    ));
}

#[test]
fn certificate_changes_owner() {
    let h = BridgeHarness::new();
    let cert = CertificateId(7);
    let id = h
        .bridge
        .submit(
            OperationRequest::certificate_bridge(
                AccountId::new("0xa1"),
                AccountId::new("0xb2"),
                cert,
            )
            .with_payload(b"ipfs://cert/7".to_vec()),
        )
        .unwrap();
    h.approve(id);
    h.bridge.execute(id).unwrap();
    assert_eq!(h.connector.certificate_owner(cert), Some(AccountId::new("0xb2")));
}

// ── Withdrawal timelock ─────────────────────────────────────────────────

#[test]
fn withdrawal_waits_for_timelock() {
    let h = BridgeHarness::new();
    h.connector.set_balance(&AccountId::new("0xa1"), 1_000);
    let id = h.bridge.submit(withdrawal("0xa1", "0xb2", 400)).unwrap();
    h.approve(id);

    h.advance_secs(7 * DAY - 1);
    let err = h.bridge.execute(id).unwrap_err();
    match err {
        BridgeError::DelayNotMet { remaining } => assert_eq!(remaining.as_secs(), 1),
        other => panic!("expected DelayNotMet, got {other}"),
    }
    assert_eq!(h.status(id), OperationStatus::Pending);
    assert!(h.connector.submissions().is_empty());

    h.advance_secs(2);
    h.bridge.execute(id).unwrap();
    assert_eq!(h.connector.balance(&AccountId::new("0xa1")), 600);
    assert_eq!(h.connector.balance(&AccountId::new("0xb2")), 400);
    assert_eq!(h.bridge.stats().timelock_rejections, 1);
}

#[test]
fn second_withdrawal_waits_from_last_activity() {
    let h = BridgeHarness::new();
    h.connector.set_balance(&AccountId::new("0xa1"), 1_000);
    let first = h.bridge.submit(withdrawal("0xa1", "0xb2", 100)).unwrap();
    h.approve(first);
    h.advance_secs(7 * DAY);
    h.bridge.execute(first).unwrap();

    // requested right after the first one executed
    let second = h.bridge.submit(withdrawal("0xa1", "0xb2", 100)).unwrap();
    h.approve(second);
    h.advance_secs(DAY);
    assert!(matches!(
        h.bridge.execute(second),
        Err(BridgeError::DelayNotMet { .. })
    ));
    h.advance_secs(6 * DAY);
    assert!(h.bridge.execute(second).is_ok());
}

#[test]
fn timelock_is_per_user_and_withdrawal_only() {
    let h = BridgeHarness::new();
    h.connector.set_balance(&AccountId::new("0xa1"), 100);
    h.connector.set_balance(&AccountId::new("0xc3"), 100);
    h.bridge.submit(withdrawal("0xa1", "0xb2", 10)).unwrap();

    // deposits by the same user are never delayed
    let deposit = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 10))
        .unwrap();
    h.approve(deposit);
    assert!(h.bridge.execute(deposit).is_ok());

    // another user's withdrawal is delayed only by its own request
    let other = h.bridge.submit(withdrawal("0xc3", "0xb2", 10)).unwrap();
    h.approve(other);
    h.advance_secs(7 * DAY);
    assert!(h.bridge.execute(other).is_ok());
}

#[test]
fn insufficient_balance_fails_permanently_and_keeps_funds() {
    let h = BridgeHarness::new();
    h.connector.set_balance(&AccountId::new("0xa1"), 50);
    let id = h.bridge.submit(withdrawal("0xa1", "0xb2", 80)).unwrap();
    h.approve(id);
    h.advance_secs(7 * DAY);

    let err = h.bridge.execute(id).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::InsufficientBalance {
            needed: 80,
            available: 50
        }
    ));
    assert_eq!(h.status(id), OperationStatus::Failed);
    assert_eq!(
        h.bridge.failure_class(id).unwrap(),
        FailureClass::Permanent
    );
    assert_eq!(h.connector.balance(&AccountId::new("0xa1")), 50);
    assert_eq!(h.bridge.stats().permanent_failures, 1);

    // funds arrive, the operator retries, the withdrawal goes through
    h.connector.set_balance(&AccountId::new("0xa1"), 100);
    h.bridge.retry(&h.admin, id).unwrap();
    let receipt = h.bridge.execute(id).unwrap();
    assert_eq!(receipt.attempt, 2);
    assert_eq!(h.connector.balance(&AccountId::new("0xa1")), 20);
}

// ── Failure, retry, abandon ─────────────────────────────────────────────

#[test]
fn transient_failure_then_retry_keeps_votes() {
    let h = BridgeHarness::new();
    let id = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 9))
        .unwrap();
    h.approve(id);
    h.connector
        .fail_next(ConnectorError::Transient {
            reason: "rpc timeout".to_string(),
        });

    let err = h.bridge.execute(id).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::ExecutionFailed {
            permanent: false,
            ..
        }
    ));
    assert_eq!(h.status(id), OperationStatus::Failed);
    assert_eq!(h.bridge.failure_class(id).unwrap(), FailureClass::Transient);

    // executing a FAILED operation is refused until it is re-armed
    assert!(matches!(
        h.bridge.execute(id),
        Err(BridgeError::IllegalTransition { .. })
    ));

    h.bridge.retry(&h.admin, id).unwrap();
    let op = h.bridge.operation(id).unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retries, 1);
    assert_eq!(op.votes.len(), 2);

    h.bridge.execute(id).unwrap();
    assert_eq!(h.connector.submissions_for(id), 2);
    assert_eq!(h.bridge.failure_class(id).unwrap(), FailureClass::None);
}

#[test]
fn clear_vote_policy_requires_fresh_approval() {
    let config = BridgeConfig {
        retry: RetryPolicy {
            max_retries: None,
            vote_policy: RetryVotePolicy::Clear,
        },
        ..BridgeConfig::default()
    };
    let h = BridgeHarness::with_config(config);
    let id = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 9))
        .unwrap();
    h.approve(id);
    h.connector
        .fail_next(ConnectorError::Reverted {
            reason: "out of gas".to_string(),
        });
    assert!(h.bridge.execute(id).is_err());

    h.bridge.retry(&h.admin, id).unwrap();
    assert!(matches!(
        h.bridge.execute(id),
        Err(BridgeError::QuorumNotReached { approvals: 0, .. })
    ));
    h.approve(id);
    assert!(h.bridge.execute(id).is_ok());
}

#[test]
fn retry_limit_then_abandon() {
    let config = BridgeConfig {
        retry: RetryPolicy {
            max_retries: Some(1),
            vote_policy: RetryVotePolicy::Preserve,
        },
        ..BridgeConfig::default()
    };
    let h = BridgeHarness::with_config(config);
    let id = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 9))
        .unwrap();
    h.approve(id);

    for _ in 0..2 {
        h.connector
            .fail_next(ConnectorError::Transient {
                reason: "rpc down".to_string(),
            });
    }
    assert!(h.bridge.execute(id).is_err());
    h.bridge.retry(&h.admin, id).unwrap();
    assert!(h.bridge.execute(id).is_err());

    assert!(matches!(
        h.bridge.retry(&h.admin, id),
        Err(BridgeError::RetryLimitExceeded {
            attempts: 1,
            max: 1,
            ..
        })
    ));
    // the refusal does not move the operation on its own
    assert_eq!(h.status(id), OperationStatus::Failed);

    assert!(matches!(
        h.bridge.abandon(&AccountId::new("0xa1"), id),
        Err(BridgeError::NotAnOperator(_))
    ));
    h.bridge.abandon(&h.admin, id).unwrap();
    assert_eq!(h.status(id), OperationStatus::Abandoned);
    assert!(matches!(
        h.bridge.execute(id),
        Err(BridgeError::AlreadyFinalized { .. })
    ));
    assert!(h.bridge.retry(&h.admin, id).is_err());
}

#[test]
fn only_failed_operations_can_be_abandoned() {
    let h = BridgeHarness::new();
    let id = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 1))
        .unwrap();
    assert!(matches!(
        h.bridge.abandon(&h.admin, id),
        Err(BridgeError::IllegalTransition { .. })
    ));
    assert!(matches!(
        h.bridge.retry(&h.admin, id),
        Err(BridgeError::IllegalTransition { .. })
    ));
}

// ── Discard ─────────────────────────────────────────────────────────────

#[test]
fn initiator_discards_unvoted_operation() {
    let h = BridgeHarness::new();
    let user = AccountId::new("0xa1");
    let keep = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 1))
        .unwrap();
    let discarded = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 2))
        .unwrap();

    assert!(matches!(
        h.bridge.discard(&AccountId::new("0xb2"), discarded),
        Err(BridgeError::CannotDiscard { .. })
    ));
    h.bridge.vote(keep, &ValidatorId::new("v1"), true).unwrap();
    assert!(matches!(
        h.bridge.discard(&user, keep),
        Err(BridgeError::CannotDiscard { .. })
    ));

    h.bridge.discard(&user, discarded).unwrap();
    assert!(matches!(h.bridge.operation(discarded), Err(BridgeError::NotFound(_))));
    assert_eq!(h.bridge.operations_of(&user), vec![keep]);
    // ids are never reused
    assert_eq!(h.bridge.operation_count(), 2);
    let next = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 3))
        .unwrap();
    assert_eq!(next, OperationId(2));
}

// ── Messages ────────────────────────────────────────────────────────────

#[test]
fn message_delivered_exactly_once() {
    let h = BridgeHarness::new();
    let payload = b"bridge says hi";
    let id = MessageId::from_payload(payload);
    let sender = AccountId::new("0xa1");
    let recipient = AccountId::new("0xb2");

    h.bridge.send_message(id, payload).unwrap();
    h.bridge.send_message(id, payload).unwrap();

    h.bridge
        .deliver_message(id, &sender, &recipient, payload)
        .unwrap();
    assert!(h.bridge.is_message_processed(&id));
    assert!(matches!(
        h.bridge.deliver_message(id, &sender, &recipient, payload),
        Err(BridgeError::MessageAlreadyProcessed(_))
    ));
    assert_eq!(h.bridge.message_delivery(&id).unwrap().recipient, recipient);

    let stats = h.bridge.stats();
    assert_eq!(stats.messages_sent, 1);
    assert_eq!(stats.messages_delivered, 1);
}

#[test]
fn message_operation_goes_through_consensus() {
    let h = BridgeHarness::new();
    let id = h
        .bridge
        .submit(OperationRequest::message(
            AccountId::new("0xa1"),
            AccountId::new("0xb2"),
            b"payload".to_vec(),
        ))
        .unwrap();
    h.approve(id);
    h.bridge.execute(id).unwrap();
    let submitted = h.connector.submissions();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].asset, TransferAsset::Payload(b"payload".to_vec()));
}

// ── Batches ─────────────────────────────────────────────────────────────

#[test]
fn batch_of_ten_with_one_invalid_item() {
    let h = BridgeHarness::new();
    let requests: Vec<_> = (0..10u128)
        .map(|i| OperationRequest::dummy_deposit("0xa1", if i == 5 { 0 } else { 10 }))
        .collect();
    let results = h.bridge.submit_batch(requests).unwrap();
    assert_eq!(results.len(), 10);
    for (i, result) in results.iter().enumerate() {
        if i == 5 {
            assert!(matches!(result, Err(BridgeError::InvalidAmount)));
        } else {
            assert!(result.is_ok(), "item {i} should be created");
        }
    }
    let ids: Vec<OperationId> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(ids.len(), 9);
    // ids stay dense: the rejected item never consumed one
    assert_eq!(ids, (0..9).map(OperationId).collect::<Vec<_>>());

    for id in &ids {
        h.approve(*id);
    }
    let receipts = h.bridge.execute_batch(&ids).unwrap();
    assert!(receipts.iter().all(Result::is_ok));
    assert_eq!(h.connector.balance(&AccountId::new("0xa1")), 90);
}

#[test]
fn oversized_batch_is_rejected_whole() {
    let config = BridgeConfig {
        max_batch_size: 4,
        ..BridgeConfig::default()
    };
    let h = BridgeHarness::with_config(config);
    let requests = vec![OperationRequest::dummy_deposit("0xa1", 1); 5];
    assert!(matches!(
        h.bridge.submit_batch(requests),
        Err(BridgeError::BatchTooLarge { size: 5, max: 4 })
    ));
    assert_eq!(h.bridge.operation_count(), 0);
}

// ── Pause and roles ─────────────────────────────────────────────────────

#[test]
fn paused_bridge_keeps_state_readable() {
    let h = BridgeHarness::new();
    let id = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 1))
        .unwrap();
    h.approve(id);
    h.bridge.pause(&h.admin).unwrap();

    assert!(matches!(h.bridge.execute(id), Err(BridgeError::BridgePaused)));
    assert!(matches!(
        h.bridge.execute_batch(&[id]),
        Err(BridgeError::BridgePaused)
    ));
    assert_eq!(h.status(id), OperationStatus::Pending);
    assert!(h.bridge.has_quorum(id).unwrap());
    assert!(h.connector.submissions().is_empty());

    h.bridge.unpause(&h.admin).unwrap();
    assert!(h.bridge.execute(id).is_ok());
}

// ── Restart ─────────────────────────────────────────────────────────────

fn temp_journal() -> PathBuf {
    std::env::temp_dir().join(format!(
        "crossbridge-bridge-{:016x}.jsonl",
        rand::random::<u64>()
    ))
}

fn open_bridge(
    path: &PathBuf,
    clock: Arc<ManualClock>,
    connector: Arc<FakeConnector>,
    registry: Arc<ValidatorRegistry>,
) -> Bridge {
    let (journal, records) = FileJournal::open(path).unwrap();
    Bridge::replay(
        BridgeConfig::default(),
        &records,
        Arc::new(journal),
        registry,
        connector,
        clock,
    )
    .unwrap()
}

#[test]
fn restart_restores_operations_and_timelock() {
    init_tracing();
    let path = temp_journal();
    let clock = Arc::new(ManualClock::epoch());
    let connector = Arc::new(FakeConnector::new());
    let admin = AccountId::new("0xad");
    let registry = Arc::new(ValidatorRegistry::with_operator(admin.clone()));
    registry.grant(ValidatorId::new("v1")).unwrap();
    connector.set_balance(&AccountId::new("0xa1"), 100);

    let before = {
        let bridge = open_bridge(&path, clock.clone(), connector.clone(), registry.clone());
        let done = bridge.submit(withdrawal("0xa1", "0xb2", 10)).unwrap();
        bridge.vote(done, &ValidatorId::new("v1"), true).unwrap();
        clock.advance(Duration::seconds(7 * DAY));
        bridge.execute(done).unwrap();
        bridge
            .submit(OperationRequest::dummy_deposit("0xc3", 5))
            .unwrap();
        bridge.store().snapshot()
    };

    let bridge = open_bridge(&path, clock.clone(), connector, registry);
    assert_eq!(bridge.store().snapshot(), before);
    assert_eq!(bridge.operation_count(), 2);
    assert_eq!(bridge.operation(OperationId(0)).unwrap().status, OperationStatus::Completed);
    assert!(matches!(
        bridge.execute(OperationId(0)),
        Err(BridgeError::AlreadyProcessed(_))
    ));

    // the executed withdrawal still blocks the next one for a full delay
    let next = bridge.submit(withdrawal("0xa1", "0xb2", 10)).unwrap();
    bridge.vote(next, &ValidatorId::new("v1"), true).unwrap();
    clock.advance(Duration::seconds(DAY));
    assert!(matches!(
        bridge.execute(next),
        Err(BridgeError::DelayNotMet { .. })
    ));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn restart_keeps_delivered_messages_and_open_recoveries() {
    init_tracing();
    let path = temp_journal();
    let clock = Arc::new(ManualClock::epoch());
    let connector = Arc::new(FakeConnector::new());
    let admin = AccountId::new("0xad");
    let registry = Arc::new(ValidatorRegistry::with_operator(admin.clone()));
    let (a, b) = (AccountId::new("0xa1"), AccountId::new("0xb2"));
    let delivered = MessageId::from_payload(b"mint 10 to 0xb2");
    let stuck = MessageId::from_payload(b"mint 5 to 0xb2");

    {
        let bridge = open_bridge(&path, clock.clone(), connector.clone(), registry.clone());
        bridge.submit(OperationRequest::dummy_deposit("0xa1", 5)).unwrap();
        bridge
            .deliver_message(delivered, &a, &b, b"mint 10 to 0xb2")
            .unwrap();
        bridge.send_message(stuck, b"mint 5 to 0xb2").unwrap();
        bridge
            .initiate_message_recovery(&admin, stuck, "destination relayer offline")
            .unwrap();
    }

    let bridge = open_bridge(&path, clock.clone(), connector, registry);
    assert_eq!(bridge.operation_count(), 1);
    assert!(bridge.is_message_processed(&delivered));
    assert!(matches!(
        bridge.deliver_message(delivered, &a, &b, b"mint 10 to 0xb2"),
        Err(BridgeError::MessageAlreadyProcessed(_))
    ));
    assert_eq!(bridge.stats().messages_sent, 1);
    assert_eq!(bridge.open_message_recoveries(), vec![stuck]);

    bridge
        .retry_message_recovery(&admin, stuck, &a, &b, b"mint 5 to 0xb2")
        .unwrap();
    assert!(bridge.is_message_processed(&stuck));
    // ids keep counting where the previous run stopped
    let next = bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 5))
        .unwrap();
    assert_eq!(next, OperationId(1));

    let _ = std::fs::remove_file(&path);
}

// ── Properties ──────────────────────────────────────────────────────────

#[test]
fn status_counts_always_cover_live_operations() {
    let h = BridgeHarness::new();
    h.connector.set_balance(&AccountId::new("0xa1"), 10);
    let ok = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 1))
        .unwrap();
    let failing = h
        .bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 1))
        .unwrap();
    h.bridge
        .submit(OperationRequest::dummy_deposit("0xa1", 1))
        .unwrap();
    h.approve(ok);
    h.approve(failing);
    h.bridge.execute(ok).unwrap();
    h.connector
        .fail_next(ConnectorError::Permanent {
            reason: "contract paused".to_string(),
        });
    assert!(h.bridge.execute(failing).is_err());

    let stats = h.bridge.stats();
    let total: u64 = stats.by_status.values().sum();
    assert_eq!(total, 3);
    assert_eq!(stats.count_status(OperationStatus::Completed), 1);
    assert_eq!(stats.count_status(OperationStatus::Failed), 1);
    assert_eq!(stats.count_status(OperationStatus::Pending), 1);
    assert_eq!(stats.count_kind(OperationKind::TokenDeposit), 3);
    assert_eq!(stats.operations_created, 3);
    assert!(stats.average_completion_ms.is_some());
}

#[test]
fn every_completed_operation_had_quorum_and_one_dispatch_per_attempt() {
    let h = BridgeHarness::new();
    let ids: Vec<_> = (1..=5u128)
        .map(|amount| {
            h.bridge
                .submit(OperationRequest::dummy_deposit("0xa1", amount))
                .unwrap()
        })
        .collect();
    for id in ids.iter().step_by(2) {
        h.approve(*id);
    }
    let _ = h.bridge.execute_batch(&ids).unwrap();
    let _ = h.bridge.execute_batch(&ids).unwrap();

    for id in ids {
        let op = h.bridge.operation(id).unwrap();
        if op.status == OperationStatus::Completed {
            assert!(op.approvals().count() >= 2);
            assert_eq!(h.connector.submissions_for(id), 1);
        } else {
            assert_eq!(op.status, OperationStatus::Pending);
            assert_eq!(h.connector.submissions_for(id), 0);
        }
    }
}
