use crdtsync_agent::{
    reconcile, Agent, AgentConfig, InMemoryPeer, InstanceConfig, Reconciler, Registry,
    SqliteStore, StoreType, SyncFailure,
};
use crdtsync_core::{CrdtKind, Operation, ReplicaId, Snapshot, Value};
use crdtsync_proto::{CharacterEdit, Encoding, StateEnvelope};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

fn instances() -> Vec<InstanceConfig> {
    vec![
        InstanceConfig::new("hits", CrdtKind::GCounter),
        InstanceConfig::new("balance", CrdtKind::PnCounter),
        InstanceConfig::new("seen", CrdtKind::GSet),
        InstanceConfig::new("tags", CrdtKind::OrSet),
        InstanceConfig::new("title", CrdtKind::LwwRegister),
        InstanceConfig::new("doc", CrdtKind::Sequence),
    ]
}

fn memory_config(replica: &str) -> AgentConfig {
    let mut config = AgentConfig {
        replica_id: ReplicaId::from(replica),
        instances: instances(),
        ..AgentConfig::default()
    };
    config.persistence.store_type = StoreType::Memory;
    config
}

fn agent(replica: &str) -> Agent {
    Agent::new(memory_config(replica)).unwrap()
}

async fn apply(agent: &Agent, instance: &str, op: Operation) -> Value {
    agent
        .instance(instance)
        .unwrap()
        .apply_local(op)
        .await
        .unwrap()
        .value
}

fn reconciler(local: &Agent, remote: &Agent) -> Reconciler {
    let peer = Arc::new(InMemoryPeer::new(Arc::clone(remote.registry())));
    Reconciler::new(peer, Arc::clone(local.registry()), Duration::from_millis(10))
        .with_store(Some(Arc::clone(local.store())))
}

async fn value(agent: &Agent, instance: &str) -> Value {
    agent.instance(instance).unwrap().value().await
}

#[tokio::test]
async fn two_agents_converge_on_every_kind() {
    let a = agent("A");
    let b = agent("B");

    apply(&a, "hits", Operation::Increment { amount: 5 }).await;
    apply(&b, "hits", Operation::Increment { amount: 7 }).await;

    apply(&a, "balance", Operation::Increment { amount: 10 }).await;
    apply(&a, "balance", Operation::Decrement { amount: 3 }).await;
    apply(&b, "balance", Operation::Increment { amount: 4 }).await;

    apply(&a, "seen", Operation::Add { element: "apple".into() }).await;
    apply(&b, "seen", Operation::Add { element: "banana".into() }).await;
    apply(&b, "seen", Operation::Add { element: "apple".into() }).await;

    apply(&a, "tags", Operation::Add { element: "x".into() }).await;
    apply(&b, "tags", Operation::Add { element: "x".into() }).await;
    apply(&b, "tags", Operation::Remove { element: "x".into() }).await;

    apply(
        &a,
        "title",
        Operation::Set {
            value: "hello".into(),
            timestamp: Some(100),
        },
    )
    .await;
    apply(
        &b,
        "title",
        Operation::Set {
            value: "world".into(),
            timestamp: Some(50),
        },
    )
    .await;

    apply(&a, "doc", Operation::Insert { position: 0, value: "a".into() }).await;
    apply(&b, "doc", Operation::Insert { position: 0, value: "b".into() }).await;

    let report_a = reconciler(&a, &b).run_once().await;
    let report_b = reconciler(&b, &a).run_once().await;
    assert!(report_a.is_clean());
    assert!(report_b.is_clean());
    assert_eq!(report_a.merged, 6);

    for agent in [&a, &b] {
        assert_eq!(value(agent, "hits").await, Value::Counter(12));
        assert_eq!(value(agent, "balance").await, Value::Counter(11));
        assert_eq!(
            value(agent, "seen").await,
            Value::Elements(vec!["apple".into(), "banana".into()])
        );
        assert_eq!(value(agent, "tags").await, Value::Elements(vec!["x".into()]));
        assert_eq!(value(agent, "title").await, Value::Register(Some("hello".into())));
    }
    assert_eq!(value(&a, "doc").await, value(&b, "doc").await);
}

#[tokio::test]
async fn repeated_reconciliation_is_idempotent() {
    let a = agent("A");
    let b = agent("B");
    apply(&b, "tags", Operation::Add { element: "y".into() }).await;

    let sync = reconciler(&a, &b);
    let first = sync.run_once().await;
    let tags_after_first = a.instance("tags").unwrap().export_state().await;
    let second = sync.run_once().await;

    assert_eq!(first.changed, 1);
    assert_eq!(second.changed, 0);
    assert_eq!(a.instance("tags").unwrap().export_state().await, tags_after_first);
}

#[tokio::test]
async fn offline_peer_is_retried_without_mutation() {
    let a = agent("A");
    let b = agent("B");
    apply(&b, "hits", Operation::Increment { amount: 3 }).await;

    let peer = Arc::new(InMemoryPeer::new(Arc::clone(b.registry())));
    let sync = Reconciler::new(peer.clone(), Arc::clone(a.registry()), Duration::from_millis(10))
        .with_store(Some(Arc::clone(a.store())));

    peer.set_online(false);
    let report = sync.run_once().await;
    assert_eq!(report.failures.len(), 6);
    assert!(matches!(report.failures[0], SyncFailure::Unreachable { .. }));
    assert_eq!(value(&a, "hits").await, Value::Counter(0));

    let progress = a.store().lock().unwrap().peer_progress("B", "hits").unwrap().unwrap();
    assert_eq!(progress.failures, 1);
    assert!(progress.last_success_at.is_none());

    peer.set_online(true);
    assert!(sync.run_once().await.is_clean());
    assert_eq!(value(&a, "hits").await, Value::Counter(3));

    let progress = a.store().lock().unwrap().peer_progress("B", "hits").unwrap().unwrap();
    assert_eq!(progress.failures, 0);
    assert!(progress.last_success_at.is_some());
}

#[tokio::test]
async fn peer_missing_an_instance_only_fails_that_instance() {
    let a = agent("A");
    let mut partial = Registry::new(ReplicaId::from("C"));
    partial.register("hits", CrdtKind::GCounter).unwrap();
    let peer = Arc::new(InMemoryPeer::new(Arc::new(partial)));

    let report = Reconciler::new(peer, Arc::clone(a.registry()), Duration::from_millis(10))
        .run_once()
        .await;

    assert_eq!(report.merged, 1);
    assert_eq!(report.failures.len(), 5);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f, SyncFailure::Status { status: 404, .. })));
}

#[tokio::test]
async fn malformed_push_is_rejected_without_mutation() {
    let a = agent("A");
    apply(&a, "hits", Operation::Increment { amount: 2 }).await;

    let garbage = a.accept_push(b"{not json").await;
    assert!(matches!(garbage, Err(SyncFailure::Decode { .. })));

    let negative = br#"{"instance":"hits","origin":"B","snapshot":{"type":"g_counter","state":{"counts":{"B":-1}}}}"#;
    assert!(matches!(
        a.accept_push(negative).await,
        Err(SyncFailure::Decode { .. })
    ));

    let empty_tags = br#"{"instance":"tags","origin":"B","snapshot":{"type":"or_set","state":{"added":{"x":[]},"removed":{}}}}"#;
    assert!(matches!(
        a.accept_push(empty_tags).await,
        Err(SyncFailure::Decode { .. })
    ));

    assert_eq!(value(&a, "hits").await, Value::Counter(2));
    assert_eq!(value(&a, "tags").await, Value::Elements(Vec::new()));
}

#[tokio::test]
async fn push_of_wrong_kind_or_unknown_instance_is_rejected() {
    let a = agent("A");
    apply(&a, "hits", Operation::Increment { amount: 2 }).await;

    let wrong_kind = StateEnvelope::new("hits", ReplicaId::from("B"), Snapshot::empty(CrdtKind::OrSet));
    assert!(matches!(
        a.accept_push(&wrong_kind.to_cbor().unwrap()).await,
        Err(SyncFailure::Rejected { .. })
    ));

    let unknown = StateEnvelope::new("nope", ReplicaId::from("B"), Snapshot::empty(CrdtKind::GCounter));
    assert_eq!(
        a.accept_push(&unknown.to_json().unwrap()).await,
        Err(SyncFailure::UnknownInstance("nope".to_string()))
    );

    assert_eq!(value(&a, "hits").await, Value::Counter(2));
}

#[tokio::test]
async fn pushed_envelope_merges_in_either_encoding() {
    let a = agent("A");
    let b = agent("B");
    apply(&b, "hits", Operation::Increment { amount: 4 }).await;

    let envelope = b.registry().envelope("hits").await.unwrap();
    assert!(a.accept_push(&envelope.to_cbor().unwrap()).await.unwrap());
    assert!(!a.accept_push(&envelope.to_json().unwrap()).await.unwrap());
    assert_eq!(value(&a, "hits").await, Value::Counter(4));
}

#[tokio::test]
async fn live_edits_converge_in_any_order() {
    let a = agent("A");
    let b = agent("B");

    let mut edits_from_a = Vec::new();
    for (position, letter) in ["h", "i"].into_iter().enumerate() {
        let applied = a
            .instance("doc")
            .unwrap()
            .apply_local(Operation::Insert {
                position,
                value: letter.into(),
            })
            .await
            .unwrap();
        edits_from_a.push(CharacterEdit::new("doc", ReplicaId::from("A"), applied.edit.unwrap()));
    }
    let applied = b
        .instance("doc")
        .unwrap()
        .apply_local(Operation::Insert {
            position: 0,
            value: "!".into(),
        })
        .await
        .unwrap();
    let edit_from_b = CharacterEdit::new("doc", ReplicaId::from("B"), applied.edit.unwrap());

    // Deliver A's edits to B in reverse, twice.
    for edit in edits_from_a.iter().rev().chain(edits_from_a.iter()) {
        b.accept_edit(&edit.encode(Encoding::Json).unwrap()).await.unwrap();
    }
    a.accept_edit(&edit_from_b.encode(Encoding::Cbor).unwrap())
        .await
        .unwrap();

    assert_eq!(value(&a, "doc").await, value(&b, "doc").await);
    assert_eq!(
        a.instance("doc").unwrap().export_state().await,
        b.instance("doc").unwrap().export_state().await
    );
}

#[tokio::test]
async fn edit_for_non_sequence_is_rejected() {
    let a = agent("A");
    let b = agent("B");
    let applied = b
        .instance("doc")
        .unwrap()
        .apply_local(Operation::Insert {
            position: 0,
            value: "x".into(),
        })
        .await
        .unwrap();
    let edit = CharacterEdit::new("hits", ReplicaId::from("B"), applied.edit.unwrap());

    assert!(matches!(
        a.accept_edit(&edit.encode(Encoding::Json).unwrap()).await,
        Err(SyncFailure::Rejected { .. })
    ));
}

#[tokio::test]
async fn reconcile_rejects_envelope_for_other_instance() {
    let a = agent("A");
    let envelope = StateEnvelope::new("balance", ReplicaId::from("B"), Snapshot::empty(CrdtKind::GCounter));

    let result = reconcile(a.instance("hits").unwrap(), &envelope).await;
    assert!(matches!(result, Err(SyncFailure::Rejected { .. })));
}

#[tokio::test]
async fn spawned_reconcilers_converge_and_stop() {
    let a = agent("A");
    let b = agent("B");
    apply(&a, "tags", Operation::Add { element: "from-a".into() }).await;
    apply(&b, "tags", Operation::Add { element: "from-b".into() }).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = [
        reconciler(&a, &b).spawn(shutdown_rx.clone()),
        reconciler(&b, &a).spawn(shutdown_rx),
    ];

    let expected = Value::Elements(vec!["from-a".into(), "from-b".into()]);
    timeout(Duration::from_secs(5), async {
        loop {
            if value(&a, "tags").await == expected && value(&b, "tags").await == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("replicas did not converge");

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("reconciler did not stop")
            .unwrap();
    }
}

#[tokio::test]
async fn snapshots_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = memory_config("A");
    config.persistence.store_type = StoreType::Sqlite;
    config.persistence.db_path = dir.path().join("crdtsync.db");

    {
        let a = Agent::new(config.clone()).unwrap();
        apply(&a, "hits", Operation::Increment { amount: 9 }).await;
        apply(&a, "seen", Operation::Add { element: "apple".into() }).await;
        // Spliced out of canonical order: "b" is (A, 1), "a" is (A, 2).
        apply(&a, "doc", Operation::Insert { position: 0, value: "b".into() }).await;
        let text = apply(&a, "doc", Operation::Insert { position: 0, value: "a".into() }).await;
        assert_eq!(text, Value::Text("ab".into()));
        apply(
            &a,
            "title",
            Operation::Set {
                value: "old".into(),
                timestamp: Some(u64::MAX / 2),
            },
        )
        .await;
        assert_eq!(a.persist().await.unwrap(), 6);
    }

    let restarted = Agent::new(config).unwrap();
    assert_eq!(value(&restarted, "hits").await, Value::Counter(9));
    assert_eq!(
        value(&restarted, "seen").await,
        Value::Elements(vec!["apple".into()])
    );
    assert_eq!(value(&restarted, "doc").await, Value::Text("ab".into()));

    // The clock resumes after the restored write, so a clock-stamped write wins.
    let title = apply(
        &restarted,
        "title",
        Operation::Set {
            value: "new".into(),
            timestamp: None,
        },
    )
    .await;
    assert_eq!(title, Value::Register(Some("new".into())));

    // A restored site continues its counter instead of reusing ids.
    let applied = restarted
        .instance("doc")
        .unwrap()
        .apply_local(Operation::Insert {
            position: 2,
            value: "c".into(),
        })
        .await
        .unwrap();
    assert_eq!(applied.edit.unwrap().id.counter, 3);
    assert_eq!(applied.value, Value::Text("abc".into()));
}

#[tokio::test]
async fn stored_snapshot_of_other_kind_fails_startup() {
    let store = SqliteStore::in_memory().unwrap();
    store
        .save_snapshot("hits", &ReplicaId::from("A"), &Snapshot::empty(CrdtKind::OrSet))
        .unwrap();

    assert!(Agent::with_store(memory_config("A"), store).is_err());
}
