//! # crdtsync CLI
//!
//! Command-line utilities for demonstrating merges and debugging envelopes.

use anyhow::{bail, Context, Result};
use crdtsync_agent::{InMemoryPeer, Reconciler, Registry, SharedReplica};
use crdtsync_core::{CrdtKind, Operation, Replica, ReplicaId, Value};
use crdtsync_proto::{Encoding, StateEnvelope};
use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "demo" => {
            for line in demo().await? {
                println!("{line}");
            }
        }
        "inspect" => {
            if args.len() < 3 {
                eprintln!("Usage: crdtsync inspect <file>");
                std::process::exit(1);
            }
            let summary = inspect(Path::new(&args[2]))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "convert" => {
            if args.len() < 4 {
                eprintln!("Usage: crdtsync convert <input> <output>");
                std::process::exit(1);
            }
            let encoding = convert(Path::new(&args[2]), Path::new(&args[3]))?;
            println!("Wrote {} as {encoding:?}", args[3]);
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

const DEMO_INSTANCES: [(&str, CrdtKind); 6] = [
    ("hits", CrdtKind::GCounter),
    ("balance", CrdtKind::PnCounter),
    ("seen", CrdtKind::GSet),
    ("tags", CrdtKind::OrSet),
    ("title", CrdtKind::LwwRegister),
    ("doc", CrdtKind::Sequence),
];

fn demo_registry(replica: &str) -> Result<Registry> {
    let mut registry = Registry::new(ReplicaId::from(replica));
    for (name, kind) in DEMO_INSTANCES {
        registry.register(name, kind)?;
    }
    Ok(registry)
}

async fn run_ops(registry: &Registry, ops: Vec<(&str, Operation)>) -> Result<()> {
    for (name, op) in ops {
        let instance = registry
            .get(name)
            .with_context(|| format!("no instance '{name}'"))?;
        instance.apply_local(op).await?;
    }
    Ok(())
}

async fn value_line(label: &str, instance: &SharedReplica) -> String {
    format!("  {label:<3} {:<8} {}", instance.name(), instance.value().await)
}

/// Two replicas edit concurrently while partitioned, then reconcile.
async fn demo() -> Result<Vec<String>> {
    let a = Arc::new(demo_registry("A")?);
    let b = Arc::new(demo_registry("B")?);

    run_ops(
        &a,
        vec![
            ("hits", Operation::Increment { amount: 5 }),
            ("balance", Operation::Increment { amount: 10 }),
            ("balance", Operation::Decrement { amount: 3 }),
            ("seen", Operation::Add { element: "apple".into() }),
            ("tags", Operation::Add { element: "x".into() }),
            (
                "title",
                Operation::Set {
                    value: "hello".into(),
                    timestamp: Some(100),
                },
            ),
            (
                "doc",
                Operation::Insert {
                    position: 0,
                    value: "a".into(),
                },
            ),
        ],
    )
    .await?;
    run_ops(
        &b,
        vec![
            ("hits", Operation::Increment { amount: 7 }),
            ("balance", Operation::Increment { amount: 4 }),
            ("seen", Operation::Add { element: "banana".into() }),
            ("tags", Operation::Add { element: "x".into() }),
            ("tags", Operation::Remove { element: "x".into() }),
            (
                "title",
                Operation::Set {
                    value: "world".into(),
                    timestamp: Some(50),
                },
            ),
            (
                "doc",
                Operation::Insert {
                    position: 0,
                    value: "b".into(),
                },
            ),
        ],
    )
    .await?;

    let mut lines = vec!["Before reconciliation:".to_string()];
    for (name, _) in DEMO_INSTANCES {
        for (label, registry) in [("A", &a), ("B", &b)] {
            if let Some(instance) = registry.get(name) {
                lines.push(value_line(label, instance).await);
            }
        }
    }

    let peer_b = Arc::new(InMemoryPeer::new(Arc::clone(&b)));
    let a_from_b = Reconciler::new(peer_b.clone(), Arc::clone(&a), Duration::from_secs(1));
    let b_from_a = Reconciler::new(
        Arc::new(InMemoryPeer::new(Arc::clone(&a))),
        Arc::clone(&b),
        Duration::from_secs(1),
    );

    peer_b.set_online(false);
    let partitioned = a_from_b.run_once().await;
    lines.push(format!(
        "Partitioned pass: {} failures, nothing merged",
        partitioned.failures.len()
    ));
    peer_b.set_online(true);

    let pulled = a_from_b.run_once().await;
    let pushed = b_from_a.run_once().await;
    if !pulled.is_clean() || !pushed.is_clean() {
        bail!("reconciliation failed after the partition healed");
    }
    lines.push(format!(
        "Healed: A changed {} instances, B changed {}",
        pulled.changed, pushed.changed
    ));

    lines.push("After reconciliation:".to_string());
    let mut converged = true;
    for (name, _) in DEMO_INSTANCES {
        let (Some(left), Some(right)) = (a.get(name), b.get(name)) else {
            continue;
        };
        converged &= left.value().await == right.value().await;
        lines.push(value_line("A", left).await);
        lines.push(value_line("B", right).await);
    }
    lines.push(format!("Converged: {converged}"));

    Ok(lines)
}

fn read_envelope(path: &Path) -> Result<StateEnvelope> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let encoding = Encoding::from_path(path).unwrap_or_else(|| Encoding::sniff(&bytes));
    StateEnvelope::decode(&bytes, encoding)
        .with_context(|| format!("Failed to decode {}", path.display()))
}

/// Decode an envelope file and summarize it.
fn inspect(path: &Path) -> Result<serde_json::Value> {
    let envelope = read_envelope(path)?;
    let kind = envelope.kind();
    let replica = Replica::restore(&envelope.instance, envelope.origin.clone(), envelope.snapshot)?;
    let value: Value = replica.value();

    Ok(serde_json::json!({
        "instance": envelope.instance,
        "origin": envelope.origin,
        "kind": kind.as_str(),
        "value": value,
    }))
}

/// Convert an envelope between JSON and CBOR, chosen by the output extension.
fn convert(input: &Path, output: &Path) -> Result<Encoding> {
    let Some(encoding) = Encoding::from_path(output) else {
        bail!(
            "cannot infer output encoding of {}, use .json or .cbor",
            output.display()
        );
    };

    let envelope = read_envelope(input)?;
    let bytes = envelope.encode(encoding)?;
    std::fs::write(output, bytes).with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(encoding)
}

fn print_help() {
    println!(
        r#"crdtsync CLI

USAGE:
    crdtsync <COMMAND> [OPTIONS]

COMMANDS:
    demo                      Replay a two-replica partition and merge
    inspect <file>            Decode a JSON or CBOR state envelope and print its value
    convert <input> <output>  Convert an envelope between .json and .cbor
    help                      Show this help message

EXAMPLES:
    crdtsync demo
    crdtsync inspect tags.cbor
    crdtsync convert tags.json tags.cbor
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crdtsync_core::{OrSet, Snapshot};

    #[tokio::test]
    async fn demo_converges() {
        let lines = demo().await.unwrap();
        assert_eq!(lines.last().map(String::as_str), Some("Converged: true"));
        assert!(lines.contains(&"  A   seen     {apple, banana}".to_string()));
        assert!(lines.iter().any(|l| l.starts_with("Partitioned pass: 6 failures")));
    }

    #[test]
    fn convert_then_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("tags.json");
        let cbor_path = dir.path().join("tags.cbor");

        let mut set = OrSet::new();
        set.add("x".to_string());
        let envelope = StateEnvelope::new("tags", ReplicaId::from("A"), Snapshot::OrSet(set));
        std::fs::write(&json_path, envelope.to_json().unwrap()).unwrap();

        assert_eq!(convert(&json_path, &cbor_path).unwrap(), Encoding::Cbor);
        let summary = inspect(&cbor_path).unwrap();

        assert_eq!(summary["kind"], "or_set");
        assert_eq!(summary["value"], serde_json::json!(["x"]));
    }

    #[test]
    fn convert_needs_known_extension() {
        let dir = tempfile::tempdir().unwrap();
        let result = convert(&dir.path().join("a.json"), &dir.path().join("a.bin"));
        assert!(result.is_err());
    }
}
