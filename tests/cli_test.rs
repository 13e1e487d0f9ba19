//! Commands driven end to end through the parsed CLI.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use clap::Parser;
use kubeloop::cli::Cli;
use kubeloop::commands::execute_command;
use kubeloop_events::{ClusterEvent, PodPhase, read_journal};

const MANIFEST: &str = "
kind: Deployment
metadata: { name: web }
spec:
  replicas: 2
  template: { labels: { app: web }, image: 'nginx:1.25' }
---
kind: StatefulSet
metadata: { name: db }
spec:
  replicas: 2
  template: { labels: { app: db }, image: 'postgres:16' }
  volumeClaimTemplates: [ { name: data, storage: 1Gi } ]
";

async fn run(args: &[&str]) -> anyhow::Result<()> {
    let cli = Cli::try_parse_from(std::iter::once("kubeloop").chain(args.iter().copied()))?;
    execute_command(cli).await
}

fn write_manifest(dir: &Path) -> String {
    let path = dir.join("app.yaml");
    std::fs::write(&path, MANIFEST).unwrap();
    path.display().to_string()
}

/// Given a manifest and a journal path
/// When apply runs and the journal is replayed
/// Then the journal holds the whole history and replays cleanly
#[tokio::test]
async fn apply_writes_a_replayable_journal() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let journal = dir.path().join("cluster.jsonl").display().to_string();

    run(&["apply", "-f", &manifest, "--journal", &journal, "-o", "json"])
        .await
        .unwrap();
    run(&["replay", "--journal", &journal]).await.unwrap();

    let events = read_journal(Path::new(&journal)).await.unwrap();
    let running = events
        .iter()
        .filter(|e| matches!(e, ClusterEvent::PodPhaseChanged { to: PodPhase::Running, .. }))
        .count();
    assert_eq!(running, 4);
}

/// Given a fault injected before cycle 5
/// When apply runs
/// Then the journal records the injected failure and the loop still settles
#[tokio::test]
async fn apply_with_fault_heals() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let journal = dir.path().join("cluster.jsonl").display().to_string();

    // db-0 waits for its claim, so it exists from the fourth cycle on.
    run(&[
        "apply", "-f", &manifest, "--journal", &journal, "--fail-pod", "db-0", "--at-cycle", "5",
    ])
    .await
    .unwrap();

    let events = read_journal(Path::new(&journal)).await.unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ClusterEvent::PodPhaseChanged { to: PodPhase::Failed, reason: Some(r), .. } if r == "injected failure"
    )));
}

#[tokio::test]
async fn plan_does_not_touch_the_journal() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let journal = dir.path().join("cluster.jsonl");

    let journal_arg = journal.display().to_string();

    run(&["plan", "-f", &manifest, "--journal", &journal_arg])
        .await
        .unwrap();
    assert!(!journal.exists());

    run(&["apply", "-f", &manifest, "--journal", &journal_arg])
        .await
        .unwrap();
    let recorded = std::fs::read_to_string(&journal).unwrap();
    run(&["plan", "-f", &manifest, "--journal", &journal_arg])
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&journal).unwrap(), recorded);
}

#[tokio::test]
async fn too_few_cycles_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());

    let err = run(&["apply", "-f", &manifest, "--max-cycles", "2"])
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("did not converge within 2 cycles"));
}

#[tokio::test]
async fn missing_manifest_names_the_file() {
    let err = run(&["apply", "-f", "/nonexistent/app.yaml"]).await.unwrap_err();
    assert!(format!("{err:#}").contains("/nonexistent/app.yaml"));
}

#[tokio::test]
async fn replay_of_missing_journal_fails() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("absent.jsonl").display().to_string();
    assert!(run(&["replay", "--journal", &journal]).await.is_err());
}

#[tokio::test]
async fn explicit_config_file_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = write_manifest(dir.path());
    let config = dir.path().join("kubeloop.toml");
    std::fs::write(&config, "[loop]\nmax_cycles = 1\n").unwrap();

    let err = run(&["--config", &config.display().to_string(), "apply", "-f", &manifest])
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("within 1 cycles"));
}
