mod common;

use common::Harness;
use std::fs;
use vigil_application::{Backup, EndRequest, StartRequest};
use vigil_core::session::MilestoneInput;

async fn ended_session(harness: &Harness, title: &str) -> String {
    let mut state = harness.signed_state();
    let started = harness
        .lifecycle
        .start(&mut state, StartRequest::default())
        .await
        .unwrap();
    harness.lifecycle.heartbeat(&mut state).unwrap();
    harness
        .lifecycle
        .end(
            &mut state,
            EndRequest {
                milestones: vec![MilestoneInput {
                    title: title.to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    started.session_id
}

#[tokio::test]
async fn test_backup_exports_indexes_and_sealed_chains() {
    let harness = Harness::new();
    let first = ended_session(&harness, "one").await;
    let second = ended_session(&harness, "two").await;

    // Open chains are not part of a backup.
    let mut open = harness.signed_state();
    harness
        .lifecycle
        .start(&mut open, StartRequest::default())
        .await
        .unwrap();

    let backup = harness.lifecycle.backup().await.unwrap();
    assert_eq!(backup.sessions.len(), 2);
    assert_eq!(backup.milestones.len(), 2);
    assert_eq!(backup.sealed_chains.len(), 2);
    assert_eq!(backup.sealed_chains[&first], harness.sealed_content(&first));
    assert!(backup.sealed_chains.contains_key(&second));

    let json = serde_json::to_string(&backup).unwrap();
    assert!(!json.contains("keystore"));
}

#[tokio::test]
async fn test_restore_into_empty_root_then_dedupes() {
    let source = Harness::new();
    let session_id = ended_session(&source, "one").await;
    let json = serde_json::to_string(&source.lifecycle.backup().await.unwrap()).unwrap();

    let target = Harness::new();
    let outcome = target.lifecycle.restore(&json).await.unwrap();
    assert_eq!(outcome.sessions, 1);
    assert_eq!(outcome.milestones, 1);
    assert_eq!(outcome.chains, 1);
    assert_eq!(outcome.restored_count, 3);
    assert_eq!(target.sealed_content(&session_id), source.sealed_content(&session_id));
    assert_eq!(target.sessions(), source.sessions());

    let again = target.lifecycle.restore(&json).await.unwrap();
    assert_eq!(again.restored_count, 0);
    assert_eq!(target.sessions().len(), 1);
    assert_eq!(target.milestones().len(), 1);
}

#[tokio::test]
async fn test_restore_never_overwrites_existing_chain() {
    let harness = Harness::new();
    let session_id = ended_session(&harness, "one").await;
    let original = harness.sealed_content(&session_id);

    let mut backup = harness.lifecycle.backup().await.unwrap();
    backup
        .sealed_chains
        .insert(session_id.clone(), "tampered\n".to_string());
    let outcome = harness
        .lifecycle
        .restore(&serde_json::to_string(&backup).unwrap())
        .await
        .unwrap();

    assert_eq!(outcome.chains, 0);
    assert_eq!(harness.sealed_content(&session_id), original);
}

#[tokio::test]
async fn test_restore_skips_unsafe_chain_ids() {
    let harness = Harness::new();
    let mut backup = Backup::default();
    backup
        .sealed_chains
        .insert("../escape".to_string(), "{}\n".to_string());
    backup
        .sealed_chains
        .insert("fine".to_string(), "{}\n".to_string());

    let outcome = harness
        .lifecycle
        .restore(&serde_json::to_string(&backup).unwrap())
        .await
        .unwrap();
    assert_eq!(outcome.chains, 1);
    assert_eq!(outcome.skipped_chains, vec!["../escape".to_string()]);
    assert!(!harness.dir.path().join("data").join("escape.jsonl").exists());
    assert_eq!(fs::read_to_string(harness.paths.sealed_chain("fine")).unwrap(), "{}\n");
}

#[tokio::test]
async fn test_restore_rejects_malformed_json() {
    let harness = Harness::new();
    assert!(harness.lifecycle.restore("not json").await.is_err());
}
