mod common;

use common::{assert_linked, parse_records, test_key};
use std::collections::HashSet;
use std::fs;
use tempfile::TempDir;
use vigil_core::chain::{
    ChainRecord, ChainWriter, GENESIS, HeartbeatData, RecordBody, SessionEndData,
    SessionStartData, UNSIGNED, verify_chain, verify_hash_signature,
};
use vigil_core::repository::KeyProvider;
use vigil_core::session::SessionState;
use vigil_infrastructure::{FileChainStore, FileKeystore, VigilPaths};

fn store() -> (TempDir, VigilPaths, FileChainStore) {
    let dir = TempDir::new().unwrap();
    let paths = VigilPaths::new(dir.path());
    let store = FileChainStore::new(paths.clone());
    (dir, paths, store)
}

fn start_body() -> RecordBody {
    RecordBody::SessionStart(SessionStartData {
        client: "test-client".to_string(),
        task_type: "coding".to_string(),
        conversation_id: "conv-1".to_string(),
        ..Default::default()
    })
}

fn heartbeat_body(n: u32) -> RecordBody {
    RecordBody::Heartbeat(HeartbeatData {
        heartbeat_number: n,
        cumulative_seconds: u64::from(n) * 60,
    })
}

fn end_body(heartbeats: u32) -> RecordBody {
    RecordBody::SessionEnd(SessionEndData {
        duration_seconds: u64::from(heartbeats) * 60,
        task_type: "coding".to_string(),
        heartbeat_count: heartbeats,
        end_reason: "completed".to_string(),
        ..Default::default()
    })
}

fn read_active(paths: &VigilPaths, session_id: &str) -> Vec<ChainRecord> {
    parse_records(&fs::read_to_string(paths.active_chain(session_id)).unwrap())
}

#[test]
fn test_scenario_a_short_session() {
    let (_dir, paths, store) = store();
    let writer = ChainWriter::new(&store);
    let mut state = SessionState::new("test-client");

    writer.append(&mut state, start_body()).unwrap();
    writer.append(&mut state, heartbeat_body(1)).unwrap();
    writer.append(&mut state, heartbeat_body(2)).unwrap();
    writer.append(&mut state, end_body(2)).unwrap();

    let records = read_active(&paths, state.session_id());
    assert_eq!(records.len(), 4);
    assert_eq!(records[3].prev_hash, records[2].hash);
    assert_linked(&records);
}

#[test]
fn test_scenario_b_long_session_verifies() {
    let (_dir, paths, store) = store();
    let writer = ChainWriter::new(&store);
    let mut state = SessionState::new("test-client");
    state.set_signing_key(Some(test_key()));

    writer.append(&mut state, start_body()).unwrap();
    for n in 1..=20 {
        writer.append(&mut state, heartbeat_body(n)).unwrap();
    }
    writer.append(&mut state, end_body(20)).unwrap();

    let records = read_active(&paths, state.session_id());
    assert_eq!(records.len(), 22);
    assert_eq!(state.record_count(), 22);
    assert_linked(&records);

    let content = fs::read_to_string(paths.active_chain(state.session_id())).unwrap();
    let verification = verify_chain(&content, Some(&test_key().verifying_key()));
    assert!(verification.is_valid(), "{:?}", verification.broken_at);
    assert_eq!(verification.record_count, 22);
    assert_eq!(verification.signed_count, 22);
}

#[test]
fn test_scenario_c_parent_resumes_its_own_chain() {
    let (_dir, paths, store) = store();
    let writer = ChainWriter::new(&store);
    let mut state = SessionState::new("test-client");

    writer.append(&mut state, start_body()).unwrap();
    writer.append(&mut state, heartbeat_body(1)).unwrap();
    let parent_id = state.session_id().to_string();
    let parent_tip = state.chain_tip_hash().to_string();

    state.save_parent_state();
    state.reset();
    writer.append(&mut state, start_body()).unwrap();
    writer.append(&mut state, heartbeat_body(1)).unwrap();
    let child_id = state.session_id().to_string();
    assert_ne!(child_id, parent_id);

    state.restore_parent_state().unwrap();
    assert_eq!(state.session_id(), parent_id);
    assert_eq!(state.chain_tip_hash(), parent_tip);

    writer.append(&mut state, heartbeat_body(2)).unwrap();

    let parent_records = read_active(&paths, &parent_id);
    assert_eq!(parent_records.len(), 3);
    assert_eq!(parent_records[2].prev_hash, parent_records[1].hash);

    let child_records = read_active(&paths, &child_id);
    assert_eq!(child_records.len(), 2);
    assert_eq!(child_records[0].prev_hash, GENESIS);
    let child_hashes: HashSet<_> = child_records.iter().map(|r| r.hash.clone()).collect();
    assert!(!child_hashes.contains(&parent_records[2].prev_hash));
}

#[test]
fn test_scenario_e_corrupt_keystore_is_replaced() {
    let (dir, paths, store) = store();
    fs::write(paths.keystore_file(), b"\x00\x01 not json").unwrap();
    let keystore = FileKeystore::new(paths.keystore_file());

    let mut state = SessionState::new("test-client");
    state.initialize_signing(&keystore);
    assert!(state.signing_available());

    let persisted = keystore.load().unwrap().unwrap();
    let record = ChainWriter::new(&store)
        .append(&mut state, start_body())
        .unwrap();
    assert_ne!(record.signature, UNSIGNED);
    assert!(verify_hash_signature(
        &persisted.verifying_key(),
        &record.hash,
        &record.signature
    ));
    drop(dir);
}

#[test]
fn test_p2_tip_tracks_every_append() {
    let (_dir, _paths, store) = store();
    let writer = ChainWriter::new(&store);
    let mut state = SessionState::new("test-client");

    let record = writer.append(&mut state, start_body()).unwrap();
    assert_eq!(state.chain_tip_hash(), record.hash);
    for n in 1..=5 {
        let record = writer.append(&mut state, heartbeat_body(n)).unwrap();
        assert_eq!(state.chain_tip_hash(), record.hash);
    }
}

#[test]
fn test_p3_hashes_are_distinct() {
    let (_dir, paths, store) = store();
    let writer = ChainWriter::new(&store);
    let mut state = SessionState::new("test-client");

    writer.append(&mut state, start_body()).unwrap();
    // Identical payloads still hash differently through prev_hash.
    for _ in 0..10 {
        writer.append(&mut state, heartbeat_body(1)).unwrap();
    }

    let records = read_active(&paths, state.session_id());
    let hashes: HashSet<_> = records.iter().map(|r| r.hash.as_str()).collect();
    assert_eq!(hashes.len(), records.len());
}

#[test]
fn test_p4_unsigned_without_key() {
    let (_dir, paths, store) = store();
    let writer = ChainWriter::new(&store);
    let mut state = SessionState::new("test-client");
    assert!(!state.signing_available());

    writer.append(&mut state, start_body()).unwrap();
    writer.append(&mut state, heartbeat_body(1)).unwrap();

    let records = read_active(&paths, state.session_id());
    assert!(records.iter().all(|r| r.signature == UNSIGNED));
    assert_linked(&records);

    let content = fs::read_to_string(paths.active_chain(state.session_id())).unwrap();
    assert!(verify_chain(&content, Some(&test_key().verifying_key())).is_valid());
}

#[test]
fn test_p5_reset_keeps_signing() {
    let (_dir, _paths, store) = store();
    let mut state = SessionState::new("test-client");
    state.set_signing_key(Some(test_key()));
    ChainWriter::new(&store)
        .append(&mut state, start_body())
        .unwrap();

    let key_id = state.signing_key().map(|k| k.key_id());
    state.reset();

    assert_eq!(state.chain_tip_hash(), GENESIS);
    assert_eq!(state.record_count(), 0);
    assert!(state.signing_available());
    assert_eq!(state.signing_key().map(|k| k.key_id()), key_id);
}

#[test]
fn test_p6_nested_children_are_isolated() {
    let (_dir, paths, store) = store();
    let writer = ChainWriter::new(&store);
    let mut state = SessionState::new("test-client");

    writer.append(&mut state, start_body()).unwrap();
    let root_id = state.session_id().to_string();
    let root_tip = state.chain_tip_hash().to_string();

    state.save_parent_state();
    state.reset();
    writer.append(&mut state, start_body()).unwrap();
    let child_id = state.session_id().to_string();
    let child_tip = state.chain_tip_hash().to_string();

    state.save_parent_state();
    state.reset();
    for n in 0..3 {
        writer.append(&mut state, heartbeat_body(n)).unwrap();
    }
    let grandchild_id = state.session_id().to_string();

    state.restore_parent_state().unwrap();
    assert_eq!(state.session_id(), child_id);
    assert_eq!(state.chain_tip_hash(), child_tip);

    state.restore_parent_state().unwrap();
    assert_eq!(state.session_id(), root_id);
    assert_eq!(state.chain_tip_hash(), root_tip);
    assert_eq!(state.frame.completed_children, vec![child_id.clone()]);

    for id in [&root_id, &child_id, &grandchild_id] {
        assert_eq!(read_active(&paths, id)[0].prev_hash, GENESIS);
    }
}

#[test]
fn test_keystore_provider_reuses_persisted_key() {
    let dir = TempDir::new().unwrap();
    let keystore = FileKeystore::new(dir.path().join("keystore.json"));

    let first = keystore.load_or_create().unwrap();
    let second = keystore.load_or_create().unwrap();
    assert_eq!(first.key_id(), second.key_id());
}
