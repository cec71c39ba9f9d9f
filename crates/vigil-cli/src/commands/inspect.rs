//! Read-only commands: `verify` and `status`.

use super::Output;
use anyhow::{Result, bail};
use serde_json::json;
use std::path::PathBuf;
use vigil_application::VigilContext;
use vigil_core::chain::verify_chain;
use vigil_core::repository::{ChainStore, IndexRepository, SealLocation};
use vigil_core::session::SessionSeal;
use vigil_infrastructure::{FileChainStore, JsonIndexFile, JsonIndexRepository};

pub fn verify(root: Option<PathBuf>, session_id: &str, output: Output) -> Result<()> {
    let context = VigilContext::open(root)?;
    let store = FileChainStore::new(context.paths().clone());

    let Some((location, content)) = store.read_chain(session_id)? else {
        bail!("No chain found for session {}", session_id);
    };

    // Verification never creates a key; without one, signatures are not checked.
    let key = match context.keystore().load() {
        Ok(key) => key,
        Err(e) => {
            tracing::warn!(error = %e, "Keystore unreadable, skipping signature checks");
            None
        }
    };
    let verifying_key = key.as_ref().map(|k| k.verifying_key());
    let verification = verify_chain(&content, verifying_key.as_ref());

    let location = match location {
        SealLocation::Sealed => "sealed",
        SealLocation::Active => "active",
    };
    let text = match &verification.broken_at {
        None => format!(
            "Chain {} ({}) is intact: {} records, {} signed{}.",
            session_id,
            location,
            verification.record_count,
            verification.signed_count,
            if key.is_some() { "" } else { ", signatures not checked" }
        ),
        Some((index, reason)) => format!(
            "Chain {} ({}) is broken at record {}: {:?}",
            session_id, location, index, reason
        ),
    };
    output.emit(&verification, &text)?;

    if !verification.is_valid() {
        bail!("chain verification failed");
    }
    Ok(())
}

pub async fn status(root: Option<PathBuf>, output: Output) -> Result<()> {
    let context = VigilContext::open(root)?;
    let state = context.load_state()?;
    let sessions = JsonIndexRepository::new(JsonIndexFile::<SessionSeal>::new(
        context.paths().sessions_index(),
    ))
    .read()
    .await?;

    let frame = &state.frame;
    let mut text = format!(
        "Phase: {:?}\nSession: {}\nRecords: {}\nConversation: {} #{}\nSigning: {}\nSealed sessions: {}",
        state.phase(),
        frame.session_id,
        frame.session_record_count,
        frame.conversation_id,
        frame.conversation_index,
        if state.signing_available() { "available" } else { "unavailable" },
        sessions.len()
    );
    if let Some(parent) = state.parent() {
        text.push_str(&format!(
            "\nChild of: {} (depth {})",
            parent.session_id(),
            state.nesting_depth()
        ));
    }
    if let Some(sealed) = &frame.auto_sealed_session_id {
        text.push_str(&format!("\nAuto-sealed, awaiting end: {}", sealed));
    }

    output.emit(
        &json!({
            "phase": state.phase(),
            "session_id": frame.session_id,
            "record_count": frame.session_record_count,
            "conversation_id": frame.conversation_id,
            "conversation_index": frame.conversation_index,
            "signing_available": state.signing_available(),
            "nesting_depth": state.nesting_depth(),
            "auto_sealed_session_id": frame.auto_sealed_session_id,
            "sealed_sessions": sessions.len(),
        }),
        &text,
    )
}
