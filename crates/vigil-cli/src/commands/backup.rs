//! `backup` and `restore`.

use super::Output;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use vigil_application::VigilContext;

pub async fn backup(root: Option<PathBuf>, file: Option<PathBuf>) -> Result<()> {
    let context = VigilContext::open(root)?;
    let backup = context.lifecycle().backup().await?;
    let json = serde_json::to_string_pretty(&backup)?;

    match file {
        Some(path) => {
            fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Backed up {} sessions, {} milestones, {} chains to {}",
                backup.sessions.len(),
                backup.milestones.len(),
                backup.sealed_chains.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}

pub async fn restore(root: Option<PathBuf>, file: PathBuf, output: Output) -> Result<()> {
    let json = fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let context = VigilContext::open(root)?;
    let outcome = context.lifecycle().restore(&json).await?;

    let mut text = format!(
        "Restored {} items ({} sessions, {} milestones, {} chains).",
        outcome.restored_count, outcome.sessions, outcome.milestones, outcome.chains
    );
    if !outcome.skipped_chains.is_empty() {
        text.push_str(&format!("\nSkipped: {}", outcome.skipped_chains.join(", ")));
    }
    output.emit(&outcome, &text)
}
