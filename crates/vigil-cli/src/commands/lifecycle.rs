//! `start`, `heartbeat`, `end` and `sweep`.
//!
//! Each invocation loads the saved session state, applies one operation and
//! saves the state again.

use super::Output;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use serde_json::json;
use std::path::PathBuf;
use vigil_application::{EndRequest, StartRequest, VigilContext};
use vigil_core::evaluation::Evaluation;
use vigil_core::session::MilestoneInput;

#[derive(Args, Debug, Default)]
pub struct StartArgs {
    #[arg(long)]
    pub task_type: Option<String>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub private_title: Option<String>,
    #[arg(long)]
    pub project: Option<String>,
    #[arg(long)]
    pub model: Option<String>,
    /// Conversation id from a previous start (a prefix is accepted)
    #[arg(long)]
    pub conversation_id: Option<String>,
}

impl From<StartArgs> for StartRequest {
    fn from(args: StartArgs) -> Self {
        StartRequest {
            task_type: args.task_type,
            title: args.title,
            private_title: args.private_title,
            project: args.project,
            model: args.model,
            conversation_id: args.conversation_id,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct EndArgs {
    /// Sealed session to add late details to when no session is live
    #[arg(long)]
    pub session_id: Option<String>,
    #[arg(long)]
    pub task_type: Option<String>,
    /// Language used (repeatable)
    #[arg(long = "language")]
    pub languages: Vec<String>,
    #[arg(long)]
    pub files_touched: Option<u32>,
    /// Milestone title (repeatable)
    #[arg(long = "milestone")]
    pub milestones: Vec<String>,
    /// Evaluation as a JSON object
    #[arg(long)]
    pub evaluation: Option<String>,
}

impl EndArgs {
    fn into_request(self) -> Result<EndRequest> {
        let evaluation = self
            .evaluation
            .map(|raw| serde_json::from_str::<Evaluation>(&raw))
            .transpose()
            .context("Invalid --evaluation JSON")?;

        Ok(EndRequest {
            session_id: self.session_id,
            task_type: self.task_type,
            languages: self.languages,
            files_touched_count: self.files_touched,
            milestones: self
                .milestones
                .into_iter()
                .map(|title| MilestoneInput {
                    title,
                    private_title: None,
                    category: "other".to_string(),
                    complexity: "medium".to_string(),
                })
                .collect(),
            evaluation,
        })
    }
}

pub async fn start(root: Option<PathBuf>, args: StartArgs, output: Output) -> Result<()> {
    let context = VigilContext::open(root)?;
    let mut state = context.load_state()?;

    let outcome = context.lifecycle().start(&mut state, args.into()).await?;
    context.save_state(&state)?;

    output.emit(&outcome, &outcome.summary)
}

pub fn heartbeat(root: Option<PathBuf>, output: Output) -> Result<()> {
    let context = VigilContext::open(root)?;
    let mut state = context.load_state()?;

    let outcome = context.lifecycle().heartbeat(&mut state)?;
    context.save_state(&state)?;

    output.emit(&outcome, outcome.summary())
}

pub async fn end(root: Option<PathBuf>, args: EndArgs, output: Output) -> Result<()> {
    let request = args.into_request()?;
    let context = VigilContext::open(root)?;
    let mut state = context.load_state()?;

    let outcome = context.lifecycle().end(&mut state, request).await?;
    context.save_state(&state)?;

    output.emit(&outcome, outcome.summary())
}

pub async fn sweep(root: Option<PathBuf>, output: Output) -> Result<()> {
    let context = VigilContext::open(root)?;
    let mut state = context.load_state()?;

    let sealed = context.lifecycle().seal_stale(&mut state, Utc::now()).await?;
    context.save_state(&state)?;

    let text = match &sealed {
        Some(session_id) => format!("Auto-sealed idle session {}.", session_id),
        None => "Nothing to seal.".to_string(),
    };
    output.emit(&json!({ "sealed_session_id": sealed }), &text)
}
