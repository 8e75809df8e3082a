//! Message-level commands: ingest, resume, pending, show, retry.

use anyhow::{Context, Result};
use intentflow_engine::{ProcessOutcome, SkipReason};
use intentflow_ids::IntentId;
use serde::Serialize;

use crate::cli::output::{print_intent_detail, print_intents, print_json};
use crate::cli::{AppContext, GlobalArgs};

#[derive(Debug)]
pub struct IngestArgs {
    pub user: String,
    pub text: String,
    pub channel: Option<String>,
    /// Adapter-supplied key; re-sending with the same key is a no-op
    pub key: Option<String>,
    pub json: bool,
}

/// Stage a message, let it settle, print where it ended up.
///
/// Also used for `resume`: a message from a user with a pending intent is
/// linked to it either way.
pub async fn run_ingest(global: &GlobalArgs, args: IngestArgs) -> Result<()> {
    let ctx = AppContext::open(global).await?;
    let staged = match &args.key {
        Some(key) => {
            ctx.pipeline
                .ingest_with_key(&args.user, args.channel.as_deref(), &args.text, key)
                .await
        }
        None => {
            ctx.pipeline
                .ingest(&args.user, args.channel.as_deref(), &args.text)
                .await
        }
    };
    let staged = match staged {
        Ok(staged) => staged,
        Err(e) => {
            ctx.finish().await;
            return Err(e).context("Failed to ingest message");
        }
    };

    ctx.drain().await;

    let mut shown = vec![ctx.pipeline.get(staged.id).await?];
    if let Some(parent) = staged.followup_parent_id() {
        shown.push(ctx.pipeline.get(parent).await?);
    }
    ctx.db.close().await;

    if args.json {
        return print_json(&shown);
    }
    print_intents(&shown);
    Ok(())
}

#[derive(Debug)]
pub struct ResumeArgs {
    pub user: String,
    pub text: String,
    pub channel: Option<String>,
    pub json: bool,
}

/// Answer the user's pending question. Refuses when nothing is pending, so the
/// answer is not staged as a fresh intent by mistake.
pub async fn run_resume(global: &GlobalArgs, args: ResumeArgs) -> Result<()> {
    let ctx = AppContext::open(global).await?;
    let resumed = async {
        let Some(pending) = ctx.pipeline.get_pending_action(&args.user).await? else {
            anyhow::bail!("No pending action for {}", args.user.trim());
        };
        let child = ctx
            .pipeline
            .resume(&args.user, args.channel.as_deref(), &args.text)
            .await?;
        ctx.drain().await;
        let parent = ctx.pipeline.get(pending.id).await?;
        anyhow::Ok(vec![child, parent])
    }
    .await;
    ctx.finish().await;
    let shown = resumed?;

    if args.json {
        return print_json(&shown);
    }
    print_intents(&shown);
    Ok(())
}

#[derive(Debug)]
pub struct PendingArgs {
    pub user: String,
    pub json: bool,
}

pub async fn run_pending(global: &GlobalArgs, args: PendingArgs) -> Result<()> {
    let ctx = AppContext::open(global).await?;
    let pending = ctx.pipeline.get_pending_action(&args.user).await;
    ctx.finish().await;
    let pending = pending?;

    if args.json {
        return print_json(&pending);
    }
    match pending {
        Some(intent) => print_intent_detail(&intent),
        None => println!("No pending action for {}", args.user.trim()),
    }
    Ok(())
}

#[derive(Debug)]
pub struct ShowArgs {
    pub id: i64,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ShowOutput {
    intent: intentflow_intent::Intent,
    follow_ups: Vec<intentflow_intent::Intent>,
}

pub async fn run_show(global: &GlobalArgs, args: ShowArgs) -> Result<()> {
    let ctx = AppContext::open(global).await?;
    let id = IntentId::new(args.id);
    let loaded = async {
        let intent = ctx.pipeline.get(id).await?;
        let follow_ups = ctx.db.follow_ups(id).await?;
        anyhow::Ok(ShowOutput { intent, follow_ups })
    }
    .await;
    ctx.finish().await;
    let output = loaded?;

    if args.json {
        return print_json(&output);
    }
    print_intent_detail(&output.intent);
    if !output.follow_ups.is_empty() {
        println!("\nFollow-ups:");
        print_intents(&output.follow_ups);
    }
    Ok(())
}

#[derive(Debug)]
pub struct RetryArgs {
    pub id: i64,
    pub json: bool,
}

pub async fn run_retry(global: &GlobalArgs, args: RetryArgs) -> Result<()> {
    let ctx = AppContext::open(global).await?;
    let outcome = ctx.pipeline.retry(IntentId::new(args.id)).await;
    ctx.finish().await;
    let outcome = outcome?;

    match outcome {
        ProcessOutcome::Settled(intent) if args.json => print_json(&intent),
        ProcessOutcome::Settled(intent) => {
            print_intent_detail(&intent);
            Ok(())
        }
        ProcessOutcome::Skipped(reason) => {
            println!("Retry did not run: {}", describe_skip(reason));
            Ok(())
        }
    }
}

fn describe_skip(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::AlreadyProcessed => "intent is already processed",
        SkipReason::InFlight => "another worker is processing it",
        SkipReason::LostClaim => "another worker claimed it first",
        SkipReason::Superseded => "the intent changed while it was being processed",
    }
}
