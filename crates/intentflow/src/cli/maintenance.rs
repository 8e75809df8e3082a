//! Operator commands: invariant check and recovery of unscheduled intents.

use anyhow::Result;
use comfy_table::Color;
use intentflow_engine::EngineError;
use intentflow_intent::IntentStatus;
use serde::Serialize;

use crate::cli::output::{print_json, print_table_colored};
use crate::cli::{AppContext, GlobalArgs};

#[derive(Debug, Serialize)]
struct Violation {
    user_id: String,
    needs_input: u64,
    message: String,
}

#[derive(Debug)]
pub struct CheckArgs {
    /// Only check this user
    pub user: Option<String>,
    pub json: bool,
}

/// Report users holding more than one `NEEDS_INPUT` intent. Fails if any do.
pub async fn run_check(global: &GlobalArgs, args: CheckArgs) -> Result<()> {
    let ctx = AppContext::open(global).await?;
    let found = collect_violations(&ctx, args.user.as_deref()).await;
    ctx.finish().await;

    let violations: Vec<Violation> = found?
        .into_iter()
        .filter_map(|e| match &e {
            EngineError::InvariantViolation { user, count } => Some(Violation {
                user_id: user.to_string(),
                needs_input: *count,
                message: e.to_string(),
            }),
            _ => None,
        })
        .collect();

    if args.json {
        print_json(&violations)?;
    } else if violations.is_empty() {
        println!("OK: every user has at most one {} intent", IntentStatus::NeedsInput);
    } else {
        let rows = violations
            .iter()
            .map(|v| {
                vec![
                    (v.user_id.clone(), None),
                    (v.needs_input.to_string(), Some(Color::Red)),
                    (v.message.clone(), None),
                ]
            })
            .collect();
        print_table_colored(&["USER", "NEEDS_INPUT", "PROBLEM"], rows);
    }

    if !violations.is_empty() {
        anyhow::bail!("{} user(s) violate the single pending intent rule", violations.len());
    }
    Ok(())
}

async fn collect_violations(ctx: &AppContext, user: Option<&str>) -> Result<Vec<EngineError>> {
    let correlator = ctx.pipeline.correlator();
    let Some(user) = user else {
        return Ok(correlator.find_violations().await?);
    };

    let user = intentflow_ids::UserId::parse(user)?;
    match correlator.validate_single_pending(&user).await {
        Ok(()) => Ok(Vec::new()),
        Err(e @ EngineError::InvariantViolation { .. }) => Ok(vec![e]),
        Err(e) => Err(e.into()),
    }
}

/// Queue every `RECEIVED` intent and wait for the pool to drain.
pub async fn run_recover(global: &GlobalArgs) -> Result<()> {
    let ctx = AppContext::open(global).await?;
    let scheduled = ctx.pipeline.recover_received().await;
    ctx.finish().await;
    let scheduled = scheduled?;

    println!("Recovered {} intent(s)", scheduled);
    Ok(())
}
