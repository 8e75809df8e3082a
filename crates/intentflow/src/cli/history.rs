//! History command - page through a user's intents

use anyhow::{Context, Result};
use intentflow_intent::{HistoryQuery, IntentStatus, SortDirection};

use crate::cli::output::{print_intents, print_json};
use crate::cli::{AppContext, GlobalArgs};

#[derive(Debug)]
pub struct HistoryArgs {
    pub user: String,
    pub offset: u32,
    pub limit: u32,
    pub oldest_first: bool,
    pub status: Option<String>,
    pub json: bool,
}

impl HistoryArgs {
    fn query(&self) -> Result<HistoryQuery> {
        let direction = if self.oldest_first {
            SortDirection::Asc
        } else {
            SortDirection::Desc
        };
        let mut query = HistoryQuery::default()
            .with_offset(self.offset)
            .with_limit(self.limit)
            .with_direction(direction);
        if let Some(status) = &self.status {
            let status: IntentStatus = status
                .parse()
                .with_context(|| format!("Unknown status filter '{}'", status))?;
            query = query.with_status(status);
        }
        Ok(query)
    }
}

pub async fn run(global: &GlobalArgs, args: HistoryArgs) -> Result<()> {
    let query = args.query()?;
    let ctx = AppContext::open(global).await?;
    let page = ctx.pipeline.history(&args.user, query).await;
    ctx.finish().await;
    let page = page?;

    if args.json {
        return print_json(&page);
    }
    if page.items.is_empty() {
        println!("No intents for {}", args.user.trim());
        return Ok(());
    }

    print_intents(&page.items);
    let first = u64::from(page.offset) + 1;
    let last = u64::from(page.offset) + page.items.len() as u64;
    println!("Showing {}-{} of {}", first, last, page.total);
    if page.has_next {
        println!(
            "More: --offset {} --limit {}",
            page.offset + page.limit,
            page.limit
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(status: Option<&str>) -> HistoryArgs {
        HistoryArgs {
            user: "U1".to_string(),
            offset: 20,
            limit: 500,
            oldest_first: true,
            status: status.map(String::from),
            json: false,
        }
    }

    #[test]
    fn test_query_from_args() {
        let query = args(Some("needs_input")).query().unwrap();
        assert_eq!(query.offset, 20);
        assert_eq!(query.effective_limit(), 100);
        assert_eq!(query.direction, SortDirection::Asc);
        assert_eq!(query.status, Some(IntentStatus::NeedsInput));

        assert!(args(Some("done")).query().is_err());
    }
}
