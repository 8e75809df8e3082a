//! Paged per-user intent history.

use serde::{Deserialize, Serialize};

use crate::{Intent, IntentStatus};

/// Ordering of history results by receipt time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(format!("invalid sort direction '{}': expected asc or desc", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub offset: u32,
    pub limit: u32,
    pub direction: SortDirection,
    pub status: Option<IntentStatus>,
}

impl HistoryQuery {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 100;

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_direction(mut self, direction: SortDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_status(mut self, status: IntentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
            direction: SortDirection::Desc,
            status: None,
        }
    }
}

/// One page of a user's intents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub items: Vec<Intent>,
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
    pub has_next: bool,
    pub has_previous: bool,
}

impl HistoryPage {
    pub fn new(items: Vec<Intent>, total: u64, query: &HistoryQuery) -> Self {
        let limit = query.effective_limit();
        let end = u64::from(query.offset) + items.len() as u64;
        Self {
            items,
            total,
            offset: query.offset,
            limit,
            has_next: end < total,
            has_previous: query.offset > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_clamped() {
        assert_eq!(HistoryQuery::default().effective_limit(), 20);
        assert_eq!(HistoryQuery::default().with_limit(0).effective_limit(), 1);
        assert_eq!(HistoryQuery::default().with_limit(500).effective_limit(), 100);
    }

    #[test]
    fn test_page_flags() {
        let query = HistoryQuery::default().with_offset(0).with_limit(2);
        let page = HistoryPage::new(Vec::new(), 0, &query);
        assert!(!page.has_next);
        assert!(!page.has_previous);

        let query = HistoryQuery::default().with_offset(2).with_limit(2);
        let page = HistoryPage::new(Vec::new(), 5, &query);
        assert!(page.has_next);
        assert!(page.has_previous);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }
}
