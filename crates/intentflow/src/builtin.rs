//! Keyword-based collaborators for running the pipeline without external services.
//!
//! Good enough to exercise the whole flow from a terminal: the classifier
//! looks for verbs, the orchestrator wants an amount and (for expenses) a
//! category, and asks for whichever is missing.

use async_trait::async_trait;
use intentflow_engine::{
    Classification, Classifier, Orchestrator, OrchestratorRequest, OrchestratorResult,
    OrchestratorStatus, Reply, ReplySender, SqliteLedger,
};
use tracing::info;

pub const EXPENSE: &str = "EXPENSE";
pub const INCOME: &str = "INCOME";
pub const GREETING: &str = "GREETING";

const EXPENSE_WORDS: &[&str] = &["spent", "spend", "paid", "pay", "bought", "buy", "cost"];
const INCOME_WORDS: &[&str] = &["earned", "received", "got", "salary", "income", "sold"];
const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "hola"];

const CATEGORIES: &[&str] = &[
    "food",
    "groceries",
    "rent",
    "transport",
    "utilities",
    "entertainment",
    "health",
    "shopping",
    "travel",
    "education",
];

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split_whitespace().map(|w| {
        w.trim_matches(|c: char| !c.is_alphanumeric() && c != '.')
            .trim_end_matches('.')
            .to_lowercase()
    })
}

fn parse_amount(word: &str) -> Option<f64> {
    let cleaned: String = word
        .trim_start_matches(['$', '€', '£'])
        .chars()
        .filter(|c| *c != ',')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

/// Matches verbs against fixed word lists.
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> anyhow::Result<Classification> {
        let mut has_amount = false;
        let mut label = None;
        for word in words(text) {
            has_amount |= parse_amount(&word).is_some();
            if label.is_some() {
                continue;
            }
            if EXPENSE_WORDS.contains(&word.as_str()) {
                label = Some(EXPENSE);
            } else if INCOME_WORDS.contains(&word.as_str()) {
                label = Some(INCOME);
            } else if GREETING_WORDS.contains(&word.as_str()) {
                label = Some(GREETING);
            }
        }

        Ok(match label {
            Some(label) if has_amount => Classification::new(label, 0.9),
            Some(label) => Classification::new(label, 0.6),
            None => Classification::unknown(),
        })
    }
}

/// Applies expenses and income to the ledger once amount and category are known.
pub struct RuleOrchestrator {
    ledger: SqliteLedger,
}

impl RuleOrchestrator {
    pub fn new(ledger: SqliteLedger) -> Self {
        Self { ledger }
    }
}

#[derive(Debug, Default, PartialEq)]
struct Extracted {
    amount: Option<f64>,
    category: Option<String>,
}

fn extract(request: &OrchestratorRequest) -> Extracted {
    let mut found = Extracted::default();
    let texts = std::iter::once(request.raw_text.as_str())
        .chain(request.follow_ups.iter().map(String::as_str));
    for text in texts {
        for word in words(text) {
            if found.amount.is_none() {
                found.amount = parse_amount(&word);
            }
            if found.category.is_none() && CATEGORIES.contains(&word.as_str()) {
                found.category = Some(word);
            }
        }
    }

    // A bare answer to "which category?" counts even if it is not a known one
    if found.category.is_none() {
        found.category = request
            .follow_ups
            .iter()
            .rev()
            .map(|text| text.trim().to_lowercase())
            .find(|text| !text.is_empty() && !text.chars().any(|c| c.is_ascii_digit()));
    }
    found
}

#[async_trait]
impl Orchestrator for RuleOrchestrator {
    async fn process(&self, request: OrchestratorRequest) -> anyhow::Result<OrchestratorResult> {
        let label = request.detected_intent.as_deref().unwrap_or(Classification::UNKNOWN_LABEL);
        if label == GREETING {
            return Ok(OrchestratorResult::new(
                OrchestratorStatus::Info,
                "Hi! Tell me what you spent or earned.",
            ));
        }
        if label != EXPENSE && label != INCOME {
            return Ok(OrchestratorResult::new(
                OrchestratorStatus::Unknown,
                "message not understood",
            ));
        }

        let found = extract(&request);
        let Some(amount) = found.amount else {
            return Ok(OrchestratorResult::follow_up(
                "How much was it?",
                vec!["amount".to_string()],
            ));
        };

        let summary = match (label, found.category) {
            (EXPENSE, None) => {
                return Ok(OrchestratorResult::follow_up(
                    format!("Which category was the {:.2} expense?", amount),
                    vec!["category".to_string()],
                ));
            }
            (EXPENSE, Some(category)) => format!("Saved expense of {:.2} ({})", amount, category),
            (_, _) => format!("Saved income of {:.2}", amount),
        };

        self.ledger
            .record(request.intent_id, &request.combined_text())
            .await?;
        info!(intent_id = %request.intent_id, amount, "Applied transaction");
        Ok(OrchestratorResult::new(OrchestratorStatus::Saved, summary))
    }
}

/// Prints replies to stdout.
#[derive(Debug, Default, Clone)]
pub struct ConsoleReplySender;

#[async_trait]
impl ReplySender for ConsoleReplySender {
    async fn send(&self, reply: &Reply) -> anyhow::Result<()> {
        println!(
            "[{}] -> {} (intent {}): {}",
            reply.channel, reply.user_id, reply.intent_id, reply.text
        );
        Ok(())
    }
}
