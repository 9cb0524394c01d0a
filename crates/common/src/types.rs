use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DeliveryError;

/// One row of the subscriber store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriberRecord {
    pub id: String,
    pub chat_id: Option<String>,
}

impl SubscriberRecord {
    pub fn new(id: impl Into<String>, chat_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.map(str::to_string),
        }
    }

    /// The transport recipient identifier, if the record carries a usable one.
    pub fn recipient_id(&self) -> Option<&str> {
        self.chat_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Formatting applied by the transport to the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    Markdown,
    MarkdownV2,
    #[serde(rename = "HTML")]
    Html,
}

impl std::fmt::Display for ParseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseMode::Markdown => write!(f, "Markdown"),
            ParseMode::MarkdownV2 => write!(f, "MarkdownV2"),
            ParseMode::Html => write!(f, "HTML"),
        }
    }
}

impl std::str::FromStr for ParseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" => Ok(ParseMode::Markdown),
            "markdownv2" => Ok(ParseMode::MarkdownV2),
            "html" => Ok(ParseMode::Html),
            other => Err(format!(
                "Invalid parse mode '{other}'. Valid modes: Markdown, MarkdownV2, HTML, none"
            )),
        }
    }
}

/// What the inline button does when pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Opens a Telegram Mini App.
    WebApp,
    /// Opens a plain link.
    Url,
}

/// A single clickable button attached to the notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineAction {
    pub label: String,
    pub url: String,
    pub kind: ActionKind,
}

impl InlineAction {
    pub fn web_app(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            kind: ActionKind::WebApp,
        }
    }

    pub fn link(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            kind: ActionKind::Url,
        }
    }
}

/// Message delivered identically to every recipient of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub action: Option<InlineAction>,
}

impl NotificationPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parse_mode: None,
            action: None,
        }
    }

    pub fn with_parse_mode(mut self, parse_mode: Option<ParseMode>) -> Self {
        self.parse_mode = parse_mode;
        self
    }

    pub fn with_action(mut self, action: InlineAction) -> Self {
        self.action = Some(action);
        self
    }
}

/// Why a record was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    MissingIdentifier,
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingIdentifier => write!(f, "missing-identifier"),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of handling one subscriber record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Skipped(SkipReason),
    Failed(DeliveryError),
}

/// Aggregate counts for one broadcast run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Records read from the subscriber source.
    pub attempted: u64,
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Subset of `failed` where the recipient is permanently unreachable.
    pub permanent_failures: u64,
}

impl BatchReport {
    /// Start accumulating outcomes for a new run.
    pub fn tally(run_id: Uuid) -> BatchTally {
        BatchTally {
            run_id,
            started_at: Utc::now(),
            attempted: 0,
            sent: 0,
            skipped: 0,
            failed: 0,
            permanent_failures: 0,
        }
    }
}

/// Mutable accumulator that becomes a `BatchReport` once the run is over.
#[derive(Debug)]
pub struct BatchTally {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    attempted: u64,
    sent: u64,
    skipped: u64,
    failed: u64,
    permanent_failures: u64,
}

impl BatchTally {
    pub fn record(&mut self, outcome: &DispatchOutcome) {
        self.attempted += 1;
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Skipped(_) => self.skipped += 1,
            DispatchOutcome::Failed(err) => {
                self.failed += 1;
                if err.is_permanent() {
                    self.permanent_failures += 1;
                }
            }
        }
    }

    pub fn finish(self) -> BatchReport {
        BatchReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            attempted: self.attempted,
            sent: self.sent,
            skipped: self.skipped,
            failed: self.failed,
            permanent_failures: self.permanent_failures,
        }
    }
}
