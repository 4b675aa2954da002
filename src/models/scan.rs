use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of submitting one scanned code to a fulfillment session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScanOutcome {
    Success {
        order_item_id: Uuid,
        product_name: String,
    },
    Duplicate,
    NoMatch {
        reason: String,
    },
    Fatal {
        reason: String,
    },
}

impl ScanOutcome {
    pub fn kind(&self) -> ScanOutcomeKind {
        match self {
            ScanOutcome::Success { .. } => ScanOutcomeKind::Success,
            ScanOutcome::Duplicate => ScanOutcomeKind::Duplicate,
            ScanOutcome::NoMatch { .. } => ScanOutcomeKind::NoMatch,
            ScanOutcome::Fatal { .. } => ScanOutcomeKind::Fatal,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ScanOutcome::Success { .. })
    }

    pub fn message(&self) -> String {
        match self {
            ScanOutcome::Success { product_name, .. } => format!("matched {}", product_name),
            ScanOutcome::Duplicate => "code already scanned".to_string(),
            ScanOutcome::NoMatch { reason } | ScanOutcome::Fatal { reason } => reason.clone(),
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScanOutcomeKind {
    Success,
    Duplicate,
    NoMatch,
    Fatal,
}

/// Immutable audit record of one scan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanHistoryEntry {
    pub code: String,
    pub outcome: ScanOutcomeKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ScanHistoryEntry {
    pub fn record(code: &str, outcome: &ScanOutcome) -> Self {
        Self {
            code: code.to_string(),
            outcome: outcome.kind(),
            message: outcome.message(),
            timestamp: Utc::now(),
        }
    }
}

/// Progress derived from a session's consumed units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub scanned: usize,
    pub total: usize,
}

impl ScanProgress {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.scanned * 100) / self.total) as u8
    }
}
