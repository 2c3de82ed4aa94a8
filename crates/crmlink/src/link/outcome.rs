use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ContactRef;

/// Result of evaluating one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LinkOutcome {
    /// The chain was linked to these entities, ordered by id then kind.
    Linked(Vec<ContactRef>),
    /// No accessible contact matched; a tombstone marks the message.
    NoMatch,
    /// The chain already had links; nothing was written.
    AlreadyLinked,
    /// Processing failed; nothing was written.
    Skipped(String),
}

impl LinkOutcome {
    pub fn contacts_linked(&self) -> usize {
        match self {
            LinkOutcome::Linked(contacts) => contacts.len(),
            _ => 0,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, LinkOutcome::Skipped(_))
    }

    /// Human-readable one-line summary.
    pub fn describe(&self) -> String {
        match self {
            LinkOutcome::Linked(contacts) => {
                let names: Vec<String> = contacts.iter().map(|c| c.to_string()).collect();
                format!("Linked to {} entities: {}", contacts.len(), names.join(", "))
            }
            LinkOutcome::NoMatch => "No matching CRM contact found".to_string(),
            LinkOutcome::AlreadyLinked => "Chain is already linked".to_string(),
            LinkOutcome::Skipped(reason) => format!("Skipped: {}", reason),
        }
    }
}

/// Structured answer for on-demand callers.
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub success: bool,
    pub message: String,
    pub message_id: i64,
    pub contacts_linked: usize,
    pub outcome: LinkOutcome,
    pub timestamp: DateTime<Utc>,
}

impl LinkReport {
    pub fn new(message_id: i64, outcome: LinkOutcome) -> Self {
        Self {
            success: !outcome.is_skipped(),
            message: outcome.describe(),
            message_id,
            contacts_linked: outcome.contacts_linked(),
            outcome,
            timestamp: Utc::now(),
        }
    }
}

/// Per-outcome tallies for a batch of messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub processed: usize,
    pub linked: usize,
    pub no_match: usize,
    pub already_linked: usize,
    pub skipped: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: &LinkOutcome) {
        self.processed += 1;
        match outcome {
            LinkOutcome::Linked(_) => self.linked += 1,
            LinkOutcome::NoMatch => self.no_match += 1,
            LinkOutcome::AlreadyLinked => self.already_linked += 1,
            LinkOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &OutcomeCounts) {
        self.processed += other.processed;
        self.linked += other.linked;
        self.no_match += other.no_match;
        self.already_linked += other.already_linked;
        self.skipped += other.skipped;
    }
}

/// Result of re-examining a time window for one tenant.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub tenant: i64,
    pub since: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: OutcomeCounts,
    pub results: Vec<LinkReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BatchReport {
    pub fn new(tenant: i64, since: DateTime<Utc>) -> Self {
        Self {
            success: true,
            tenant,
            since,
            counts: OutcomeCounts::default(),
            results: Vec::new(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(tenant: i64, since: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(tenant, since)
        }
    }

    pub fn record(&mut self, message_id: i64, outcome: LinkOutcome) {
        self.counts.record(&outcome);
        self.results.push(LinkReport::new(message_id, outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;

    #[test]
    fn test_report_from_linked() {
        let outcome = LinkOutcome::Linked(vec![
            ContactRef::contact(4),
            ContactRef::new(2, EntityKind::Case),
        ]);
        let report = LinkReport::new(100, outcome);
        assert!(report.success);
        assert_eq!(report.contacts_linked, 2);
        assert_eq!(report.message, "Linked to 2 entities: contact:4, case:2");
    }

    #[test]
    fn test_report_from_skipped() {
        let report = LinkReport::new(100, LinkOutcome::Skipped("store down".to_string()));
        assert!(!report.success);
        assert_eq!(report.contacts_linked, 0);
        assert_eq!(report.message, "Skipped: store down");
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(LinkOutcome::Linked(vec![ContactRef::contact(4)])).unwrap();
        assert_eq!(json["status"], "linked");
        assert_eq!(json["detail"][0]["id"], 4);
        assert_eq!(json["detail"][0]["kind"], "contact");

        let json = serde_json::to_value(LinkOutcome::NoMatch).unwrap();
        assert_eq!(json["status"], "no_match");
    }

    #[test]
    fn test_batch_counts() {
        let mut batch = BatchReport::new(1, Utc::now());
        batch.record(1, LinkOutcome::NoMatch);
        batch.record(2, LinkOutcome::AlreadyLinked);
        batch.record(3, LinkOutcome::Skipped("x".to_string()));
        batch.record(4, LinkOutcome::Linked(vec![ContactRef::contact(4)]));
        assert_eq!(
            batch.counts,
            OutcomeCounts {
                processed: 4,
                linked: 1,
                no_match: 1,
                already_linked: 1,
                skipped: 1,
            }
        );
        assert_eq!(batch.results.len(), 4);

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["processed"], 4);
        assert!(json.get("error").is_none());
    }
}
