use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::models::{EmailBody, EmailSender, PersistedRecord};
use crate::graph::RawMessage;

/// Why a fetched message was left out of the batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformSkip {
    #[error("message has no id")]
    MissingId,

    #[error("invalid receivedDateTime '{value}': {reason}")]
    InvalidReceivedAt { value: String, reason: String },
}

pub fn transform(
    raw: &RawMessage,
    fetched_at: DateTime<Utc>,
) -> Result<PersistedRecord, TransformSkip> {
    let id = raw.id.trim();
    if id.is_empty() {
        return Err(TransformSkip::MissingId);
    }

    let received_at = DateTime::parse_from_rfc3339(raw.received_at.trim())
        .map_err(|error| TransformSkip::InvalidReceivedAt {
            value: raw.received_at.clone(),
            reason: error.to_string(),
        })?
        .with_timezone(&Utc);

    let (content_type, content) = raw
        .body
        .as_ref()
        .map(|body| (body.content_type.clone(), body.content.clone()))
        .unwrap_or_default();

    Ok(PersistedRecord {
        id: id.to_string(),
        received_at,
        subject: raw.subject.clone(),
        sender: EmailSender {
            name: raw.sender_name().to_string(),
            address: raw.sender_address().to_string(),
        },
        body: EmailBody {
            content_type,
            content,
        },
        fetched_at,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutcome {
    pub records: Vec<PersistedRecord>,
    pub skipped: usize,
}

/// Transforms every message, dropping the unusable ones. Never fails.
pub fn transform_all(raws: &[RawMessage], fetched_at: DateTime<Utc>) -> TransformOutcome {
    let mut outcome = TransformOutcome {
        records: Vec::with_capacity(raws.len()),
        skipped: 0,
    };

    for raw in raws {
        match transform(raw, fetched_at) {
            Ok(record) => outcome.records.push(record),
            Err(skip) => {
                let id = if raw.id.is_empty() {
                    "<missing-id>"
                } else {
                    raw.id.as_str()
                };
                warn!(id, reason = %skip, "skipping graph message");
                outcome.skipped += 1;
            }
        }
    }

    debug!(
        kept = outcome.records.len(),
        skipped = outcome.skipped,
        "transformed graph messages"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{transform, transform_all, TransformSkip};
    use crate::graph::RawMessage;
    use crate::test_support::graph_message;

    fn raw(value: serde_json::Value) -> RawMessage {
        serde_json::from_value(value).expect("deserialize raw message")
    }

    #[test]
    fn copies_fields_and_stamps_fetch_time() {
        let fetched_at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap();
        let message = raw(json!({
            "id": "msg-1",
            "receivedDateTime": "2026-03-01T08:15:00+02:00",
            "subject": "Morning clippings",
            "from": { "emailAddress": { "name": "Clippings Desk", "address": "clips@example.com" } },
            "body": { "contentType": "html", "content": "<p>Story</p>" }
        }));

        let record = transform(&message, fetched_at).expect("transform message");
        assert_eq!(record.id, "msg-1");
        assert_eq!(
            record.received_at,
            Utc.with_ymd_and_hms(2026, 3, 1, 6, 15, 0).unwrap()
        );
        assert_eq!(record.subject, "Morning clippings");
        assert_eq!(record.sender.name, "Clippings Desk");
        assert_eq!(record.sender.address, "clips@example.com");
        assert_eq!(record.body.content_type, "html");
        assert_eq!(record.body.content, "<p>Story</p>");
        assert_eq!(record.fetched_at, fetched_at);
    }

    #[test]
    fn rejects_non_rfc3339_timestamps() {
        let now = Utc::now();
        for bad in ["", "yesterday", "2026-03-01", "2026-03-01 08:15:00", "03/01/2026 08:15"] {
            let message = raw(graph_message("msg-bad", bad));
            assert!(
                matches!(
                    transform(&message, now),
                    Err(TransformSkip::InvalidReceivedAt { .. })
                ),
                "expected skip for {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_missing_id() {
        let message = raw(json!({ "receivedDateTime": "2026-03-01T08:15:00Z" }));
        assert_eq!(
            transform(&message, Utc::now()),
            Err(TransformSkip::MissingId)
        );
    }

    #[test]
    fn transform_all_drops_only_malformed_items() {
        let raws: Vec<RawMessage> = vec![
            raw(graph_message("ok-1", "2026-03-01T08:00:00Z")),
            raw(graph_message("bad-1", "not a date")),
            raw(graph_message("ok-2", "2026-03-01T09:00:00.1234567Z")),
            raw(graph_message("bad-2", "")),
            raw(graph_message("ok-3", "2026-03-01T10:00:00Z")),
        ];

        let fetched_at = Utc::now();
        let outcome = transform_all(&raws, fetched_at);
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.skipped, 2);
        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ok-1", "ok-2", "ok-3"]);
        assert!(outcome.records.iter().all(|r| r.fetched_at == fetched_at));
    }
}
