use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

/// A stored monitoring email, keyed by the Graph message id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedRecord {
    pub id: String,
    #[serde(rename = "receivedDateTime")]
    pub received_at: DateTime<Utc>,
    pub subject: String,
    #[serde(rename = "from")]
    pub sender: EmailSender,
    pub body: EmailBody,
    #[serde(rename = "fetchedAt")]
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailSender {
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailBody {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub content: String,
}

/// Fixed-width UTC text, so stored timestamps sort correctly as strings.
pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, column: &str) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                raw.len(),
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })
}

impl PersistedRecord {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            received_at: parse_timestamp(row, "received_at")?,
            subject: row.get("subject")?,
            sender: EmailSender {
                name: row.get("from_name")?,
                address: row.get("from_address")?,
            },
            body: EmailBody {
                content_type: row.get("body_content_type")?,
                content: row.get("body_content")?,
            },
            fetched_at: parse_timestamp(row, "fetched_at")?,
        })
    }
}
