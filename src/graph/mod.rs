use serde::{Deserialize, Deserializer};

pub mod auth;
pub mod fetcher;
pub mod transport;

pub use auth::{AuthError, ClientCredentialsProvider, Credential, CredentialProvider};
pub use fetcher::{DecodeError, FetchError, MessageFetcher, SenderQuery};
pub use transport::{GraphTransport, ReqwestTransport, TransportError, TransportResponse};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

const REDACTED_BODY_MAX_LEN: usize = 200;

/// One page of the `/users/{mailbox}/messages` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphMessagesPage {
    pub value: Vec<RawMessage>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// A message as Graph returns it. Every text field tolerates `null` or
/// absence so a single sloppy item never fails the page decode; the
/// transformer decides what is usable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default, deserialize_with = "nullable_string")]
    pub id: String,
    #[serde(
        rename = "receivedDateTime",
        default,
        deserialize_with = "nullable_string"
    )]
    pub received_at: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub subject: String,
    #[serde(rename = "from", default)]
    pub sender: Option<GraphRecipient>,
    #[serde(default)]
    pub body: Option<GraphBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphRecipient {
    #[serde(rename = "emailAddress", default)]
    pub email_address: Option<GraphEmailAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphEmailAddress {
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphBody {
    #[serde(rename = "contentType", default, deserialize_with = "nullable_string")]
    pub content_type: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub content: String,
}

impl RawMessage {
    pub fn sender_name(&self) -> &str {
        self.sender
            .as_ref()
            .and_then(|sender| sender.email_address.as_ref())
            .map(|email| email.name.as_str())
            .unwrap_or_default()
    }

    pub fn sender_address(&self) -> &str {
        self.sender
            .as_ref()
            .and_then(|sender| sender.email_address.as_ref())
            .map(|email| email.address.as_str())
            .unwrap_or_default()
    }
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Trim and cap an upstream response body before it lands in an error or a log line.
pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let mut cut = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}
