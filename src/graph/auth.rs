use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::graph::transport::{GraphTransport, TransportError, TransportResponse};
use crate::graph::{redact_response_body, GRAPH_SCOPE};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing graph setting {0}")]
    MissingSetting(&'static str),

    #[error("graph oauth token request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("graph oauth token request failed: status={status} body={body}")]
    Rejected { status: u16, body: String },

    #[error("decode graph token response: {0}")]
    Decode(String),
}

/// Bearer token for one ingestion run. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(<redacted {} chars>)", self.0.len())
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn acquire(&self) -> Result<Credential, AuthError>;
}

#[derive(Clone)]
pub struct GraphCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for GraphCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl GraphCredentials {
    fn validate(&self) -> Result<(), AuthError> {
        if self.tenant_id.trim().is_empty() {
            return Err(AuthError::MissingSetting("TENANT_ID"));
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::MissingSetting("CLIENT_ID"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::MissingSetting("CLIENT_SECRET"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[allow(dead_code)]
    token_type: Option<String>,
    expires_in: Option<u64>,
}

/// Client-credentials grant against the Microsoft identity platform.
/// One attempt per call; the caller decides whether to rerun.
pub struct ClientCredentialsProvider {
    transport: Arc<dyn GraphTransport>,
    credentials: GraphCredentials,
    authority: String,
}

impl ClientCredentialsProvider {
    pub fn new(
        transport: Arc<dyn GraphTransport>,
        credentials: GraphCredentials,
        authority: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            credentials,
            authority: authority.into(),
        }
    }

    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.credentials.tenant_id.trim()
        )
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn acquire(&self) -> Result<Credential, AuthError> {
        self.credentials.validate()?;

        let token_url = self.token_url();
        debug!(%token_url, "requesting graph access token");
        let response = self
            .transport
            .post_form(
                &token_url,
                &[
                    ("grant_type", "client_credentials"),
                    ("client_id", self.credentials.client_id.as_str()),
                    ("client_secret", self.credentials.client_secret.as_str()),
                    ("scope", GRAPH_SCOPE),
                ],
            )
            .await?;

        let credential = parse_token_response(response)?;
        info!("retrieved microsoft graph access token");
        Ok(credential)
    }
}

fn parse_token_response(response: TransportResponse) -> Result<Credential, AuthError> {
    if !response.is_success() {
        return Err(AuthError::Rejected {
            status: response.status,
            body: redact_response_body(&response.body),
        });
    }

    let payload: OAuthTokenResponse = serde_json::from_str(&response.body)
        .map_err(|error| AuthError::Decode(error.to_string()))?;
    if payload.access_token.trim().is_empty() {
        return Err(AuthError::Decode("empty access_token".to_string()));
    }

    debug!(expires_in = ?payload.expires_in, "graph token decoded");
    Ok(Credential::new(payload.access_token))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        parse_token_response, AuthError, ClientCredentialsProvider, Credential,
        CredentialProvider, GraphCredentials,
    };
    use crate::graph::transport::TransportResponse;
    use crate::test_support::ScriptedTransport;

    fn credentials() -> GraphCredentials {
        GraphCredentials {
            tenant_id: "tenant-a".to_string(),
            client_id: "client-a".to_string(),
            client_secret: "secret-a".to_string(),
        }
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("super-secret-token");
        let rendered = format!("{credential:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert_eq!(credential.bearer(), "super-secret-token");

        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("secret-a"));
    }

    #[test]
    fn token_response_requires_access_token() {
        let ok = parse_token_response(TransportResponse {
            status: 200,
            body: r#"{"access_token":"abc","token_type":"Bearer","expires_in":3599}"#.to_string(),
        })
        .expect("decode token");
        assert_eq!(ok.bearer(), "abc");

        let empty = parse_token_response(TransportResponse {
            status: 200,
            body: r#"{"access_token":""}"#.to_string(),
        });
        assert!(matches!(empty, Err(AuthError::Decode(_))));

        let garbage = parse_token_response(TransportResponse {
            status: 200,
            body: "<html>".to_string(),
        });
        assert!(matches!(garbage, Err(AuthError::Decode(_))));
    }

    #[tokio::test]
    async fn acquire_posts_client_credentials_grant() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_post(200, r#"{"access_token":"token-1","expires_in":3600}"#);
        let provider = ClientCredentialsProvider::new(
            transport.clone(),
            credentials(),
            "https://login.example.test/",
        );

        let credential = provider.acquire().await.expect("acquire token");
        assert_eq!(credential.bearer(), "token-1");

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].url,
            "https://login.example.test/tenant-a/oauth2/v2.0/token"
        );
        assert!(calls[0]
            .form
            .contains(&("grant_type".to_string(), "client_credentials".to_string())));
        assert!(calls[0]
            .form
            .contains(&("scope".to_string(), "https://graph.microsoft.com/.default".to_string())));
    }

    #[tokio::test]
    async fn rejected_exchange_carries_status_and_body() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_post(401, r#"{"error":"invalid_client"}"#);
        let provider =
            ClientCredentialsProvider::new(transport.clone(), credentials(), "https://login.test");

        match provider.acquire().await {
            Err(AuthError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_client"));
            }
            other => panic!("expected rejected exchange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_secret_fails_without_network_call() {
        let transport = Arc::new(ScriptedTransport::new());
        let provider = ClientCredentialsProvider::new(
            transport.clone(),
            GraphCredentials {
                client_secret: "  ".to_string(),
                ..credentials()
            },
            "https://login.test",
        );

        let result = provider.acquire().await;
        assert!(matches!(
            result,
            Err(AuthError::MissingSetting("CLIENT_SECRET"))
        ));
        assert!(transport.calls().is_empty());
    }
}
