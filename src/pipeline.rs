use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::db::{RecordStore, WriteError};
use crate::graph::{
    AuthError, CredentialProvider, DecodeError, FetchError, MessageFetcher, SenderQuery,
};
use crate::transform::transform_all;

#[derive(Debug, Error)]
pub enum IngestionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(FetchError),

    #[error(transparent)]
    Decode(DecodeError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl From<FetchError> for IngestionError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::Decode(decode) => Self::Decode(decode),
            other => Self::Fetch(other),
        }
    }
}

impl IngestionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Fetch(_) => "fetch",
            Self::Decode(_) => "decode",
            Self::Write(_) => "write",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AcquireCredential,
    FetchPages,
    TransformAll,
    WriteBatch,
    Done,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcquireCredential => write!(f, "acquire_credential"),
            Self::FetchPages => write!(f, "fetch_pages"),
            Self::TransformAll => write!(f, "transform_all"),
            Self::WriteBatch => write!(f, "write_batch"),
            Self::Done => write!(f, "done"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestionResult {
    pub inserted_count: usize,
    pub fetched: usize,
    pub skipped: usize,
}

/// Credential exchange, paginated fetch, transform and bulk write, in that
/// order. Any stage failure ends the run; nothing is retried here.
pub struct IngestionPipeline {
    credentials: Arc<dyn CredentialProvider>,
    fetcher: MessageFetcher,
    store: Arc<dyn RecordStore>,
}

impl IngestionPipeline {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        fetcher: MessageFetcher,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            credentials,
            fetcher,
            store,
        }
    }

    pub async fn run(&self, query: &SenderQuery) -> Result<IngestionResult, IngestionError> {
        let span = info_span!(
            "ingestion",
            run_id = %Uuid::new_v4(),
            mailbox = %query.mailbox,
            sender = %query.sender
        );

        async {
            let result = self.run_stages(query).await;
            match &result {
                Ok(outcome) => info!(
                    stage = %Stage::Done,
                    inserted = outcome.inserted_count,
                    fetched = outcome.fetched,
                    skipped = outcome.skipped,
                    "ingestion finished"
                ),
                Err(error) => warn!(kind = error.kind(), error = %error, "ingestion failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(&self, query: &SenderQuery) -> Result<IngestionResult, IngestionError> {
        info!(stage = %Stage::AcquireCredential, "ingestion stage");
        let credential = self.credentials.acquire().await?;

        info!(stage = %Stage::FetchPages, "ingestion stage");
        let messages = self.fetcher.fetch_all(&credential, query).await?;
        drop(credential);

        info!(stage = %Stage::TransformAll, fetched = messages.len(), "ingestion stage");
        let outcome = transform_all(&messages, Utc::now());

        let mut result = IngestionResult {
            inserted_count: 0,
            fetched: messages.len(),
            skipped: outcome.skipped,
        };
        if outcome.records.is_empty() {
            info!("no records to insert");
            return Ok(result);
        }

        info!(
            stage = %Stage::WriteBatch,
            records = outcome.records.len(),
            "ingestion stage"
        );
        result.inserted_count = self.store.write_batch(outcome.records).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{IngestionError, IngestionPipeline};
    use crate::db::WriteError;
    use crate::graph::{
        AuthError, Credential, CredentialProvider, DecodeError, FetchError, MessageFetcher,
        SenderQuery,
    };
    use crate::test_support::{graph_message, graph_page, RecordingStore, ScriptedTransport};

    struct StaticToken;

    #[async_trait]
    impl CredentialProvider for StaticToken {
        async fn acquire(&self) -> Result<Credential, AuthError> {
            Ok(Credential::new("static-token"))
        }
    }

    fn query() -> SenderQuery {
        SenderQuery::new("desk@example.com", "clips@example.com")
    }

    #[test]
    fn fetch_decode_failures_map_to_decode_kind() {
        let error: IngestionError = FetchError::Decode(DecodeError {
            page: 2,
            message: "expected value".to_string(),
        })
        .into();
        assert_eq!(error.kind(), "decode");

        let error: IngestionError = FetchError::TooManyPages { limit: 3 }.into();
        assert_eq!(error.kind(), "fetch");

        let error: IngestionError = WriteError::Duplicate {
            id: "msg-1".to_string(),
        }
        .into();
        assert_eq!(error.kind(), "write");
        assert!(error.to_string().contains("msg-1"));
    }

    #[tokio::test]
    async fn run_counts_fetched_skipped_and_inserted() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(
            200,
            graph_page(
                vec![
                    graph_message("a", "2026-03-01T08:00:00Z"),
                    graph_message("b", "garbage"),
                ],
                None,
            ),
        );
        let store = Arc::new(RecordingStore::new());
        let pipeline = IngestionPipeline::new(
            Arc::new(StaticToken),
            MessageFetcher::new(transport.clone(), "https://graph.example.test/v1.0"),
            store.clone(),
        );

        let result = pipeline.run(&query()).await.expect("run pipeline");
        assert_eq!(result.fetched, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.inserted_count, 1);
        assert_eq!(store.write_calls(), 1);
        assert_eq!(
            transport.get_calls()[0].bearer.as_deref(),
            Some("static-token")
        );
    }

    #[tokio::test]
    async fn fetch_failure_skips_the_write() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_get(500, "boom");
        let store = Arc::new(RecordingStore::new());
        let pipeline = IngestionPipeline::new(
            Arc::new(StaticToken),
            MessageFetcher::new(transport, "https://graph.example.test/v1.0"),
            store.clone(),
        );

        let error = pipeline.run(&query()).await.expect_err("fetch fails");
        assert_eq!(error.kind(), "fetch");
        assert_eq!(store.write_calls(), 0);
    }
}
