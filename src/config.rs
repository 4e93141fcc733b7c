use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::db::{Database, DuplicatePolicy};
use crate::graph::auth::GraphCredentials;
use crate::graph::fetcher::{DEFAULT_MAX_PAGES, DEFAULT_PAGE_SIZE};
use crate::graph::{
    ClientCredentialsProvider, GraphTransport, MessageFetcher, ReqwestTransport, SenderQuery,
    GRAPH_API_BASE, GRAPH_AUTHORITY,
};
use crate::pipeline::IngestionPipeline;

/// Runtime settings. Every value may come from a flag or its environment variable.
#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Azure AD tenant id
    #[arg(long, env = "TENANT_ID", default_value = "", hide_default_value = true)]
    pub tenant_id: String,

    /// App registration client id
    #[arg(long, env = "CLIENT_ID", default_value = "", hide_default_value = true)]
    pub client_id: String,

    /// App registration client secret
    #[arg(
        long,
        env = "CLIENT_SECRET",
        default_value = "",
        hide_default_value = true,
        hide_env_values = true
    )]
    pub client_secret: String,

    /// Mailbox whose messages are listed
    #[arg(long, env = "MONITORED_MAILBOX", default_value = "your_user@example.com")]
    pub mailbox: String,

    /// Sender address kept by the filter
    #[arg(long, env = "MONITORED_SENDER", default_value = "your_sender@example.com")]
    pub sender: String,

    /// SQLite database path (defaults to ~/.mediamon/mediamon.db)
    #[arg(long, env = "MEDIAMON_DB_PATH")]
    pub db_path: Option<PathBuf>,

    #[arg(long, env = "GRAPH_API_BASE", default_value = GRAPH_API_BASE)]
    pub graph_api_base: String,

    #[arg(long, env = "GRAPH_AUTHORITY", default_value = GRAPH_AUTHORITY)]
    pub graph_authority: String,

    /// Messages requested per Graph page
    #[arg(long, env = "GRAPH_PAGE_SIZE", default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,

    /// Pages followed before the run fails
    #[arg(long, env = "GRAPH_MAX_PAGES", default_value_t = DEFAULT_MAX_PAGES)]
    pub max_pages: usize,

    /// Timeout for each outbound HTTP request, in seconds
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 10)]
    pub http_timeout_secs: u64,

    /// Deadline for the bulk insert, in seconds
    #[arg(long, env = "WRITE_TIMEOUT_SECS", default_value_t = 60)]
    pub write_timeout_secs: u64,

    /// What to do with message ids that are already stored
    #[arg(long, env = "DUPLICATE_POLICY", value_enum, default_value_t = DuplicatePolicy::Reject)]
    pub duplicate_policy: DuplicatePolicy,

    /// Attempts made to open the store at startup
    #[arg(long, env = "STORE_CONNECT_ATTEMPTS", default_value_t = 5)]
    pub store_connect_attempts: u32,
}

impl Settings {
    pub fn credentials(&self) -> GraphCredentials {
        GraphCredentials {
            tenant_id: self.tenant_id.trim().to_string(),
            client_id: self.client_id.trim().to_string(),
            client_secret: self.client_secret.trim().to_string(),
        }
    }

    pub fn default_query(&self) -> SenderQuery {
        SenderQuery::new(self.mailbox.trim(), self.sender.trim())
    }

    pub fn resolve_db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => Database::default_db_path().context("resolve default mediamon database path"),
        }
    }

    pub async fn connect_store(&self) -> Result<Database> {
        let path = self.resolve_db_path()?;
        let db = Database::connect_with_retry(
            &path,
            self.duplicate_policy,
            self.store_connect_attempts,
        )
        .await
        .with_context(|| format!("open mediamon database at {}", path.display()))?;
        Ok(db.with_write_timeout(Duration::from_secs(self.write_timeout_secs)))
    }

    /// Wires the reqwest transport, credential provider and fetcher around `store`.
    pub fn build_pipeline(&self, store: Database) -> Result<IngestionPipeline> {
        let transport: Arc<dyn GraphTransport> = Arc::new(
            ReqwestTransport::new(Duration::from_secs(self.http_timeout_secs))
                .context("build graph http transport")?,
        );
        Ok(self.build_pipeline_with(transport, Arc::new(store)))
    }

    pub fn build_pipeline_with(
        &self,
        transport: Arc<dyn GraphTransport>,
        store: Arc<dyn crate::db::RecordStore>,
    ) -> IngestionPipeline {
        let credentials = ClientCredentialsProvider::new(
            Arc::clone(&transport),
            self.credentials(),
            self.graph_authority.clone(),
        );
        let fetcher = MessageFetcher::new(transport, self.graph_api_base.clone())
            .with_page_size(self.page_size)
            .with_max_pages(self.max_pages);
        IngestionPipeline::new(Arc::new(credentials), fetcher, store)
    }
}
