use std::collections::HashSet;
use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::graph::auth::Credential;
use crate::graph::transport::{GraphTransport, TransportError};
use crate::graph::{redact_response_body, GraphMessagesPage, RawMessage};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const DEFAULT_MAX_PAGES: usize = 500;

#[derive(Debug, Error)]
#[error("decode graph messages page {page}: {message}")]
pub struct DecodeError {
    pub page: usize,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("build graph messages URL: {0}")]
    InvalidUrl(String),

    #[error("graph messages request for page {page} failed: {source}")]
    Transport {
        page: usize,
        #[source]
        source: TransportError,
    },

    #[error("graph messages request for page {page} failed: status={status} body={body}")]
    Status {
        page: usize,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("graph pagination exceeded {limit} pages")]
    TooManyPages { limit: usize },

    #[error("graph nextLink on page {page} points back at an earlier page")]
    NextLinkCycle { page: usize },
}

/// Whose mail to read and which sender to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderQuery {
    pub mailbox: String,
    pub sender: String,
}

impl SenderQuery {
    pub fn new(mailbox: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            sender: sender.into(),
        }
    }

    /// OData equality filter on the sender address. Single quotes are doubled
    /// per OData string-literal rules.
    pub fn filter(&self) -> String {
        format!(
            "from/emailAddress/address eq '{}'",
            self.sender.trim().replace('\'', "''")
        )
    }
}

/// Walks `@odata.nextLink` from the first filtered page until the chain ends.
pub struct MessageFetcher {
    transport: Arc<dyn GraphTransport>,
    api_base: String,
    page_size: usize,
    max_pages: usize,
}

impl MessageFetcher {
    pub fn new(transport: Arc<dyn GraphTransport>, api_base: impl Into<String>) -> Self {
        Self {
            transport,
            api_base: api_base.into(),
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// The first page URL. The mailbox always stays a single path segment.
    pub fn initial_url(&self, query: &SenderQuery) -> Result<String, FetchError> {
        let mailbox = query.mailbox.trim();
        if matches!(mailbox, "" | "." | "..") {
            return Err(FetchError::InvalidUrl(format!(
                "invalid mailbox '{mailbox}'"
            )));
        }

        let mut url = Url::parse(&self.api_base)
            .map_err(|error| FetchError::InvalidUrl(format!("{}: {error}", self.api_base)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidUrl(format!("{} cannot carry a path", self.api_base)))?
            .pop_if_empty()
            .push("users")
            .push(mailbox)
            .push("messages");
        url.query_pairs_mut()
            .append_pair("$filter", &query.filter())
            .append_pair("$top", &self.page_size.to_string());
        Ok(url.to_string())
    }

    /// All messages across every page, in page order. Any failed page fails
    /// the whole fetch; nothing partial is returned.
    pub async fn fetch_all(
        &self,
        credential: &Credential,
        query: &SenderQuery,
    ) -> Result<Vec<RawMessage>, FetchError> {
        let mut next_url = Some(self.initial_url(query)?);
        let mut visited = HashSet::new();
        let mut messages = Vec::new();
        let mut page_number = 0usize;

        while let Some(url) = next_url.take() {
            if !visited.insert(url.clone()) {
                warn!(page = page_number, "graph nextLink points at a visited page");
                return Err(FetchError::NextLinkCycle { page: page_number });
            }
            if page_number == self.max_pages {
                return Err(FetchError::TooManyPages {
                    limit: self.max_pages,
                });
            }
            page_number += 1;

            let page = self.fetch_page(credential, &url, page_number).await?;
            debug!(
                page = page_number,
                items = page.value.len(),
                has_next = page.next_link.is_some(),
                "fetched graph messages page"
            );
            messages.extend(page.value);
            next_url = page.next_link.filter(|next| !next.trim().is_empty());
        }

        info!(
            pages = page_number,
            total = messages.len(),
            "graph messages retrieved"
        );
        Ok(messages)
    }

    async fn fetch_page(
        &self,
        credential: &Credential,
        url: &str,
        page: usize,
    ) -> Result<GraphMessagesPage, FetchError> {
        let response = self
            .transport
            .get(url, credential.bearer(), &[("ConsistencyLevel", "eventual")])
            .await
            .map_err(|source| FetchError::Transport { page, source })?;

        if !response.is_success() {
            return Err(FetchError::Status {
                page,
                status: response.status,
                body: redact_response_body(&response.body),
            });
        }

        serde_json::from_str(&response.body).map_err(|error| {
            FetchError::Decode(DecodeError {
                page,
                message: error.to_string(),
            })
        })
    }
}
