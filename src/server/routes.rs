use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{get, Request, Response, State};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::graph::SenderQuery;
use crate::pipeline::IngestionError;
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// A failed ingestion run, rendered as a 500 with a per-kind summary.
#[derive(Debug)]
pub struct IngestFailure(pub IngestionError);

impl IngestFailure {
    fn summary(&self) -> &'static str {
        match self.0 {
            IngestionError::Auth(_) => "Failed to authenticate with Microsoft Graph API",
            IngestionError::Fetch(_) => "Failed to retrieve emails",
            IngestionError::Decode(_) => "Failed to decode email response",
            IngestionError::Write(_) => "Failed to insert emails into database",
        }
    }
}

impl<'r> Responder<'r, 'static> for IngestFailure {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        error!(kind = self.0.kind(), error = %self.0, "ingestion request failed");

        let body = ErrorResponse {
            error: self.summary().to_string(),
            details: Some(self.0.to_string()),
        };
        let json = serde_json::to_string(&body)
            .unwrap_or_else(|_| r#"{"error":"Failed to serialize error"}"#.to_string());

        Response::build()
            .status(Status::InternalServerError)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

/// Runs one ingestion. `mailbox` and `sender` override the configured defaults.
#[get("/store-media-monitoring?<mailbox>&<sender>")]
pub async fn store_media_monitoring(
    state: &State<AppState>,
    mailbox: Option<String>,
    sender: Option<String>,
) -> Result<Json<IngestResponse>, IngestFailure> {
    let query = SenderQuery::new(
        non_blank(mailbox).unwrap_or_else(|| state.default_query.mailbox.clone()),
        non_blank(sender).unwrap_or_else(|| state.default_query.sender.clone()),
    );

    let result = state.pipeline.run(&query).await.map_err(IngestFailure)?;
    let message = if result.inserted_count == 0 {
        "No new emails to insert"
    } else {
        "Emails inserted successfully"
    };

    Ok(Json(IngestResponse {
        message: message.to_string(),
        count: result.inserted_count,
    }))
}

#[get("/health")]
pub fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
