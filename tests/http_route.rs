use std::sync::Arc;

use mediamon::graph::auth::GraphCredentials;
use mediamon::graph::{ClientCredentialsProvider, MessageFetcher, SenderQuery};
use mediamon::pipeline::IngestionPipeline;
use mediamon::server::routes::{ErrorResponse, HealthResponse, IngestResponse};
use mediamon::server::{self, AppState};
use mediamon::test_support::{graph_message, graph_page, RecordingStore, ScriptedTransport};
use rocket::http::Status;
use rocket::local::blocking::Client;

const TOKEN_BODY: &str = r#"{"access_token":"tok-http","token_type":"Bearer","expires_in":3599}"#;

fn client(transport: &Arc<ScriptedTransport>, store: &Arc<RecordingStore>) -> Client {
    let credentials = GraphCredentials {
        tenant_id: "tenant-1".to_string(),
        client_id: "client-1".to_string(),
        client_secret: "secret-1".to_string(),
    };
    let provider =
        ClientCredentialsProvider::new(transport.clone(), credentials, "https://login.test");
    let fetcher = MessageFetcher::new(transport.clone(), "https://graph.test/v1.0");
    let state = AppState {
        pipeline: IngestionPipeline::new(Arc::new(provider), fetcher, store.clone()),
        default_query: SenderQuery::new("monitor@example.com", "clips@example.com"),
    };

    Client::tracked(server::mount(rocket::build(), state)).expect("valid rocket instance")
}

#[test]
fn empty_mailbox_answers_ok_without_writing() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_post(200, TOKEN_BODY);
    transport.push_get(200, graph_page(Vec::new(), None));
    let store = Arc::new(RecordingStore::new());
    let client = client(&transport, &store);

    let response = client.get("/store-media-monitoring").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let body: IngestResponse = response.into_json().expect("json body");
    assert_eq!(body.count, 0);
    assert_eq!(body.message, "No new emails to insert");
    assert_eq!(store.write_calls(), 0);
}

#[test]
fn inserted_messages_are_counted() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_post(200, TOKEN_BODY);
    transport.push_get(
        200,
        graph_page(
            vec![
                graph_message("m-1", "2026-03-01T09:30:00Z"),
                graph_message("m-2", "2026-03-01T10:30:00Z"),
            ],
            None,
        ),
    );
    let store = Arc::new(RecordingStore::new());
    let client = client(&transport, &store);

    let response = client.get("/store-media-monitoring").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let body: IngestResponse = response.into_json().expect("json body");
    assert_eq!(body.count, 2);
    assert_eq!(body.message, "Emails inserted successfully");
}

#[test]
fn query_parameters_override_configured_sender() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_post(200, TOKEN_BODY);
    transport.push_get(200, graph_page(Vec::new(), None));
    let store = Arc::new(RecordingStore::new());
    let client = client(&transport, &store);

    let response = client
        .get("/store-media-monitoring?mailbox=desk%40example.com&sender=wire%40example.com")
        .dispatch();
    assert_eq!(response.status(), Status::Ok);

    let gets = transport.get_calls();
    assert_eq!(gets.len(), 1);
    assert!(gets[0].url.contains("/users/desk@example.com/messages"));
    assert!(gets[0].url.contains("wire%40example.com"));
}

#[test]
fn mailbox_parameter_stays_inside_its_path_segment() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_post(200, TOKEN_BODY);
    transport.push_get(200, graph_page(Vec::new(), None));
    let store = Arc::new(RecordingStore::new());
    let client = client(&transport, &store);

    let response = client
        .get("/store-media-monitoring?mailbox=desk%23%3F%24top%3D999%40example.com")
        .dispatch();
    assert_eq!(response.status(), Status::Ok);

    let gets = transport.get_calls();
    assert_eq!(gets.len(), 1);
    assert!(gets[0]
        .url
        .contains("/users/desk%23%3F$top=999@example.com/messages?"));
    assert!(!gets[0].url.contains('#'));
}

#[test]
fn auth_failure_is_a_server_error_with_summary() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_post(401, r#"{"error":"invalid_client"}"#);
    let store = Arc::new(RecordingStore::new());
    let client = client(&transport, &store);

    let response = client.get("/store-media-monitoring").dispatch();
    assert_eq!(response.status(), Status::InternalServerError);

    let body: ErrorResponse = response.into_json().expect("json body");
    assert_eq!(body.error, "Failed to authenticate with Microsoft Graph API");
    assert!(body.details.is_some());
    assert!(transport.get_calls().is_empty());
    assert_eq!(store.write_calls(), 0);
}

#[test]
fn health_reports_ok() {
    let transport = Arc::new(ScriptedTransport::new());
    let store = Arc::new(RecordingStore::new());
    let client = client(&transport, &store);

    let response = client.get("/health").dispatch();
    assert_eq!(response.status(), Status::Ok);

    let body: HealthResponse = response.into_json().expect("json body");
    assert_eq!(body.status, "ok");
}
