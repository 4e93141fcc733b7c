use rusqlite::{Connection, Result};

/// Creates the message table and its read indexes. Safe to run on every open.
pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS graph_emails (
            id TEXT PRIMARY KEY,
            received_at TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            from_name TEXT NOT NULL DEFAULT '',
            from_address TEXT NOT NULL DEFAULT '',
            body_content_type TEXT NOT NULL DEFAULT '',
            body_content TEXT NOT NULL DEFAULT '',
            fetched_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_graph_emails_received_at ON graph_emails(received_at);
        CREATE INDEX IF NOT EXISTS idx_graph_emails_from_address ON graph_emails(from_address);
        "#,
    )
}
