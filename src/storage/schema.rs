//! Database schema definitions and migrations
//!
//! This module contains all SQL schema definitions for the spiderpool database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per primary run
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY ASC,
    timestamp INTEGER NOT NULL
);

-- Hostnames stored label by label: com -> example -> www
CREATE TABLE IF NOT EXISTS domains (
    id INTEGER PRIMARY KEY ASC,
    name TEXT NOT NULL,
    parent_id INTEGER NOT NULL,
    full_name TEXT NOT NULL UNIQUE,
    ok_to_spider INTEGER NULL,
    UNIQUE(name, parent_id)
);

CREATE TABLE IF NOT EXISTS urls (
    id INTEGER PRIMARY KEY ASC,
    url TEXT NOT NULL UNIQUE,
    domain_id INTEGER NOT NULL REFERENCES domains(id)
);

CREATE INDEX IF NOT EXISTS ix_urls_domain ON urls(domain_id);

-- requested_at marks consumption; rows are never deleted by a crawl
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY ASC,
    timestamp INTEGER NOT NULL,
    url_id INTEGER NOT NULL UNIQUE REFERENCES urls(id),
    priority INTEGER NOT NULL,
    requested_at INTEGER NULL
);

CREATE INDEX IF NOT EXISTS ix_queue_requested_at ON queue(requested_at);
CREATE INDEX IF NOT EXISTS ix_queue_priority ON queue(priority);
CREATE INDEX IF NOT EXISTS ix_queue_priority_requested_at ON queue(priority, requested_at);

-- gzip content addressed by the SHA-256 of the uncompressed bytes
CREATE TABLE IF NOT EXISTS blobs (
    id INTEGER PRIMARY KEY ASC,
    content_gz BLOB NOT NULL,
    sha256 TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY ASC,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    timestamp INTEGER NOT NULL,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    status INTEGER NOT NULL DEFAULT 0,
    content_type TEXT,
    headers_blob_id INTEGER REFERENCES blobs(id),
    body_blob_id INTEGER REFERENCES blobs(id)
);

CREATE INDEX IF NOT EXISTS ix_requests_url ON requests(url_id);

CREATE TABLE IF NOT EXISTS request_errors (
    id INTEGER PRIMARY KEY ASC,
    session_id INTEGER NOT NULL REFERENCES sessions(id),
    timestamp INTEGER NOT NULL,
    url_id INTEGER NOT NULL REFERENCES urls(id),
    error_code TEXT NOT NULL,
    error_message TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY ASC,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS domain_signals (
    domain_id INTEGER NOT NULL REFERENCES domains(id),
    signal_id INTEGER NOT NULL REFERENCES signals(id),
    strength INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (domain_id, signal_id)
);
"#;

/// Current schema version, stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
