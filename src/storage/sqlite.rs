//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::fetch::{FetchedRequest, HttpHeader};
use crate::queue::Priority;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{DomainPolicy, QueueItem, QueueStatus, Session};
use crate::url::parse_domain_name;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;
use url::Url;

const QUEUE_ITEM_COLUMNS: &str = "
    queue.id, urls.url, domains.full_name, queue.priority, queue.timestamp, queue.requested_at
    FROM queue
    INNER JOIN urls ON urls.id = queue.url_id
    INNER JOIN domains ON domains.id = urls.domain_id";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,

    /// full_name -> domains.id, for rows known to be committed
    domain_ids: HashMap<String, i64>,

    /// name -> signals.id
    signal_ids: HashMap<String, i64>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            domain_ids: HashMap::new(),
            signal_ids: HashMap::new(),
        }
    }

    /// Ensures every label of `hostname` exists in the domain registry
    ///
    /// Returns the id of the full hostname's row.
    fn ensure_domain(&mut self, hostname: &str) -> StorageResult<i64> {
        let labels = parse_domain_name(hostname)
            .map_err(|_| StorageError::InvalidDomain(hostname.to_string()))?;

        let mut parent_id = 0i64;
        let mut full_name = String::new();

        for label in labels.iter().rev() {
            full_name = if full_name.is_empty() {
                label.clone()
            } else {
                format!("{}.{}", label, full_name)
            };

            if let Some(&id) = self.domain_ids.get(&full_name) {
                parent_id = id;
                continue;
            }

            self.conn.execute(
                "INSERT INTO domains (name, full_name, parent_id) VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING",
                params![label, full_name, parent_id],
            )?;

            let id: i64 = self.conn.query_row(
                "SELECT id FROM domains WHERE name = ?1 AND parent_id = ?2",
                params![label, parent_id],
                |row| row.get(0),
            )?;

            self.domain_ids.insert(full_name.clone(), id);
            parent_id = id;
        }

        Ok(parent_id)
    }

    /// Ensures a `urls` row exists, returning its id
    fn ensure_url(&mut self, url: &str) -> StorageResult<i64> {
        let hostname = Url::parse(url)
            .ok()
            .and_then(|u| crate::url::hostname_of(&u))
            .ok_or_else(|| StorageError::InvalidDomain(url.to_string()))?;
        let domain_id = self.ensure_domain(&hostname)?;

        self.conn.execute(
            "INSERT INTO urls (domain_id, url) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
            params![domain_id, url],
        )?;

        Ok(self
            .conn
            .query_row("SELECT id FROM urls WHERE url = ?1", params![url], |row| {
                row.get(0)
            })?)
    }

    fn ensure_signal(&mut self, name: &str) -> StorageResult<i64> {
        if let Some(&id) = self.signal_ids.get(name) {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO signals (name) VALUES (?1) ON CONFLICT DO NOTHING",
            params![name],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM signals WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        self.signal_ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Stores `content` once, keyed by its SHA-256
    fn insert_blob(&mut self, content: &[u8]) -> StorageResult<i64> {
        let sha256 = hex::encode(Sha256::digest(content));

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM blobs WHERE sha256 = ?1",
                params![sha256],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content)?;
        let gzipped = encoder.finish()?;

        self.conn.execute(
            "INSERT INTO blobs (content_gz, sha256) VALUES (?1, ?2)",
            params![gzipped, sha256],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn row_to_queue_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
        let priority: i64 = row.get(3)?;
        let requested_at: Option<i64> = row.get(5)?;

        Ok(QueueItem {
            id: row.get(0)?,
            url: row.get(1)?,
            hostname: row.get(2)?,
            priority: Priority::from_db(priority).unwrap_or(Priority::Medium),
            enqueued_at: row.get(4)?,
            consumed: requested_at.is_some(),
        })
    }
}

fn gunzip(content: &[u8]) -> StorageResult<String> {
    let mut decoder = GzDecoder::new(content);
    let mut out = String::new();
    decoder.read_to_string(&mut out)?;
    Ok(out)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl Storage for SqliteStorage {
    // ===== Sessions =====

    fn create_session(&mut self) -> StorageResult<Session> {
        let started_at = Utc::now();
        self.conn.execute(
            "INSERT INTO sessions (timestamp) VALUES (?1)",
            params![started_at.timestamp_millis()],
        )?;

        Ok(Session {
            id: self.conn.last_insert_rowid(),
            started_at,
        })
    }

    // ===== Queue =====

    fn next_queue_batch(
        &self,
        limit: usize,
        exclude: &HashSet<i64>,
    ) -> StorageResult<Vec<QueueItem>> {
        let exclude_json = serde_json::to_string(&exclude.iter().collect::<Vec<_>>())?;

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {}
             WHERE queue.requested_at IS NULL
               AND queue.priority >= 0
               AND queue.id NOT IN (SELECT value FROM json_each(?1))
             ORDER BY queue.priority DESC, RANDOM()
             LIMIT ?2",
            QUEUE_ITEM_COLUMNS
        ))?;

        let items = stmt
            .query_map(params![exclude_json, limit as i64], Self::row_to_queue_item)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn consume(&mut self, queue_item_id: i64) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE queue SET requested_at = ?1 WHERE id = ?2",
            params![now_millis(), queue_item_id],
        )?;
        Ok(())
    }

    fn enqueue(
        &mut self,
        url: &Url,
        priority: Priority,
        replace_existing: bool,
    ) -> StorageResult<()> {
        let url_id = self.ensure_url(url.as_str())?;

        if replace_existing {
            self.conn
                .execute("DELETE FROM queue WHERE url_id = ?1", params![url_id])?;
        }

        self.conn.execute(
            "INSERT INTO queue (timestamp, url_id, priority) VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
            params![now_millis(), url_id, priority.to_db()],
        )?;

        Ok(())
    }

    fn queue_status(&self) -> StorageResult<QueueStatus> {
        let mut status = QueueStatus::default();

        let mut stmt = self.conn.prepare(
            "SELECT priority, COUNT(*) FROM queue WHERE requested_at IS NULL GROUP BY priority",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u64>(1)?)))?;

        for row in rows {
            let (priority, count) = row?;
            match Priority::from_db(priority) {
                Some(Priority::Ignore) => status.ignore += count,
                Some(Priority::Low) => status.low += count,
                Some(Priority::Medium) => status.medium += count,
                Some(Priority::High) => status.high += count,
                None => {
                    return Err(StorageError::Database(format!(
                        "Invalid priority in queue: {}",
                        priority
                    )))
                }
            }
        }

        status.processed = self.conn.query_row(
            "SELECT COUNT(*) FROM queue WHERE requested_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(status)
    }

    fn unconsumed_items(&self) -> StorageResult<Vec<QueueItem>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} WHERE queue.requested_at IS NULL ORDER BY queue.id",
            QUEUE_ITEM_COLUMNS
        ))?;

        let items = stmt
            .query_map([], Self::row_to_queue_item)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn set_priority(&mut self, queue_item_id: i64, priority: Priority) -> StorageResult<()> {
        self.conn.execute(
            "UPDATE queue SET priority = ?1 WHERE id = ?2",
            params![priority.to_db(), queue_item_id],
        )?;
        Ok(())
    }

    // ===== Domains =====

    fn domain_policy(&self, hostname: &str) -> StorageResult<DomainPolicy> {
        let row: Option<Option<i64>> = self
            .conn
            .query_row(
                "SELECT ok_to_spider FROM domains WHERE full_name = ?1",
                params![hostname.to_lowercase()],
                |row| row.get(0),
            )
            .optional()?;

        Ok(match row {
            None => DomainPolicy::default(),
            Some(ok) => DomainPolicy {
                known: true,
                ok_to_spider: ok.map(|v| v != 0),
            },
        })
    }

    fn set_domain_ignored(&mut self, hostname: &str) -> StorageResult<()> {
        let domain_id = self.ensure_domain(hostname)?;
        let changed = self.conn.execute(
            "UPDATE queue SET priority = ?1
             WHERE requested_at IS NULL
               AND url_id IN (SELECT id FROM urls WHERE domain_id = ?2)",
            params![Priority::Ignore.to_db(), domain_id],
        )?;

        tracing::debug!("Ignored {} queue items for {}", changed, hostname);
        Ok(())
    }

    fn mark_domains_ok_to_spider(&mut self, hostnames: &[String], ok: bool) -> StorageResult<()> {
        for hostname in hostnames {
            let domain_id = self.ensure_domain(hostname)?;
            self.conn.execute(
                "UPDATE domains SET ok_to_spider = ?1 WHERE id = ?2",
                params![ok as i64, domain_id],
            )?;
        }
        Ok(())
    }

    fn save_domain_signals(&mut self, hostname: &str, signals: &[String]) -> StorageResult<()> {
        let domain_id = self.ensure_domain(hostname)?;

        for signal in signals {
            let signal_id = self.ensure_signal(signal)?;
            self.conn.execute(
                "INSERT INTO domain_signals (domain_id, signal_id, strength) VALUES (?1, ?2, 1)
                 ON CONFLICT (domain_id, signal_id) DO UPDATE SET strength = strength + excluded.strength",
                params![domain_id, signal_id],
            )?;
        }

        Ok(())
    }

    fn unrequested_domains(&self, patterns: &[String]) -> StorageResult<Vec<String>> {
        let criteria = if patterns.is_empty() {
            "1".to_string()
        } else {
            vec!["full_name LIKE ?"; patterns.len()].join(" OR ")
        };
        let params: Vec<String> = patterns.iter().map(|p| p.replace('*', "%")).collect();

        let mut stmt = self.conn.prepare(&format!(
            "SELECT full_name FROM domains
             WHERE ({})
               AND EXISTS (SELECT id FROM urls WHERE domain_id = domains.id)
               AND NOT EXISTS (
                   SELECT requests.id FROM requests
                   INNER JOIN urls ON urls.id = requests.url_id
                   WHERE requests.status = 200 AND urls.domain_id = domains.id)
               AND NOT EXISTS (
                   SELECT request_errors.id FROM request_errors
                   INNER JOIN urls ON urls.id = request_errors.url_id
                   WHERE urls.domain_id = domains.id)
             ORDER BY full_name",
            criteria
        ))?;

        let names = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(names)
    }

    // ===== Requests =====

    fn record_fetch(&mut self, session_id: i64, request: &FetchedRequest) -> StorageResult<i64> {
        let headers_json = serde_json::to_vec(&request.headers)?;
        let headers_blob_id = self.insert_blob(&headers_json)?;
        let body_blob_id = match &request.body {
            Some(body) => Some(self.insert_blob(body.as_bytes())?),
            None => None,
        };
        let url_id = self.ensure_url(&request.url)?;

        self.conn.execute(
            "INSERT INTO requests
                (session_id, url_id, timestamp, status, content_type, headers_blob_id, body_blob_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                url_id,
                now_millis(),
                request.status,
                request.content_type,
                headers_blob_id,
                body_blob_id
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn record_fetch_error(
        &mut self,
        session_id: i64,
        url: &str,
        code: &str,
        message: &str,
    ) -> StorageResult<i64> {
        let url_id = self.ensure_url(url)?;

        self.conn.execute(
            "INSERT INTO request_errors (session_id, url_id, timestamp, error_code, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, url_id, now_millis(), code, message],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    fn most_recent_fetch(&self, url: &str) -> StorageResult<Option<FetchedRequest>> {
        type Row = (String, u16, Option<String>, Option<Vec<u8>>, Option<Vec<u8>>);

        let row: Option<Row> = self
            .conn
            .query_row(
                "SELECT urls.url, requests.status, requests.content_type,
                        header_blobs.content_gz, body_blobs.content_gz
                 FROM requests
                 INNER JOIN urls ON urls.id = requests.url_id
                 LEFT JOIN blobs header_blobs ON header_blobs.id = requests.headers_blob_id
                 LEFT JOIN blobs body_blobs ON body_blobs.id = requests.body_blob_id
                 WHERE urls.url = ?1
                 ORDER BY requests.timestamp DESC, requests.id DESC
                 LIMIT 1",
                params![url],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        let Some((url, status, content_type, headers_gz, body_gz)) = row else {
            return Ok(None);
        };

        let headers: Vec<HttpHeader> = match headers_gz {
            Some(gz) => serde_json::from_str(&gunzip(&gz)?)?,
            None => Vec::new(),
        };
        let body = body_gz.map(|gz| gunzip(&gz)).transpose()?;

        Ok(Some(FetchedRequest {
            url,
            status,
            content_type: content_type.unwrap_or_default(),
            headers,
            body,
        }))
    }

    fn blob(&self, id: i64) -> StorageResult<Option<String>> {
        let content: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT content_gz FROM blobs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        content.map(|gz| gunzip(&gz)).transpose()
    }

    // ===== Transactions =====

    fn begin_transaction(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    fn commit_transaction(&mut self) -> StorageResult<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> StorageResult<()> {
        // Ids cached during the transaction may now point at nothing
        self.domain_ids.clear();
        self.signal_ids.clear();

        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}
