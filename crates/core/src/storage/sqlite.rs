//! SQLite storage engine.
//!
//! All namespaces share one database file, `httpcache.sqlite` inside the cache
//! directory, with one row per `(namespace, key)`. tokio-rusqlite runs the
//! queries on a background thread. A store is a single UPSERT, so a record is
//! never visible half-written.
//!
//! Columns are read as untyped values and checked afterwards, so a row edited
//! by hand or by another tool is a miss rather than a database error.
//!
//! The schema version lives in `PRAGMA user_version`; each entry of
//! [`SCHEMA`] moves it up by one inside a transaction.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio_rusqlite::rusqlite::types::Value;
use tokio_rusqlite::{Connection, params, rusqlite};

use super::{CacheStorage, CorruptRecord, StorageOptions};
use crate::Error;
use crate::config::CacheConfig;
use crate::headers::{headers_to_raw, raw_to_headers};
use crate::key::Namespace;
use crate::record::{CacheRecord, RecordMeta};
use crate::request::Request;
use crate::response::Response;

/// Database file name inside the cache directory.
pub const DB_FILE_NAME: &str = "httpcache.sqlite";

/// Schema steps; step `n` brings `user_version` to `n + 1`.
const SCHEMA: &[&str] = &[include_str!("../../migrations/001_records.sql")];

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;";

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn migrate(conn: &mut rusqlite::Connection) -> Result<(), Error> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    let applied = usize::try_from(current).unwrap_or(0);

    for (idx, sql) in SCHEMA.iter().enumerate().skip(applied) {
        let version = idx as i64 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql).map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::debug!(version, "applied cache schema");
    }
    Ok(())
}

fn text(column: &str, value: Value) -> Result<String, CorruptRecord> {
    match value {
        Value::Text(s) => Ok(s),
        other => Err(CorruptRecord::Metadata(format!("{column} is {:?}", other.data_type()))),
    }
}

fn blob(column: &str, value: Value) -> Result<Vec<u8>, CorruptRecord> {
    match value {
        Value::Blob(b) => Ok(b),
        Value::Text(s) => Ok(s.into_bytes()),
        other => Err(CorruptRecord::Metadata(format!("{column} is {:?}", other.data_type()))),
    }
}

/// Metadata columns as read from the database, before validation.
struct RawMeta {
    url: Value,
    method: Value,
    status: Value,
    written_at: Value,
}

impl RawMeta {
    /// Read metadata from the first four columns of `row`.
    fn from_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Self> {
        Ok(Self {
            url: row.get(offset)?,
            method: row.get(offset + 1)?,
            status: row.get(offset + 2)?,
            written_at: row.get(offset + 3)?,
        })
    }

    fn decode(self) -> Result<RecordMeta, CorruptRecord> {
        let status = match self.status {
            Value::Integer(n) => u16::try_from(n).map_err(|_| CorruptRecord::Metadata(format!("status {n}")))?,
            other => return Err(CorruptRecord::Metadata(format!("status is {:?}", other.data_type()))),
        };
        let written_at = text("written_at", self.written_at)?;
        let timestamp = DateTime::parse_from_rfc3339(&written_at)
            .map_err(|e| CorruptRecord::Metadata(format!("written_at {written_at:?}: {e}")))?
            .with_timezone(&Utc);
        Ok(RecordMeta { url: text("url", self.url)?, method: text("method", self.method)?, status, timestamp })
    }
}

/// Full row as read from the database, before validation.
struct RawRecord {
    meta: RawMeta,
    response_headers: Value,
    response_body: Value,
    request_headers: Value,
    request_body: Value,
}

impl RawRecord {
    fn decode(self) -> Result<CacheRecord, CorruptRecord> {
        let RecordMeta { url, method, status, timestamp } = self.meta.decode()?;
        Ok(CacheRecord {
            url,
            method,
            status,
            timestamp,
            response_headers: raw_to_headers(&blob("response_headers", self.response_headers)?),
            response_body: blob("response_body", self.response_body)?.into(),
            request_headers: raw_to_headers(&blob("request_headers", self.request_headers)?),
            request_body: blob("request_body", self.request_body)?.into(),
        })
    }
}

/// Embedded-database engine.
#[derive(Clone, Debug)]
pub struct SqliteStorage {
    conn: Connection,
    options: StorageOptions,
}

impl SqliteStorage {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies pragmas, and brings the
    /// schema up to date.
    pub async fn open(path: impl AsRef<Path>, options: StorageOptions) -> Result<Self, Error> {
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, options).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory(options: StorageOptions) -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await.map_err(|e| Error::Database(e.into()))?;
        Self::init(conn, options).await
    }

    /// Open `dir/httpcache.sqlite`, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConfigured` if the cache is disabled or `dir` is unset.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, Error> {
        if !config.enabled {
            return Err(Error::NotConfigured("cache disabled".into()));
        }
        let dir = config.require_dir().map_err(|e| Error::NotConfigured(e.to_string()))?;
        tokio::fs::create_dir_all(dir).await?;
        Self::open(dir.join(DB_FILE_NAME), StorageOptions::from_config(config)).await
    }

    async fn init(conn: Connection, options: StorageOptions) -> Result<Self, Error> {
        conn.call(|conn| -> Result<(), Error> {
            conn.execute_batch(PRAGMAS)?;
            migrate(conn)
        })
        .await
        .map_err(Error::from)?;

        Ok(Self { conn, options })
    }

    /// Number of rows in `namespace`, expired ones included.
    pub async fn count(&self, namespace: &Namespace) -> Result<u64, Error> {
        let namespace = namespace.to_string();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM records WHERE namespace = ?1", params![namespace], |row| {
                        row.get(0)
                    })?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl CacheStorage for SqliteStorage {
    async fn close_namespace(&self, namespace: &Namespace) -> Result<(), Error> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
                Ok(())
            })
            .await
            .map_err(Error::Database)?;
        tracing::debug!(namespace = %namespace, "checkpointed cache database");
        Ok(())
    }

    async fn retrieve(&self, namespace: &Namespace, request: &Request) -> Result<Option<Response>, Error> {
        let key = self.options.key_for(request);
        let (ns, k) = (namespace.to_string(), key.to_string());
        let raw = self
            .conn
            .call(move |conn| -> Result<Option<RawRecord>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT url, method, status, written_at,
                        response_headers, response_body, request_headers, request_body
                    FROM records WHERE namespace = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![ns, k], |row| {
                    Ok(RawRecord {
                        meta: RawMeta::from_row(row, 0)?,
                        response_headers: row.get(4)?,
                        response_body: row.get(5)?,
                        request_headers: row.get(6)?,
                        request_body: row.get(7)?,
                    })
                });

                match result {
                    Ok(raw) => Ok(Some(raw)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        let Some(raw) = raw else {
            tracing::debug!(namespace = %namespace, key = %key, "cache miss");
            return Ok(None);
        };

        let record = match raw.decode() {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(namespace = %namespace, key = %key, error = %e, "corrupt record treated as miss");
                return Ok(None);
            }
        };

        if self.options.expiration.is_expired(record.timestamp, Utc::now()) {
            tracing::debug!(namespace = %namespace, key = %key, written_at = %record.timestamp, "record expired");
            return Ok(None);
        }

        match self.options.build_response(record) {
            Ok(response) => {
                tracing::debug!(namespace = %namespace, key = %key, status = response.status, "cache hit");
                Ok(Some(response))
            }
            Err(e) => {
                tracing::debug!(namespace = %namespace, key = %key, error = %e, "corrupt record treated as miss");
                Ok(None)
            }
        }
    }

    async fn store(&self, namespace: &Namespace, request: &Request, response: &Response) -> Result<(), Error> {
        let key = self.options.key_for(request);
        let record = CacheRecord::capture(request, response, Utc::now());
        let (ns, k) = (namespace.to_string(), key.to_string());
        let status = record.status;

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO records (
                        namespace, key, url, method, status, written_at,
                        response_headers, response_body, request_headers, request_body
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(namespace, key) DO UPDATE SET
                        url = excluded.url,
                        method = excluded.method,
                        status = excluded.status,
                        written_at = excluded.written_at,
                        response_headers = excluded.response_headers,
                        response_body = excluded.response_body,
                        request_headers = excluded.request_headers,
                        request_body = excluded.request_body",
                    params![
                        ns,
                        k,
                        record.url,
                        record.method,
                        record.status as i64,
                        format_timestamp(record.timestamp),
                        headers_to_raw(&record.response_headers),
                        record.response_body.as_ref(),
                        headers_to_raw(&record.request_headers),
                        record.request_body.as_ref(),
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        tracing::debug!(namespace = %namespace, key = %key, status, "stored response");
        Ok(())
    }

    /// Delete expired rows and rows whose metadata does not decode.
    async fn purge_expired(&self, namespace: &Namespace) -> Result<u64, Error> {
        let expiration = self.options.expiration;
        let now = Utc::now();
        let ns = namespace.to_string();

        let removed = self
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let doomed = {
                    let mut stmt =
                        tx.prepare("SELECT key, url, method, status, written_at FROM records WHERE namespace = ?1")?;
                    let rows =
                        stmt.query_map(params![ns], |row| Ok((row.get::<_, Value>(0)?, RawMeta::from_row(row, 1)?)))?;

                    let mut doomed = Vec::new();
                    for row in rows {
                        let (key, meta) = row?;
                        match meta.decode() {
                            Ok(meta) if !expiration.is_expired(meta.timestamp, now) => {}
                            Ok(_) => doomed.push(key),
                            Err(e) => {
                                tracing::debug!(namespace = %ns, error = %e, "purging undecodable record");
                                doomed.push(key);
                            }
                        }
                    }
                    doomed
                };

                let mut removed = 0u64;
                for key in doomed {
                    let sql = "DELETE FROM records WHERE namespace = ?1 AND key = ?2";
                    removed += tx.execute(sql, params![ns, key])? as u64;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(Error::from)?;

        tracing::info!(namespace = %namespace, removed, "purged expired records");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::record::Expiration;
    use std::time::Duration;

    fn ns() -> Namespace {
        Namespace::new("example.test").unwrap()
    }

    fn exchange() -> (Request, Response) {
        let request = Request::get("http://example.test/a").unwrap().with_header("Accept", "text/html");
        let headers: Headers = [("Content-Type", "text/html"), ("Set-Cookie", "a=1"), ("Set-Cookie", "b=2")]
            .into_iter()
            .collect();
        (request.clone(), Response::new(request.url, 200, headers, "<html>hi</html>"))
    }

    async fn tamper(storage: &SqliteStorage, sql: &'static str) {
        storage.conn.call(move |conn| conn.execute(sql, [])).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let storage = SqliteStorage::open_in_memory(StorageOptions::default()).await.unwrap();
        let (request, response) = exchange();

        storage.store(&ns(), &request, &response).await.unwrap();
        let cached = storage.retrieve(&ns(), &request).await.unwrap().unwrap();
        assert_eq!(cached.status, 200);
        assert_eq!(cached.headers, response.headers);
        assert_eq!(cached.body, response.body);
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row() {
        let storage = SqliteStorage::open_in_memory(StorageOptions::default()).await.unwrap();
        let (request, response) = exchange();
        storage.store(&ns(), &request, &response).await.unwrap();
        let updated = Response::new(response.url.clone(), 500, Headers::new(), "oops");
        storage.store(&ns(), &request, &updated).await.unwrap();

        assert_eq!(storage.count(&ns()).await.unwrap(), 1);
        let cached = storage.retrieve(&ns(), &request).await.unwrap().unwrap();
        assert_eq!(cached.status, 500);
    }

    #[tokio::test]
    async fn test_expired_and_purged() {
        let options = StorageOptions::default().with_expiration(Expiration::from_secs(0));
        let storage = SqliteStorage::open_in_memory(options).await.unwrap();
        let (request, response) = exchange();
        storage.store(&ns(), &request, &response).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(storage.retrieve(&ns(), &request).await.unwrap().is_none());
        assert_eq!(storage.count(&ns()).await.unwrap(), 1);
        assert_eq!(storage.purge_expired(&ns()).await.unwrap(), 1);
        assert_eq!(storage.count(&ns()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_miss() {
        let storage = SqliteStorage::open_in_memory(StorageOptions::default()).await.unwrap();
        let (request, response) = exchange();
        storage.store(&ns(), &request, &response).await.unwrap();
        tamper(&storage, "UPDATE records SET written_at = 'yesterday'").await;

        assert!(storage.retrieve(&ns(), &request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mistyped_columns_are_misses() {
        let (request, response) = exchange();
        for sql in [
            "UPDATE records SET status = 'abc'",
            "UPDATE records SET status = 70000",
            "UPDATE records SET written_at = 12345",
            "UPDATE records SET url = x'00ff'",
            "UPDATE records SET response_body = 3.5",
        ] {
            let storage = SqliteStorage::open_in_memory(StorageOptions::default()).await.unwrap();
            storage.store(&ns(), &request, &response).await.unwrap();
            tamper(&storage, sql).await;

            let result = storage.retrieve(&ns(), &request).await;
            assert!(matches!(result, Ok(None)), "{sql}: {result:?}");
        }
    }

    #[tokio::test]
    async fn test_purge_removes_undecodable_rows() {
        let options = StorageOptions::default().with_expiration(Expiration::from_secs(3600));
        let storage = SqliteStorage::open_in_memory(options).await.unwrap();
        let (request, response) = exchange();
        let other = Request::get("http://example.test/b").unwrap();
        storage.store(&ns(), &request, &response).await.unwrap();
        storage.store(&ns(), &other, &response).await.unwrap();
        tamper(&storage, "UPDATE records SET written_at = 'yesterday' WHERE url = 'http://example.test/a'").await;

        assert_eq!(storage.purge_expired(&ns()).await.unwrap(), 1);
        assert_eq!(storage.count(&ns()).await.unwrap(), 1);
        assert!(storage.retrieve(&ns(), &other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_without_expiration_only_removes_broken_rows() {
        let storage = SqliteStorage::open_in_memory(StorageOptions::default()).await.unwrap();
        let (request, response) = exchange();
        let other = Request::get("http://example.test/b").unwrap();
        storage.store(&ns(), &request, &response).await.unwrap();
        storage.store(&ns(), &other, &response).await.unwrap();
        assert_eq!(storage.purge_expired(&ns()).await.unwrap(), 0);

        tamper(&storage, "UPDATE records SET status = 'abc' WHERE url = 'http://example.test/a'").await;
        assert_eq!(storage.purge_expired(&ns()).await.unwrap(), 1);
        assert_eq!(storage.count(&ns()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_schema_version_and_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(DB_FILE_NAME);
        let (request, response) = exchange();
        {
            let storage = SqliteStorage::open(&path, StorageOptions::default()).await.unwrap();
            storage.store(&ns(), &request, &response).await.unwrap();
        }

        let storage = SqliteStorage::open(&path, StorageOptions::default()).await.unwrap();
        let version: i64 =
            storage.conn.call(|conn| conn.query_row("PRAGMA user_version", [], |row| row.get(0))).await.unwrap();
        assert_eq!(version, SCHEMA.len() as i64);
        assert!(storage.retrieve(&ns(), &request).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_from_config_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let config = CacheConfig::with_dir(&dir);
        let storage = SqliteStorage::from_config(&config).await.unwrap();
        storage.close_namespace(&ns()).await.unwrap();
        assert!(dir.join(DB_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_from_config_not_configured() {
        let result = SqliteStorage::from_config(&CacheConfig::default()).await;
        assert!(matches!(result, Err(Error::NotConfigured(_))));
    }

    #[test]
    fn test_timestamp_format_sorts() {
        let a = format_timestamp(DateTime::parse_from_rfc3339("2024-01-01T00:00:09Z").unwrap().with_timezone(&Utc));
        let b = format_timestamp(DateTime::parse_from_rfc3339("2024-01-01T00:00:10.5Z").unwrap().with_timezone(&Utc));
        assert!(a < b);
        assert_eq!(a, "2024-01-01T00:00:09.000000000Z");
    }
}
