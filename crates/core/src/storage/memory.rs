//! In-memory storage engine.
//!
//! Uses a HashMap behind a tokio RwLock. Records are lost when the process exits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{CacheStorage, StorageOptions};
use crate::Error;
use crate::key::{CacheKey, Namespace};
use crate::record::CacheRecord;
use crate::request::Request;
use crate::response::Response;

type RecordMap = HashMap<(Namespace, CacheKey), CacheRecord>;

/// Process-local engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<RecordMap>>,
    options: StorageOptions,
}

impl MemoryStorage {
    pub fn new(options: StorageOptions) -> Self {
        Self { records: Arc::new(RwLock::new(HashMap::new())), options }
    }

    /// Number of records across all namespaces, expired ones included.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn retrieve(&self, namespace: &Namespace, request: &Request) -> Result<Option<Response>, Error> {
        let key = self.options.key_for(request);
        let record = {
            let records = self.records.read().await;
            match records.get(&(namespace.clone(), key.clone())) {
                Some(record) => record.clone(),
                None => {
                    tracing::debug!(namespace = %namespace, key = %key, "cache miss");
                    return Ok(None);
                }
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
        self.records.write().await.insert((namespace.clone(), key), record);
        Ok(())
    }

    /// Records are held decoded, so only expiry can make one purgeable.
    async fn purge_expired(&self, namespace: &Namespace) -> Result<u64, Error> {
        if self.options.expiration.is_never() {
            return Ok(0);
        }
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(ns, _), record| ns != namespace || !self.options.expiration.is_expired(record.timestamp, now));
        Ok((before - records.len()) as u64)
    }
}
