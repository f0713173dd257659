use crate::models::DagBlock;
use crate::{DagError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Content-addressed backend holding chain blocks and payloads.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores `data` and returns its cid.
    async fn put(&self, data: Bytes, pin: bool) -> Result<String>;

    /// Reads a structured value. `Ok(None)` when the cid is unknown.
    async fn get(&self, cid: &str) -> Result<Option<serde_json::Value>>;

    /// Reads raw bytes. `Ok(None)` when the cid is unknown.
    async fn cat(&self, cid: &str) -> Result<Option<Bytes>>;
}

/// IPFS HTTP API client.
pub struct IpfsContentStore {
    client: reqwest::Client,
    base_url: String,
}

impl IpfsContentStore {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(DagError::Config("ipfs url cannot be empty".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v0/{}", self.base_url, path)
    }
}

#[async_trait]
impl ContentStore for IpfsContentStore {
    async fn put(&self, data: Bytes, pin: bool) -> Result<String> {
        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(data.to_vec()));

        let response = self
            .client
            .post(self.endpoint("dag/put"))
            .query(&[
                ("pin", if pin { "true" } else { "false" }),
                ("store-codec", "dag-json"),
                ("input-codec", "dag-json"),
            ])
            .multipart(form)
            .send()
            .await?
            .error_for_status()?;

        let body: serde_json::Value = response.json().await?;
        body.pointer("/Cid/~1")
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .ok_or_else(|| DagError::Internal(format!("dag put returned no cid: {}", body)))
    }

    async fn get(&self, cid: &str) -> Result<Option<serde_json::Value>> {
        let response = self
            .client
            .post(self.endpoint("dag/get"))
            .query(&[("arg", cid)])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!(
                "dag get returned non-success. cid={} status={}",
                cid,
                response.status()
            );
            return Ok(None);
        }

        Ok(Some(response.json().await?))
    }

    async fn cat(&self, cid: &str) -> Result<Option<Bytes>> {
        let response = self
            .client
            .post(self.endpoint("cat"))
            .query(&[("arg", cid)])
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::debug!(
                "cat returned non-success. cid={} status={}",
                cid,
                response.status()
            );
            return Ok(None);
        }

        Ok(Some(response.bytes().await?))
    }
}

/// Content store keeping everything in memory, addressed by SHA-256.
#[derive(Default)]
pub struct MemoryContentStore {
    objects: Mutex<HashMap<String, Bytes>>,
    pinned: Mutex<Vec<String>>,
    reject_writes: AtomicBool,
    read_delay: Mutex<Option<Duration>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail, as an unreachable backend would.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Delays every read, used to exercise read deadlines.
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *lock(&self.read_delay) = delay;
    }

    pub fn is_pinned(&self, cid: &str) -> bool {
        lock(&self.pinned).iter().any(|pinned| pinned == cid)
    }

    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn delay_read(&self) {
        let delay = *lock(&self.read_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Hex SHA-256 of `data`, the cid scheme of [`MemoryContentStore`].
pub fn compute_cid(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, data: Bytes, pin: bool) -> Result<String> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(DagError::Internal("content store rejected write".to_string()));
        }

        let cid = compute_cid(&data);
        lock(&self.objects).insert(cid.clone(), data);
        if pin {
            lock(&self.pinned).push(cid.clone());
        }
        Ok(cid)
    }

    async fn get(&self, cid: &str) -> Result<Option<serde_json::Value>> {
        self.delay_read().await;
        let data = lock(&self.objects).get(cid).cloned();
        match data {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn cat(&self, cid: &str) -> Result<Option<Bytes>> {
        self.delay_read().await;
        Ok(lock(&self.objects).get(cid).cloned())
    }
}

/// Deadline-enforcing front for a [`ContentStore`].
///
/// Reads that time out or fail come back as `None`; callers cannot tell a
/// timeout from a missing cid. Writes that fail or time out are
/// [`DagError::StorageWriteFailure`].
#[derive(Clone)]
pub struct ContentClient {
    store: Arc<dyn ContentStore>,
    timeout: Duration,
}

impl ContentClient {
    pub fn new(store: Arc<dyn ContentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn put_block(&self, block: &DagBlock) -> Result<String> {
        let bytes = Bytes::from(block.to_bytes()?);
        match tokio::time::timeout(self.timeout, self.store.put(bytes, true)).await {
            Ok(Ok(cid)) => Ok(cid),
            Ok(Err(error)) => Err(DagError::StorageWriteFailure(format!(
                "height={} error={}",
                block.height, error
            ))),
            Err(_) => Err(DagError::StorageWriteFailure(format!(
                "height={} error=put timed out after {:?}",
                block.height, self.timeout
            ))),
        }
    }

    pub async fn get(&self, cid: &str) -> Option<serde_json::Value> {
        match tokio::time::timeout(self.timeout, self.store.get(cid)).await {
            Ok(Ok(value)) => value,
            Ok(Err(error)) => {
                tracing::warn!("content get failed. cid={} error={}", cid, error);
                None
            }
            Err(_) => {
                tracing::warn!("content get timed out. cid={} timeout={:?}", cid, self.timeout);
                None
            }
        }
    }

    pub async fn get_block(&self, cid: &str) -> Option<DagBlock> {
        let value = self.get(cid).await?;
        match serde_json::from_value(value) {
            Ok(block) => Some(block),
            Err(error) => {
                tracing::error!("content at cid={} is not a chain block: {}", cid, error);
                None
            }
        }
    }

    pub async fn cat(&self, cid: &str) -> Option<Bytes> {
        match tokio::time::timeout(self.timeout, self.store.cat(cid)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(error)) => {
                tracing::warn!("content cat failed. cid={} error={}", cid, error);
                None
            }
            Err(_) => {
                tracing::warn!("content cat timed out. cid={} timeout={:?}", cid, self.timeout);
                None
            }
        }
    }
}
