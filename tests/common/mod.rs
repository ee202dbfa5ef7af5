// tests/common/mod.rs
//
// Common test utilities: in-memory storages and a backend wrapper that can
// make objects disappear between listing and HEAD.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use s3storage::backend::{BackendError, BackendResult, ListPage, ListRequest};
use s3storage::metadata::MetadataSet;
use s3storage::{MemoryBackend, ObjectBackend, ObjectHead, S3Storage, StorageConfig, UrlParams};

pub const BUCKET: &str = "test-bucket";

/// A storage over a fresh in-memory bucket, plus a handle on that bucket.
pub fn memory_storage(config: StorageConfig) -> (Arc<MemoryBackend>, S3Storage) {
    let backend = Arc::new(MemoryBackend::new(BUCKET));
    let storage = S3Storage::new(config, backend.clone()).expect("valid config");
    (backend, storage)
}

/// Default config with overwrite on, so saves land exactly where asked.
pub fn overwrite_config() -> StorageConfig {
    StorageConfig { file_overwrite: true, ..StorageConfig::default() }
}

/// Delegates to a [`MemoryBackend`], but HEAD and copy report `NoSuchKey`
/// for keys marked as vanished. Listing still returns them.
pub struct VanishingBackend {
    pub inner: Arc<MemoryBackend>,
    vanished: Mutex<HashSet<String>>,
}

impl VanishingBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self { inner, vanished: Mutex::new(HashSet::new()) }
    }

    pub fn vanish(&self, key: &str) {
        self.vanished.lock().unwrap().insert(key.to_string());
    }

    fn check(&self, key: &str) -> BackendResult<()> {
        if self.vanished.lock().unwrap().contains(key) {
            Err(BackendError::NoSuchKey { key: key.to_string() })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectBackend for VanishingBackend {
    fn bucket(&self) -> &str {
        self.inner.bucket()
    }

    async fn put_object(&self, key: &str, body: Bytes, headers: &MetadataSet) -> BackendResult<()> {
        self.inner.put_object(key, body, headers).await
    }

    async fn get_object(&self, key: &str) -> BackendResult<(Bytes, ObjectHead)> {
        self.check(key)?;
        self.inner.get_object(key).await
    }

    async fn head_object(&self, key: &str) -> BackendResult<ObjectHead> {
        self.check(key)?;
        self.inner.head_object(key).await
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        self.inner.delete_object(key).await
    }

    async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        headers: &MetadataSet,
    ) -> BackendResult<()> {
        self.check(source_key)?;
        self.inner.copy_object(source_key, dest_key, headers).await
    }

    async fn list_objects(&self, request: ListRequest) -> BackendResult<ListPage> {
        self.inner.list_objects(request).await
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        params: &UrlParams,
    ) -> BackendResult<String> {
        self.inner.presign_get(key, expires_in, params).await
    }
}
