// src/memory_backend.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! In-process [`ObjectBackend`] with S3 listing and copy semantics.
//!
//! Useful for tests and local development. URLs it hands out use the
//! `memory://` scheme and are not fetchable.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use crate::backend::{
    BackendError, BackendResult, ListEntry, ListPage, ListRequest, ObjectBackend, ObjectHead,
    UrlParams,
};
use crate::constants::LIST_PAGE_SIZE;
use crate::metadata::{MetadataSet, StorageClass};

/// An object as held by the memory backend.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub headers: MetadataSet,
    pub e_tag: String,
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn head(&self) -> ObjectHead {
        let h = &self.headers;
        ObjectHead {
            content_type: h.content_type.clone(),
            content_encoding: h.content_encoding.clone(),
            content_length: self.body.len() as u64,
            cache_control: Some(h.cache_control.clone()),
            content_disposition: h.content_disposition.clone(),
            content_language: h.content_language.clone(),
            metadata: h.metadata.clone(),
            storage_class: match h.storage_class {
                StorageClass::Standard => None,
                other => Some(other.as_str().to_string()),
            },
            server_side_encryption: h.server_side_encryption.clone(),
            sse_kms_key_id: h.sse_kms_key_id.clone(),
            e_tag: Some(self.e_tag.clone()),
            last_modified: Some(self.last_modified),
        }
    }
}

pub struct MemoryBackend {
    bucket: String,
    page_size: usize,
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

enum Listed {
    Entry(ListEntry),
    Prefix(String),
}

impl Listed {
    fn marker(&self) -> &str {
        match self {
            Listed::Entry(e) => &e.key,
            Listed::Prefix(p) => p,
        }
    }
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_size: LIST_PAGE_SIZE as usize,
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    /// Cap listing pages at `page_size` entries to exercise pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Snapshot of a stored object, including headers HEAD does not return (ACL).
    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn missing(key: &str) -> BackendError {
        BackendError::NoSuchKey { key: key.to_string() }
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(&self, key: &str, body: Bytes, headers: &MetadataSet) -> BackendResult<()> {
        debug!(key = %key, bytes = body.len(), "memory put");
        let stored = StoredObject {
            e_tag: format!("\"{:x}\"", md5::compute(&body)),
            body,
            headers: headers.clone(),
            last_modified: Utc::now(),
        };
        self.lock().insert(key.to_string(), stored);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> BackendResult<(Bytes, ObjectHead)> {
        let objects = self.lock();
        let stored = objects.get(key).ok_or_else(|| Self::missing(key))?;
        Ok((stored.body.clone(), stored.head()))
    }

    async fn head_object(&self, key: &str) -> BackendResult<ObjectHead> {
        self.lock().get(key).map(StoredObject::head).ok_or_else(|| Self::missing(key))
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        // S3 reports success for absent keys.
        self.lock().remove(key);
        Ok(())
    }

    async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        headers: &MetadataSet,
    ) -> BackendResult<()> {
        let mut objects = self.lock();
        let source = objects.get(source_key).ok_or_else(|| Self::missing(source_key))?;
        let copied = StoredObject {
            body: source.body.clone(),
            e_tag: source.e_tag.clone(),
            headers: headers.clone(),
            last_modified: Utc::now(),
        };
        objects.insert(dest_key.to_string(), copied);
        Ok(())
    }

    async fn list_objects(&self, request: ListRequest) -> BackendResult<ListPage> {
        let objects = self.lock();
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());

        let mut listed: Vec<Listed> = Vec::new();
        for (key, stored) in objects.range(request.prefix.clone()..) {
            let Some(rest) = key.strip_prefix(request.prefix.as_str()) else {
                break;
            };
            let collapsed = delimiter.and_then(|d| {
                rest.find(d).map(|i| format!("{}{}", request.prefix, &rest[..i + d.len()]))
            });
            match collapsed {
                Some(prefix) => {
                    if !matches!(listed.last(), Some(Listed::Prefix(p)) if *p == prefix) {
                        listed.push(Listed::Prefix(prefix));
                    }
                }
                None => listed.push(Listed::Entry(ListEntry {
                    key: key.clone(),
                    size: stored.body.len() as u64,
                    last_modified: Some(stored.last_modified),
                })),
            }
        }

        let limit = request
            .max_keys
            .map(|m| (m.max(1) as usize).min(self.page_size))
            .unwrap_or(self.page_size);
        let mut remaining = listed
            .into_iter()
            .filter(|item| match &request.continuation_token {
                Some(token) => item.marker() > token.as_str(),
                None => true,
            })
            .peekable();

        let mut page = ListPage::default();
        let mut last_marker = None;
        for item in remaining.by_ref().take(limit) {
            last_marker = Some(item.marker().to_string());
            match item {
                Listed::Entry(entry) => page.entries.push(entry),
                Listed::Prefix(prefix) => page.common_prefixes.push(prefix),
            }
        }
        if remaining.peek().is_some() {
            page.next_token = last_marker;
        }
        Ok(page)
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        params: &UrlParams,
    ) -> BackendResult<String> {
        let mut url = Url::parse(&format!("memory://{}/", self.bucket))
            .map_err(|e| BackendError::Presign { message: e.to_string() })?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Presign { message: "memory URL cannot be a base".into() })?
            .pop_if_empty()
            .extend(key.split('/'));
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("X-Amz-Expires", &expires_in.as_secs().to_string());
            let overrides = [
                ("response-content-disposition", &params.response_content_disposition),
                ("response-content-type", &params.response_content_type),
                ("response-content-language", &params.response_content_language),
                ("response-content-encoding", &params.response_content_encoding),
                ("response-cache-control", &params.response_cache_control),
            ];
            for (name, value) in overrides {
                if let Some(value) = value {
                    query.append_pair(name, value);
                }
            }
        }
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::metadata::build_put_metadata;

    fn headers() -> MetadataSet {
        build_put_metadata(&StorageConfig::default(), "x")
    }

    async fn put(backend: &MemoryBackend, key: &str) {
        backend.put_object(key, Bytes::from_static(b"x"), &headers()).await.unwrap();
    }

    #[tokio::test]
    async fn test_delimited_listing() {
        let backend = MemoryBackend::new("b");
        for key in ["a.txt", "a/b.txt", "a/c/d.txt", "a0", "z/y.txt"] {
            put(&backend, key).await;
        }
        let page = backend.list_objects(ListRequest::new("").delimiter("/")).await.unwrap();
        let keys: Vec<_> = page.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["a.txt", "a0"]);
        assert_eq!(page.common_prefixes, ["a/", "z/"]);
        assert!(page.next_token.is_none());

        let page = backend.list_objects(ListRequest::new("a/").delimiter("/")).await.unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.common_prefixes, ["a/c/"]);
    }

    #[tokio::test]
    async fn test_pagination_visits_everything_once() {
        let backend = MemoryBackend::new("b").with_page_size(2);
        for key in ["a", "b/1", "b/2", "c", "d", "e"] {
            put(&backend, key).await;
        }
        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = backend
                .list_objects(ListRequest::new("").delimiter("/").continuation(token))
                .await
                .unwrap();
            seen.extend(page.entries.into_iter().map(|e| e.key));
            seen.extend(page.common_prefixes);
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        seen.sort();
        assert_eq!(seen, ["a", "b/", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_copy_in_place_replaces_headers_only() {
        let backend = MemoryBackend::new("b");
        backend.put_object("k", Bytes::from_static(b"body"), &headers()).await.unwrap();
        let mut replaced = headers();
        replaced.cache_control = "public,max-age=1".into();
        backend.copy_object("k", "k", &replaced).await.unwrap();

        let stored = backend.object("k").unwrap();
        assert_eq!(stored.body, Bytes::from_static(b"body"));
        assert_eq!(stored.headers.cache_control, "public,max-age=1");
        assert!(matches!(
            backend.copy_object("missing", "missing", &replaced).await,
            Err(BackendError::NoSuchKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_presign_encodes_key() {
        let backend = MemoryBackend::new("bucket");
        let url = backend
            .presign_get("dir/a b.txt", Duration::from_secs(60), &UrlParams::default())
            .await
            .unwrap();
        assert_eq!(url, "memory://bucket/dir/a%20b.txt?X-Amz-Expires=60");
    }

    #[tokio::test]
    async fn test_head_missing() {
        let backend = MemoryBackend::new("b");
        assert!(matches!(backend.head_object("nope").await, Err(BackendError::NoSuchKey { .. })));
        assert!(backend.delete_object("nope").await.is_ok());
    }
}
