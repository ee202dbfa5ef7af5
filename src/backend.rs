// src/backend.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! The object-store capability the storage layer is written against.
//!
//! A backend is bound to one bucket and speaks in raw object keys; mapping
//! logical names to keys is the caller's job. Implementations:
//! [`crate::s3_backend::S3Backend`] (aws-sdk-s3) and
//! [`crate::memory_backend::MemoryBackend`] (in-process).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::StorageError;
use crate::metadata::MetadataSet;

/// Failures reported by a backend.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no such key: {key}")]
    NoSuchKey { key: String },

    #[error("{message}")]
    Service { message: String },

    #[error("presign failed: {message}")]
    Presign { message: String },
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Headers of a stored object as returned by HEAD / GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    /// Stored (possibly compressed) body length.
    pub content_length: u64,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_language: Option<String>,
    pub metadata: BTreeMap<String, String>,
    /// Absent for STANDARD, as S3 reports it.
    pub storage_class: Option<String>,
    pub server_side_encryption: Option<String>,
    pub sse_kms_key_id: Option<String>,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a `list_objects_v2` style listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Populated only for delimited listings; each ends with the delimiter.
    pub common_prefixes: Vec<String>,
    pub entries: Vec<ListEntry>,
    /// Pass back to fetch the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Listing parameters.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub prefix: String,
    pub delimiter: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: Option<i32>,
}

impl ListRequest {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), ..Self::default() }
    }

    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    pub fn max_keys(mut self, max_keys: i32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    pub fn continuation(mut self, token: Option<String>) -> Self {
        self.continuation_token = token;
        self
    }
}

/// Response-header overrides embedded in a presigned GET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlParams {
    pub response_content_disposition: Option<String>,
    pub response_content_type: Option<String>,
    pub response_content_language: Option<String>,
    pub response_content_encoding: Option<String>,
    pub response_cache_control: Option<String>,
}

impl UrlParams {
    /// Build from S3 parameter names (`ResponseContentDisposition`, ...).
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, StorageError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (name, value) in pairs {
            let slot = match name.as_ref() {
                "ResponseContentDisposition" => &mut params.response_content_disposition,
                "ResponseContentType" => &mut params.response_content_type,
                "ResponseContentLanguage" => &mut params.response_content_language,
                "ResponseContentEncoding" => &mut params.response_content_encoding,
                "ResponseCacheControl" => &mut params.response_cache_control,
                other => {
                    return Err(StorageError::InvalidOperation(format!(
                        "unsupported URL parameter {other}"
                    )));
                }
            };
            *slot = Some(value.into());
        }
        Ok(params)
    }
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Bucket this backend is bound to.
    fn bucket(&self) -> &str;

    /// Store `body` under `key` with the given headers, replacing any object there.
    async fn put_object(&self, key: &str, body: Bytes, headers: &MetadataSet) -> BackendResult<()>;

    /// Fetch the full body and its headers.
    async fn get_object(&self, key: &str) -> BackendResult<(Bytes, ObjectHead)>;

    /// Headers only. Missing keys fail with [`BackendError::NoSuchKey`].
    async fn head_object(&self, key: &str) -> BackendResult<ObjectHead>;

    async fn delete_object(&self, key: &str) -> BackendResult<()>;

    /// Server-side copy that replaces all headers with `headers`.
    /// `source_key == dest_key` rewrites headers in place.
    async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        headers: &MetadataSet,
    ) -> BackendResult<()>;

    async fn list_objects(&self, request: ListRequest) -> BackendResult<ListPage>;

    /// Presigned GET URL valid for `expires_in`.
    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        params: &UrlParams,
    ) -> BackendResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_params_from_pairs() {
        let params = UrlParams::from_pairs([("ResponseContentDisposition", "attachment")]).unwrap();
        assert_eq!(params.response_content_disposition.as_deref(), Some("attachment"));
        assert!(UrlParams::from_pairs([("Bogus", "x")]).is_err());
    }

    #[test]
    fn test_list_request_builder() {
        let req = ListRequest::new("a/").delimiter("/").max_keys(1).continuation(Some("t".into()));
        assert_eq!(req.prefix, "a/");
        assert_eq!(req.delimiter.as_deref(), Some("/"));
        assert_eq!(req.max_keys, Some(1));
        assert_eq!(req.continuation_token.as_deref(), Some("t"));
    }
}
