// src/s3_backend.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! [`ObjectBackend`] over the async AWS Rust SDK.
//!
//! The SDK config is resolved once per backend; the `Client` itself is built
//! lazily, once per OS thread, so concurrent callers never share a client
//! object. The clients live in the backend and are dropped with it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, DateTime as SmithyDateTime};
use aws_sdk_s3::types::{
    MetadataDirective, ObjectCannedAcl, ServerSideEncryption, StorageClass as S3StorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::backend::{
    BackendError, BackendResult, ListEntry, ListPage, ListRequest, ObjectBackend, ObjectHead,
    UrlParams,
};
use crate::config::{AddressingStyle, StorageConfig};
use crate::constants::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_REGION, DEFAULT_SIGNATURE_VERSION};
use crate::error::{Result, StorageError};
use crate::key_mapper::encode_path;
use crate::metadata::MetadataSet;

// -----------------------------------------------------------------------------
// Per-thread clients
// -----------------------------------------------------------------------------

type ClientCache = Arc<Mutex<HashMap<ThreadId, Client>>>;

pub struct S3Backend {
    bucket: String,
    s3_config: aws_sdk_s3::Config,
    clients: ClientCache,
}

impl fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("clients", &self.cached_clients())
            .finish()
    }
}

impl S3Backend {
    /// Resolve region, credentials, endpoint and addressing style from `config`.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        if config.bucket_name.is_empty() {
            return Err(StorageError::InvalidOperation(
                "AWS_S3_BUCKET_NAME is not set".to_string(),
            ));
        }
        if !config.signature_version.eq_ignore_ascii_case(DEFAULT_SIGNATURE_VERSION) {
            warn!(
                signature_version = %config.signature_version,
                "only SigV4 signing is supported, ignoring configured signature version"
            );
        }

        let region = RegionProviderChain::first_try(Some(Region::new(config.region.clone())))
            .or_default_provider()
            .or_else(Region::new(DEFAULT_REGION));

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .operation_timeout(Duration::from_secs(config.operation_timeout_secs))
            .build();

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .timeout_config(timeout_config);
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if config.credentials.is_explicit() {
            let creds = &config.credentials;
            let session_token = Some(creds.session_token.clone()).filter(|t| !t.is_empty());
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                session_token,
                None,
                "s3storage",
            ));
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.addressing_style == AddressingStyle::Path)
            .build();

        let backend = Self {
            bucket: config.bucket_name.clone(),
            s3_config,
            clients: ClientCache::default(),
        };
        debug!(bucket = %backend.bucket, "S3 backend configured");
        Ok(backend)
    }

    /// This thread's client for this backend, created on first use.
    fn client(&self) -> Client {
        let thread = std::thread::current().id();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        clients
            .entry(thread)
            .or_insert_with(|| {
                debug!(bucket = %self.bucket, "creating S3 client for thread {thread:?}");
                Client::from_conf(self.s3_config.clone())
            })
            .clone()
    }

    /// Number of threads holding a client for this backend.
    pub fn cached_clients(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// -----------------------------------------------------------------------------
// Conversions
// -----------------------------------------------------------------------------

fn map_sdk_error<E, R>(key: &str, err: SdkError<E, R>) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: fmt::Debug,
{
    let missing = matches!(&err, SdkError::ServiceError(_))
        && matches!(err.code(), Some("NoSuchKey" | "NotFound" | "404"));
    if missing {
        BackendError::NoSuchKey { key: key.to_string() }
    } else {
        BackendError::Service { message: DisplayErrorContext(err).to_string() }
    }
}

fn to_chrono(dt: &SmithyDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

fn non_negative(len: Option<i64>) -> u64 {
    len.unwrap_or(0).max(0) as u64
}

macro_rules! object_head {
    ($out:expr) => {{
        let out = $out;
        ObjectHead {
            content_type: out.content_type().map(str::to_string),
            content_encoding: out.content_encoding().map(str::to_string),
            content_length: non_negative(out.content_length()),
            cache_control: out.cache_control().map(str::to_string),
            content_disposition: out.content_disposition().map(str::to_string),
            content_language: out.content_language().map(str::to_string),
            metadata: out
                .metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            storage_class: out.storage_class().map(|c| c.as_str().to_string()),
            server_side_encryption: out.server_side_encryption().map(|s| s.as_str().to_string()),
            sse_kms_key_id: out.ssekms_key_id().map(str::to_string),
            e_tag: out.e_tag().map(str::to_string),
            last_modified: out.last_modified().and_then(to_chrono),
        }
    }};
}

/// Apply a [`MetadataSet`] to a put or copy request builder; both expose the
/// same setter names.
macro_rules! with_headers {
    ($req:expr, $headers:expr) => {{
        let h: &MetadataSet = $headers;
        $req.acl(ObjectCannedAcl::from(h.acl.as_str()))
            .cache_control(&h.cache_control)
            .set_metadata(Some(h.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
            .storage_class(S3StorageClass::from(h.storage_class.as_str()))
            .set_content_disposition(h.content_disposition.clone())
            .set_content_language(h.content_language.clone())
            .set_content_type(h.content_type.clone())
            .set_content_encoding(h.content_encoding.clone())
            .set_server_side_encryption(
                h.server_side_encryption.as_deref().map(ServerSideEncryption::from),
            )
            .set_ssekms_key_id(h.sse_kms_key_id.clone())
    }};
}

// -----------------------------------------------------------------------------
// ObjectBackend
// -----------------------------------------------------------------------------

#[async_trait]
impl ObjectBackend for S3Backend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        headers: &MetadataSet,
    ) -> BackendResult<()> {
        debug!(bucket = %self.bucket, key = %key, bytes = body.len(), "PUT");
        let req = self
            .client()
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body));
        with_headers!(req, headers)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> BackendResult<(Bytes, ObjectHead)> {
        debug!(bucket = %self.bucket, key = %key, "GET");
        let out = self
            .client()
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;
        let head = object_head!(&out);
        let body = out
            .body
            .collect()
            .await
            .map_err(|e| BackendError::Service {
                message: format!("reading body of {key}: {e}"),
            })?
            .into_bytes();
        Ok((body, head))
    }

    async fn head_object(&self, key: &str) -> BackendResult<ObjectHead> {
        debug!(bucket = %self.bucket, key = %key, "HEAD");
        let out = self
            .client()
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;
        Ok(object_head!(&out))
    }

    async fn delete_object(&self, key: &str) -> BackendResult<()> {
        debug!(bucket = %self.bucket, key = %key, "DELETE");
        self.client()
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(key, e))?;
        Ok(())
    }

    async fn copy_object(
        &self,
        source_key: &str,
        dest_key: &str,
        headers: &MetadataSet,
    ) -> BackendResult<()> {
        debug!(bucket = %self.bucket, src = %source_key, dst = %dest_key, "COPY");
        let req = self
            .client()
            .copy_object()
            .bucket(&self.bucket)
            .key(dest_key)
            .copy_source(format!("{}/{}", self.bucket, encode_path(source_key)))
            .metadata_directive(MetadataDirective::Replace);
        with_headers!(req, headers)
            .send()
            .await
            .map_err(|e| map_sdk_error(source_key, e))?;
        Ok(())
    }

    async fn list_objects(&self, request: ListRequest) -> BackendResult<ListPage> {
        debug!(bucket = %self.bucket, prefix = %request.prefix, "LIST");
        let out = self
            .client()
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .set_delimiter(request.delimiter.clone())
            .set_continuation_token(request.continuation_token.clone())
            .set_max_keys(request.max_keys)
            .send()
            .await
            .map_err(|e| map_sdk_error(&request.prefix, e))?;

        Ok(ListPage {
            common_prefixes: out
                .common_prefixes()
                .iter()
                .filter_map(|p| p.prefix().map(str::to_string))
                .collect(),
            entries: out
                .contents()
                .iter()
                .filter_map(|obj| {
                    obj.key().map(|key| ListEntry {
                        key: key.to_string(),
                        size: non_negative(obj.size()),
                        last_modified: obj.last_modified().and_then(to_chrono),
                    })
                })
                .collect(),
            next_token: out.next_continuation_token().map(str::to_string),
        })
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
        params: &UrlParams,
    ) -> BackendResult<String> {
        let presigning = PresigningConfig::expires_in(expires_in).map_err(|e| {
            BackendError::Presign { message: format!("invalid expiry {expires_in:?}: {e}") }
        })?;
        let presigned = self
            .client()
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_response_content_disposition(params.response_content_disposition.clone())
            .set_response_content_type(params.response_content_type.clone())
            .set_response_content_language(params.response_content_language.clone())
            .set_response_content_encoding(params.response_content_encoding.clone())
            .set_response_cache_control(params.response_cache_control.clone())
            .presigned(presigning)
            .await
            .map_err(|e| BackendError::Presign {
                message: DisplayErrorContext(e).to_string(),
            })?;
        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_chrono() {
        let dt = SmithyDateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&dt).map(|d| d.timestamp()), Some(1_700_000_000));
    }

    #[tokio::test]
    async fn test_connect_requires_bucket() {
        let err = S3Backend::connect(&StorageConfig::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_presign_is_offline() -> anyhow::Result<()> {
        let config = StorageConfig {
            bucket_name: "example-bucket".into(),
            region: "us-east-1".into(),
            credentials: crate::config::Credentials {
                access_key_id: "AKIDEXAMPLE".into(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
                session_token: String::new(),
            },
            ..StorageConfig::default()
        };
        let backend = S3Backend::connect(&config).await?;
        let url = backend
            .presign_get("dir/foo.txt", Duration::from_secs(3600), &UrlParams::default())
            .await?;
        assert!(url.contains("example-bucket"));
        assert!(url.contains("foo.txt"));
        assert!(url.contains("X-Amz-Signature="));
        Ok(())
    }

    fn offline_config() -> StorageConfig {
        StorageConfig { bucket_name: "b".into(), ..StorageConfig::default() }
    }

    #[test]
    fn test_each_thread_gets_its_own_client() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let backend = Arc::new(rt.block_on(S3Backend::connect(&offline_config())).unwrap());
        assert_eq!(backend.cached_clients(), 0);

        let _ = backend.client();
        let _ = backend.client();
        assert_eq!(backend.cached_clients(), 1);

        let other = Arc::clone(&backend);
        std::thread::spawn(move || {
            let _ = other.client();
        })
        .join()
        .unwrap();
        assert_eq!(backend.cached_clients(), 2);
    }

    #[test]
    fn test_clients_are_released_with_the_backend() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let mut caches = Vec::new();
        for _ in 0..50 {
            let backend = rt.block_on(S3Backend::connect(&offline_config())).unwrap();
            let _ = backend.client();
            assert_eq!(backend.cached_clients(), 1);
            caches.push(Arc::downgrade(&backend.clients));
        }
        assert!(caches.iter().all(|cache| cache.upgrade().is_none()));
    }
}
