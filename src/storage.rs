// src/storage.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Named-blob storage over an [`ObjectBackend`].
//!
//! [`S3Storage`] maps logical file names to object keys under the configured
//! prefix, transparently gzips compressible uploads, inflates them again on
//! read, and exposes the usual file-storage operations (`open`, `save`,
//! `delete`, `exists`, `listdir`, `size`, `url`, timestamps). Every query is a
//! live round trip; nothing about stored objects is cached locally.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use tempfile::SpooledTempFile;
use tracing::debug;
use url::Url;

use crate::backend::{ListRequest, ObjectBackend, ObjectHead, UrlParams};
use crate::compression::{self, CompressOutcome, ContentEncoding};
use crate::config::StorageConfig;
use crate::constants::{MAX_PRESIGN_EXPIRY, UNCOMPRESSED_SIZE_META_KEY};
use crate::content;
use crate::error::{Result, StorageError};
use crate::key_mapper;
use crate::metadata::{self, MetadataSet};
use crate::s3_backend::S3Backend;

const READ_ONLY_MODE: &str = "rb";

// -----------------------------------------------------------------------------
// Upload input
// -----------------------------------------------------------------------------

/// Anything readable and seekable that can cross a thread boundary.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Content handed to [`S3Storage::save`].
///
/// Text is stored as UTF-8. Streams are rewound to offset 0 before reading,
/// wherever the caller left them.
pub enum Content {
    Bytes(Bytes),
    Text(String),
    Stream(Box<dyn ReadSeek>),
}

impl Content {
    pub fn stream<R: ReadSeek + 'static>(reader: R) -> Self {
        Content::Stream(Box::new(reader))
    }

    /// Copy the whole content, from offset 0, into a scratch buffer.
    fn stage(self) -> io::Result<SpooledTempFile> {
        match self {
            Content::Bytes(bytes) => compression::stage(&bytes[..]),
            Content::Text(text) => compression::stage(text.as_bytes()),
            Content::Stream(mut reader) => {
                reader.rewind()?;
                compression::stage(reader)
            }
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Content::Bytes(b) => write!(f, "Content::Bytes({} bytes)", b.len()),
            Content::Text(t) => write!(f, "Content::Text({} chars)", t.chars().count()),
            Content::Stream(_) => write!(f, "Content::Stream(..)"),
        }
    }
}

impl From<Bytes> for Content {
    fn from(value: Bytes) -> Self {
        Content::Bytes(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(value: Vec<u8>) -> Self {
        Content::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Content {
    fn from(value: &[u8]) -> Self {
        Content::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<String> for Content {
    fn from(value: String) -> Self {
        Content::Text(value)
    }
}

impl From<&str> for Content {
    fn from(value: &str) -> Self {
        Content::Text(value.to_string())
    }
}

impl From<File> for Content {
    fn from(value: File) -> Self {
        Content::stream(value)
    }
}

/// What the write path decided for one upload.
#[derive(Debug)]
pub struct UploadPlan {
    pub content_type: String,
    pub content_encoding: ContentEncoding,
    /// The final upload body, held in memory: [`ObjectBackend::put_object`]
    /// takes `Bytes`.
    pub body: Bytes,
    pub headers: MetadataSet,
}

/// Classify, conditionally compress and build headers for `name`.
///
/// Staging and compression run through spooled scratch buffers; only the
/// body that is actually sent is read into memory, in one allocation.
pub fn prepare_upload(
    config: &StorageConfig,
    name: &str,
    content: Content,
) -> io::Result<UploadPlan> {
    let staged = content.stage()?;
    let content_type = content::content_type(name);

    let CompressOutcome { encoding, mut body, original_size } =
        if config.gzip && content::is_compressible(&content_type) {
            compression::compress(staged)?
        } else {
            compression::passthrough(staged)?
        };

    let mut headers = metadata::build_put_metadata(config, name);
    headers.set_payload(&content_type, encoding, original_size);

    let len = body.seek(SeekFrom::End(0))?;
    body.rewind()?;
    let mut buf = Vec::with_capacity(usize::try_from(len).map_err(io::Error::other)?);
    body.read_to_end(&mut buf)?;

    Ok(UploadPlan {
        content_type,
        content_encoding: encoding,
        body: Bytes::from(buf),
        headers,
    })
}

// -----------------------------------------------------------------------------
// Download output
// -----------------------------------------------------------------------------

/// A downloaded, fully materialized, read-only file.
#[derive(Debug)]
pub struct S3File {
    name: String,
    content: SpooledTempFile,
}

impl S3File {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rewind and read everything.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.content.rewind()?;
        let mut buf = Vec::new();
        self.content.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn into_inner(self) -> SpooledTempFile {
        self.content
    }
}

impl Read for S3File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.content.read(buf)
    }
}

impl Seek for S3File {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.content.seek(pos)
    }
}

// -----------------------------------------------------------------------------
// S3Storage
// -----------------------------------------------------------------------------

pub struct S3Storage {
    backend: Arc<dyn ObjectBackend>,
    config: RwLock<Arc<StorageConfig>>,
}

impl fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Storage")
            .field("bucket", &self.backend.bucket())
            .field("config", &self.config())
            .finish()
    }
}

fn blocking_failed(err: tokio::task::JoinError) -> StorageError {
    StorageError::Io(io::Error::other(err))
}

impl S3Storage {
    /// Validate `config` and bind it to `backend`.
    pub fn new(config: StorageConfig, backend: Arc<dyn ObjectBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config: RwLock::new(Arc::new(config)),
        })
    }

    /// Storage backed by S3 as described by `config`.
    pub async fn connect(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let backend = S3Backend::connect(&config).await?;
        Self::new(config, Arc::new(backend))
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<StorageConfig> {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Replace the whole configuration. Operations already running keep the
    /// snapshot they started with.
    ///
    /// The backend stays bound to the bucket, region, credentials, endpoint,
    /// addressing style and timeout it was connected with; a config changing
    /// any of them is a [`StorageError::ConfigurationConflict`]. Connect a new
    /// storage for that.
    pub fn reload_config(&self, config: StorageConfig) -> Result<()> {
        config.validate()?;
        if let Some(setting) = config.backend_change(&self.config()) {
            return Err(StorageError::ConfigurationConflict(format!(
                "{setting} cannot change on reload, the backend is already connected"
            )));
        }
        self.swap_config(Arc::new(config));
        Ok(())
    }

    pub(crate) fn swap_config(&self, config: Arc<StorageConfig>) -> Arc<StorageConfig> {
        let mut slot = self.config.write().unwrap_or_else(|p| p.into_inner());
        std::mem::replace(&mut *slot, config)
    }

    /// Install `config` only while `expected` is still the current one.
    pub(crate) fn replace_config_if(
        &self,
        expected: &Arc<StorageConfig>,
        config: Arc<StorageConfig>,
    ) -> bool {
        let mut slot = self.config.write().unwrap_or_else(|p| p.into_inner());
        if !Arc::ptr_eq(&slot, expected) {
            return false;
        }
        *slot = config;
        true
    }

    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    /// Object key for a logical name.
    pub fn key_for(&self, name: &str) -> String {
        key_mapper::resolve_key(&self.config().key_prefix, name)
    }

    // ---------------------
    // Read path
    // ---------------------

    pub async fn open(&self, name: &str) -> Result<S3File> {
        self.open_with_mode(name, READ_ONLY_MODE).await
    }

    /// Only `"rb"` is accepted; objects are not mutable random-access files.
    pub async fn open_with_mode(&self, name: &str, mode: &str) -> Result<S3File> {
        if mode != READ_ONLY_MODE {
            return Err(StorageError::InvalidOperation(
                "S3 files can only be opened in read-only mode".to_string(),
            ));
        }
        let key = self.key_for(name);
        let (body, head) = self
            .backend
            .get_object(&key)
            .await
            .map_err(|e| StorageError::from_backend(name, e))?;
        let encoding = ContentEncoding::from_header(head.content_encoding.as_deref());
        debug!(name = %name, key = %key, bytes = body.len(), ?encoding, "opened");

        let content = tokio::task::spawn_blocking(move || match encoding {
            ContentEncoding::Gzip => compression::decompress(&body[..]),
            ContentEncoding::Identity => compression::stage(&body[..]),
        })
        .await
        .map_err(blocking_failed)??;

        Ok(S3File { name: name.to_string(), content })
    }

    // ---------------------
    // Write path
    // ---------------------

    /// Save `content` under `name`, or under an available variant of it when
    /// file overwrite is off. Returns the name actually used.
    pub async fn save(&self, name: &str, content: impl Into<Content>) -> Result<String> {
        let name = self.get_available_name(name).await?;
        self.put(&name, content.into()).await?;
        Ok(name)
    }

    /// Store `content` under exactly `name`, replacing whatever is there.
    pub async fn put(&self, name: &str, content: Content) -> Result<()> {
        let config = self.config();
        let key = key_mapper::resolve_key(&config.key_prefix, name);

        let plan = {
            let config = Arc::clone(&config);
            let name = name.to_string();
            tokio::task::spawn_blocking(move || prepare_upload(&config, &name, content))
                .await
                .map_err(blocking_failed)??
        };
        debug!(
            name = %name,
            key = %key,
            content_type = %plan.content_type,
            encoding = ?plan.content_encoding,
            bytes = plan.body.len(),
            "saving"
        );

        self.backend
            .put_object(&key, plan.body, &plan.headers)
            .await
            .map_err(|e| StorageError::from_backend(name, e))
    }

    /// `name` itself when overwriting is allowed or nothing lives there yet,
    /// otherwise `root_XXXXXXX.ext` with a fresh random suffix.
    pub async fn get_available_name(&self, name: &str) -> Result<String> {
        if self.config().file_overwrite {
            return Ok(name.to_string());
        }
        let mut candidate = name.to_string();
        while self.exists(&candidate).await? {
            candidate = alternative_name(name);
        }
        Ok(candidate)
    }

    // ---------------------
    // Other operations
    // ---------------------

    pub async fn delete(&self, name: &str) -> Result<()> {
        let key = self.key_for(name);
        debug!(name = %name, key = %key, "deleting");
        self.backend
            .delete_object(&key)
            .await
            .map_err(|e| StorageError::from_backend(name, e))
    }

    /// True for an existing object, or for a "directory" that has at least one
    /// object beneath it.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let key = self.key_for(name);
        match self.backend.head_object(&key).await {
            Ok(_) => return Ok(true),
            Err(e) => {
                let err = StorageError::from_backend(name, e);
                if !err.is_not_found() {
                    return Err(err);
                }
            }
        }
        let dir_prefix = if key == "." { String::new() } else { format!("{key}/") };
        let page = self
            .backend
            .list_objects(ListRequest::new(dir_prefix).max_keys(1))
            .await
            .map_err(|e| StorageError::from_backend(name, e))?;
        Ok(!page.entries.is_empty() || !page.common_prefixes.is_empty())
    }

    /// Immediate sub-directories and files of `path`.
    pub async fn listdir(&self, path: &str) -> Result<(Vec<String>, Vec<String>)> {
        let prefix = key_mapper::list_prefix(&self.config().key_prefix, path);
        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut token = None;
        loop {
            let page = self
                .backend
                .list_objects(
                    ListRequest::new(prefix.clone()).delimiter("/").continuation(token),
                )
                .await
                .map_err(|e| StorageError::from_backend(path, e))?;
            files.extend(
                page.entries
                    .iter()
                    .map(|e| key_mapper::relative_name(&e.key, &prefix))
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
            );
            dirs.extend(
                page.common_prefixes
                    .iter()
                    .map(|p| key_mapper::relative_name(p, &prefix))
                    .filter(|n| !n.is_empty())
                    .map(str::to_string),
            );
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        Ok((dirs, files))
    }

    /// Live HEAD of the object behind `name`.
    pub async fn meta(&self, name: &str) -> Result<ObjectHead> {
        let key = self.key_for(name);
        self.backend
            .head_object(&key)
            .await
            .map_err(|e| StorageError::from_backend(name, e))
    }

    /// Size of the original content: the recorded uncompressed size for gzip
    /// objects, the stored length otherwise.
    pub async fn size(&self, name: &str) -> Result<u64> {
        let head = self.meta(name).await?;
        Ok(logical_size(&head))
    }

    pub async fn url(&self, name: &str) -> Result<String> {
        self.url_with_params(name, &UrlParams::default()).await
    }

    /// Public URL when one is configured; otherwise a presigned GET that
    /// expires with max-age. Without bucket auth the signature is stripped,
    /// leaving a bare, cacheable URL.
    pub async fn url_with_params(&self, name: &str, params: &UrlParams) -> Result<String> {
        let config = self.config();
        if let Some(public_url) = &config.public_url {
            return Ok(join_public_url(public_url, name));
        }
        let key = key_mapper::resolve_key(&config.key_prefix, name);
        let expires_in = Duration::from_secs(config.max_age_seconds.max(1)).min(MAX_PRESIGN_EXPIRY);
        let url = self
            .backend
            .presign_get(&key, expires_in, params)
            .await
            .map_err(|e| StorageError::from_backend(name, e))?;
        if config.bucket_auth {
            return Ok(url);
        }
        let mut parsed = Url::parse(&url).map_err(|e| StorageError::Backend {
            name: name.to_string(),
            message: format!("backend returned an unparseable URL: {e}"),
        })?;
        parsed.set_query(None);
        parsed.set_fragment(None);
        Ok(parsed.to_string())
    }

    pub async fn modified_time(&self, name: &str) -> Result<DateTime<Utc>> {
        self.meta(name).await?.last_modified.ok_or_else(|| StorageError::Backend {
            name: name.to_string(),
            message: "object has no LastModified".to_string(),
        })
    }

    /// S3 has no creation time; this is the modified time.
    pub async fn created_time(&self, name: &str) -> Result<DateTime<Utc>> {
        self.modified_time(name).await
    }

    /// S3 has no access time; this is the modified time.
    pub async fn accessed_time(&self, name: &str) -> Result<DateTime<Utc>> {
        self.modified_time(name).await
    }
}

/// Uncompressed size of a stored object, as far as its headers tell.
pub fn logical_size(head: &ObjectHead) -> u64 {
    if ContentEncoding::from_header(head.content_encoding.as_deref()) == ContentEncoding::Gzip {
        let recorded = head.metadata.get(UNCOMPRESSED_SIZE_META_KEY);
        if let Some(size) = recorded.and_then(|s| s.parse().ok()) {
            return size;
        }
    }
    head.content_length
}

/// `dir/root_XXXXXXX.ext` for `dir/root.ext`.
fn alternative_name(name: &str) -> String {
    let (dir, file) = match name.rfind('/') {
        Some(i) => name.split_at(i + 1),
        None => ("", name),
    };
    let (root, ext) = match file.rfind('.') {
        Some(i) if i > 0 => file.split_at(i),
        _ => (file, ""),
    };
    let suffix: String =
        rand::rng().sample_iter(&Alphanumeric).take(7).map(char::from).collect();
    format!("{dir}{root}_{suffix}{ext}")
}

/// `urljoin(base, quote(name))`.
fn join_public_url(base: &str, name: &str) -> String {
    let name = name.replace('\\', "/");
    let encoded = key_mapper::encode_path(name.trim_start_matches('/'));
    if let Ok(absolute) = Url::parse(base) {
        if let Ok(joined) = absolute.join(&encoded) {
            return joined.to_string();
        }
    }
    match base.rfind('/') {
        Some(i) => format!("{}{encoded}", &base[..=i]),
        None => encoded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SPOOL_MAX_MEMORY_SIZE;

    #[test]
    fn test_alternative_name_keeps_extension() {
        let alt = alternative_name("media/foo.txt");
        assert!(alt.starts_with("media/foo_"));
        assert!(alt.ends_with(".txt"));
        assert_eq!(alt.len(), "media/foo.txt".len() + 8);

        let dotfile = alternative_name(".env");
        assert!(dotfile.starts_with(".env_"));
    }

    #[test]
    fn test_join_public_url() {
        assert_eq!(join_public_url("/foo/", "bar.txt"), "/foo/bar.txt");
        assert_eq!(join_public_url("/foo/", "/a b.txt"), "/foo/a%20b.txt");
        assert_eq!(
            join_public_url("https://cdn.example.com/static/", "css/site.css"),
            "https://cdn.example.com/static/css/site.css"
        );
        assert_eq!(
            join_public_url("https://cdn.example.com/static", "x.js"),
            "https://cdn.example.com/x.js"
        );
    }

    #[test]
    fn test_logical_size() {
        let mut head = ObjectHead {
            content_encoding: Some("gzip".into()),
            content_length: 40,
            ..ObjectHead::default()
        };
        assert_eq!(logical_size(&head), 40);
        head.metadata.insert(UNCOMPRESSED_SIZE_META_KEY.into(), "3000".into());
        assert_eq!(logical_size(&head), 3000);
        head.content_encoding = None;
        assert_eq!(logical_size(&head), 40);
    }

    #[test]
    fn test_prepare_upload_text_is_utf8() {
        let plan =
            prepare_upload(&StorageConfig::default(), "foo.txt", Content::from("Fôö")).unwrap();
        assert_eq!(plan.body.as_ref(), "Fôö".as_bytes());
        assert_eq!(plan.content_type, "text/plain");
        assert_eq!(plan.content_encoding, ContentEncoding::Identity);
    }

    #[test]
    fn test_prepare_upload_respects_gzip_flag() {
        let config = StorageConfig { gzip: false, ..StorageConfig::default() };
        let plan = prepare_upload(&config, "foo.txt", Content::from(b"foo".repeat(1000))).unwrap();
        assert_eq!(plan.content_encoding, ContentEncoding::Identity);
        assert_eq!(plan.body.len(), 3000);
        assert!(!plan.headers.metadata.contains_key(UNCOMPRESSED_SIZE_META_KEY));
    }

    #[test]
    fn test_prepare_upload_skips_media() {
        let content = Content::from(vec![0u8; 4096]);
        let plan = prepare_upload(&StorageConfig::default(), "a.jpg", content).unwrap();
        assert_eq!(plan.content_encoding, ContentEncoding::Identity);
        assert_eq!(plan.headers.content_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_stream_is_rewound() {
        let mut cursor = io::Cursor::new(b"foo".repeat(1000));
        cursor.seek(SeekFrom::Start(1500)).unwrap();
        let content = Content::stream(cursor);
        let plan = prepare_upload(&StorageConfig::default(), "foo.txt", content).unwrap();
        assert_eq!(plan.content_encoding, ContentEncoding::Gzip);
        assert_eq!(plan.headers.metadata[UNCOMPRESSED_SIZE_META_KEY], "3000");
    }

    #[test]
    fn test_prepare_upload_of_spilled_body() {
        let len = SPOOL_MAX_MEMORY_SIZE + 4096;
        let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let plan = prepare_upload(&StorageConfig::default(), "big.bin", Content::from(body.clone()))
            .unwrap();
        assert_eq!(plan.content_encoding, ContentEncoding::Identity);
        assert_eq!(plan.body.len(), len);
        assert_eq!(plan.body.as_ref(), &body[..]);
    }
}
