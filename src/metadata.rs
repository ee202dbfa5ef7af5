// src/metadata.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Object headers derived from configuration and file name.

use std::collections::BTreeMap;
use std::fmt;

use crate::backend::ObjectHead;
use crate::compression::ContentEncoding;
use crate::config::{Encryption, StorageConfig};
use crate::constants::{DEFAULT_SSE_ALGORITHM, UNCOMPRESSED_SIZE_META_KEY};

/// Canned ACL applied on put and copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acl {
    Private,
    PublicRead,
}

impl Acl {
    pub fn as_str(self) -> &'static str {
        match self {
            Acl::Private => "private",
            Acl::PublicRead => "public-read",
        }
    }
}

impl fmt::Display for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Standard,
    ReducedRedundancy,
}

impl StorageClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageClass::Standard => "STANDARD",
            StorageClass::ReducedRedundancy => "REDUCED_REDUNDANCY",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything sent with a put or a metadata-replacing copy.
///
/// `metadata` carries [`UNCOMPRESSED_SIZE_META_KEY`] exactly when
/// `content_encoding` is gzip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSet {
    pub acl: Acl,
    pub cache_control: String,
    pub metadata: BTreeMap<String, String>,
    pub storage_class: StorageClass,
    pub content_disposition: Option<String>,
    pub content_language: Option<String>,
    pub server_side_encryption: Option<String>,
    pub sse_kms_key_id: Option<String>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
}

impl MetadataSet {
    /// Record what the write path decided about the body.
    pub fn set_payload(
        &mut self,
        content_type: &str,
        encoding: ContentEncoding,
        original_size: u64,
    ) {
        self.content_type = Some(content_type.to_string());
        self.content_encoding = encoding.header_value().map(str::to_string);
        match encoding {
            ContentEncoding::Gzip => {
                self.metadata
                    .insert(UNCOMPRESSED_SIZE_META_KEY.to_string(), original_size.to_string());
            }
            ContentEncoding::Identity => {
                self.metadata.remove(UNCOMPRESSED_SIZE_META_KEY);
            }
        }
    }
}

/// `"{private|public},max-age={seconds}"`. No space after the comma; some
/// backends percent-encode a literal space in this header.
pub fn cache_control(config: &StorageConfig) -> String {
    let privacy = if config.bucket_auth { "private" } else { "public" };
    format!("{privacy},max-age={}", config.max_age_seconds)
}

/// Policy-derived headers for a new upload of `name`. Content type and
/// encoding are left empty for the write path to fill in.
pub fn build_put_metadata(config: &StorageConfig, name: &str) -> MetadataSet {
    let metadata = config
        .metadata
        .iter()
        .map(|(key, value)| (key.clone(), value.evaluate(name)))
        .collect();

    let (server_side_encryption, sse_kms_key_id) = match &config.encryption {
        Encryption::Off => (None, None),
        Encryption::Aes256 => (Some(DEFAULT_SSE_ALGORITHM.to_string()), None),
        Encryption::Algorithm { algorithm, kms_key_id } => {
            (Some(algorithm.clone()), kms_key_id.clone())
        }
    };

    MetadataSet {
        acl: if config.bucket_auth { Acl::Private } else { Acl::PublicRead },
        cache_control: cache_control(config),
        metadata,
        storage_class: if config.reduced_redundancy {
            StorageClass::ReducedRedundancy
        } else {
            StorageClass::Standard
        },
        content_disposition: non_empty(config.content_disposition.evaluate(name)),
        content_language: non_empty(config.content_language.evaluate(name)),
        server_side_encryption,
        sse_kms_key_id,
        content_type: None,
        content_encoding: None,
    }
}

/// Headers for re-syncing an existing object in place.
///
/// Policy headers are recomputed; content type, content encoding and, for
/// gzip bodies (in any header case), the uncompressed size are carried over
/// from `existing` verbatim so the stored bytes keep their meaning.
pub fn build_sync_metadata(
    config: &StorageConfig,
    name: &str,
    existing: &ObjectHead,
) -> MetadataSet {
    let mut set = build_put_metadata(config, name);
    set.content_type = existing.content_type.clone();
    set.content_encoding = existing.content_encoding.clone();
    set.metadata.remove(UNCOMPRESSED_SIZE_META_KEY);
    if ContentEncoding::from_header(existing.content_encoding.as_deref()) == ContentEncoding::Gzip {
        if let Some(size) = existing.metadata.get(UNCOMPRESSED_SIZE_META_KEY) {
            set.metadata.insert(UNCOMPRESSED_SIZE_META_KEY.to_string(), size.clone());
        }
    }
    set
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
