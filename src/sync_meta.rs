// src/sync_meta.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Re-apply the current header policy to objects that are already stored.
//!
//! Each object is rewritten with a server-side copy onto itself that replaces
//! its headers. The body is never transferred, and content type, content
//! encoding and the recorded uncompressed size are carried over unchanged.

use std::pin::Pin;

use futures::Stream;
use tracing::{debug, info, warn};

use crate::backend::ListRequest;
use crate::error::{Result, StorageError};
use crate::key_mapper;
use crate::metadata;
use crate::storage::S3Storage;

/// Lazy sequence of synced names.
pub type SyncStream<'a> = Pin<Box<dyn Stream<Item = Result<String>> + Send + 'a>>;

impl S3Storage {
    /// Sync the headers of one object. An object that has disappeared is
    /// skipped with a warning.
    pub async fn sync_meta_one(&self, name: &str) -> Result<()> {
        self.sync_object(name).await.map(|_| ())
    }

    /// Sync every object under the key prefix, yielding each synced name.
    ///
    /// Pages are fetched on demand and objects are processed one at a time.
    /// The stream stops at the first error; re-running it from the start is
    /// safe.
    pub fn sync_meta_all(&self) -> SyncStream<'_> {
        Box::pin(async_stream::stream! {
            let key_prefix = self.config().key_prefix.clone();
            let list_prefix = key_mapper::list_prefix(&key_prefix, "");
            let mut token: Option<String> = None;
            let mut synced = 0usize;

            loop {
                let request = ListRequest::new(list_prefix.clone()).continuation(token.take());
                let page = match self.backend().list_objects(request).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(StorageError::from_backend(&list_prefix, e));
                        return;
                    }
                };

                for entry in page.entries {
                    let name = key_mapper::name_for_key(&key_prefix, &entry.key);
                    if name.is_empty() {
                        continue;
                    }
                    match self.sync_object(&name).await {
                        Ok(true) => {
                            synced += 1;
                            yield Ok(name);
                        }
                        Ok(false) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                token = page.next_token;
                if token.is_none() {
                    break;
                }
            }
            info!(synced, prefix = %list_prefix, "metadata sync finished");
        })
    }

    /// Returns false when the object vanished before it could be synced.
    async fn sync_object(&self, name: &str) -> Result<bool> {
        let config = self.config();
        let key = key_mapper::resolve_key(&config.key_prefix, name);

        let existing = match self.meta(name).await {
            Ok(head) => head,
            Err(e) if e.is_not_found() => {
                warn!(name = %name, key = %key, "object vanished before metadata sync, skipping");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let headers = metadata::build_sync_metadata(&config, name, &existing);
        match self.backend().copy_object(&key, &key, &headers).await {
            Ok(()) => {
                debug!(
                    name = %name,
                    key = %key,
                    cache_control = %headers.cache_control,
                    "synced metadata"
                );
                Ok(true)
            }
            Err(e) => {
                let err = StorageError::from_backend(name, e);
                if err.is_not_found() {
                    warn!(
                        name = %name,
                        key = %key,
                        "object vanished during metadata sync, skipping"
                    );
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }
}
