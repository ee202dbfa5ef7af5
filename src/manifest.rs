// src/manifest.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Content-hashed copies of static files plus a `staticfiles.json` manifest.
//!
//! A post-process pass runs with the long "cached" max-age in effect, since
//! hashed names never change content.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::constants::{MANIFEST_HASH_LEN, MANIFEST_NAME, MANIFEST_VERSION};
use crate::error::{Result, StorageError};
use crate::storage::{Content, S3Storage};

/// Mapping from original names to their hashed copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub paths: BTreeMap<String, String>,
    pub version: String,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            paths: BTreeMap::new(),
            version: MANIFEST_VERSION.to_string(),
        }
    }
}

impl Manifest {
    pub fn stored_name(&self, name: &str) -> Option<&str> {
        self.paths.get(name.trim_start_matches('/')).map(String::as_str)
    }
}

/// Swaps in a config with the cached max-age and puts the previous config
/// back when dropped, unless the config was reloaded in the meantime.
struct MaxAgeOverride<'a> {
    storage: &'a S3Storage,
    installed: Arc<StorageConfig>,
    previous: Option<Arc<StorageConfig>>,
}

impl<'a> MaxAgeOverride<'a> {
    fn install(storage: &'a S3Storage) -> Self {
        let current = storage.config();
        let installed = Arc::new(current.with_max_age(current.max_age_seconds_cached));
        let previous = storage.swap_config(Arc::clone(&installed));
        Self { storage, installed, previous: Some(previous) }
    }
}

impl Drop for MaxAgeOverride<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            if !self.storage.replace_config_if(&self.installed, previous) {
                debug!("config reloaded during post-processing, keeping the reloaded one");
            }
        }
    }
}

pub struct ManifestPostProcessor<'a> {
    storage: &'a S3Storage,
}

impl<'a> ManifestPostProcessor<'a> {
    pub fn new(storage: &'a S3Storage) -> Self {
        Self { storage }
    }

    /// Store a hashed copy of every name and write the manifest.
    pub async fn post_process<I, S>(&self, names: I) -> Result<Manifest>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let _max_age = MaxAgeOverride::install(self.storage);
        let mut manifest = Manifest::default();

        for name in names {
            let name = name.as_ref().trim_start_matches('/');
            let body = self.storage.open(name).await?.read_all()?;
            let hashed = hashed_name(name, &body);
            debug!(name = %name, hashed = %hashed, "storing hashed copy");
            self.storage.put(&hashed, Content::from(body)).await?;
            manifest.paths.insert(name.to_string(), hashed);
        }

        let json = serde_json::to_vec(&manifest).map_err(|e| {
            StorageError::InvalidOperation(format!("cannot encode {MANIFEST_NAME}: {e}"))
        })?;
        self.storage.put(MANIFEST_NAME, Content::from(json)).await?;
        info!(files = manifest.paths.len(), "wrote {MANIFEST_NAME}");
        Ok(manifest)
    }

    /// The stored manifest, or an empty one when none has been written yet.
    pub async fn load_manifest(&self) -> Result<Manifest> {
        let body = match self.storage.open(MANIFEST_NAME).await {
            Ok(mut file) => file.read_all()?,
            Err(e) if e.is_not_found() => return Ok(Manifest::default()),
            Err(e) => return Err(e),
        };
        let manifest: Manifest = serde_json::from_slice(&body).map_err(|e| {
            StorageError::InvalidOperation(format!(
                "Couldn't load manifest '{MANIFEST_NAME}': {e}"
            ))
        })?;
        if manifest.version != MANIFEST_VERSION {
            return Err(StorageError::InvalidOperation(format!(
                "Couldn't load manifest '{MANIFEST_NAME}' (version {})",
                manifest.version
            )));
        }
        Ok(manifest)
    }

    /// Hashed name recorded for `name`.
    pub async fn stored_name(&self, name: &str) -> Result<String> {
        let manifest = self.load_manifest().await?;
        manifest
            .stored_name(name)
            .map(str::to_string)
            .ok_or_else(|| {
                StorageError::InvalidOperation(format!(
                    "Missing staticfiles manifest entry for '{name}'"
                ))
            })
    }
}

/// `dir/stem.<hash>.ext`, hash being the leading hex digits of the MD5 of
/// `content`.
pub fn hashed_name(name: &str, content: &[u8]) -> String {
    let digest = format!("{:x}", md5::compute(content));
    let hash = &digest[..MANIFEST_HASH_LEN];
    let (dir, file) = match name.rfind('/') {
        Some(i) => name.split_at(i + 1),
        None => ("", name),
    };
    match file.rfind('.') {
        Some(i) if i > 0 => format!("{dir}{}.{hash}{}", &file[..i], &file[i..]),
        _ => format!("{dir}{file}.{hash}"),
    }
}
