// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root: module declarations plus the public re-exports.

// ===== Core Public API =====
pub mod storage;
pub mod sync_meta;
pub mod manifest;

pub use storage::{Content, S3File, S3Storage};
pub use sync_meta::SyncStream;
pub use manifest::{Manifest, ManifestPostProcessor};

// ===== Configuration and errors =====
pub mod constants;
pub mod config;
pub mod error;

pub use config::{EnvSettings, Overrides, Setting, SettingsSource, StorageConfig};
pub use error::{Result, StorageError};

// ===== Policy (pure, no I/O besides scratch buffers) =====
pub mod key_mapper;
pub mod content;
pub mod compression;
pub mod metadata;

// ===== Backends =====
pub mod backend;
pub mod s3_backend;
pub mod memory_backend;

pub use backend::{ObjectBackend, ObjectHead, UrlParams};
pub use memory_backend::MemoryBackend;
pub use s3_backend::S3Backend;
