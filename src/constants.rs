// src/constants.rs
//
// Centralized constants for s3storage to avoid hardcoded values throughout the codebase

use std::time::Duration;

/// Content-Encoding value written for transparently compressed objects
pub const CONTENT_ENCODING_GZIP: &str = "gzip";

/// User metadata key holding the pre-compression byte length of a gzip object
pub const UNCOMPRESSED_SIZE_META_KEY: &str = "uncompressed_size";

/// Fallback content type when the file extension is unknown
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Default AWS region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default max-age for Cache-Control and presigned URL expiry (1 hour)
pub const DEFAULT_MAX_AGE_SECONDS: u64 = 60 * 60;

/// Max-age applied to content-hashed files during manifest post-processing (1 year)
pub const DEFAULT_MAX_AGE_SECONDS_CACHED: u64 = 60 * 60 * 24 * 365;

/// Server-side encryption algorithm used when encryption is simply switched on
pub const DEFAULT_SSE_ALGORITHM: &str = "AES256";

/// Default signature version for presigned URLs
pub const DEFAULT_SIGNATURE_VERSION: &str = "s3v4";

// ============================================================================
// Buffering
// ============================================================================

/// Temporary buffers stay in memory up to this size, then spill to disk (10 MB)
pub const SPOOL_MAX_MEMORY_SIZE: usize = 10 * 1024 * 1024;

/// gzip level used for uploads (maximum compression)
pub const GZIP_COMPRESSION_LEVEL: u32 = 9;

// ============================================================================
// Backend
// ============================================================================

/// Keys returned per list_objects_v2 page
pub const LIST_PAGE_SIZE: i32 = 1000;

/// Connect timeout for the S3 client
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-operation timeout for the S3 client (seconds)
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Maximum presigned URL expiry accepted by S3 (7 days)
pub const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

// ============================================================================
// Manifest
// ============================================================================

/// Name of the manifest written by the static-file post-processing pass
pub const MANIFEST_NAME: &str = "staticfiles.json";

/// Manifest format version
pub const MANIFEST_VERSION: &str = "1.0";

/// Number of hex digest characters embedded in hashed file names
pub const MANIFEST_HASH_LEN: usize = 12;
