// src/config.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
//! Storage configuration.
//!
//! A [`StorageConfig`] is resolved once per storage instance from three
//! layers, highest first:
//!
//! 1. explicit [`Overrides`] passed by the caller,
//! 2. the profile's setting in a [`SettingsSource`] (`AWS_S3_*` names carry
//!    the profile suffix, e.g. `AWS_S3_BUCKET_NAME_STATIC`; the `AWS_*`
//!    credential settings are shared by all profiles and never suffixed),
//! 3. the profile's built-in default.
//!
//! Settings that depend on the file name (`content_disposition`,
//! `content_language`, metadata values) can be replaced programmatically by
//! [`Setting::Computed`] closures after resolution.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::constants::{
    DEFAULT_MAX_AGE_SECONDS, DEFAULT_MAX_AGE_SECONDS_CACHED, DEFAULT_OPERATION_TIMEOUT_SECS,
    DEFAULT_REGION, DEFAULT_SIGNATURE_VERSION,
};
use crate::error::{Result, StorageError};

// -----------------------------------------------------------------------------
// Setting names
// -----------------------------------------------------------------------------

pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const AWS_S3_BUCKET_NAME: &str = "AWS_S3_BUCKET_NAME";
pub const AWS_S3_ADDRESSING_STYLE: &str = "AWS_S3_ADDRESSING_STYLE";
pub const AWS_S3_ENDPOINT_URL: &str = "AWS_S3_ENDPOINT_URL";
pub const AWS_S3_KEY_PREFIX: &str = "AWS_S3_KEY_PREFIX";
pub const AWS_S3_BUCKET_AUTH: &str = "AWS_S3_BUCKET_AUTH";
pub const AWS_S3_MAX_AGE_SECONDS: &str = "AWS_S3_MAX_AGE_SECONDS";
pub const AWS_S3_MAX_AGE_SECONDS_CACHED: &str = "AWS_S3_MAX_AGE_SECONDS_CACHED";
pub const AWS_S3_PUBLIC_URL: &str = "AWS_S3_PUBLIC_URL";
pub const AWS_S3_REDUCED_REDUNDANCY: &str = "AWS_S3_REDUCED_REDUNDANCY";
pub const AWS_S3_CONTENT_DISPOSITION: &str = "AWS_S3_CONTENT_DISPOSITION";
pub const AWS_S3_CONTENT_LANGUAGE: &str = "AWS_S3_CONTENT_LANGUAGE";
pub const AWS_S3_METADATA: &str = "AWS_S3_METADATA";
pub const AWS_S3_ENCRYPT_KEY: &str = "AWS_S3_ENCRYPT_KEY";
pub const AWS_S3_KMS_ENCRYPTION_KEY_ID: &str = "AWS_S3_KMS_ENCRYPTION_KEY_ID";
pub const AWS_S3_GZIP: &str = "AWS_S3_GZIP";
pub const AWS_S3_SIGNATURE_VERSION: &str = "AWS_S3_SIGNATURE_VERSION";
pub const AWS_S3_FILE_OVERWRITE: &str = "AWS_S3_FILE_OVERWRITE";
pub const AWS_S3_OPERATION_TIMEOUT_SECS: &str = "AWS_S3_OPERATION_TIMEOUT_SECS";

/// Shared by every profile, never suffixed.
const AUTH_SETTINGS: [&str; 4] =
    [AWS_REGION, AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN];

/// Resolved per profile, suffixed.
const S3_SETTINGS: [&str; 18] = [
    AWS_S3_BUCKET_NAME,
    AWS_S3_ADDRESSING_STYLE,
    AWS_S3_ENDPOINT_URL,
    AWS_S3_KEY_PREFIX,
    AWS_S3_BUCKET_AUTH,
    AWS_S3_MAX_AGE_SECONDS,
    AWS_S3_MAX_AGE_SECONDS_CACHED,
    AWS_S3_PUBLIC_URL,
    AWS_S3_REDUCED_REDUNDANCY,
    AWS_S3_CONTENT_DISPOSITION,
    AWS_S3_CONTENT_LANGUAGE,
    AWS_S3_METADATA,
    AWS_S3_ENCRYPT_KEY,
    AWS_S3_KMS_ENCRYPTION_KEY_ID,
    AWS_S3_GZIP,
    AWS_S3_SIGNATURE_VERSION,
    AWS_S3_FILE_OVERWRITE,
    AWS_S3_OPERATION_TIMEOUT_SECS,
];

// -----------------------------------------------------------------------------
// Sources
// -----------------------------------------------------------------------------

/// Where named settings come from.
pub trait SettingsSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// Process environment, after loading any `.env` file.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSettings;

impl EnvSettings {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        EnvSettings
    }
}

impl SettingsSource for EnvSettings {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl SettingsSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Caller-supplied overrides, the highest-priority layer.
///
/// Names are case-insensitive (`aws_s3_bucket_auth` and `AWS_S3_BUCKET_AUTH`
/// are the same setting). Unknown names are rejected when the config is
/// resolved.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    values: BTreeMap<String, String>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.values.insert(name.as_ref().to_ascii_uppercase(), value.into());
    }

    /// Parse `NAME=VALUE` pairs, e.g. from the command line.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                StorageError::InvalidOperation(format!("expected NAME=VALUE, got {pair:?}"))
            })?;
            overrides.insert(name.trim(), value);
        }
        Ok(overrides)
    }

    fn get(&self, name: &str) -> Option<&String> {
        self.values.get(name)
    }

    fn check_known(&self) -> Result<()> {
        for name in self.values.keys() {
            if !AUTH_SETTINGS.contains(&name.as_str()) && !S3_SETTINGS.contains(&name.as_str()) {
                return Err(StorageError::InvalidOperation(format!("Unknown S3 setting: {name}")));
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Setting values
// -----------------------------------------------------------------------------

pub type NameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A string setting that is either fixed or computed from the file name.
#[derive(Clone)]
pub enum Setting {
    Fixed(String),
    Computed(NameFn),
}

impl Setting {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Setting::Computed(Arc::new(f))
    }

    pub fn evaluate(&self, name: &str) -> String {
        match self {
            Setting::Fixed(value) => value.clone(),
            Setting::Computed(f) => f(name),
        }
    }
}

impl Default for Setting {
    fn default() -> Self {
        Setting::Fixed(String::new())
    }
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Fixed(value) => write!(f, "Fixed({value:?})"),
            Setting::Computed(_) => write!(f, "Computed(<fn>)"),
        }
    }
}

impl From<&str> for Setting {
    fn from(value: &str) -> Self {
        Setting::Fixed(value.to_string())
    }
}

impl From<String> for Setting {
    fn from(value: String) -> Self {
        Setting::Fixed(value)
    }
}

/// Bucket addressing style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressingStyle {
    #[default]
    Auto,
    Path,
    Virtual,
}

impl FromStr for AddressingStyle {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(AddressingStyle::Auto),
            "path" => Ok(AddressingStyle::Path),
            "virtual" => Ok(AddressingStyle::Virtual),
            other => Err(StorageError::InvalidOperation(format!(
                "{AWS_S3_ADDRESSING_STYLE} must be auto, path or virtual, got {other:?}"
            ))),
        }
    }
}

/// Server-side encryption policy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Encryption {
    #[default]
    Off,
    /// S3-managed keys.
    Aes256,
    /// An explicit algorithm (e.g. `aws:kms`) with an optional KMS key id.
    Algorithm { algorithm: String, kms_key_id: Option<String> },
}

/// Opaque credentials. Empty key and secret select the default provider chain.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl Credentials {
    pub fn is_explicit(&self) -> bool {
        !self.access_key_id.is_empty() && !self.secret_access_key.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &if self.session_token.is_empty() { "" } else { "<redacted>" })
            .finish()
    }
}

// -----------------------------------------------------------------------------
// StorageConfig
// -----------------------------------------------------------------------------

/// Per-instance storage configuration. Never mutated in place once a storage
/// owns it; see [`crate::S3Storage::reload_config`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub region: String,
    pub credentials: Credentials,
    pub bucket_name: String,
    pub addressing_style: AddressingStyle,
    pub endpoint_url: Option<String>,
    pub key_prefix: String,
    pub signature_version: String,
    pub operation_timeout_secs: u64,
    /// Private ACL and signed URLs when true, public-read and bare URLs otherwise.
    pub bucket_auth: bool,
    pub max_age_seconds: u64,
    pub max_age_seconds_cached: u64,
    pub public_url: Option<String>,
    pub reduced_redundancy: bool,
    pub content_disposition: Setting,
    pub content_language: Setting,
    pub metadata: BTreeMap<String, Setting>,
    pub encryption: Encryption,
    pub gzip: bool,
    pub file_overwrite: bool,
}

/// Built-in defaults that differ between storage profiles.
#[derive(Debug, Clone, Copy)]
struct Profile {
    suffix: &'static str,
    bucket_auth: bool,
    file_overwrite: bool,
}

const DEFAULT_PROFILE: Profile = Profile {
    suffix: "",
    bucket_auth: true,
    file_overwrite: false,
};

const STATIC_PROFILE: Profile = Profile {
    suffix: "_STATIC",
    bucket_auth: false,
    file_overwrite: true,
};

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            credentials: Credentials::default(),
            bucket_name: String::new(),
            addressing_style: AddressingStyle::Auto,
            endpoint_url: None,
            key_prefix: String::new(),
            signature_version: DEFAULT_SIGNATURE_VERSION.to_string(),
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            bucket_auth: DEFAULT_PROFILE.bucket_auth,
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
            max_age_seconds_cached: DEFAULT_MAX_AGE_SECONDS_CACHED,
            public_url: None,
            reduced_redundancy: false,
            content_disposition: Setting::default(),
            content_language: Setting::default(),
            metadata: BTreeMap::new(),
            encryption: Encryption::Off,
            gzip: true,
            file_overwrite: DEFAULT_PROFILE.file_overwrite,
        }
    }
}

impl StorageConfig {
    /// Settings for general uploaded files.
    pub fn default_storage(source: &dyn SettingsSource, overrides: &Overrides) -> Result<Self> {
        Self::resolve(source, overrides, DEFAULT_PROFILE)
    }

    /// Settings for static files: `_STATIC` suffixed names, public by default,
    /// overwrite on.
    pub fn static_storage(source: &dyn SettingsSource, overrides: &Overrides) -> Result<Self> {
        Self::resolve(source, overrides, STATIC_PROFILE)
    }

    fn resolve(
        source: &dyn SettingsSource,
        overrides: &Overrides,
        profile: Profile,
    ) -> Result<Self> {
        overrides.check_known()?;
        let r = Resolver { source, overrides, suffix: profile.suffix };

        let encryption = match r.s3(AWS_S3_ENCRYPT_KEY) {
            None => Encryption::Off,
            Some(raw) => match parse_bool(&raw) {
                Some(true) => Encryption::Aes256,
                Some(false) => Encryption::Off,
                None if raw.trim().is_empty() => Encryption::Off,
                None => Encryption::Algorithm {
                    algorithm: raw.trim().to_string(),
                    kms_key_id: r.s3(AWS_S3_KMS_ENCRYPTION_KEY_ID).filter(|k| !k.is_empty()),
                },
            },
        };

        let metadata = match r.s3(AWS_S3_METADATA) {
            Some(raw) => parse_metadata(&raw)?,
            None => BTreeMap::new(),
        };

        Ok(Self {
            region: r
                .auth(AWS_REGION)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            credentials: Credentials {
                access_key_id: r.auth(AWS_ACCESS_KEY_ID).unwrap_or_default(),
                secret_access_key: r.auth(AWS_SECRET_ACCESS_KEY).unwrap_or_default(),
                session_token: r.auth(AWS_SESSION_TOKEN).unwrap_or_default(),
            },
            bucket_name: r.s3(AWS_S3_BUCKET_NAME).unwrap_or_default(),
            addressing_style: r.s3(AWS_S3_ADDRESSING_STYLE).as_deref().unwrap_or("auto").parse()?,
            endpoint_url: r.s3(AWS_S3_ENDPOINT_URL).filter(|v| !v.is_empty()),
            key_prefix: r.s3(AWS_S3_KEY_PREFIX).unwrap_or_default(),
            signature_version: r
                .s3(AWS_S3_SIGNATURE_VERSION)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_SIGNATURE_VERSION.to_string()),
            operation_timeout_secs: r
                .u64(AWS_S3_OPERATION_TIMEOUT_SECS, DEFAULT_OPERATION_TIMEOUT_SECS)?,
            bucket_auth: r.bool(AWS_S3_BUCKET_AUTH, profile.bucket_auth)?,
            max_age_seconds: r.u64(AWS_S3_MAX_AGE_SECONDS, DEFAULT_MAX_AGE_SECONDS)?,
            max_age_seconds_cached: r
                .u64(AWS_S3_MAX_AGE_SECONDS_CACHED, DEFAULT_MAX_AGE_SECONDS_CACHED)?,
            public_url: r.s3(AWS_S3_PUBLIC_URL).filter(|v| !v.is_empty()),
            reduced_redundancy: r.bool(AWS_S3_REDUCED_REDUNDANCY, false)?,
            content_disposition: r.s3(AWS_S3_CONTENT_DISPOSITION).unwrap_or_default().into(),
            content_language: r.s3(AWS_S3_CONTENT_LANGUAGE).unwrap_or_default().into(),
            metadata,
            encryption,
            gzip: r.bool(AWS_S3_GZIP, true)?,
            file_overwrite: r.bool(AWS_S3_FILE_OVERWRITE, profile.file_overwrite)?,
        })
    }

    /// Reject combinations that can never work.
    pub fn validate(&self) -> Result<()> {
        if self.public_url.is_some() && self.bucket_auth {
            return Err(StorageError::ConfigurationConflict(format!(
                "Cannot use {AWS_S3_PUBLIC_URL} with {AWS_S3_BUCKET_AUTH}"
            )));
        }
        Ok(())
    }

    /// The first setting, if any, that differs from `current` among those a
    /// connected backend is built from.
    pub fn backend_change(&self, current: &StorageConfig) -> Option<&'static str> {
        [
            (AWS_S3_BUCKET_NAME, self.bucket_name != current.bucket_name),
            (AWS_REGION, self.region != current.region),
            ("AWS credentials", self.credentials != current.credentials),
            (AWS_S3_ADDRESSING_STYLE, self.addressing_style != current.addressing_style),
            (AWS_S3_ENDPOINT_URL, self.endpoint_url != current.endpoint_url),
            (
                AWS_S3_OPERATION_TIMEOUT_SECS,
                self.operation_timeout_secs != current.operation_timeout_secs,
            ),
        ]
        .into_iter()
        .find_map(|(setting, changed)| changed.then_some(setting))
    }

    /// A copy with a different max-age, everything else unchanged.
    pub fn with_max_age(&self, max_age_seconds: u64) -> Self {
        Self { max_age_seconds, ..self.clone() }
    }
}

struct Resolver<'a> {
    source: &'a dyn SettingsSource,
    overrides: &'a Overrides,
    suffix: &'static str,
}

impl Resolver<'_> {
    fn auth(&self, name: &str) -> Option<String> {
        self.overrides.get(name).cloned().or_else(|| self.source.get(name))
    }

    fn s3(&self, name: &str) -> Option<String> {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| self.source.get(&format!("{name}{}", self.suffix)))
    }

    fn bool(&self, name: &str, default: bool) -> Result<bool> {
        match self.s3(name) {
            None => Ok(default),
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                StorageError::InvalidOperation(format!("{name} must be a boolean, got {raw:?}"))
            }),
        }
    }

    fn u64(&self, name: &str, default: u64) -> Result<u64> {
        match self.s3(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|_| {
                StorageError::InvalidOperation(format!(
                    "{name} must be a non-negative integer, got {raw:?}"
                ))
            }),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `key=value,key2=value2`; blank input is an empty map.
fn parse_metadata(raw: &str) -> Result<BTreeMap<String, Setting>> {
    let mut metadata = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            StorageError::InvalidOperation(format!(
                "{AWS_S3_METADATA} entries must be key=value, got {pair:?}"
            ))
        })?;
        metadata.insert(key.trim().to_string(), Setting::from(value.trim()));
    }
    Ok(metadata)
}
