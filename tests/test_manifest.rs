// tests/test_manifest.rs
//
// Hashed static copies and staticfiles.json, written under the cached max-age.

mod common;

use anyhow::Result;

use common::memory_storage;
use s3storage::constants::MANIFEST_NAME;
use s3storage::manifest::hashed_name;
use s3storage::{ManifestPostProcessor, StorageConfig, StorageError};

fn static_config() -> StorageConfig {
    StorageConfig {
        bucket_auth: false,
        file_overwrite: true,
        max_age_seconds: 3600,
        max_age_seconds_cached: 31_536_000,
        ..StorageConfig::default()
    }
}

#[tokio::test]
async fn test_post_process_writes_hashed_copies_and_manifest() -> Result<()> {
    let (backend, storage) = memory_storage(static_config());
    storage.save("css/site.css", "body { color: red; }").await?;
    storage.save("js/app.js", "console.log(1);").await?;

    let processor = ManifestPostProcessor::new(&storage);
    let manifest = processor.post_process(["css/site.css", "/js/app.js"]).await?;

    let hashed_css = hashed_name("css/site.css", b"body { color: red; }");
    assert_eq!(manifest.paths["css/site.css"], hashed_css);
    assert_eq!(manifest.paths["js/app.js"], hashed_name("js/app.js", b"console.log(1);"));
    assert!(hashed_css.starts_with("css/site.") && hashed_css.ends_with(".css"));

    // Hashed copies carry the long max-age; the originals keep theirs.
    let copy = backend.object(&hashed_css).expect("hashed copy stored");
    assert_eq!(copy.headers.cache_control, "public,max-age=31536000");
    let original = backend.object("css/site.css").expect("original kept");
    assert_eq!(original.headers.cache_control, "public,max-age=3600");
    assert_eq!(storage.open(&hashed_css).await?.read_all()?, b"body { color: red; }");

    // The previous max-age is back once the pass is over.
    assert_eq!(storage.config().max_age_seconds, 3600);

    assert!(backend.object(MANIFEST_NAME).is_some());
    assert_eq!(processor.load_manifest().await?, manifest);
    assert_eq!(processor.stored_name("/css/site.css").await?, hashed_css);
    Ok(())
}

#[tokio::test]
async fn test_max_age_is_restored_after_failure() -> Result<()> {
    let (_backend, storage) = memory_storage(static_config());
    let processor = ManifestPostProcessor::new(&storage);

    let err = processor.post_process(["missing.css"]).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(storage.config().max_age_seconds, 3600);
    Ok(())
}

#[tokio::test]
async fn test_manifest_lookups() -> Result<()> {
    let (_backend, storage) = memory_storage(static_config());
    let processor = ManifestPostProcessor::new(&storage);

    // Nothing written yet.
    assert!(processor.load_manifest().await?.paths.is_empty());
    assert!(matches!(
        processor.stored_name("nope.css").await,
        Err(StorageError::InvalidOperation(_))
    ));

    storage.save(MANIFEST_NAME, r#"{"paths":{},"version":"0.9"}"#).await?;
    assert!(matches!(processor.load_manifest().await, Err(StorageError::InvalidOperation(_))));
    Ok(())
}
