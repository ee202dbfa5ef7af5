// tests/test_s3_live.rs
//
// Round trip against a real bucket. Ignored by default; run with
//   AWS_S3_BUCKET_NAME=<bucket> cargo test --test test_s3_live -- --ignored
// Credentials and region come from the environment (or .env) as usual.

use anyhow::Result;
use futures_util::stream::StreamExt;

use s3storage::{EnvSettings, Overrides, S3Storage, StorageConfig};

async fn live_storage() -> Result<S3Storage> {
    let prefix = format!("s3storage-test/{}", chrono::Utc::now().timestamp_millis());
    let overrides = Overrides::new()
        .set("AWS_S3_KEY_PREFIX", prefix)
        .set("AWS_S3_FILE_OVERWRITE", "true");
    let config = StorageConfig::default_storage(&EnvSettings::load(), &overrides)?;
    Ok(S3Storage::connect(config).await?)
}

#[tokio::test]
#[ignore]
async fn test_live_round_trip_and_sync() -> Result<()> {
    let storage = live_storage().await?;
    let body = b"foo".repeat(1000);

    storage.save("foo.txt", body.clone()).await?;
    let head = storage.meta("foo.txt").await?;
    assert_eq!(head.content_encoding.as_deref(), Some("gzip"));
    assert_eq!(storage.size("foo.txt").await?, 3000);
    assert_eq!(storage.open("foo.txt").await?.read_all()?, body);
    assert!(storage.url("foo.txt").await?.contains("X-Amz-Signature"));

    let mut synced = Vec::new();
    let mut stream = storage.sync_meta_all();
    while let Some(name) = stream.next().await {
        synced.push(name?);
    }
    drop(stream);
    assert_eq!(synced, ["foo.txt"]);
    assert_eq!(storage.meta("foo.txt").await?.content_encoding.as_deref(), Some("gzip"));

    storage.delete("foo.txt").await?;
    assert!(!storage.exists("foo.txt").await?);
    Ok(())
}
