//! Warm-tier driver over an S3-compatible object store.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::debug;

use super::{RemoteDriver, StorageError};

/// Object-store driver. Works against wasabi or any S3-compatible
/// endpoint; tests back it with an in-memory store.
pub struct S3Driver {
    store: Arc<dyn ObjectStore>,
    base_url: String,
}

impl S3Driver {
    /// Wraps an already-built object store. `base_url` is the public
    /// prefix streams are served under, without a trailing slash.
    pub fn new(store: Arc<dyn ObjectStore>, base_url: impl Into<String>) -> Self {
        Self {
            store,
            base_url: base_url.into(),
        }
    }

    /// Builds a driver for an S3-compatible bucket.
    ///
    /// # Errors
    ///
    /// - `StorageError::Remote` - builder rejected the configuration
    pub fn connect(
        endpoint: &str,
        region: &str,
        bucket: &str,
        key: &str,
        secret: &str,
    ) -> Result<Self, StorageError> {
        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_region(region)
            .with_bucket_name(bucket)
            .with_access_key_id(key)
            .with_secret_access_key(secret)
            .build()?;
        let base_url = format!("{}/{}", endpoint.trim_end_matches('/'), bucket);
        Ok(Self::new(Arc::new(store), base_url))
    }

    fn object_path(sd_hash: &str, name: &str) -> ObjectPath {
        ObjectPath::from(format!("{sd_hash}/{name}"))
    }
}

#[async_trait]
impl RemoteDriver for S3Driver {
    async fn put(&self, sd_hash: &str, name: &str, data: Bytes) -> Result<(), StorageError> {
        let path = Self::object_path(sd_hash, name);
        self.store.put(&path, PutPayload::from(data)).await?;
        Ok(())
    }

    async fn get(&self, sd_hash: &str, name: &str) -> Result<Bytes, StorageError> {
        let path = Self::object_path(sd_hash, name);
        match self.store.get(&path).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(StorageError::NotFound {
                sd_hash: sd_hash.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, sd_hash: &str) -> Result<(), StorageError> {
        let prefix = ObjectPath::from(sd_hash);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        debug!(sd_hash, count = objects.len(), "deleting remote stream");
        for meta in objects {
            match self.store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn url(&self, sd_hash: &str) -> String {
        format!("{}/{}", self.base_url, sd_hash)
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn memory_driver() -> S3Driver {
        S3Driver::new(Arc::new(InMemory::new()), "https://cdn.test/bucket")
    }

    #[tokio::test]
    async fn put_get_roundtrip() {
        let driver = memory_driver();
        driver
            .put("hash", "master.m3u8", Bytes::from_static(b"#EXTM3U"))
            .await
            .expect("put");

        let data = driver.get("hash", "master.m3u8").await.expect("get");
        assert_eq!(Bytes::from_static(b"#EXTM3U"), data);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let driver = memory_driver();
        assert!(matches!(
            driver.get("hash", "nope").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_whole_stream_and_is_idempotent() {
        let driver = memory_driver();
        driver.put("hash", "a", Bytes::from_static(b"1")).await.expect("put");
        driver.put("hash", "b", Bytes::from_static(b"2")).await.expect("put");

        driver.delete("hash").await.expect("delete");
        assert!(driver.get("hash", "a").await.is_err());
        assert!(driver.get("hash", "b").await.is_err());

        driver.delete("hash").await.expect("repeat delete");
    }

    #[test]
    fn url_is_base_plus_hash() {
        let driver = memory_driver();
        assert_eq!("https://cdn.test/bucket/hash", driver.url("hash"));
    }
}
