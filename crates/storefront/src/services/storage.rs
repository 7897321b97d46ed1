//! Object storage client for product images.
//!
//! Talks to the hosted backend's storage REST API: objects live at
//! `{url}/storage/v1/object/{bucket}/{path}` and public buckets serve them from
//! `{url}/storage/v1/object/public/{bucket}/{path}`.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::StorageConfig;
use crate::payments::VENDOR_TIMEOUT;

/// Errors from object storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object storage is not configured.
    #[error("object storage is not configured")]
    NotConfigured,

    /// Credentials could not be turned into request headers.
    #[error("invalid storage configuration: {0}")]
    Configuration(String),

    /// HTTP request failed.
    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage API returned an error response.
    #[error("storage API error: {status} - {message}")]
    Api { status: u16, message: String },
}

/// A bucket of binary objects addressed by path.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` at `path`. Fails if an object already exists there.
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str)
    -> Result<(), StorageError>;

    /// Delete the object at `path`. Deleting a missing object is not an error.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;

    /// Public URL the object is served from.
    fn public_url(&self, path: &str) -> String;
}

/// Storage REST API client.
#[derive(Clone)]
pub struct HttpObjectStorage {
    client: reqwest::Client,
    url: String,
    bucket: String,
}

impl HttpObjectStorage {
    /// Create a new storage client.
    ///
    /// # Errors
    ///
    /// Returns error if the service key is not a valid header value or the
    /// HTTP client fails to build.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let key = config.service_key.expose_secret();
        let mut headers = HeaderMap::new();

        let mut auth = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| StorageError::Configuration(format!("Invalid service key format: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let mut apikey = HeaderValue::from_str(key)
            .map_err(|e| StorageError::Configuration(format!("Invalid service key format: {e}")))?;
        apikey.set_sensitive(true);
        headers.insert("apikey", apikey);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(VENDOR_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }

    async fn check(response: reqwest::Response) -> Result<(), StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let response = self
            .client
            .post(self.object_url(path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .header(reqwest::header::CACHE_CONTROL, "max-age=31536000")
            .body(bytes)
            .send()
            .await?;
        Self::check(response).await
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let response = self
            .client
            .delete(format!("{}/storage/v1/object/{}", self.url, self.bucket))
            .json(&serde_json::json!({ "prefixes": [path] }))
            .send()
            .await?;
        Self::check(response).await
    }

    fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.url,
            self.bucket,
            path.trim_start_matches('/')
        )
    }
}

/// Stand-in used when no storage is configured; every write fails.
pub struct UnconfiguredStorage;

#[async_trait]
impl ObjectStorage for UnconfiguredStorage {
    async fn upload(
        &self,
        _path: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        Err(StorageError::NotConfigured)
    }

    async fn remove(&self, _path: &str) -> Result<(), StorageError> {
        Err(StorageError::NotConfigured)
    }

    fn public_url(&self, path: &str) -> String {
        format!("/{}", path.trim_start_matches('/'))
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use memory::MemoryObjectStorage;

#[cfg(any(test, feature = "test-support"))]
mod memory {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

    use async_trait::async_trait;

    use super::{ObjectStorage, StorageError};

    /// In-memory bucket. Clones share objects.
    #[derive(Clone, Default)]
    pub struct MemoryObjectStorage {
        objects: Arc<Mutex<HashMap<String, (Vec<u8>, String)>>>,
    }

    impl MemoryObjectStorage {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn objects(&self) -> MutexGuard<'_, HashMap<String, (Vec<u8>, String)>> {
            self.objects.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Paths of every stored object, sorted.
        #[must_use]
        pub fn paths(&self) -> Vec<String> {
            let mut paths: Vec<String> = self.objects().keys().cloned().collect();
            paths.sort();
            paths
        }

        /// Stored bytes and content type.
        #[must_use]
        pub fn get(&self, path: &str) -> Option<(Vec<u8>, String)> {
            self.objects().get(path).cloned()
        }
    }

    #[async_trait]
    impl ObjectStorage for MemoryObjectStorage {
        async fn upload(
            &self,
            path: &str,
            bytes: Vec<u8>,
            content_type: &str,
        ) -> Result<(), StorageError> {
            let mut objects = self.objects();
            if objects.contains_key(path) {
                return Err(StorageError::Api {
                    status: 409,
                    message: "The resource already exists".to_string(),
                });
            }
            objects.insert(path.to_string(), (bytes, content_type.to_string()));
            Ok(())
        }

        async fn remove(&self, path: &str) -> Result<(), StorageError> {
            self.objects().remove(path);
            Ok(())
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://storage.test/public/{path}")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config(url: &str) -> StorageConfig {
        StorageConfig {
            url: url.to_string(),
            service_key: SecretString::from("service-role-key"),
            bucket: "product-images".to_string(),
        }
    }

    #[test]
    fn test_public_url() {
        let storage = HttpObjectStorage::new(&config("https://abc.backend.example/")).unwrap();
        assert_eq!(
            storage.public_url("products/1/a.jpg"),
            "https://abc.backend.example/storage/v1/object/public/product-images/products/1/a.jpg"
        );
    }

    #[tokio::test]
    async fn test_upload_and_remove() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/storage/v1/object/product-images/products/1/a.jpg")
            .match_header("authorization", "Bearer service-role-key")
            .match_header("apikey", "service-role-key")
            .match_header("content-type", "image/jpeg")
            .with_status(200)
            .with_body(r#"{"Key":"product-images/products/1/a.jpg"}"#)
            .expect(1)
            .create_async()
            .await;
        let remove = server
            .mock("DELETE", "/storage/v1/object/product-images")
            .match_body(mockito::Matcher::Json(
                serde_json::json!({ "prefixes": ["products/1/a.jpg"] }),
            ))
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let storage = HttpObjectStorage::new(&config(&server.url())).unwrap();
        storage
            .upload("products/1/a.jpg", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        storage.remove("products/1/a.jpg").await.unwrap();

        upload.assert_async().await;
        remove.assert_async().await;
    }

    #[tokio::test]
    async fn test_upload_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _upload = server
            .mock("POST", "/storage/v1/object/product-images/x.jpg")
            .with_status(409)
            .with_body("Duplicate")
            .create_async()
            .await;

        let storage = HttpObjectStorage::new(&config(&server.url())).unwrap();
        let err = storage.upload("x.jpg", vec![0], "image/jpeg").await.unwrap_err();
        assert!(matches!(err, StorageError::Api { status: 409, .. }));
    }

    #[tokio::test]
    async fn test_memory_storage_rejects_overwrite() {
        let storage = MemoryObjectStorage::new();
        storage.upload("a", vec![1], "image/jpeg").await.unwrap();
        assert!(storage.upload("a", vec![2], "image/jpeg").await.is_err());
        storage.remove("a").await.unwrap();
        assert!(storage.paths().is_empty());
    }
}
