use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use uuid::Uuid;

use crate::{error::PipelineError, stores::BlobStore};

/// `"{uuid-v4}.{ext}"`, with `ext` taken from the image's magic bytes when
/// they are recognizable.
pub fn blob_name(bytes: &[u8], default_extension: &str) -> String {
    let extension = image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or(default_extension);
    format!("{}.{}", Uuid::new_v4(), extension)
}

/// Upload under a deadline, classifying failures for the caller.
pub async fn upload_within(
    store: &dyn BlobStore,
    bytes: Vec<u8>,
    name: &str,
    timeout: Duration,
) -> Result<String, PipelineError> {
    match tokio::time::timeout(timeout, store.upload(bytes, name)).await {
        Ok(result) => result.map_err(PipelineError::blob),
        Err(_) => Err(PipelineError::Timeout {
            operation: "blob upload",
            seconds: timeout.as_secs(),
        }),
    }
}

/// Writes blobs into a directory and hands out `file://` URLs.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("failed to create blob directory {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("failed to resolve blob directory {}", root.display()))?;
        Ok(Self { root })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String> {
        if name.contains(['/', '\\']) || name.starts_with('.') {
            bail!("invalid blob name {name:?}");
        }
        let path = self.root.join(name);
        tokio::fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to write blob {}", path.display()))?;

        debug!("stored {} bytes at {}", bytes.len(), path.display());
        Ok(format!("file://{}", path.display()))
    }
}

/// Block-blob `PUT` against a container URL, e.g.
/// `https://account.blob.core.windows.net/images`.
///
/// The SAS token authorizes the request and is kept out of the returned URL.
pub struct HttpBlobStore {
    client: reqwest::Client,
    container_url: String,
    sas_token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(container_url: impl Into<String>, sas_token: Option<String>) -> Self {
        let container_url = container_url.into().trim_end_matches('/').to_string();
        let sas_token = sas_token
            .map(|token| token.trim_start_matches('?').to_string())
            .filter(|token| !token.is_empty());
        Self {
            client: reqwest::Client::new(),
            container_url,
            sas_token,
        }
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}/{}", self.container_url, name)
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String> {
        let blob_url = self.blob_url(name);
        let request_url = match &self.sas_token {
            Some(token) => format!("{blob_url}?{token}"),
            None => blob_url.clone(),
        };

        let response = self
            .client
            .put(&request_url)
            .header("x-ms-blob-type", "BlockBlob")
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("failed to reach blob container for {name}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("blob container rejected {name} with {status}: {body}");
        }

        Ok(blob_url)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, RgbImage};

    use super::*;

    fn encoded(format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(2, 2))
            .write_to(&mut Cursor::new(&mut bytes), format)
            .unwrap();
        bytes
    }

    #[test]
    fn names_use_detected_extension() {
        assert!(blob_name(&encoded(ImageFormat::Png), "bin").ends_with(".png"));
        assert!(blob_name(&encoded(ImageFormat::Jpeg), "bin").ends_with(".jpg"));
        assert!(blob_name(b"plain bytes", "jpeg").ends_with(".jpeg"));
    }

    #[test]
    fn names_are_unique() {
        assert_ne!(blob_name(b"x", "png"), blob_name(b"x", "png"));
    }

    #[tokio::test]
    async fn local_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs")).unwrap();

        let url = store.upload(b"ABC".to_vec(), "a.png").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("a.png"));

        let stored = std::fs::read(dir.path().join("blobs").join("a.png")).unwrap();
        assert_eq!(stored, b"ABC");
    }

    #[tokio::test]
    async fn local_store_rejects_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.upload(b"x".to_vec(), "../escape.png").await.is_err());
    }

    #[test]
    fn http_url_excludes_sas() {
        let store = HttpBlobStore::new(
            "https://acct.blob.core.windows.net/images/",
            Some("?sv=2024&sig=abc".into()),
        );
        assert_eq!(
            store.blob_url("a.png"),
            "https://acct.blob.core.windows.net/images/a.png"
        );
        assert_eq!(store.sas_token.as_deref(), Some("sv=2024&sig=abc"));
    }
}
