use bytes::Bytes;
use reqwest::Method;
use tracing::{debug, info};

use crate::{client::Client, error::ObjectError};

/// An object storage bucket. Objects are opaque byte blobs addressed by path.
#[derive(Clone)]
pub struct Bucket {
    client: Client,
    name: String,
}

impl Bucket {
    pub fn new(client: Client, name: impl Into<String>) -> Self { Self { client, name: name.into() } }

    pub fn name(&self) -> &str { &self.name }

    /// Store `bytes` at `path`, replacing any existing object. Returns the object URL.
    pub async fn upload(&self, path: &str, bytes: impl Into<Bytes>, content_type: &str) -> Result<String, ObjectError> {
        let url = self.object_url(path);
        let bearer = self.client.session().bearer().await?;
        let bytes: Bytes = bytes.into();
        let size = bytes.len();
        let builder = self
            .client
            .rest()
            .request(Method::POST, &url, &bearer)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes);
        self.client.rest().send(builder).await?;
        info!("Uploaded {} bytes to {}/{}", size, self.name, path);
        Ok(url)
    }

    pub async fn download(&self, path: &str) -> Result<Bytes, ObjectError> {
        let bearer = self.client.session().bearer().await?;
        let builder = self.client.rest().request(Method::GET, &self.object_url(path), &bearer);
        let response = self.client.rest().send(builder).await?;
        let bytes = response.bytes().await.map_err(|e| ObjectError::Network(e.to_string()))?;
        debug!("Downloaded {} bytes from {}/{}", bytes.len(), self.name, path);
        Ok(bytes)
    }

    /// Where a public bucket serves `path` without authentication. No request is made.
    pub fn public_url(&self, path: &str) -> String {
        format!("{}/object/public/{}/{}", self.client.config().storage_url(), self.name, path.trim_start_matches('/'))
    }

    fn object_url(&self, path: &str) -> String { format!("{}/object/{}/{}", self.client.config().storage_url(), self.name, path.trim_start_matches('/')) }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "Bucket({})", self.name) }
}
