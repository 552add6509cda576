use kiln_proto::ErrorBody;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{
    config::ClientConfig,
    error::{ConfigError, RemoteFailure, TransportError},
};

/// HTTP execution shared by the REST, auth and storage endpoints
#[derive(Clone)]
pub(crate) struct Rest {
    http: reqwest::Client,
    api_key: String,
}

impl Rest {
    pub(crate) fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder().timeout(config.request_timeout).build().map_err(|e| ConfigError::Http(e.to_string()))?;
        Ok(Self { http, api_key: config.anon_key.clone() })
    }

    pub(crate) fn api_key(&self) -> &str { &self.api_key }

    /// Start a request carrying the api key and the given bearer token
    pub(crate) fn request(&self, method: Method, url: &str, bearer: &str) -> RequestBuilder {
        self.http.request(method, url).header("apikey", &self.api_key).bearer_auth(bearer)
    }

    /// Execute, turning any non-success status into a [`RemoteFailure`]
    pub(crate) async fn send(&self, builder: RequestBuilder) -> Result<Response, TransportError> {
        let request = builder.build().map_err(|e| TransportError::Decode(e.to_string()))?;
        debug!("{} {}", request.method(), request.url().path());

        let response = self.http.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let body = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) if body != ErrorBody::default() => body,
            _ if text.trim().is_empty() => ErrorBody::new(status.canonical_reason().unwrap_or("request failed")),
            _ => ErrorBody::new(text),
        };
        debug!("request failed with {}: {}", status, body);
        Err(TransportError::Remote(RemoteFailure { status: status.as_u16(), body }))
    }
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, TransportError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))
}
