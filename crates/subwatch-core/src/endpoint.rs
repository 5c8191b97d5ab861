//! Chain endpoint requests and their validation.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Invalid WebSocket URL format: {0}")]
    Unparsable(String),

    #[error("Invalid WebSocket protocol '{0}', expected ws or wss")]
    UnsupportedScheme(String),

    #[error("WebSocket URL has no host: {0}")]
    MissingHost(String),
}

/// A request to connect to a chain, as received from callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEndpointRequest {
    pub ws_url: String,
    #[serde(default, alias = "name")]
    pub display_name: Option<String>,
}

impl ChainEndpointRequest {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Validate the URL without any network I/O.
    pub fn validate(&self) -> Result<Endpoint, EndpointError> {
        Endpoint::parse(&self.ws_url)
    }
}

/// A syntactically valid `ws://` or `wss://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: Url,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let url = Url::parse(raw.trim()).map_err(|e| EndpointError::Unparsable(e.to_string()))?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::MissingHost(raw.to_string()))?
            .to_string();

        // ws and wss always have a known default port
        let port = url.port_or_known_default().unwrap_or(80);

        Ok(Self { url, host, port })
    }

    /// Normalized URL string, used to detect duplicate connects.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}
