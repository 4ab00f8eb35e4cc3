use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::cipher::Cipher;
use crate::device::Device;
use crate::protocol::{value_message, CONTENT_TYPE_JSON};
use crate::{Error, Result};

const HTTP_USER_AGENT: &str = "TeleHeater";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpConnectorBuilder {
    host: String,
    protocol: String,
    timeout: Duration,
}

impl HttpConnectorBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            protocol: "http".to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    pub fn protocol(mut self, proto: &str) -> Self {
        self.protocol = proto.to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build<C: Cipher>(self, cipher: C) -> Result<HttpConnector<C>> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;
        Ok(HttpConnector {
            http,
            base_url: format!("{}://{}", self.protocol, self.host),
            cipher,
        })
    }
}

/// Talks to a gateway on the local network, where every request is a real
/// HTTP exchange and no correlation is needed.
pub struct HttpConnector<C> {
    http: reqwest::Client,
    base_url: String,
    cipher: C,
}

impl<C: Cipher> HttpConnector<C> {
    pub fn builder(host: impl Into<String>) -> HttpConnectorBuilder {
        HttpConnectorBuilder::new(host)
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "sending GET request");
        let resp = self
            .http
            .get(&url)
            .header(USER_AGENT, HTTP_USER_AGENT)
            .send()
            .await
            .map_err(|e| send_error(e, path))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Protocol {
                path: path.to_string(),
                status: status.to_string(),
            });
        }

        let body = resp.text().await?;
        let plaintext = self
            .cipher
            .decrypt(body.trim())
            .map_err(|_| Error::Encryption { path: path.to_string() })?;
        let data: Value = serde_json::from_str(plaintext.trim_end_matches('\0'))
            .map_err(|_| Error::Encryption { path: path.to_string() })?;
        if data.is_null() || data.as_object().is_some_and(|m| m.is_empty()) {
            return Err(Error::DeviceData { path: path.to_string() });
        }
        trace!(path, %data, "GET response");
        Ok(data)
    }

    pub async fn put(&self, path: &str, value: Value) -> Result<bool> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, %value, "sending PUT request");
        let body = self.cipher.encrypt(value_message(&value).as_bytes());
        let resp = self
            .http
            .put(&url)
            .header(USER_AGENT, HTTP_USER_AGENT)
            .header(CONTENT_TYPE, CONTENT_TYPE_JSON)
            .body(body)
            .send()
            .await
            .map_err(|e| send_error(e, path))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        warn!(path, %status, "write rejected");
        Ok(false)
    }
}

impl<C: Cipher> Device for HttpConnector<C> {
    async fn get(&self, path: &str) -> Result<Value> {
        HttpConnector::get(self, path).await
    }

    async fn put(&self, path: &str, value: Value) -> Result<bool> {
        HttpConnector::put(self, path, value).await
    }
}

fn send_error(e: reqwest::Error, path: &str) -> Error {
    if e.is_timeout() {
        Error::Timeout { path: path.to_string() }
    } else {
        Error::Connect(e.to_string())
    }
}
