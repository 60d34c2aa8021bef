//! HTTPS client for a KMS conforming to the ETSI GS QKD 014 subset used by
//! this daemon: a producer endpoint (`enc_keys`) and a consumer endpoint
//! (`dec_keys`), each returning one `{key_ID, key}` pair.

mod tls;

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;

use crate::config::Config;
use crate::error::DaemonError;

/// A single key pair as returned by the KMS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KmsKey {
    pub key_id: String,
    pub key: String,
}

impl KmsKey {
    pub fn is_empty(&self) -> bool {
        self.key_id.is_empty() || self.key.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct ResponseKey {
    #[serde(rename = "key_ID")]
    key_id: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct ResponseKeys {
    keys: Vec<ResponseKey>,
}

pub struct KmsClient {
    base_url: String,
    client: Client,
    max_retries: u32,
    base_delay: Duration,
}

impl KmsClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let rustls_config = tls::build_rustls_config(cfg)?;
        let client = Client::builder()
            .use_rustls_tls()
            .use_preconfigured_tls(rustls_config)
            .timeout(cfg.kms_http_timeout)
            .build()
            .context("failed to build KMS HTTP client")?;

        Ok(Self {
            base_url: cfg.kms_url.trim_end_matches('/').to_string(),
            client,
            max_retries: cfg.kms_backoff_max_retries,
            base_delay: cfg.kms_backoff_base_delay,
        })
    }

    #[cfg(test)]
    fn new_for_test(base_url: String, max_retries: u32, base_delay: Duration) -> Self {
        Self {
            base_url,
            client: Client::new(),
            max_retries,
            base_delay,
        }
    }

    pub async fn get_new_key(&self) -> Result<KmsKey, DaemonError> {
        let uri = format!("{}/enc_keys?number=1&size=256", self.base_url);
        self.request_with_retries(&uri).await
    }

    pub async fn get_key_by_id(&self, key_id: &str) -> Result<KmsKey, DaemonError> {
        let uri = format!("{}/dec_keys?key_ID={key_id}", self.base_url);
        self.request_with_retries(&uri).await
    }

    async fn request_with_retries(&self, uri: &str) -> Result<KmsKey, DaemonError> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(uri).await {
                Ok(key) => return Ok(key),
                Err(err) if attempt < self.max_retries => {
                    let delay = self.base_delay * 2u32.pow(attempt);
                    warn!(
                        "KMS request to {uri} failed (attempt {}/{}): {err}; retrying in {delay:?}",
                        attempt + 1,
                        self.max_retries + 1
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn request_once(&self, uri: &str) -> Result<KmsKey, DaemonError> {
        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| DaemonError::KmsUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DaemonError::KmsUnreachable(format!(
                "HTTP {status}: {body}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DaemonError::KmsUnreachable(e.to_string()))?;

        let parsed: ResponseKeys = serde_json::from_str(&body)
            .map_err(|_| DaemonError::KmsProtocolError { body: body.clone() })?;

        let Some(first) = parsed.keys.into_iter().next() else {
            return Err(DaemonError::KmsEmptyResponse);
        };

        let key = KmsKey {
            key_id: first.key_id,
            key: first.key,
        };
        if key.is_empty() {
            return Err(DaemonError::KmsEmptyResponse);
        }

        debug!("KMS returned key_id={}", key.key_id);
        Ok(key)
    }
}
