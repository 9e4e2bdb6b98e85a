//! HTTP-backed remote cache client.
//!
//! Optional collaborator serving precomputed embeddings by cache-key
//! batch, so that a refresh can skip local computation for file
//! versions someone else has already embedded.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::IndexError;
use crate::error::Result;
use crate::traits::RemoteCacheClient;
use crate::traits::RemoteChunk;

/// HTTP client for a remote embedding cache service.
#[derive(Debug, Clone)]
pub struct HttpRemoteCacheClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRemoteCacheClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RemoteCacheClient for HttpRemoteCacheClient {
    fn connected(&self) -> bool {
        !self.base_url.is_empty()
    }

    async fn get(
        &self,
        keys: &[String],
        label: &str,
        repo_name: &str,
    ) -> Result<HashMap<String, Vec<RemoteChunk>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/cache/batch", self.base_url);
        let request = BatchRequest {
            keys: keys.to_vec(),
            label: label.to_string(),
            repo_name: repo_name.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| IndexError::RemoteCacheFailed { cause: e.to_string() })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::RemoteCacheFailed {
                cause: format!("remote cache returned {status}: {body}"),
            });
        }

        let parsed: BatchResponse = response
            .json()
            .await
            .map_err(|e| IndexError::RemoteCacheFailed { cause: e.to_string() })?;

        let mut files = HashMap::new();
        let requested: std::collections::HashSet<&String> = keys.iter().collect();
        for (key, chunks) in parsed.files {
            if !requested.contains(&key) {
                tracing::warn!(cache_key = %key, "remote cache returned an unrequested key; dropping");
                continue;
            }
            files.insert(
                key,
                chunks
                    .into_iter()
                    .map(|c| RemoteChunk {
                        vector: c.vector,
                        start_line: c.start_line,
                        end_line: c.end_line,
                        contents: c.contents,
                    })
                    .collect(),
            );
        }
        Ok(files)
    }
}

#[derive(Debug, Serialize)]
struct BatchRequest {
    keys: Vec<String>,
    label: String,
    repo_name: String,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    files: HashMap<String, Vec<RemoteChunkWire>>,
}

#[derive(Debug, Deserialize)]
struct RemoteChunkWire {
    vector: Vec<f32>,
    start_line: i32,
    end_line: i32,
    contents: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_when_base_url_empty() {
        let client = HttpRemoteCacheClient::new("");
        assert!(!client.connected());
    }

    #[test]
    fn connected_when_base_url_set() {
        let client = HttpRemoteCacheClient::new("https://cache.example.com");
        assert!(client.connected());
    }

    #[tokio::test]
    async fn empty_keys_short_circuits_without_a_request() {
        let client = HttpRemoteCacheClient::new("https://cache.invalid.example");
        let result = client.get(&[], "embeddings", "repo").await.unwrap();
        assert!(result.is_empty());
    }
}
