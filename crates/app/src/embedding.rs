//! HTTP embedding client: one-shot and batched vector generation,
//! cache-first, with exponential backoff on retryable failures.

use anyhow::Result;
use ragctl_core::embedding::EmbeddingProvider;
use ragctl_core::store::CacheStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;

const MAX_BATCH: usize = 128;
const EMBEDDING_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(32);
const MAX_RETRIES: u32 = 5;

pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    model: String,
    dims: usize,
    cache: Arc<dyn CacheStore>,
}

impl HttpEmbeddingClient {
    pub fn new(model: String, dims: usize, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            http: reqwest::Client::new(),
            model,
            dims,
            cache,
        }
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update(b"\0");
        hasher.update(text.as_bytes());
        format!("embedding:{:x}", hasher.finalize())
    }

    /// Embed a single string, consulting the cache first.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        Ok(self.embed_batch(&[text.to_string()]).await?.remove(0))
    }

    /// Embed a batch of up to [`MAX_BATCH`] strings, preserving order.
    /// Cache hits and misses within the batch are merged back into the
    /// original order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = self.cache_key(text);
            if let Some(value) = self.cache.get(&key).await.ok().flatten() {
                if let Ok(vec) = serde_json::from_value::<Vec<f32>>(value) {
                    results[i] = Some(vec);
                    continue;
                }
            }
            misses.push(i);
        }

        for chunk in misses.chunks(MAX_BATCH) {
            let miss_texts: Vec<&str> = chunk.iter().map(|&i| texts[i].as_str()).collect();
            let vectors = self.call_remote(&miss_texts).await?;
            for (offset, &i) in chunk.iter().enumerate() {
                let vec = vectors[offset].clone();
                let key = self.cache_key(&texts[i]);
                let _ = self
                    .cache
                    .put(&key, json!(vec), EMBEDDING_TTL)
                    .await;
                results[i] = Some(vec);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    /// Embed a whole document's worth of chunk texts in ≤128-sized
    /// batches, reporting progress after each batch.
    pub async fn embed_documents(
        &self,
        texts: &[String],
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            let vectors = self.embed_batch(chunk).await?;
            out.extend(vectors);
            progress(out.len(), texts.len());
        }
        Ok(out)
    }

    async fn call_remote(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let base_url = crate::config::env_or("EMBEDDING_BASE_URL", "http://localhost:11434");
        let api_key = std::env::var("EMBEDDING_API_KEY").ok();

        let mut attempt = 0u32;
        let mut backoff = RETRY_BASE;
        loop {
            let mut req = self
                .http
                .post(format!("{base_url}/v1/embeddings"))
                .json(&EmbeddingRequest {
                    model: self.model.clone(),
                    input: texts.iter().map(|s| s.to_string()).collect(),
                });
            if let Some(key) = &api_key {
                req = req.bearer_auth(key);
            }

            let resp = req.send().await;
            match resp {
                Ok(r) if r.status().is_success() => {
                    let body: EmbeddingResponse = r.json().await?;
                    return Ok(body.data.into_iter().map(|d| d.embedding).collect());
                }
                Ok(r) if r.status().as_u16() == 429 || r.status().is_server_error() => {
                    if attempt >= MAX_RETRIES {
                        return Err(GatewayError::RemoteUnavailable {
                            message: format!("embedding endpoint returned {}", r.status()),
                        });
                    }
                }
                Ok(r) => {
                    return Err(GatewayError::Validation {
                        message: format!("embedding endpoint returned {}", r.status()),
                    });
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt >= MAX_RETRIES {
                        return Err(GatewayError::RemoteUnavailable {
                            message: format!("embedding endpoint unreachable: {e}"),
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(RETRY_CAP);
            attempt += 1;
        }
    }
}

impl EmbeddingProvider for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}
