use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sentence-embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn model_id(&self) -> &str;
}

/// Client for any OpenAI-compatible `/embeddings` endpoint (text-embeddings-inference,
/// Ollama, vLLM, a hosted sentence-transformers server).
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), model: model.to_string(), api_key })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut req = self.client.post(&url).json(&EmbeddingRequest { input: vec![text], model: &self.model });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("embedding endpoint error {}: {}", status, body));
        }
        let parsed: EmbeddingResponse = resp.json().await?;
        let vec = parsed.data.into_iter().next().map(|d| d.embedding).ok_or_else(|| anyhow!("empty embedding result"))?;
        if vec.is_empty() {
            return Err(anyhow!("zero-length embedding"));
        }
        Ok(vec)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.request(text).await
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Deterministic bag-of-letters embedder: texts sharing letters point the same way.
    pub struct LetterEmbedder;

    impl LetterEmbedder {
        pub fn vector(text: &str) -> Vec<f32> {
            let mut v = vec![0.0f32; 26];
            for b in text.to_lowercase().bytes() {
                if b.is_ascii_lowercase() {
                    v[(b - b'a') as usize] += 1.0;
                }
            }
            v
        }
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(Self::vector(text))
        }

        fn model_id(&self) -> &str {
            "letters-26d"
        }
    }

    /// Always fails, for exercising degraded paths.
    pub struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(anyhow!("model offline"))
        }

        fn model_id(&self) -> &str {
            "broken"
        }
    }
}
