//! Embedding generation providers (spec §4.7): all present the same
//! `generate`/`generate_batch` interface over an in-memory deterministic
//! stub, a local ONNX model, or a remote HTTP embedding service. Grounded
//! on the `Embedder` trait shape from the teacher's memory layer and the
//! `HttpClient` abstraction from `model_spec::models_dev`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Default vector width used when dimension probing fails at startup
/// (spec §4.7).
pub const FALLBACK_DIMENSION: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds a single text into a vector of [`Embedder::dimension`].
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EngineError>;

    /// Embeds a batch of texts in one call, honoring [`Embedder::batch_size`].
    async fn generate_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EngineError> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size().max(1)) {
            for text in chunk {
                out.push(self.generate(text).await?);
            }
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
    fn batch_size(&self) -> usize {
        32
    }
}

/// Probes an embedder with a throwaway string and falls back to
/// [`FALLBACK_DIMENSION`] if the probe itself fails (spec §4.7: "detect
/// embedding dimensionality... fall back to 384 if detection fails").
pub async fn probe_dimension(embedder: &dyn Embedder) -> usize {
    match embedder.generate("dimension probe").await {
        Ok(vector) if !vector.is_empty() => vector.len(),
        _ => FALLBACK_DIMENSION,
    }
}

/// Deterministic hash-based embedder with no external dependencies, used
/// in tests and as the default when no provider is configured. Two calls
/// with identical text always produce identical vectors.
pub struct MemoryEmbedder {
    dimension: usize,
}

impl MemoryEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for MemoryEmbedder {
    fn default() -> Self {
        Self::new(FALLBACK_DIMENSION)
    }
}

#[async_trait]
impl Embedder for MemoryEmbedder {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let mut vector = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while vector.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest.iter() {
                if vector.len() == self.dimension {
                    break;
                }
                // Map into [-1, 1] so the stub behaves like a real embedding.
                vector.push((*byte as f32 / 127.5) - 1.0);
            }
            counter += 1;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Local ONNX-backed embedder (spec §4.7 "local ONNX model" provider).
/// Holds a loaded `ort` session and a pluggable tokenizer closure so the
/// model/tokenizer pairing can vary without touching this type.
pub struct OnnxEmbedder {
    session: std::sync::Mutex<ort::session::Session>,
    dimension: usize,
    tokenize: Box<dyn Fn(&str) -> Vec<i64> + Send + Sync>,
}

impl OnnxEmbedder {
    pub fn new(
        session: ort::session::Session,
        dimension: usize,
        tokenize: Box<dyn Fn(&str) -> Vec<i64> + Send + Sync>,
    ) -> Self {
        Self {
            session: std::sync::Mutex::new(session),
            dimension,
            tokenize,
        }
    }
}

#[async_trait]
impl Embedder for OnnxEmbedder {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let tokens = (self.tokenize)(text);
        let dimension = self.dimension;
        let session = &self.session;
        tokio::task::block_in_place(|| {
            let mut session = session.lock().expect("onnx session mutex poisoned");
            run_onnx_embedding(&mut session, &tokens, dimension)
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn run_onnx_embedding(
    session: &mut ort::session::Session,
    tokens: &[i64],
    dimension: usize,
) -> Result<Vec<f32>, EngineError> {
    let input = ort::value::Tensor::from_array(([1usize, tokens.len()], tokens.to_vec()))
        .map_err(|e| EngineError::semantic(format!("onnx input tensor: {e}")))?;
    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| EngineError::semantic(format!("onnx inference: {e}")))?;
    let (_, raw) = outputs[0]
        .try_extract_raw_tensor::<f32>()
        .map_err(|e| EngineError::semantic(format!("onnx output extraction: {e}")))?;
    let mut vector: Vec<f32> = raw.to_vec();
    vector.truncate(dimension);
    vector.resize(dimension, 0.0);
    Ok(vector)
}

/// Remote HTTP embedding provider (spec §4.7: "remote HTTP embedding
/// service"), compatible with ollama/openai-style `/embeddings` endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            dimension,
        }
    }
}

#[derive(serde::Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(serde::Deserialize)]
struct EmbeddingsResponse {
    #[serde(alias = "embeddings")]
    data: Vec<EmbeddingsDatum>,
}

#[derive(serde::Deserialize)]
struct EmbeddingsDatum {
    #[serde(alias = "embedding")]
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn generate(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let mut vectors = self.generate_batch(&[text]).await?;
        Ok(vectors.pop().unwrap_or_default())
    }

    async fn generate_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::semantic(format!("embedding request failed: {e}")))?
            .error_for_status()
            .map_err(|e| EngineError::semantic(format!("embedding endpoint returned an error: {e}")))?
            .json::<EmbeddingsResponse>()
            .await
            .map_err(|e| EngineError::semantic(format!("invalid embedding response: {e}")))?;
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_embedder_is_deterministic() {
        let embedder = MemoryEmbedder::new(16);
        let a = embedder.generate("fn main() {}").await.unwrap();
        let b = embedder.generate("fn main() {}").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn memory_embedder_varies_with_input() {
        let embedder = MemoryEmbedder::new(16);
        let a = embedder.generate("fn a() {}").await.unwrap();
        let b = embedder.generate("fn b() {}").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn probe_falls_back_to_384_when_probe_yields_nothing() {
        struct EmptyEmbedder;
        #[async_trait]
        impl Embedder for EmptyEmbedder {
            async fn generate(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
                Ok(Vec::new())
            }
            fn dimension(&self) -> usize {
                0
            }
        }
        let dim = probe_dimension(&EmptyEmbedder).await;
        assert_eq!(dim, FALLBACK_DIMENSION);
    }
}
