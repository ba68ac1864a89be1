//! Profile embeddings.

use async_trait::async_trait;
use std::sync::Arc;

use crate::client::ApiClient;
use crate::error::AiError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Length of every vector this embedder returns.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError>;
}

/// Cut `text` to at most `max_chars` characters, never splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(values: Vec<f32>) -> Vec<f32> {
    let norm: f32 = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter().map(|x| x / norm).collect()
    } else {
        values
    }
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct ApiEmbedder {
    client: Arc<ApiClient>,
    dimensions: usize,
}

impl ApiEmbedder {
    pub fn new(client: Arc<ApiClient>, dimensions: usize) -> Self {
        Self { client, dimensions }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    fn dimension(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AiError> {
        if text.trim().is_empty() {
            return Err(AiError::InvalidInput("cannot embed empty text".to_string()));
        }
        let vector = self.client.embed(text, self.dimensions).await?;
        if vector.len() != self.dimensions {
            return Err(AiError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        Ok(normalize(vector))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiClientConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_normalize() {
        let v = normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    async fn embedder_returning(vector: Vec<f32>, dimensions: usize) -> (ApiEmbedder, MockServer) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": vector}]
            })))
            .mount(&server)
            .await;
        let client = ApiClient::new(
            ApiClientConfig::openai("k", "m")
                .with_base_url(server.uri())
                .with_max_retries(1),
        )
        .unwrap();
        (ApiEmbedder::new(Arc::new(client), dimensions), server)
    }

    #[tokio::test]
    async fn test_embed_normalizes() {
        let (embedder, _server) = embedder_returning(vec![0.0, 2.0], 2).await;
        assert_eq!(embedder.embed("text").await.unwrap(), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_error() {
        let (embedder, _server) = embedder_returning(vec![1.0, 2.0, 3.0], 2).await;
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, AiError::DimensionMismatch { expected: 2, actual: 3 }));
    }
}
