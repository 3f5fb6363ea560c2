//! Embedder for OpenAI-compatible `/embeddings` endpoints.
//!
//! DeepSeek, OpenAI, DashScope (Ali) and the Claude-compatible gateway all
//! speak the same request/response shape and differ only in base URL, model
//! name and the environment variable holding the API key.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedder, EmbedderError};
use crate::config::{EmbeddingConfig, ProviderKind};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EmbedderError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, base_url, model, api_key, dimensions))
    }

    /// Use an already configured HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
        dimensions: usize,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key: api_key.into(),
            dimensions,
        }
    }

    /// Build from configuration, reading the API key from the process environment.
    pub fn from_config(kind: ProviderKind, config: &EmbeddingConfig) -> Result<Self, EmbedderError> {
        Self::from_config_with(kind, config, |name| std::env::var(name).ok())
    }

    pub(crate) fn from_config_with(
        kind: ProviderKind,
        config: &EmbeddingConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, EmbedderError> {
        let (Some(default_url), Some(default_model), Some(key_var)) =
            (kind.default_base_url(), kind.default_model(), kind.api_key_env())
        else {
            return Err(EmbedderError::Request(format!(
                "provider {kind} is not an HTTP provider"
            )));
        };

        let api_key = lookup(key_var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| EmbedderError::MissingApiKey(key_var.to_string()))?;

        Self::new(
            config.base_url.as_deref().unwrap_or(default_url),
            config.model.as_deref().unwrap_or(default_model),
            api_key,
            config.dimensions,
            config.timeout(),
        )
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting {} embeddings from {}", texts.len(), self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
                encoding_format: "float",
            })
            .send()
            .await
            .map_err(|e| EmbedderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedderError::InvalidResponse(e.to_string()))?;

        into_vectors(parsed, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Order the returned embeddings by their `index` field and check the count.
fn into_vectors(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let mut data = response.data;
    if data.len() != expected {
        return Err(EmbedderError::CountMismatch {
            expected,
            actual: data.len(),
        });
    }

    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
        if data.iter().enumerate().any(|(i, d)| d.index != Some(i)) {
            return Err(EmbedderError::InvalidResponse(
                "embedding indices are not a permutation of the inputs".to_string(),
            ));
        }
    }

    Ok(data.into_iter().map(|d| d.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    fn parse(json: &str) -> EmbeddingResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_into_vectors_orders_by_index() {
        let response = parse(
            r#"{"data":[{"embedding":[2.0],"index":1},{"embedding":[1.0],"index":0}],"model":"m"}"#,
        );
        let vectors = into_vectors(response, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_into_vectors_without_index_keeps_order() {
        let response = parse(r#"{"data":[{"embedding":[3.0]},{"embedding":[4.0]}]}"#);
        let vectors = into_vectors(response, 2).unwrap();
        assert_eq!(vectors, vec![vec![3.0], vec![4.0]]);
    }

    #[test]
    fn test_into_vectors_count_mismatch() {
        let response = parse(r#"{"data":[{"embedding":[1.0],"index":0}]}"#);
        let err = into_vectors(response, 2).unwrap_err();
        assert!(matches!(
            err,
            EmbedderError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_into_vectors_duplicate_index() {
        let response = parse(
            r#"{"data":[{"embedding":[1.0],"index":0},{"embedding":[2.0],"index":0}]}"#,
        );
        assert!(matches!(
            into_vectors(response, 2),
            Err(EmbedderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_request_body_shape() {
        let input = vec!["a".to_string(), "b".to_string()];
        let body = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-v4",
            input: &input,
            encoding_format: "float",
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "text-embedding-v4",
                "input": ["a", "b"],
                "encoding_format": "float",
            })
        );
    }

    #[test]
    fn test_from_config_uses_preset() {
        let config = EmbeddingConfig {
            provider: ProviderKind::Ali,
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAiEmbedder::from_config_with(ProviderKind::Ali, &config, |name| {
            (name == "DASHSCOPE_API_KEY").then(|| "sk-test".to_string())
        })
        .unwrap();
        assert_eq!(
            embedder.endpoint(),
            "https://dashscope.aliyuncs.com/compatible-mode/v1/embeddings"
        );
        assert_eq!(embedder.model(), "text-embedding-v4");
        assert_eq!(embedder.dimensions(), config.dimensions);
    }

    #[test]
    fn test_from_config_overrides() {
        let config = EmbeddingConfig {
            provider: ProviderKind::OpenAi,
            base_url: Some("http://localhost:8080/v1/".to_string()),
            model: Some("bge-m3".to_string()),
            ..EmbeddingConfig::default()
        };
        let embedder = OpenAiEmbedder::from_config_with(ProviderKind::OpenAi, &config, |_| {
            Some("key".to_string())
        })
        .unwrap();
        assert_eq!(embedder.endpoint(), "http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.model(), "bge-m3");
    }

    #[test]
    fn test_from_config_missing_key() {
        let config = EmbeddingConfig::default();
        let err = OpenAiEmbedder::from_config_with(ProviderKind::DeepSeek, &config, |_| None)
            .err()
            .unwrap();
        assert!(matches!(err, EmbedderError::MissingApiKey(ref var) if var == "DEEPSEEK_API_KEY"));
    }

    // ── HTTP round trips against a local listener ────────────────────

    /// Read one HTTP/1.1 request (headers plus `content-length` body).
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let body_len = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + body_len {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Answer a single request with `status` and `body`; yields the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let request = read_request(&mut stream).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            request
        });
        (format!("http://{addr}/v1"), handle)
    }

    fn local_embedder(base_url: &str) -> OpenAiEmbedder {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        OpenAiEmbedder::with_client(client, base_url, "text-embedding-3-small", "sk-test", 2)
    }

    fn inputs() -> Vec<String> {
        vec!["first".to_string(), "second".to_string()]
    }

    #[tokio::test]
    async fn test_embed_batch_posts_with_bearer_auth() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"data":[{"embedding":[0.0,1.0],"index":1},{"embedding":[1.0,0.0],"index":0}]}"#,
        )
        .await;

        let vectors = local_embedder(&base_url).embed_batch(&inputs()).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);

        let request = server.await.unwrap();
        let lower = request.to_ascii_lowercase();
        assert!(lower.starts_with("post /v1/embeddings http/1.1"), "{request}");
        assert!(lower.contains("authorization: bearer sk-test"), "{request}");
        assert!(request.contains(r#""input":["first","second"]"#), "{request}");
        assert!(request.contains(r#""encoding_format":"float""#), "{request}");
    }

    #[tokio::test]
    async fn test_embed_batch_error_status() {
        let (base_url, server) = serve_once(
            "401 Unauthorized",
            r#"{"error":{"message":"invalid api key"}}"#,
        )
        .await;

        let err = local_embedder(&base_url).embed_batch(&inputs()).await.unwrap_err();
        match err {
            EmbedderError::Api { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid api key"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_embed_batch_malformed_body() {
        let (base_url, server) = serve_once("200 OK", "not json at all").await;

        let err = local_embedder(&base_url).embed_batch(&inputs()).await.unwrap_err();
        assert!(matches!(err, EmbedderError::InvalidResponse(_)), "got {err:?}");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_embed_batch_short_response() {
        let (base_url, server) =
            serve_once("200 OK", r#"{"data":[{"embedding":[1.0,0.0],"index":0}]}"#).await;

        let err = local_embedder(&base_url).embed_batch(&inputs()).await.unwrap_err();
        assert!(matches!(
            err,
            EmbedderError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_embed_batch_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = local_embedder(&format!("http://{addr}/v1"))
            .embed_batch(&inputs())
            .await
            .unwrap_err();
        assert!(matches!(err, EmbedderError::Request(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_embed_batch_empty_input_skips_request() {
        // Nothing listens here; an empty batch must not touch the network.
        let vectors = local_embedder("http://127.0.0.1:9/v1")
            .embed_batch(&[])
            .await
            .unwrap();
        assert!(vectors.is_empty());
    }
}
