// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{GenerationConfig, Secret};

use super::sse::fragment_stream;
use super::{
    Completion, FragmentStream, GenerationError, GenerationRequest, Generator, ModelRegistry,
    Usage,
};

/// Longest provider error body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

/// What `timeout_ms` bounds for one request.
#[derive(Clone, Copy)]
enum Deadline {
    /// Headers and the full body.
    WholeResponse,
    /// Headers only. A stream runs for as long as the model keeps producing.
    Headers,
}

/// Generator speaking the OpenAI chat-completions protocol over reqwest.
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<Secret>,
    timeout: Duration,
    registry: Arc<ModelRegistry>,
}

impl OpenAiCompatibleGenerator {
    pub fn new(config: &GenerationConfig, registry: Arc<ModelRegistry>) -> Self {
        Self::with_client(reqwest::Client::new(), config, registry)
    }

    pub fn with_client(
        client: reqwest::Client,
        config: &GenerationConfig,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            registry,
        }
    }

    fn body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.registry.model_id(request.role),
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": stream,
        })
    }

    async fn send(
        &self,
        body: serde_json::Value,
        deadline: Deadline,
    ) -> Result<reqwest::Response, GenerationError> {
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Deadline::WholeResponse = deadline {
            req = req.timeout(self.timeout);
        }
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose());
        }

        let resp = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| GenerationError::Timeout)?
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = tokio::time::timeout(self.timeout, resp.text())
                .await
                .ok()
                .and_then(Result::ok)
                .unwrap_or_default();
            let snippet: String = text.chars().take(MAX_ERROR_BODY).collect();
            return Err(GenerationError::Upstream {
                status: status.as_u16(),
                message: self.registry.sanitize(&snippet),
            });
        }
        Ok(resp)
    }

    fn transport_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Transport(self.registry.sanitize(&e.to_string()))
        }
    }
}

#[derive(Deserialize)]
struct CompletionBody {
    choices: Vec<CompletionChoice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiCompatibleGenerator {
    async fn complete(&self, request: GenerationRequest) -> Result<Completion, GenerationError> {
        let resp = self
            .send(self.body(&request, false), Deadline::WholeResponse)
            .await?;
        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        let parsed: CompletionBody = serde_json::from_slice(&bytes)
            .map_err(|e| GenerationError::Malformed(self.registry.sanitize(&e.to_string())))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::Malformed("response has no choices".into()))?;

        Ok(Completion {
            text,
            usage: parsed.usage,
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<FragmentStream, GenerationError> {
        let resp = self
            .send(self.body(&request, true), Deadline::Headers)
            .await?;
        Ok(fragment_stream(resp.bytes_stream(), self.registry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelIds;
    use crate::generation::ModelRole;
    use crate::message::ChatMessage;
    use crate::routing::Specialist;
    use futures_util::StreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> GenerationConfig {
        GenerationConfig {
            base_url: base_url.to_string(),
            api_key: Some(Secret::new("sk-test")),
            timeout_ms: 2_000,
            history_window: 10,
            default_temperature: 0.7,
            default_max_tokens: 256,
            models: ModelIds {
                theory: "vendor/theory".into(),
                code: "vendor/code".into(),
                math: "vendor/math".into(),
                safety: "vendor/guard".into(),
            },
        }
    }

    fn generator(server: &MockServer) -> OpenAiCompatibleGenerator {
        let cfg = config(&server.uri());
        let registry = Arc::new(ModelRegistry::new(cfg.models.clone()));
        OpenAiCompatibleGenerator::new(&cfg, registry)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            role: ModelRole::Specialist(Specialist::Code),
            messages: vec![ChatMessage::user("write a loop")],
            temperature: 0.2,
            max_tokens: 64,
        }
    }

    #[tokio::test]
    async fn complete_sends_mapped_model_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "vendor/code",
                "stream": false,
                "max_tokens": 64
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "for i in range(3): pass"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let completion = generator(&server).complete(request()).await.unwrap();
        assert_eq!(completion.text, "for i in range(3): pass");
        assert_eq!(completion.usage.unwrap().total_tokens, 12);
    }

    #[tokio::test]
    async fn upstream_error_body_is_sanitized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string("model vendor/code does not exist"),
            )
            .mount(&server)
            .await;

        let err = generator(&server).complete(request()).await.unwrap_err();
        match &err {
            GenerationError::Upstream { status, message } => {
                assert_eq!(*status, 404);
                assert!(!message.contains("vendor/code"), "leaked: {message}");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_yields_fragments() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
            "data: [DONE]\n\n"
        );
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let stream = generator(&server).stream(request()).await.unwrap();
        let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments.concat(), "Hello world");
    }

    #[tokio::test]
    async fn connection_failure_is_transport_error() {
        // Nothing listens on this port once the server is dropped.
        let uri = {
            let server = MockServer::start().await;
            server.uri()
        };
        let cfg = config(&uri);
        let registry = Arc::new(ModelRegistry::new(cfg.models.clone()));
        let err = OpenAiCompatibleGenerator::new(&cfg, registry)
            .complete(request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_) | GenerationError::Timeout));
    }

    fn generator_with_timeout(base_url: &str, timeout_ms: u64) -> OpenAiCompatibleGenerator {
        let mut cfg = config(base_url);
        cfg.timeout_ms = timeout_ms;
        let registry = Arc::new(ModelRegistry::new(cfg.models.clone()));
        OpenAiCompatibleGenerator::new(&cfg, registry)
    }

    /// Serves one chunked SSE response whose second fragment arrives after
    /// `gap`. Returns the base URL.
    async fn slow_sse_server(gap: std::time::Duration) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let chunk = |data: &str| format!("{:x}\r\n{data}\r\n", data.len());
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
            socket.write_all(head.as_bytes()).await.unwrap();
            let first = chunk("data: {\"choices\":[{\"delta\":{\"content\":\"slow \"}}]}\n\n");
            socket.write_all(first.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();

            tokio::time::sleep(gap).await;

            let second = chunk(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"answer\"}}]}\n\n",
                "data: [DONE]\n\n"
            ));
            socket.write_all(second.as_bytes()).await.unwrap();
            socket.write_all(b"0\r\n\r\n").await.unwrap();
            socket.flush().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn stream_may_outlive_timeout_once_headers_arrive() {
        let base = slow_sse_server(std::time::Duration::from_millis(400)).await;
        let stream = generator_with_timeout(&base, 150)
            .stream(request())
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments.concat(), "slow answer");
    }

    #[tokio::test]
    async fn stream_headers_past_timeout_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string("data: [DONE]\n\n")
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let result = generator_with_timeout(&server.uri(), 100)
            .stream(request())
            .await;
        assert!(matches!(result, Err(GenerationError::Timeout)));
    }

    #[tokio::test]
    async fn slow_completion_is_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"choices": []}))
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = generator_with_timeout(&server.uri(), 100)
            .complete(request())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Timeout));
    }
}
