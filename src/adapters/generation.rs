use super::{GenerationRequest, GenerationService, PortFuture};
use crate::error::{Result, VibeError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    think: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: Option<String>,
}

/// Client for an Ollama-style `POST /api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    endpoint: Url,
    model: String,
}

impl HttpGenerationClient {
    /// # Errors
    ///
    /// Returns `Config` when `base_url` is not a valid URL.
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self> {
        let base = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))
            .map_err(|e| VibeError::Config(format!("Invalid generation service URL: {e}")))?;
        let endpoint = base
            .join("api/generate")
            .map_err(|e| VibeError::Config(format!("Invalid generation service URL: {e}")))?;
        Ok(Self {
            client: Client::new(),
            endpoint,
            model: model.into(),
        })
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(&self, request: &GenerationRequest) -> Result<String> {
        let body = GenerateBody {
            model: &self.model,
            prompt: &request.prompt,
            stream: false,
            think: false,
            format: request.format.to_value(),
        };
        debug!(endpoint = %self.endpoint, model = %self.model, "generation request");

        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "generation service unreachable");
                VibeError::ServiceUnavailable(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(VibeError::ServiceUnavailable(format!("HTTP {status}: {text}")));
        }

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| VibeError::MalformedResponse(format!("reply is not JSON: {e}")))?;
        let text = reply
            .response
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| VibeError::MalformedResponse("empty response".to_string()))?;

        if request.format.requires_json() {
            serde_json::from_str::<Value>(&text).map_err(|e| {
                VibeError::MalformedResponse(format!("response is not valid JSON: {e}"))
            })?;
        }
        Ok(text)
    }
}

impl GenerationService for HttpGenerationClient {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> PortFuture<'a, String> {
        Box::pin(self.post(request))
    }
}

/// Parses a response text that must be a JSON object.
///
/// # Errors
///
/// Returns `MalformedResponse` for non-JSON text or a non-object value.
pub fn parse_json_object(text: &str) -> Result<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(VibeError::MalformedResponse(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(e) => Err(VibeError::MalformedResponse(format!(
            "response is not valid JSON: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

    use super::{parse_json_object, HttpGenerationClient};
    use crate::adapters::{GenerationRequest, GenerationService};
    use crate::error::VibeError;
    use crate::schema::ResponseFormat;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned reply and hands back the request body it received.
    async fn given_a_service_replying(reply: Value) -> (String, tokio::task::JoinHandle<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = Vec::new();
            let mut chunk = [0_u8; 4096];
            let body = loop {
                let read = socket.read(&mut chunk).await.unwrap();
                buffer.extend_from_slice(&chunk[..read]);
                let text = String::from_utf8_lossy(&buffer).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buffer.len() >= split + 4 + length {
                        break buffer[split + 4..split + 4 + length].to_vec();
                    }
                }
                if read == 0 {
                    break Vec::new();
                }
            };
            let payload = reply.to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
                payload.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            serde_json::from_slice(&body).unwrap()
        });
        (base, handle)
    }

    fn when_requesting(format: ResponseFormat) -> GenerationRequest {
        GenerationRequest::new("Task: hello", format, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn request_body_carries_model_and_format() {
        let (base, server) =
            given_a_service_replying(json!({"response": "{\"ok\": true}"})).await;
        let client = HttpGenerationClient::new(&base, "qwen2.5:32b").unwrap();

        let text = client.generate(&when_requesting(ResponseFormat::Json)).await.unwrap();
        assert_eq!(text, "{\"ok\": true}");

        let sent = server.await.unwrap();
        assert_eq!(sent["model"], "qwen2.5:32b");
        assert_eq!(sent["prompt"], "Task: hello");
        assert_eq!(sent["stream"], false);
        assert_eq!(sent["think"], false);
        assert_eq!(sent["format"], "json");
    }

    #[tokio::test]
    async fn free_text_request_omits_format() {
        let (base, server) = given_a_service_replying(json!({"response": "plain words"})).await;
        let client = HttpGenerationClient::new(&base, "m").unwrap();
        let text = client
            .generate(&when_requesting(ResponseFormat::FreeText))
            .await
            .unwrap();
        assert_eq!(text, "plain words");
        assert!(server.await.unwrap().get("format").is_none());
    }

    #[tokio::test]
    async fn non_json_response_on_json_call_is_malformed() {
        let (base, _server) = given_a_service_replying(json!({"response": "not json"})).await;
        let client = HttpGenerationClient::new(&base, "m").unwrap();
        let err = client
            .generate(&when_requesting(ResponseFormat::Json))
            .await
            .unwrap_err();
        assert!(matches!(err, VibeError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn missing_response_field_is_malformed() {
        let (base, _server) = given_a_service_replying(json!({"done": true})).await;
        let client = HttpGenerationClient::new(&base, "m").unwrap();
        let err = client
            .generate(&when_requesting(ResponseFormat::FreeText))
            .await
            .unwrap_err();
        assert!(matches!(err, VibeError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let client = HttpGenerationClient::new(&base, "m").unwrap();
        let err = client
            .generate(&when_requesting(ResponseFormat::FreeText))
            .await
            .unwrap_err();
        assert!(matches!(err, VibeError::ServiceUnavailable(_)));
    }

    #[test]
    fn endpoint_is_joined_onto_base() {
        let client = HttpGenerationClient::new("http://localhost:11434/", "m").unwrap();
        assert_eq!(client.endpoint().as_str(), "http://localhost:11434/api/generate");
        assert!(HttpGenerationClient::new("::nope", "m").is_err());
    }

    #[test]
    fn json_object_parsing() {
        assert!(parse_json_object("{\"a\": 1}").is_ok());
        assert!(parse_json_object("[1, 2]").is_err());
        assert!(parse_json_object("nope").is_err());
    }
}
