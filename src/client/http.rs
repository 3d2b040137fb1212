//! HTTP transport for the model endpoint.
//!
//! One POST per attempt; no retry logic lives here. Failures are folded
//! into [`TransportFailure`] so the client can classify them uniformly.
//! The per-attempt deadline is enforced by the caller, not by reqwest.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::classify::TransportFailure;
use super::retry::{Transport, TransportResponse};

/// reqwest-backed [`Transport`] talking to a generate-style endpoint.
pub struct HttpTransport {
    endpoint: String,
    api_key: String,
    model: String,
    client: Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    parts: Vec<TextPart>,
}

#[derive(Deserialize)]
struct TextPart {
    text: String,
}

impl HttpTransport {
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Result<Self, TransportFailure> {
        let client = Client::builder()
            .build()
            .map_err(|e| TransportFailure::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, prompt: &str) -> Result<TransportResponse, TransportFailure> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
        };

        let response = self
            .client
            .post(format!("{}/v1/generate", self.endpoint))
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportFailure::Timeout
                } else if e.is_connect() {
                    TransportFailure::Connect(e.to_string())
                } else {
                    TransportFailure::Other(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportFailure::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| TransportFailure::Other(format!("malformed response body: {e}")))?;

        Ok(TransportResponse {
            parts: parsed.parts.into_iter().map(|p| p.text).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let transport = HttpTransport::new("https://api.example.com/", "key", "model").unwrap();
        assert_eq!(transport.endpoint, "https://api.example.com");
    }

    #[test]
    fn test_response_body_deserializes_parts() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"parts":[{"text":"a"},{"text":"b"}]}"#).unwrap();
        let texts: Vec<String> = parsed.parts.into_iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[test]
    fn test_response_body_without_parts_is_empty() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.parts.is_empty());
    }
}
