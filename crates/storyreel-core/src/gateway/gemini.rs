//! Google Gemini Transport
//!
//! Implements [`GenerativeClient`] against the `generateContent` REST API.
//! The credential rides along with each call so a candidate key can be
//! validated before anything is persisted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::client::{
    GenerateReply, GenerateRequest, GenerativeClient, ImageConfig, InlinePayload, ReplyPart,
};
use crate::credentials::Credential;
use crate::error::{CoreError, CoreResult};

// =============================================================================
// Gemini Client
// =============================================================================

/// HTTP client for the Gemini `generateContent` endpoint.
pub struct GeminiClient {
    /// Base URL for API requests
    base_url: String,
    /// HTTP client
    client: reqwest::Client,
}

impl GeminiClient {
    /// Default Gemini API base URL
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com/v1beta";

    /// Default request timeout in seconds
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Creates a client with the stock base URL and timeout.
    pub fn new() -> CoreResult<Self> {
        Self::with_config(None, Self::DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with an optional base URL override.
    pub fn with_config(base_url: Option<String>, timeout_secs: u64) -> CoreResult<Self> {
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string());

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    fn build_generate_content_request(request: &GenerateRequest) -> GenerateContentRequest {
        // Reference image precedes the text part, matching how the provider
        // grounds an image-conditioned prompt.
        let mut parts = Vec::new();
        if let Some(image) = &request.inline_image {
            parts.push(Part {
                text: None,
                inline_data: Some(InlinePayload {
                    mime_type: image.mime_type.clone(),
                    data: image.base64_data.clone(),
                }),
            });
        }
        parts.push(Part {
            text: Some(request.text.clone()),
            inline_data: None,
        });

        let system_instruction = request
            .system_instruction
            .as_ref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| Content {
                role: None, // System instruction doesn't need a role
                parts: vec![Part {
                    text: Some(s.clone()),
                    inline_data: None,
                }],
            });

        // A response schema implies JSON output.
        let response_mime_type = request
            .response_schema
            .as_ref()
            .map(|_| "application/json".to_string());

        let generation_config = Some(GenerationConfig {
            temperature: request.temperature,
            response_mime_type,
            response_schema: request.response_schema.clone(),
            image_config: request.image_config.clone(),
        });

        GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            system_instruction,
            generation_config,
        }
    }
}

// =============================================================================
// Gemini API Types
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlinePayload>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

// =============================================================================
// GenerativeClient Implementation
// =============================================================================

#[async_trait]
impl GenerativeClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(
        &self,
        credential: &Credential,
        request: GenerateRequest,
    ) -> CoreResult<GenerateReply> {
        let model = request.model.clone();
        let api_request = Self::build_generate_content_request(&request);

        // API key rides in a header so it never lands in URLs or logs.
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential.expose())
            .header("Content-Type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| CoreError::RequestFailed(format!("Request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CoreError::RequestFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let envelope: ApiErrorEnvelope =
                serde_json::from_str(&body).unwrap_or(ApiErrorEnvelope {
                    error: ApiErrorDetail {
                        message: body.clone(),
                        status: None,
                    },
                });
            let message = match envelope.error.status {
                Some(s) => format!("{}: {}", s, envelope.error.message),
                None => envelope.error.message,
            };
            return Err(CoreError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| CoreError::RequestFailed(format!("Failed to parse response: {}", e)))?;

        // Check for blocked content
        if let Some(feedback) = &api_response.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                return Err(CoreError::RequestFailed(format!(
                    "Content blocked by Gemini safety filters: {}",
                    reason
                )));
            }
        }

        let candidates = api_response
            .candidates
            .ok_or_else(|| CoreError::RequestFailed("No candidates returned from Gemini".into()))?;

        let candidate = candidates
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::RequestFailed("Empty candidates array from Gemini".into()))?;

        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            tracing::warn!(model = %model, "Gemini reply was truncated at the token limit");
        }

        let parts = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| ReplyPart {
                        text: p.text,
                        inline_data: p.inline_data,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(GenerateReply { model, parts })
    }

    async fn health_check(&self, credential: &Credential) -> CoreResult<()> {
        // List models to check key validity and reachability.
        let url = format!("{}/models", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", credential.expose())
            .send()
            .await
            .map_err(|e| CoreError::RequestFailed(format!("Health check failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable response body>".to_string());

        Err(CoreError::ApiError {
            status: status.as_u16(),
            message: body,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageData;

    #[test]
    fn test_client_defaults() {
        let client = GeminiClient::new().unwrap();
        assert_eq!(client.base_url, GeminiClient::DEFAULT_BASE_URL);
        assert_eq!(client.name(), "gemini");
    }

    #[test]
    fn test_custom_base_url() {
        let client =
            GeminiClient::with_config(Some("https://custom.googleapis.com/v1".into()), 30).unwrap();
        assert_eq!(client.base_url, "https://custom.googleapis.com/v1");
    }

    #[test]
    fn test_blank_base_url_falls_back_to_default() {
        let client = GeminiClient::with_config(Some("   ".into()), 30).unwrap();
        assert_eq!(client.base_url, GeminiClient::DEFAULT_BASE_URL);
    }

    #[test]
    fn test_build_request_text_only() {
        let request = GenerateRequest::new("gemini-3-flash-preview", "Hello")
            .with_system("Reply tersely.")
            .with_temperature(0.5);

        let api_request = GeminiClient::build_generate_content_request(&request);

        assert_eq!(api_request.contents.len(), 1);
        assert_eq!(api_request.contents[0].role, Some("user".to_string()));
        assert_eq!(api_request.contents[0].parts.len(), 1);
        assert_eq!(
            api_request.contents[0].parts[0].text,
            Some("Hello".to_string())
        );

        let system_instruction = api_request.system_instruction.unwrap();
        assert_eq!(
            system_instruction.parts[0].text,
            Some("Reply tersely.".to_string())
        );

        let gen = api_request.generation_config.unwrap();
        assert_eq!(gen.temperature, Some(0.5));
        assert_eq!(gen.response_mime_type, None);
    }

    #[test]
    fn test_build_request_image_part_comes_first() {
        let reference = ImageData::from_bytes("image/jpeg", b"jpeg bytes");
        let request = GenerateRequest::new("gemini-2.5-flash-image", "A quiet harbor")
            .with_inline_image(reference);

        let api_request = GeminiClient::build_generate_content_request(&request);
        let parts = &api_request.contents[0].parts;

        assert_eq!(parts.len(), 2);
        assert!(parts[0].inline_data.is_some());
        assert_eq!(parts[0].text, None);
        assert_eq!(parts[1].text, Some("A quiet harbor".to_string()));
    }

    #[test]
    fn test_response_schema_implies_json_mime_type() {
        let request = GenerateRequest::new("gemini-3-pro-preview", "draft")
            .with_response_schema(serde_json::json!({"type": "OBJECT"}));

        let api_request = GeminiClient::build_generate_content_request(&request);
        let gen = api_request.generation_config.unwrap();

        assert_eq!(gen.response_mime_type, Some("application/json".to_string()));
        assert!(gen.response_schema.is_some());
    }

    #[test]
    fn test_request_serialization_skips_absent_fields() {
        let request = GenerateRequest::new("gemini-2.5-flash-image", "prompt").with_image_config(
            ImageConfig {
                aspect_ratio: "16:9".into(),
                image_size: None,
            },
        );

        let api_request = GeminiClient::build_generate_content_request(&request);
        let value = serde_json::to_value(&api_request).unwrap();

        assert!(value.get("systemInstruction").is_none());
        let gen = &value["generationConfig"];
        assert!(gen.get("temperature").is_none());
        assert_eq!(gen["imageConfig"]["aspectRatio"], "16:9");
        assert!(gen["imageConfig"].get("imageSize").is_none());
    }

    #[test]
    fn test_error_envelope_parses() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#;
        let envelope: ApiErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.error.message, "API key not valid.");
        assert_eq!(envelope.error.status.as_deref(), Some("INVALID_ARGUMENT"));
    }

    #[test]
    fn test_response_with_inline_image_parses() {
        let body = r#"{
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [{"inlineData": {"mimeType": "image/png", "data": "cGl4ZWxz"}}]
                },
                "finishReason": "STOP"
            }]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(body).unwrap();
        let candidate = &response.candidates.unwrap()[0];
        let part = &candidate.content.as_ref().unwrap().parts[0];
        assert_eq!(part.inline_data.as_ref().unwrap().mime_type, "image/png");
    }
}
