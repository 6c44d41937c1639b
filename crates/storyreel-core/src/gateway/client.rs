//! Generative provider abstraction.
//!
//! [`GenerativeClient`] is the seam between the gateway's typed operations
//! and the provider's HTTP protocol. The real implementation lives in
//! [`super::gemini`]; tests script [`MockGenerativeClient`].

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::credentials::Credential;
use crate::error::{CoreError, CoreResult};
use crate::types::ImageData;

// =============================================================================
// Request / Reply Types
// =============================================================================

/// Image generation options forwarded inside the generation config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    pub aspect_ratio: String,
    /// Only set for the model tier that honors it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
}

/// A single content-generation request.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub model: String,
    pub text: String,
    /// Sent ahead of the text part when present.
    pub inline_image: Option<ImageData>,
    pub system_instruction: Option<String>,
    pub temperature: Option<f32>,
    /// JSON response schema; setting it also switches the response MIME type
    /// to `application/json`.
    pub response_schema: Option<serde_json::Value>,
    pub image_config: Option<ImageConfig>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            text: text.into(),
            inline_image: None,
            system_instruction: None,
            temperature: None,
            response_schema: None,
            image_config: None,
        }
    }

    pub fn with_inline_image(mut self, image: ImageData) -> Self {
        self.inline_image = Some(image);
        self
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_image_config(mut self, config: ImageConfig) -> Self {
        self.image_config = Some(config);
        self
    }
}

/// An inline binary payload in a response part, base64-encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlinePayload {
    pub mime_type: String,
    pub data: String,
}

/// One part of a reply: text, an inline payload, or (rarely) both.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplyPart {
    pub text: Option<String>,
    pub inline_data: Option<InlinePayload>,
}

/// Provider reply, reduced to its content parts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GenerateReply {
    pub model: String,
    pub parts: Vec<ReplyPart>,
}

impl GenerateReply {
    /// Builds a single-text-part reply.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            model: String::new(),
            parts: vec![ReplyPart {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }

    /// Builds a single-image-part reply.
    pub fn from_image(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            model: String::new(),
            parts: vec![ReplyPart {
                text: None,
                inline_data: Some(InlinePayload {
                    mime_type: mime_type.into(),
                    data: data.into(),
                }),
            }],
        }
    }

    /// All text parts joined in order, or `None` when the reply carries no
    /// text. Long replies arrive split across several parts; parsers must
    /// see the whole document.
    pub fn text(&self) -> Option<String> {
        let joined: String = self
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if joined.trim().is_empty() {
            None
        } else {
            Some(joined)
        }
    }

    /// First inline payload in the content parts.
    pub fn first_inline(&self) -> Option<&InlinePayload> {
        self.parts.iter().find_map(|p| p.inline_data.as_ref())
    }
}

// =============================================================================
// GenerativeClient Trait
// =============================================================================

/// Transport-level client for a generative provider.
///
/// The credential travels with every call; resolution happens above this
/// layer so a candidate key can be exercised before it is ever stored.
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Issues one generation request.
    async fn generate(
        &self,
        credential: &Credential,
        request: GenerateRequest,
    ) -> CoreResult<GenerateReply>;

    /// Cheap reachability check. Default says yes.
    async fn health_check(&self, _credential: &Credential) -> CoreResult<()> {
        Ok(())
    }
}

// =============================================================================
// Mock Client (for tests)
// =============================================================================

type Responder = dyn Fn(&GenerateRequest) -> CoreResult<GenerateReply> + Send + Sync;

/// Scriptable client that records every request it receives.
///
/// Behavior is either a fixed queue of replies (consumed in call order) or a
/// responder closure inspecting each request; the closure wins when both are
/// configured.
pub struct MockGenerativeClient {
    queued: Mutex<VecDeque<CoreResult<GenerateReply>>>,
    responder: Option<Box<Responder>>,
    calls: Mutex<Vec<GenerateRequest>>,
}

impl Default for MockGenerativeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerativeClient {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            responder: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Routes every request through `responder`.
    pub fn with_responder(
        responder: impl Fn(&GenerateRequest) -> CoreResult<GenerateReply> + Send + Sync + 'static,
    ) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            responder: Some(Box::new(responder)),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Appends a scripted reply to the queue.
    pub fn push_reply(&self, reply: CoreResult<GenerateReply>) {
        self.queued.lock().expect("mock queue lock").push_back(reply);
    }

    /// Every request seen so far, in arrival order.
    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.calls.lock().expect("mock calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock calls lock").len()
    }

    /// Requests issued against `model`.
    pub fn calls_for_model(&self, model: &str) -> Vec<GenerateRequest> {
        self.calls()
            .into_iter()
            .filter(|c| c.model == model)
            .collect()
    }
}

#[async_trait]
impl GenerativeClient for MockGenerativeClient {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        _credential: &Credential,
        request: GenerateRequest,
    ) -> CoreResult<GenerateReply> {
        self.calls
            .lock()
            .expect("mock calls lock")
            .push(request.clone());

        if let Some(responder) = &self.responder {
            return responder(&request);
        }

        match self.queued.lock().expect("mock queue lock").pop_front() {
            Some(reply) => reply,
            None => Err(CoreError::RequestFailed(
                "Mock client has no scripted reply".into(),
            )),
        }
    }
}
