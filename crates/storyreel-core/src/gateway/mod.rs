//! AI Gateway
//!
//! Single boundary between the orchestration layer and the generative
//! provider. The gateway owns model selection, prompt framing, response
//! schemas, and payload parsing; callers get typed domain values and typed
//! errors, never raw provider responses.

pub mod client;
pub mod gemini;
pub mod schema;

pub use client::{
    GenerateReply, GenerateRequest, GenerativeClient, ImageConfig, InlinePayload,
    MockGenerativeClient, ReplyPart,
};
pub use gemini::GeminiClient;
pub use schema::{MotionPrompt, SceneDraft, StoryDraft, MOTION_SUFFIX};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::credentials::{Credential, CredentialResolver, CredentialValidator};
use crate::error::{CoreError, CoreResult};
use crate::settings::{MAX_SCENE_COUNT, MIN_SCENE_COUNT};
use crate::types::{AspectRatio, ImageData, ImageResolution, ModelTier, TitleCandidate};

// =============================================================================
// Model Identifiers
// =============================================================================

/// Fast text model: connection test, titles, motion prompts.
pub const MODEL_FLASH: &str = "gemini-3-flash-preview";
/// Story structure model.
pub const MODEL_STORY: &str = "gemini-3-pro-preview";
/// Standard-tier image model.
pub const MODEL_IMAGE_STANDARD: &str = "gemini-2.5-flash-image";
/// Pro-tier image model; the only one honoring an output resolution.
pub const MODEL_IMAGE_PRO: &str = "gemini-3-pro-image-preview";

// =============================================================================
// System Prompt Constants
// =============================================================================

const STORY_GUIDELINES: &str = r#"Guidelines:
1. 'description': A concise narrative summary of the scene.
2. 'imagePrompt': Visual details in English. Preserve subjects from reference images exactly.
3. 'i2vPrompt': Technical motion in English. ALWAYS end with: "There is no slow motion, and the scene unfolds quickly."
4. 'titles': Generate 10 YouTube SEO optimized titles in English, each with a Korean translation.
5. 'musicPrompt': A detailed billboard-style music prompt in English using EXACTLY this structure:
   Genre:
   Mood:
   Tempo:
   Instrumentation:
   Vocal Style:
   Lyrics Theme:
   Song Structure: Intro - Verse - Pre-Chorus - Chorus - Chorus (repeat) - Verse - Pre-Chorus - Chorus - Chorus (repeat) - Bridge - Final Chorus - Final Chorus (repeat)
   Mix:
6. 'lyrics': Full song lyrics in English with structure [Verse 1], [Chorus], etc.
7. 'lyricsKorean': A poetic and accurate Korean translation of the lyrics, following the same structure."#;

const MOTION_SYSTEM_PROMPT: &str = r#"You are a world-class AI film director and prompt engineer.
Analyze the request and any reference image, then write a cinematic image-to-video prompt.
The 'english' prompt must always end with: "There is no slow motion, and the scene unfolds quickly.""#;

fn story_system_instruction(scene_count: u32) -> String {
    format!(
        "You are an expert storyboard AI, a digital marketing specialist, and a legendary music producer.\n\
         Create a compelling story in exactly {scene_count} scenes.\n\n{STORY_GUIDELINES}"
    )
}

// =============================================================================
// Gateway Configuration
// =============================================================================

/// Model identifiers used by the gateway operations.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub flash_model: String,
    pub story_model: String,
    pub image_model_standard: String,
    pub image_model_pro: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            flash_model: MODEL_FLASH.to_string(),
            story_model: MODEL_STORY.to_string(),
            image_model_standard: MODEL_IMAGE_STANDARD.to_string(),
            image_model_pro: MODEL_IMAGE_PRO.to_string(),
        }
    }
}

impl GatewayConfig {
    fn image_model(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Standard => &self.image_model_standard,
            ModelTier::Pro => &self.image_model_pro,
        }
    }
}

// =============================================================================
// Story Gateway
// =============================================================================

/// Typed operations over a [`GenerativeClient`].
pub struct StoryGateway {
    client: Arc<dyn GenerativeClient>,
    resolver: Arc<CredentialResolver>,
    config: GatewayConfig,
}

impl StoryGateway {
    pub fn new(client: Arc<dyn GenerativeClient>, resolver: Arc<CredentialResolver>) -> Self {
        Self::with_config(client, resolver, GatewayConfig::default())
    }

    pub fn with_config(
        client: Arc<dyn GenerativeClient>,
        resolver: Arc<CredentialResolver>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            client,
            resolver,
            config,
        }
    }

    async fn credential(&self) -> CoreResult<Credential> {
        self.resolver
            .resolve()
            .await
            .ok_or(CoreError::CredentialMissing)
    }

    /// Minimal round trip proving the credential works.
    ///
    /// Success yields a fixed human-readable message; any transport or
    /// provider failure comes back as `CredentialInvalid` so the caller can
    /// treat the key as unusable without inspecting the cause.
    pub async fn test_connection(&self, credential: &Credential) -> CoreResult<String> {
        let request = GenerateRequest::new(
            self.config.flash_model.clone(),
            "Connection test. Reply with 'OK'.",
        );

        match self.client.generate(credential, request).await {
            Ok(reply) if reply.text().is_some() => {
                Ok("Connection successful. Gemini is ready.".to_string())
            }
            Ok(_) => Err(CoreError::CredentialInvalid(
                "Received empty response from Gemini.".to_string(),
            )),
            Err(e) => {
                let raw = e.to_string();
                let message = if raw.contains("API_KEY_INVALID")
                    || raw.contains("API key not valid")
                    || raw.contains("entity was not found")
                {
                    "The API key is not valid. Please check it and try again.".to_string()
                } else {
                    raw
                };
                Err(CoreError::CredentialInvalid(message))
            }
        }
    }

    /// Drafts a complete story structure: scenes, titles, and the music
    /// production. Every scene's motion prompt is normalized here; the suffix
    /// rule is never delegated to the provider.
    pub async fn draft_story(
        &self,
        topic: &str,
        reference_image: Option<&ImageData>,
        scene_count: u32,
    ) -> CoreResult<StoryDraft> {
        if !(MIN_SCENE_COUNT..=MAX_SCENE_COUNT).contains(&scene_count) {
            return Err(CoreError::ValidationError(format!(
                "Scene count must be between {MIN_SCENE_COUNT} and {MAX_SCENE_COUNT}, got {scene_count}"
            )));
        }

        let credential = self.credential().await?;

        let mut request = GenerateRequest::new(
            self.config.story_model.clone(),
            format!("Create a story and music production for: {topic}"),
        )
        .with_system(story_system_instruction(scene_count))
        .with_temperature(0.7)
        .with_response_schema(schema::story_response_schema(scene_count));
        if let Some(image) = reference_image {
            request = request.with_inline_image(image.clone());
        }

        debug!(
            model = %request.model,
            scene_count,
            with_reference = reference_image.is_some(),
            "drafting story structure"
        );

        let reply = self.client.generate(&credential, request).await?;
        let text = reply
            .text()
            .ok_or_else(|| CoreError::SchemaViolation("Story draft reply had no text".into()))?;

        let draft = schema::parse_story_payload(&text, scene_count)?;
        info!(
            scenes = draft.scenes.len(),
            titles = draft.titles.len(),
            "story structure drafted"
        );
        Ok(draft)
    }

    /// Regenerates the title list on its own.
    pub async fn draft_titles(&self, topic: &str) -> CoreResult<Vec<TitleCandidate>> {
        let credential = self.credential().await?;

        let request = GenerateRequest::new(
            self.config.flash_model.clone(),
            format!("Generate 10 SEO titles for: {topic}"),
        )
        .with_response_schema(schema::titles_response_schema());

        let reply = self.client.generate(&credential, request).await?;
        let text = reply
            .text()
            .ok_or_else(|| CoreError::SchemaViolation("Titles reply had no text".into()))?;
        schema::parse_titles_payload(&text)
    }

    /// Renders one still image and returns it as a `data:` URI.
    pub async fn render_image(
        &self,
        tier: ModelTier,
        prompt: &str,
        aspect_ratio: AspectRatio,
        resolution: ImageResolution,
        reference_image: Option<&ImageData>,
    ) -> CoreResult<String> {
        let credential = self.credential().await?;

        let image_config = ImageConfig {
            aspect_ratio: aspect_ratio.as_str().to_string(),
            // Resolution only reaches the wire on the Pro model.
            image_size: match tier {
                ModelTier::Pro => Some(resolution.as_str().to_string()),
                ModelTier::Standard => None,
            },
        };

        let mut request = GenerateRequest::new(self.config.image_model(tier).to_string(), prompt)
            .with_image_config(image_config);
        if let Some(image) = reference_image {
            request = request.with_inline_image(image.clone());
        }

        debug!(model = %request.model, tier = %tier, "rendering scene image");

        let reply = self.client.generate(&credential, request).await?;
        match reply.first_inline() {
            Some(payload) => Ok(format!("data:image/png;base64,{}", payload.data)),
            None => Err(CoreError::NoImageProduced),
        }
    }

    /// Expands a plain-language description into an image-to-video motion
    /// prompt pair. The English half is suffix-normalized like scene prompts.
    pub async fn compose_motion_prompt(
        &self,
        description: &str,
        reference_image: Option<&ImageData>,
    ) -> CoreResult<MotionPrompt> {
        let credential = self.credential().await?;

        let mut request = GenerateRequest::new(
            self.config.flash_model.clone(),
            format!("Analyze and create a video prompt: \"{description}\""),
        )
        .with_system(MOTION_SYSTEM_PROMPT)
        .with_temperature(0.8)
        .with_response_schema(schema::motion_prompt_response_schema());
        if let Some(image) = reference_image {
            request = request.with_inline_image(image.clone());
        }

        let reply = self.client.generate(&credential, request).await?;
        let text = reply
            .text()
            .ok_or_else(|| CoreError::SchemaViolation("Motion prompt reply had no text".into()))?;
        schema::parse_motion_payload(&text)
    }
}

#[async_trait]
impl CredentialValidator for StoryGateway {
    async fn validate(&self, candidate: &str) -> CoreResult<String> {
        self.test_connection(&Credential::new(candidate)).await
    }
}

// =============================================================================
// Tests
// =============================================================================
