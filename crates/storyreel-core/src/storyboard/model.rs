//! Storyboard Domain Model
//!
//! The job aggregate: one topic, its drafted scenes, titles, and music
//! production, plus per-scene render progress.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::gateway::SceneDraft;
use crate::settings::{AppSettings, DEFAULT_SCENE_COUNT, MAX_SCENE_COUNT, MIN_SCENE_COUNT};
use crate::types::{AspectRatio, ImageData, ImageResolution, ModelTier, TitleCandidate};

/// Job identifier (ulid string).
pub type JobId = String;

// =============================================================================
// Render Settings
// =============================================================================

/// Image-generation options applied to every scene of a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSettings {
    pub model_tier: ModelTier,
    pub aspect_ratio: AspectRatio,
    pub resolution: ImageResolution,
}

impl From<&AppSettings> for RenderSettings {
    fn from(settings: &AppSettings) -> Self {
        Self {
            model_tier: settings.model_tier,
            aspect_ratio: settings.aspect_ratio,
            resolution: settings.resolution,
        }
    }
}

// =============================================================================
// Scenes
// =============================================================================

/// Render lifecycle of a single scene.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RenderState {
    #[default]
    Pending,
    Rendering,
    Ready,
    Failed,
}

/// One storyboard scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// Provider-assigned scene number; drives export filenames.
    pub scene_number: u32,
    pub narrative: String,
    pub image_prompt: String,
    pub motion_prompt: String,
    /// Rendered still as a `data:` URI once Ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub render_state: RenderState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_error: Option<String>,
}

impl Scene {
    /// A freshly seeded placeholder awaiting its render.
    pub fn pending(draft: SceneDraft) -> Self {
        Self {
            scene_number: draft.scene_number,
            narrative: draft.narrative,
            image_prompt: draft.image_prompt,
            motion_prompt: draft.motion_prompt,
            image: None,
            render_state: RenderState::Pending,
            render_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.render_state == RenderState::Ready && self.image.is_some()
    }
}

// =============================================================================
// Job Status
// =============================================================================

/// Job lifecycle. `Failed` is only reachable while drafting the structure;
/// per-scene render failures never fail the job.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobStatus {
    #[default]
    Idle,
    DraftingStructure,
    RenderingScenes,
    Complete,
    Failed {
        error: String,
    },
}

impl JobStatus {
    /// True while a pipeline run is in progress.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            JobStatus::DraftingStructure | JobStatus::RenderingScenes
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed { .. })
    }
}

// =============================================================================
// Story Job
// =============================================================================

/// The whole storyboard job, cloned out as a snapshot for observers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryJob {
    /// Current generation epoch; results from older epochs are discarded.
    pub job_id: JobId,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<ImageData>,
    pub scene_count: u32,
    pub status: JobStatus,
    pub scenes: Vec<Scene>,
    pub titles: Vec<TitleCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics_localized: Option<String>,
    pub render: RenderSettings,
}

impl Default for StoryJob {
    fn default() -> Self {
        Self {
            job_id: String::new(),
            topic: String::new(),
            reference_image: None,
            scene_count: DEFAULT_SCENE_COUNT,
            status: JobStatus::Idle,
            scenes: Vec::new(),
            titles: Vec::new(),
            music_prompt: None,
            lyrics: None,
            lyrics_localized: None,
            render: RenderSettings::default(),
        }
    }
}

impl StoryJob {
    /// Scenes holding a rendered image, in storyboard order.
    pub fn ready_scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.iter().filter(|s| s.is_ready())
    }

    pub fn ready_count(&self) -> usize {
        self.ready_scenes().count()
    }

    pub fn failed_count(&self) -> usize {
        self.scenes
            .iter()
            .filter(|s| s.render_state == RenderState::Failed)
            .count()
    }
}

// =============================================================================
// Story Request
// =============================================================================

/// Parameters for one generation run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRequest {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<ImageData>,
    pub scene_count: u32,
    pub render: RenderSettings,
}

impl StoryRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reference_image: None,
            scene_count: DEFAULT_SCENE_COUNT,
            render: RenderSettings::default(),
        }
    }

    pub fn with_scene_count(mut self, scene_count: u32) -> Self {
        self.scene_count = scene_count;
        self
    }

    pub fn with_reference_image(mut self, image: ImageData) -> Self {
        self.reference_image = Some(image);
        self
    }

    pub fn with_render(mut self, render: RenderSettings) -> Self {
        self.render = render;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.topic.trim().is_empty() {
            return Err(CoreError::ValidationError("Topic is empty".into()));
        }
        if !(MIN_SCENE_COUNT..=MAX_SCENE_COUNT).contains(&self.scene_count) {
            return Err(CoreError::ValidationError(format!(
                "Scene count must be between {MIN_SCENE_COUNT} and {MAX_SCENE_COUNT}, got {}",
                self.scene_count
            )));
        }
        Ok(())
    }
}
