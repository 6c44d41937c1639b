//! Storyboard Pipeline Orchestrator
//!
//! Drives a generation run end to end: credential pre-flight, structure
//! draft, concurrent per-scene rendering, and settlement. Scene renders are
//! independent; one failing scene never aborts its siblings or the job.
//! A new run starts a new job epoch, and results from an older epoch are
//! discarded when they arrive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::model::{JobStatus, RenderSettings, RenderState, Scene, StoryJob, StoryRequest};
use super::state::{JobEvent, JobState};
use crate::credentials::CredentialResolver;
use crate::error::{CoreError, CoreResult};
use crate::fsutil;
use crate::gateway::StoryGateway;
use crate::history::{HistoryEntry, HistoryLedger};
use crate::types::{decode_data_uri, ImageData};

/// Fixed message recorded on a scene whose render failed.
pub const SCENE_RENDER_ERROR: &str = "Image generation failed.";

/// Delay between consecutive scene exports.
pub const EXPORT_STAGGER: Duration = Duration::from_millis(500);

// =============================================================================
// Orchestrator
// =============================================================================

/// Owns the job state and runs the generation pipeline against the gateway.
pub struct Orchestrator {
    gateway: Arc<StoryGateway>,
    resolver: Arc<CredentialResolver>,
    history: Arc<HistoryLedger>,
    state: JobState,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<StoryGateway>,
        resolver: Arc<CredentialResolver>,
        history: Arc<HistoryLedger>,
    ) -> Self {
        Self {
            gateway,
            resolver,
            history,
            state: JobState::new(),
        }
    }

    /// Cloned view of the current job.
    pub async fn snapshot(&self) -> StoryJob {
        self.state.snapshot().await
    }

    /// Observer channel for job events.
    pub fn subscribe(&self) -> tokio::sync::mpsc::UnboundedReceiver<JobEvent> {
        self.state.subscribe()
    }

    /// Runs the full pipeline for `request` and returns the settled job.
    ///
    /// Starting a run supersedes any job still in flight; the old epoch's
    /// render results are discarded as they arrive.
    pub async fn generate(&self, request: StoryRequest) -> CoreResult<StoryJob> {
        request.validate()?;

        // Pre-flight: without a credential the provider is never contacted.
        if self.resolver.resolve().await.is_none() {
            match self.resolver.request_setup().await {
                Ok(true) => info!("Credential picker opened for setup"),
                Ok(false) => {}
                Err(e) => warn!("Credential setup request failed: {}", e),
            }
            self.state.emit(JobEvent::CredentialRequired);
            return Err(CoreError::CredentialMissing);
        }

        let job_id = ulid::Ulid::new().to_string();
        info!(job_id = %job_id, topic = %request.topic, scenes = request.scene_count, "starting generation");

        self.state
            .replace(StoryJob {
                job_id: job_id.clone(),
                topic: request.topic.clone(),
                reference_image: request.reference_image.clone(),
                scene_count: request.scene_count,
                status: JobStatus::DraftingStructure,
                render: request.render,
                ..StoryJob::default()
            })
            .await;
        self.state.emit(JobEvent::StatusChanged {
            status: JobStatus::DraftingStructure,
        });

        let draft = match self
            .gateway
            .draft_story(
                &request.topic,
                request.reference_image.as_ref(),
                request.scene_count,
            )
            .await
        {
            Ok(draft) => draft,
            Err(e) => {
                let message = e.user_message();
                let failed = JobStatus::Failed {
                    error: message.clone(),
                };
                if self
                    .state
                    .update(&job_id, |job| job.status = failed.clone())
                    .await
                {
                    self.state
                        .emit(JobEvent::StatusChanged { status: failed });
                }
                return Err(CoreError::StructureDraftFailed(message));
            }
        };

        // Seed placeholders in provider order, then fan out the renders.
        let scenes: Vec<Scene> = draft.scenes.into_iter().map(Scene::pending).collect();
        let scene_count = scenes.len();
        let title_count = draft.titles.len();
        let applied = self
            .state
            .update(&job_id, |job| {
                job.scenes = scenes.clone();
                job.titles = draft.titles.clone();
                job.music_prompt = Some(draft.music_prompt.clone());
                job.lyrics = Some(draft.lyrics.clone());
                job.lyrics_localized = Some(draft.lyrics_localized.clone());
                job.status = JobStatus::RenderingScenes;
            })
            .await;
        if !applied {
            // A newer run replaced this job between draft and seeding.
            return Ok(self.state.snapshot().await);
        }
        self.state.emit(JobEvent::StructureReady {
            scene_count,
            title_count,
        });
        self.state.emit(JobEvent::StatusChanged {
            status: JobStatus::RenderingScenes,
        });

        let reference = Arc::new(request.reference_image);
        let mut set = JoinSet::new();
        for (index, scene) in scenes.iter().enumerate() {
            set.spawn(Self::render_scene_task(
                self.gateway.clone(),
                self.state.clone(),
                self.history.clone(),
                job_id.clone(),
                index,
                scene.scene_number,
                scene.image_prompt.clone(),
                reference.clone(),
                request.render,
            ));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, ok)) => debug!(index, ok, "render task settled"),
                Err(e) => warn!("Render task panicked: {}", e),
            }
        }

        let mut ready = 0;
        let mut failed = 0;
        let settled = self
            .state
            .update(&job_id, |job| {
                job.status = JobStatus::Complete;
                ready = job.ready_count();
                failed = job.failed_count();
            })
            .await;
        if settled {
            self.state.emit(JobEvent::StatusChanged {
                status: JobStatus::Complete,
            });
            self.state.emit(JobEvent::Settled { ready, failed });
            info!(job_id = %job_id, ready, failed, "generation settled");
        }

        Ok(self.state.snapshot().await)
    }

    #[allow(clippy::too_many_arguments)]
    async fn render_scene_task(
        gateway: Arc<StoryGateway>,
        state: JobState,
        history: Arc<HistoryLedger>,
        job_id: String,
        index: usize,
        scene_number: u32,
        prompt: String,
        reference: Arc<Option<ImageData>>,
        render: RenderSettings,
    ) -> (usize, bool) {
        let marked = state
            .update(&job_id, |job| {
                if let Some(scene) = job.scenes.get_mut(index) {
                    scene.render_state = RenderState::Rendering;
                }
            })
            .await;
        if !marked {
            // Superseded before this scene even started.
            return (index, false);
        }
        state.emit(JobEvent::SceneUpdated {
            index,
            scene_number,
            state: RenderState::Rendering,
        });

        let outcome = gateway
            .render_image(
                render.model_tier,
                &prompt,
                render.aspect_ratio,
                render.resolution,
                (*reference).as_ref(),
            )
            .await;

        match outcome {
            Ok(uri) => {
                let applied = state
                    .update(&job_id, |job| {
                        if let Some(scene) = job.scenes.get_mut(index) {
                            scene.image = Some(uri.clone());
                            scene.render_state = RenderState::Ready;
                            scene.render_error = None;
                        }
                    })
                    .await;
                if applied {
                    if let Err(e) = history.append(HistoryEntry::image(uri, prompt)) {
                        warn!("Failed to record history entry: {}", e);
                    }
                    state.emit(JobEvent::SceneUpdated {
                        index,
                        scene_number,
                        state: RenderState::Ready,
                    });
                }
                (index, true)
            }
            Err(e) => {
                warn!(scene = scene_number, "Scene render failed: {}", e);
                let applied = state
                    .update(&job_id, |job| {
                        if let Some(scene) = job.scenes.get_mut(index) {
                            scene.render_state = RenderState::Failed;
                            scene.render_error = Some(SCENE_RENDER_ERROR.to_string());
                        }
                    })
                    .await;
                if applied {
                    state.emit(JobEvent::SceneUpdated {
                        index,
                        scene_number,
                        state: RenderState::Failed,
                    });
                }
                (index, false)
            }
        }
    }

    /// Re-renders a single scene with a replacement prompt. On success both
    /// the image and the stored prompt are replaced; on failure the previous
    /// image is kept and the scene is marked Failed.
    pub async fn regenerate_scene(&self, index: usize, new_prompt: &str) -> CoreResult<StoryJob> {
        let prompt = new_prompt.trim();
        if prompt.is_empty() {
            return Err(CoreError::ValidationError(
                "Replacement prompt is empty".into(),
            ));
        }

        let snapshot = self.state.snapshot().await;
        let scene = snapshot
            .scenes
            .get(index)
            .ok_or_else(|| CoreError::NotFound(format!("Scene index {index}")))?;
        let scene_number = scene.scene_number;
        let job_id = snapshot.job_id.clone();

        info!(scene = scene_number, "regenerating scene");
        self.state
            .update(&job_id, |job| {
                if let Some(scene) = job.scenes.get_mut(index) {
                    scene.render_state = RenderState::Rendering;
                }
            })
            .await;
        self.state.emit(JobEvent::SceneUpdated {
            index,
            scene_number,
            state: RenderState::Rendering,
        });

        let outcome = self
            .gateway
            .render_image(
                snapshot.render.model_tier,
                prompt,
                snapshot.render.aspect_ratio,
                snapshot.render.resolution,
                snapshot.reference_image.as_ref(),
            )
            .await;

        match outcome {
            Ok(uri) => {
                let applied = self
                    .state
                    .update(&job_id, |job| {
                        if let Some(scene) = job.scenes.get_mut(index) {
                            scene.image = Some(uri.clone());
                            scene.image_prompt = prompt.to_string();
                            scene.render_state = RenderState::Ready;
                            scene.render_error = None;
                        }
                    })
                    .await;
                if applied {
                    if let Err(e) = self.history.append(HistoryEntry::image(uri, prompt)) {
                        warn!("Failed to record history entry: {}", e);
                    }
                    self.state.emit(JobEvent::SceneUpdated {
                        index,
                        scene_number,
                        state: RenderState::Ready,
                    });
                }
                Ok(self.state.snapshot().await)
            }
            Err(e) => {
                warn!(scene = scene_number, "Scene regeneration failed: {}", e);
                // The previous image stays; only the state flips to Failed.
                let applied = self
                    .state
                    .update(&job_id, |job| {
                        if let Some(scene) = job.scenes.get_mut(index) {
                            scene.render_state = RenderState::Failed;
                            scene.render_error = Some(SCENE_RENDER_ERROR.to_string());
                        }
                    })
                    .await;
                if applied {
                    self.state.emit(JobEvent::SceneUpdated {
                        index,
                        scene_number,
                        state: RenderState::Failed,
                    });
                }
                Err(CoreError::SceneRenderFailed(SCENE_RENDER_ERROR.to_string()))
            }
        }
    }

    /// Replaces the title list without touching scenes.
    pub async fn regenerate_titles(&self, topic: &str) -> CoreResult<StoryJob> {
        let titles = self.gateway.draft_titles(topic).await?;
        let job_id = self.state.snapshot().await.job_id;
        self.state
            .update(&job_id, |job| job.titles = titles.clone())
            .await;
        Ok(self.state.snapshot().await)
    }

    /// Writes every Ready scene to `dir` as `Scene_<sceneNumber>.png`, with a
    /// fixed stagger between writes. Undecodable payloads are skipped with a
    /// warning. Returns the written paths in storyboard order.
    pub async fn export_scenes(&self, dir: &Path) -> CoreResult<Vec<PathBuf>> {
        let snapshot = self.state.snapshot().await;
        let mut written = Vec::new();

        for scene in snapshot.ready_scenes() {
            let uri = match &scene.image {
                Some(uri) => uri,
                None => continue,
            };
            let bytes = match decode_data_uri(uri) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(scene = scene.scene_number, "Skipping undecodable image: {}", e);
                    continue;
                }
            };

            if !written.is_empty() {
                tokio::time::sleep(EXPORT_STAGGER).await;
            }

            let path = dir.join(format!("Scene_{}.png", scene.scene_number));
            fsutil::atomic_write_bytes(&path, &bytes)?;
            debug!(path = %path.display(), "exported scene");
            written.push(path);
        }

        info!(count = written.len(), dir = %dir.display(), "scene export finished");
        Ok(written)
    }
}

// =============================================================================
// Tests
// =============================================================================
