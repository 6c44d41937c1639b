//! Storyboard Pipeline
//!
//! Job model, observable state, and the orchestrator that turns a topic into
//! a fully rendered storyboard. All mutation goes through [`state::JobState`]
//! so snapshots and events stay consistent with each other.

pub mod model;
pub mod orchestrator;
pub mod state;

pub use model::{
    JobId, JobStatus, RenderSettings, RenderState, Scene, StoryJob, StoryRequest,
};
pub use orchestrator::{Orchestrator, EXPORT_STAGGER, SCENE_RENDER_ERROR};
pub use state::{JobEvent, JobState};
