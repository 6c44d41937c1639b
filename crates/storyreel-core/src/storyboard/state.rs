//! Shared Job State
//!
//! One `StoryJob` behind a `tokio::sync::RwLock`, observed through cloned
//! snapshots and an event channel per subscriber. All mutation goes through
//! [`JobState::update`], which applies the closure against the latest value
//! and drops it when the job epoch has moved on.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use super::model::{JobStatus, RenderState, StoryJob};

// =============================================================================
// Job Events
// =============================================================================

/// Progress notifications for observers (UI, CLI progress lines).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    StatusChanged {
        status: JobStatus,
    },
    /// The structure draft landed; placeholders are seeded.
    #[serde(rename_all = "camelCase")]
    StructureReady {
        scene_count: usize,
        title_count: usize,
    },
    /// One scene moved through its render lifecycle.
    #[serde(rename_all = "camelCase")]
    SceneUpdated {
        index: usize,
        scene_number: u32,
        state: RenderState,
    },
    /// Every render task has finished.
    Settled {
        ready: usize,
        failed: usize,
    },
    /// Generation was requested without a usable credential.
    CredentialRequired,
}

// =============================================================================
// Job State
// =============================================================================

/// Shared handle to the current job and its observers.
#[derive(Clone)]
pub struct JobState {
    job: Arc<RwLock<StoryJob>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<JobEvent>>>>,
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

impl JobState {
    pub fn new() -> Self {
        Self {
            job: Arc::new(RwLock::new(StoryJob::default())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cloned view of the current job.
    pub async fn snapshot(&self) -> StoryJob {
        self.job.read().await.clone()
    }

    /// Registers an observer; it receives every event from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("subscriber list lock")
            .push(tx);
        rx
    }

    /// Fans an event out to all live subscribers, pruning closed ones.
    pub fn emit(&self, event: JobEvent) {
        self.subscribers
            .lock()
            .expect("subscriber list lock")
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Replaces the whole job, starting a new epoch.
    pub async fn replace(&self, job: StoryJob) {
        *self.job.write().await = job;
    }

    /// Applies `f` under the write lock if `job_id` is still the current
    /// epoch. Returns whether the mutation was applied; a stale result is
    /// dropped here rather than clobbering the newer job.
    pub async fn update<F>(&self, job_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut StoryJob),
    {
        let mut guard = self.job.write().await;
        if guard.job_id != job_id {
            debug!(
                stale = job_id,
                current = %guard.job_id,
                "discarding update for a superseded job"
            );
            return false;
        }
        f(&mut guard);
        true
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("subscriber list lock").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_reflects_updates() {
        let state = JobState::new();
        state
            .replace(StoryJob {
                job_id: "job-1".into(),
                topic: "t".into(),
                ..StoryJob::default()
            })
            .await;

        let applied = state
            .update("job-1", |job| job.status = JobStatus::DraftingStructure)
            .await;
        assert!(applied);
        assert_eq!(
            state.snapshot().await.status,
            JobStatus::DraftingStructure
        );
    }

    #[tokio::test]
    async fn stale_epoch_update_is_discarded() {
        let state = JobState::new();
        state
            .replace(StoryJob {
                job_id: "job-2".into(),
                ..StoryJob::default()
            })
            .await;

        let applied = state
            .update("job-1", |job| job.status = JobStatus::Complete)
            .await;
        assert!(!applied);
        assert_eq!(state.snapshot().await.status, JobStatus::Idle);
    }

    #[tokio::test]
    async fn every_subscriber_receives_events() {
        let state = JobState::new();
        let mut first = state.subscribe();
        let mut second = state.subscribe();

        state.emit(JobEvent::CredentialRequired);

        assert_eq!(first.recv().await, Some(JobEvent::CredentialRequired));
        assert_eq!(second.recv().await, Some(JobEvent::CredentialRequired));
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let state = JobState::new();
        let first = state.subscribe();
        let mut second = state.subscribe();
        assert_eq!(state.subscriber_count(), 2);

        drop(first);
        state.emit(JobEvent::Settled {
            ready: 1,
            failed: 0,
        });

        assert_eq!(state.subscriber_count(), 1);
        assert!(matches!(
            second.recv().await,
            Some(JobEvent::Settled { ready: 1, failed: 0 })
        ));
    }

    #[test]
    fn event_wire_shape_is_camel_case() {
        let event = JobEvent::SceneUpdated {
            index: 2,
            scene_number: 3,
            state: RenderState::Ready,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sceneUpdated");
        assert_eq!(json["sceneNumber"], 3);
        assert_eq!(json["state"], "ready");
    }
}
