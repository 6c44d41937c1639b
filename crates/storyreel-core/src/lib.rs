//! Storyreel Core Library
//!
//! AI-driven storyboard and music video drafting engine. A topic goes in;
//! a structured story (scenes with narrative, image prompt, and motion
//! prompt), SEO title candidates, and a music production sheet come out,
//! with every scene rendered to an image through the configured provider.
//!
//! The crate is headless: front ends (the `storyreel` CLI, or a host shell)
//! wire a [`gateway::StoryGateway`] and a [`storyboard::Orchestrator`]
//! together and observe progress through [`storyboard::JobEvent`]s.

pub mod credentials;
pub mod error;
pub mod fsutil;
pub mod gateway;
pub mod history;
pub mod settings;
pub mod store;
pub mod storyboard;
pub mod types;

pub use error::{CoreError, CoreResult};

use std::path::Path;
use std::sync::OnceLock;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Installs the global tracing subscriber: a compact console layer on stderr
/// plus a daily-rolled file under `log_dir`.
///
/// The library never calls this itself; binaries do, once, at startup.
/// Repeat calls are harmless no-ops.
pub fn init_tracing(log_dir: &Path) {
    let _ = std::fs::create_dir_all(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, "storyreel.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    // Console output goes to stderr so piped stdout stays machine-readable.
    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);

    // Avoid panics if already initialized (tests, embedding hosts).
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_tracing_is_idempotent() {
        let dir = TempDir::new().unwrap();
        init_tracing(dir.path());
        init_tracing(dir.path());
        assert!(dir.path().exists());
    }
}
