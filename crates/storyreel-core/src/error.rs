//! Storyreel Error Definitions
//!
//! Defines error types used throughout the engine.

use thiserror::Error;

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Credential Errors
    // =========================================================================
    #[error("No API credential configured")]
    CredentialMissing,

    #[error("Credential rejected: {0}")]
    CredentialInvalid(String),

    // =========================================================================
    // Gateway Errors
    // =========================================================================
    #[error("Story draft failed: {0}")]
    StructureDraftFailed(String),

    #[error("Scene render failed: {0}")]
    SceneRenderFailed(String),

    #[error("Provider response contained no image payload")]
    NoImageProduced,

    #[error("AI request failed: {0}")]
    RequestFailed(String),

    #[error("Provider API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Provider response did not match the expected schema: {0}")]
    SchemaViolation(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Encryption error: {0}")]
    CryptoError(String),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// True when the error should be recorded on a single scene rather than
    /// failing the whole job.
    pub fn is_scene_scoped(&self) -> bool {
        matches!(
            self,
            CoreError::SceneRenderFailed(_) | CoreError::NoImageProduced
        )
    }

    /// Short user-facing message without internal detail.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_scoped_classification() {
        assert!(CoreError::NoImageProduced.is_scene_scoped());
        assert!(CoreError::SceneRenderFailed("x".into()).is_scene_scoped());
        assert!(!CoreError::CredentialMissing.is_scene_scoped());
        assert!(!CoreError::StructureDraftFailed("x".into()).is_scene_scoped());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CoreError = io.into();
        assert!(matches!(err, CoreError::IoError(_)));
    }
}
