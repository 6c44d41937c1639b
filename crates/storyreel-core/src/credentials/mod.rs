//! Credential resolution and activation.
//!
//! The API credential can come from three places, tried in priority order:
//! a host-managed key broker (when the embedding environment provides one),
//! the manually activated key in the persisted store, and finally an
//! environment variable. Each source is a strategy that reports present or
//! absent; the first present source wins.
//!
//! Activation is validate-then-persist: a candidate key is only written to
//! the store (sealed, see [`cipher`]) after a live connection test against
//! the provider succeeds.

pub mod cipher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::store::{keys, SharedStateStore};

pub use cipher::CredentialCipher;

/// Environment variable consulted by the default source chain.
pub const DEFAULT_ENV_VAR: &str = "GEMINI_API_KEY";

// =============================================================================
// Credential
// =============================================================================

/// An opaque API token. Debug output is redacted so handles can be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for building provider requests.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Redacted preview safe for logs.
    pub fn redacted(&self) -> String {
        redact(&self.0)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

fn redact(value: &str) -> String {
    let chars = value.chars().count();
    if chars < 12 {
        "*".repeat(chars)
    } else {
        let head: String = value.chars().take(4).collect();
        let tail: String = value.chars().skip(chars - 4).collect();
        format!("{head}...{tail}")
    }
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// Host-provided credential selection facility.
///
/// Some embedding environments manage API keys themselves and expose a picker
/// UI; the engine only observes whether a selection is active and can ask for
/// the picker to be shown.
#[async_trait]
pub trait KeyBroker: Send + Sync {
    async fn has_active_credential(&self) -> bool;

    /// Returns the host-selected token, if any.
    async fn active_credential(&self) -> Option<String>;

    /// Side-effecting; the outcome is observed via `has_active_credential`.
    async fn open_credential_picker(&self) -> CoreResult<()>;
}

/// Live round-trip validation of a candidate credential. Implemented by the
/// gateway; kept as a trait so activation does not depend on it directly.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Returns a human-readable success message.
    async fn validate(&self, candidate: &str) -> CoreResult<String>;
}

// =============================================================================
// Credential Sources
// =============================================================================

/// One strategy in the resolution chain.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;
    async fn resolve(&self) -> Option<Credential>;
}

/// Source backed by a host [`KeyBroker`].
pub struct BrokerSource {
    broker: Arc<dyn KeyBroker>,
}

impl BrokerSource {
    pub fn new(broker: Arc<dyn KeyBroker>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl CredentialSource for BrokerSource {
    fn name(&self) -> &'static str {
        "host-broker"
    }

    async fn resolve(&self) -> Option<Credential> {
        if !self.broker.has_active_credential().await {
            return None;
        }
        self.broker.active_credential().await.map(Credential::new)
    }
}

/// Source backed by the sealed key in the persisted store.
pub struct StoredKeySource {
    store: SharedStateStore,
    cipher: Arc<CredentialCipher>,
}

impl StoredKeySource {
    pub fn new(store: SharedStateStore, cipher: Arc<CredentialCipher>) -> Self {
        Self { store, cipher }
    }
}

#[async_trait]
impl CredentialSource for StoredKeySource {
    fn name(&self) -> &'static str {
        "stored-key"
    }

    async fn resolve(&self) -> Option<Credential> {
        let envelope = match self.store.get(keys::API_KEY) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read stored credential: {}", e);
                return None;
            }
        };

        match self.cipher.open(&envelope) {
            Ok(token) => Some(Credential::new(token)),
            Err(e) => {
                warn!("Stored credential could not be opened: {}", e);
                None
            }
        }
    }
}

/// Source backed by an environment variable.
pub struct EnvKeySource {
    var: String,
}

impl EnvKeySource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl CredentialSource for EnvKeySource {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn resolve(&self) -> Option<Credential> {
        std::env::var(&self.var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(Credential::new)
    }
}

// =============================================================================
// CredentialResolver
// =============================================================================

/// Resolves the active credential and runs the activation flow.
pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
    store: SharedStateStore,
    cipher: Arc<CredentialCipher>,
    broker: Option<Arc<dyn KeyBroker>>,
    env_var: String,
    activated: AtomicBool,
}

impl CredentialResolver {
    /// Default chain: stored key, then environment (`GEMINI_API_KEY`).
    pub fn new(store: SharedStateStore, cipher: Arc<CredentialCipher>) -> Self {
        let activated = matches!(
            store.get(keys::API_KEY_ACTIVATED),
            Ok(Some(flag)) if flag == "true"
        );
        let mut resolver = Self {
            sources: Vec::new(),
            store,
            cipher,
            broker: None,
            env_var: DEFAULT_ENV_VAR.to_string(),
            activated: AtomicBool::new(activated),
        };
        resolver.rebuild_sources();
        resolver
    }

    /// Attaches a host broker as the highest-priority source.
    pub fn with_broker(mut self, broker: Arc<dyn KeyBroker>) -> Self {
        self.broker = Some(broker);
        self.rebuild_sources();
        self
    }

    /// Replaces the environment variable consulted by the last source.
    pub fn with_env_var(mut self, var: impl Into<String>) -> Self {
        self.env_var = var.into();
        self.rebuild_sources();
        self
    }

    fn rebuild_sources(&mut self) {
        let mut sources: Vec<Box<dyn CredentialSource>> = Vec::new();
        if let Some(broker) = &self.broker {
            sources.push(Box::new(BrokerSource::new(broker.clone())));
        }
        sources.push(Box::new(StoredKeySource::new(
            self.store.clone(),
            self.cipher.clone(),
        )));
        sources.push(Box::new(EnvKeySource::new(self.env_var.clone())));
        self.sources = sources;
    }

    /// Source names in resolution order.
    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// First present source wins.
    pub async fn resolve(&self) -> Option<Credential> {
        for source in &self.sources {
            if let Some(credential) = source.resolve().await {
                debug!(source = source.name(), "Resolved credential");
                return Some(credential);
            }
        }
        None
    }

    /// Validates `candidate` through a live round trip and persists it only
    /// on success. Returns the validator's success message.
    pub async fn activate(
        &self,
        candidate: &str,
        validator: &dyn CredentialValidator,
    ) -> CoreResult<String> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(CoreError::ValidationError("Credential is empty".into()));
        }
        if !trimmed.starts_with("AIza") {
            warn!("Credential does not match the expected format (AIza*), proceeding anyway");
        }

        let message = validator.validate(trimmed).await.map_err(|e| match e {
            CoreError::CredentialInvalid(m) => CoreError::CredentialInvalid(m),
            other => CoreError::CredentialInvalid(other.user_message()),
        })?;

        let envelope = self.cipher.seal(trimmed)?;
        self.store.set(keys::API_KEY, &envelope)?;
        self.store.set(keys::API_KEY_ACTIVATED, "true")?;
        self.activated.store(true, Ordering::SeqCst);

        info!("Credential activated: {}", redact(trimmed));
        Ok(message)
    }

    /// True when any source would currently yield a credential that has been
    /// through validation (or is host- or environment-managed).
    pub async fn is_active(&self) -> bool {
        if let Some(broker) = &self.broker {
            if broker.has_active_credential().await {
                return true;
            }
        }
        if self.activated.load(Ordering::SeqCst) {
            return true;
        }
        // An environment-provided key needs no activation ceremony.
        EnvKeySource::new(self.env_var.clone()).resolve().await.is_some()
    }

    /// Removes the stored key and activation flag.
    pub fn clear(&self) -> CoreResult<()> {
        self.store.remove(keys::API_KEY)?;
        self.store.remove(keys::API_KEY_ACTIVATED)?;
        self.activated.store(false, Ordering::SeqCst);
        info!("Stored credential cleared");
        Ok(())
    }

    /// Asks the host to show its credential picker. Returns `false` when no
    /// broker is attached and manual setup is the only option.
    pub async fn request_setup(&self) -> CoreResult<bool> {
        match &self.broker {
            Some(broker) => {
                broker.open_credential_picker().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct MockBroker {
        token: Option<String>,
        picker_opened: AtomicUsize,
    }

    impl MockBroker {
        fn with_token(token: &str) -> Self {
            Self {
                token: Some(token.to_string()),
                picker_opened: AtomicUsize::new(0),
            }
        }

        fn empty() -> Self {
            Self {
                token: None,
                picker_opened: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KeyBroker for MockBroker {
        async fn has_active_credential(&self) -> bool {
            self.token.is_some()
        }

        async fn active_credential(&self) -> Option<String> {
            self.token.clone()
        }

        async fn open_credential_picker(&self) -> CoreResult<()> {
            self.picker_opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct MockValidator {
        accept: bool,
        calls: AtomicUsize,
    }

    impl MockValidator {
        fn accepting() -> Self {
            Self {
                accept: true,
                calls: AtomicUsize::new(0),
            }
        }

        fn rejecting() -> Self {
            Self {
                accept: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CredentialValidator for MockValidator {
        async fn validate(&self, _candidate: &str) -> CoreResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                Ok("Connection successful. Gemini is ready.".to_string())
            } else {
                Err(CoreError::CredentialInvalid("key rejected".into()))
            }
        }
    }

    fn resolver_in(dir: &TempDir) -> CredentialResolver {
        let store: SharedStateStore = Arc::new(MemoryStore::new());
        let cipher = Arc::new(CredentialCipher::new(dir.path()).unwrap());
        CredentialResolver::new(store, cipher)
    }

    #[tokio::test]
    async fn resolves_nothing_when_all_sources_empty() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir).with_env_var("STORYREEL_TEST_UNSET_VAR");
        assert!(resolver.resolve().await.is_none());
        assert!(!resolver.is_active().await);
    }

    #[tokio::test]
    async fn broker_outranks_stored_key() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir)
            .with_env_var("STORYREEL_TEST_UNSET_VAR")
            .with_broker(Arc::new(MockBroker::with_token("broker-key")));

        resolver
            .activate("AIzaStoredKey1234", &MockValidator::accepting())
            .await
            .unwrap();

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.expose(), "broker-key");
        assert_eq!(
            resolver.source_names(),
            vec!["host-broker", "stored-key", "environment"]
        );
    }

    #[tokio::test]
    async fn inactive_broker_falls_through_to_stored_key() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir)
            .with_env_var("STORYREEL_TEST_UNSET_VAR")
            .with_broker(Arc::new(MockBroker::empty()));

        resolver
            .activate("AIzaStoredKey1234", &MockValidator::accepting())
            .await
            .unwrap();

        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.expose(), "AIzaStoredKey1234");
    }

    #[tokio::test]
    async fn env_var_is_last_resort() {
        let dir = TempDir::new().unwrap();
        let var = "STORYREEL_TEST_ENV_LAST_RESORT";
        std::env::set_var(var, "env-key");

        let resolver = resolver_in(&dir).with_env_var(var);
        let resolved = resolver.resolve().await.unwrap();
        assert_eq!(resolved.expose(), "env-key");
        assert!(resolver.is_active().await);

        std::env::remove_var(var);
    }

    #[tokio::test]
    async fn activation_persists_only_on_success() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir).with_env_var("STORYREEL_TEST_UNSET_VAR");

        let rejecting = MockValidator::rejecting();
        let err = resolver
            .activate("AIzaBadKey123456", &rejecting)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::CredentialInvalid(_)));
        assert_eq!(rejecting.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.resolve().await.is_none());
        assert!(!resolver.is_active().await);

        let accepting = MockValidator::accepting();
        let message = resolver
            .activate("AIzaGoodKey123456", &accepting)
            .await
            .unwrap();
        assert!(message.contains("Connection successful"));
        assert_eq!(
            resolver.resolve().await.unwrap().expose(),
            "AIzaGoodKey123456"
        );
        assert!(resolver.is_active().await);
    }

    #[tokio::test]
    async fn empty_candidate_rejected_without_validation_call() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir);

        let validator = MockValidator::accepting();
        let err = resolver.activate("   ", &validator).await.unwrap_err();
        assert!(matches!(err, CoreError::ValidationError(_)));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn clear_removes_stored_credential() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver_in(&dir).with_env_var("STORYREEL_TEST_UNSET_VAR");

        resolver
            .activate("AIzaClearMe123456", &MockValidator::accepting())
            .await
            .unwrap();
        assert!(resolver.resolve().await.is_some());

        resolver.clear().unwrap();
        assert!(resolver.resolve().await.is_none());
        assert!(!resolver.is_active().await);
    }

    #[tokio::test]
    async fn stored_credential_survives_resolver_restart() {
        let dir = TempDir::new().unwrap();
        let store: SharedStateStore = Arc::new(MemoryStore::new());
        let cipher = Arc::new(CredentialCipher::new(dir.path()).unwrap());

        let resolver = CredentialResolver::new(store.clone(), cipher.clone())
            .with_env_var("STORYREEL_TEST_UNSET_VAR");
        resolver
            .activate("AIzaSurvivor12345", &MockValidator::accepting())
            .await
            .unwrap();

        let reopened =
            CredentialResolver::new(store, cipher).with_env_var("STORYREEL_TEST_UNSET_VAR");
        assert_eq!(
            reopened.resolve().await.unwrap().expose(),
            "AIzaSurvivor12345"
        );
        assert!(reopened.is_active().await);
    }

    #[tokio::test]
    async fn request_setup_prefers_broker_picker() {
        let dir = TempDir::new().unwrap();
        let broker = Arc::new(MockBroker::empty());
        let resolver = resolver_in(&dir).with_broker(broker.clone());

        assert!(resolver.request_setup().await.unwrap());
        assert_eq!(broker.picker_opened.load(Ordering::SeqCst), 1);

        let no_broker = resolver_in(&dir);
        assert!(!no_broker.request_setup().await.unwrap());
    }

    #[test]
    fn debug_output_is_redacted() {
        let credential = Credential::new("AIzaSyVerySecretKey123");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("VerySecret"));
        assert!(debug.contains("AIza..."));
    }

    #[test]
    fn redaction_handles_multibyte_tokens() {
        // 12 bytes but only 4 chars; masked outright rather than previewed.
        assert_eq!(Credential::new("키키키키").redacted(), "****");

        let long = Credential::new("키".repeat(16));
        assert_eq!(long.redacted(), "키키키키...키키키키");
    }
}
