//! Credential encryption at rest.
//!
//! The stored API key is sealed with XChaCha20-Poly1305 before it enters the
//! key-value store. The encryption key is derived with Argon2id from stable
//! machine entropy plus a random per-install token, so the same installation
//! can reopen its envelope across restarts while a copied store document is
//! useless elsewhere. No user password is involved.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Envelope version prefix; bump when the sealed format changes.
const ENVELOPE_PREFIX: &str = "sr1:";

/// Per-install random token file name (lives next to the store document).
const INSTALL_TOKEN_FILE: &str = "install_token";

const NONCE_LEN: usize = 24;

/// Seals and opens credential strings for storage.
pub struct CredentialCipher {
    encryption_key: [u8; 32],
}

impl CredentialCipher {
    /// Derives the sealing key for the installation rooted at `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> CoreResult<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;

        let entropy = machine_entropy(data_dir)?;
        let encryption_key = derive_key(&entropy)?;
        debug!("Credential cipher ready for {}", data_dir.display());

        Ok(Self { encryption_key })
    }

    /// Encrypts `plaintext` into a store-friendly envelope string.
    pub fn seal(&self, plaintext: &str) -> CoreResult<String> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::Rng::fill(&mut OsRng, &mut nonce);

        let cipher = XChaCha20Poly1305::new((&self.encryption_key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CoreError::CryptoError(format!("Encryption failed: {e}")))?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);

        Ok(format!("{ENVELOPE_PREFIX}{}", BASE64.encode(envelope)))
    }

    /// Decrypts an envelope produced by [`seal`](Self::seal).
    pub fn open(&self, envelope: &str) -> CoreResult<String> {
        let body = envelope.strip_prefix(ENVELOPE_PREFIX).ok_or_else(|| {
            CoreError::CryptoError("Unrecognized credential envelope format".into())
        })?;

        let bytes = BASE64
            .decode(body.as_bytes())
            .map_err(|e| CoreError::CryptoError(format!("Malformed envelope: {e}")))?;
        if bytes.len() <= NONCE_LEN {
            return Err(CoreError::CryptoError("Envelope too short".into()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let cipher = XChaCha20Poly1305::new((&self.encryption_key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoreError::CryptoError("Decryption failed".into()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CoreError::CryptoError(format!("Decrypted payload not UTF-8: {e}")))
    }
}

/// Derives a 32-byte key with Argon2id.
///
/// Parameters are moderate on purpose: the input already carries real
/// entropy, and derivation runs on every startup.
fn derive_key(entropy: &str) -> CoreResult<[u8; 32]> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let salt = b"storyreel-credential-salt-v1";

    let params = Params::new(
        8 * 1024, // 8 MB memory cost
        3,        // iterations
        1,        // parallelism
        Some(32),
    )
    .map_err(|e| CoreError::CryptoError(format!("Failed to configure key derivation: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(entropy.as_bytes(), salt, &mut key)
        .map_err(|e| CoreError::CryptoError(format!("Key derivation failed: {e}")))?;

    Ok(key)
}

/// Stable, installation-specific key derivation input.
fn machine_entropy(data_dir: &Path) -> CoreResult<String> {
    let mut components = vec![
        "storyreel-credential-v1".to_string(),
        data_dir.to_string_lossy().to_string(),
    ];

    #[cfg(target_os = "linux")]
    {
        if let Ok(id) = std::fs::read_to_string("/etc/machine-id") {
            components.push(id.trim().to_string());
        } else if let Ok(id) = std::fs::read_to_string("/var/lib/dbus/machine-id") {
            components.push(id.trim().to_string());
        }
    }

    components.push(install_token(data_dir)?);

    Ok(components.join(":"))
}

/// Reads the per-install random token, creating it on first use.
fn install_token(data_dir: &Path) -> CoreResult<String> {
    let token_path: PathBuf = data_dir.join(INSTALL_TOKEN_FILE);

    if let Ok(existing) = std::fs::read_to_string(&token_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }

    let mut raw = [0u8; 32];
    rand::Rng::fill(&mut OsRng, &mut raw);
    let token = BASE64.encode(raw);

    std::fs::write(&token_path, &token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&token_path, std::fs::Permissions::from_mode(0o600));
    }

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn seal_then_open_round_trips() {
        let dir = TempDir::new().unwrap();
        let cipher = CredentialCipher::new(dir.path()).unwrap();

        let envelope = cipher.seal("AIzaSyExample-key-1234").unwrap();
        assert!(envelope.starts_with(ENVELOPE_PREFIX));
        assert!(!envelope.contains("AIza"));

        let opened = cipher.open(&envelope).unwrap();
        assert_eq!(opened, "AIzaSyExample-key-1234");
    }

    #[test]
    fn envelopes_are_nonce_unique() {
        let dir = TempDir::new().unwrap();
        let cipher = CredentialCipher::new(dir.path()).unwrap();

        let a = cipher.seal("same-secret").unwrap();
        let b = cipher.seal("same-secret").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.open(&a).unwrap(), cipher.open(&b).unwrap());
    }

    #[test]
    fn new_instance_same_dir_opens_old_envelope() {
        let dir = TempDir::new().unwrap();
        let envelope = CredentialCipher::new(dir.path())
            .unwrap()
            .seal("persisted-key")
            .unwrap();

        let reopened = CredentialCipher::new(dir.path()).unwrap();
        assert_eq!(reopened.open(&envelope).unwrap(), "persisted-key");
    }

    #[test]
    fn different_install_cannot_open() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();

        let envelope = CredentialCipher::new(dir_a.path())
            .unwrap()
            .seal("secret")
            .unwrap();

        let other = CredentialCipher::new(dir_b.path()).unwrap();
        assert!(other.open(&envelope).is_err());
    }

    #[test]
    fn tampered_envelope_rejected() {
        let dir = TempDir::new().unwrap();
        let cipher = CredentialCipher::new(dir.path()).unwrap();

        let envelope = cipher.seal("secret").unwrap();
        let mut tampered = envelope.clone();
        tampered.truncate(envelope.len() - 2);
        assert!(cipher.open(&tampered).is_err());

        assert!(cipher.open("not-an-envelope").is_err());
        assert!(cipher.open("sr1:AAAA").is_err());
    }
}
