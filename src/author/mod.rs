//! Participant identity and snapshot signing
//!
//! Each participant is a local author: a human-readable name plus an Ed25519
//! key pair. The base64 serialization of the public verifying key identifies
//! the author in snapshot metadata; peers are known only by their name and
//! verifying key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

/// Result type for author operations
pub type AuthorResult<T> = Result<T, AuthorError>;

/// Errors from key decoding and signature verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorError {
    #[error("invalid key material: {0}")]
    BadKey(String),

    #[error("invalid signature encoding")]
    BadSignatureEncoding,

    #[error("signature verification failed for author {0:?}")]
    SignatureMismatch(String),
}

/// A local participant: name plus signing key pair.
#[derive(Debug, Clone)]
pub struct LocalAuthor {
    name: String,
    signing_key: SigningKey,
}

impl LocalAuthor {
    /// Generate a fresh author with a new random key pair.
    pub fn generate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct an author from a base64-encoded signing key.
    pub fn from_base64(name: impl Into<String>, encoded: &str) -> AuthorResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| AuthorError::BadKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthorError::BadKey("signing key must be 32 bytes".into()))?;
        Ok(Self {
            name: name.into(),
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    /// The author's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base64 serialization of the signing key, for folder configuration.
    pub fn signing_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.to_bytes())
    }

    /// Canonical (base64) serialization of the public verifying key.
    pub fn verify_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a message, returning the base64-encoded signature.
    pub fn sign(&self, message: &[u8]) -> String {
        let signature: Signature = self.signing_key.sign(message);
        BASE64.encode(signature.to_bytes())
    }

    /// The public half of this author, as peers see it.
    pub fn to_remote(&self) -> RemoteAuthor {
        RemoteAuthor {
            name: self.name.clone(),
            verifying_key: self.signing_key.verifying_key(),
        }
    }
}

/// A participant as observed by others: name plus verifying key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAuthor {
    name: String,
    verifying_key: VerifyingKey,
}

impl RemoteAuthor {
    /// Reconstruct a remote author from a base64-encoded verifying key.
    pub fn from_base64(name: impl Into<String>, encoded: &str) -> AuthorResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| AuthorError::BadKey(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AuthorError::BadKey("verifying key must be 32 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AuthorError::BadKey(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            verifying_key,
        })
    }

    /// The author's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical (base64) serialization of the verifying key.
    pub fn verify_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key.to_bytes())
    }

    /// Verify a base64-encoded signature over `message`.
    pub fn verify(&self, message: &[u8], signature_base64: &str) -> AuthorResult<()> {
        let bytes = BASE64
            .decode(signature_base64)
            .map_err(|_| AuthorError::BadSignatureEncoding)?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| AuthorError::BadSignatureEncoding)?;
        let signature = Signature::from_bytes(&bytes);
        self.verifying_key
            .verify(message, &signature)
            .map_err(|_| AuthorError::SignatureMismatch(self.name.clone()))
    }
}
