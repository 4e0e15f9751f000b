//! Encryption capability for config payloads
//!
//! The factory never encrypts anything itself; it hands plaintext to a
//! [`ConfigCrypto`] implementation together with a domain string and the
//! scope the payload belongs to.
//!
//! [`SharedSecretCrypto`] is the implementation used by the CLI and the
//! tests: ChaCha20-Poly1305 AEAD with per-(scope, domain) keys derived from
//! one session secret.
//!
//! # Wire Format
//!
//! `[nonce (12 bytes)] + [ciphertext + auth_tag (16 bytes)]`

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::error::SyncError;
use crate::types::{GroupId, SessionId};

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

const HKDF_INFO: &[u8] = b"swarmsync-config-v1:";

/// Encryption capability consumed by the factory
pub trait ConfigCrypto: Send + Sync {
    /// Encrypt `plaintext` for `recipient`, or for `group` when set
    fn encrypt(
        &self,
        plaintext: &[u8],
        domain: &str,
        recipient: &SessionId,
        group: Option<&GroupId>,
    ) -> Result<Vec<u8>, SyncError>;

    /// Decrypt a payload addressed to this account, or to `group` when set
    ///
    /// Fails with `SyncError::Crypto` on authentication failure.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        domain: &str,
        group: Option<&GroupId>,
    ) -> Result<Vec<u8>, SyncError>;
}

/// AEAD over keys derived from a single 32-byte session secret
///
/// Every device of the account holds the same secret, so any of them can
/// read what another pushed. The domain string is bound as associated data.
pub struct SharedSecretCrypto {
    user_id: SessionId,
    secret: [u8; 32],
}

impl SharedSecretCrypto {
    /// Create a capability for `user_id` from its session secret
    pub fn new(user_id: SessionId, secret: [u8; 32]) -> Self {
        Self { user_id, secret }
    }

    /// Generate a new random 32-byte session secret.
    pub fn generate_secret() -> [u8; 32] {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        key
    }

    fn cipher(&self, scope: &SessionId, domain: &str) -> Result<ChaCha20Poly1305, SyncError> {
        let mut info = Vec::with_capacity(HKDF_INFO.len() + domain.len());
        info.extend_from_slice(HKDF_INFO);
        info.extend_from_slice(domain.as_bytes());

        let salt = scope.to_hex();
        let hkdf = Hkdf::<Sha256>::new(Some(salt.as_bytes()), &self.secret);
        let mut key = [0u8; 32];
        hkdf.expand(&info, &mut key)
            .map_err(|e| SyncError::Crypto(format!("Key derivation failed: {}", e)))?;
        Ok(ChaCha20Poly1305::new((&key).into()))
    }
}

impl ConfigCrypto for SharedSecretCrypto {
    fn encrypt(
        &self,
        plaintext: &[u8],
        domain: &str,
        recipient: &SessionId,
        group: Option<&GroupId>,
    ) -> Result<Vec<u8>, SyncError> {
        let scope = group.map(|g| g.session_id()).unwrap_or(recipient);
        let cipher = self.cipher(scope, domain)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: domain.as_bytes(),
                },
            )
            .map_err(|e| SyncError::Crypto(format!("Encryption failed: {}", e)))?;

        let mut result = nonce_bytes.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        domain: &str,
        group: Option<&GroupId>,
    ) -> Result<Vec<u8>, SyncError> {
        if ciphertext.len() < NONCE_SIZE {
            return Err(SyncError::Crypto(
                "Data too short to contain nonce".to_string(),
            ));
        }
        let scope = group.map(|g| g.session_id()).unwrap_or(&self.user_id);
        let cipher = self.cipher(scope, domain)?;

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ciphertext[NONCE_SIZE..],
                    aad: domain.as_bytes(),
                },
            )
            .map_err(|e| SyncError::Crypto(format!("Decryption failed: {}", e)))
    }
}
