use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose};
use chacha20poly1305::{
    KeyInit, XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, OsRng},
};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// Name written to the `encrypted` attribute of a sealed secret.
pub const PASSWORD_SCHEME: &str = "argon2id-xchacha20poly1305";

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;

/// Seals and opens secret key material with a user password.
pub trait SecretCodec {
    /// Scheme identifier stored next to the sealed text.
    fn scheme(&self) -> &'static str;

    fn seal(&self, plaintext: &[u8], password: &str) -> Result<String>;

    /// Fails with [`AuthError::BadPassword`] when the password does not authenticate.
    fn open(&self, sealed: &str, password: &str) -> Result<Zeroizing<Vec<u8>>>;
}

#[derive(Debug, Clone)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Argon2id key derivation + XChaCha20-Poly1305.
///
/// Sealed form: base64(salt || nonce || ciphertext).
#[derive(Debug, Clone, Default)]
pub struct PasswordCodec {
    kdf: KdfParams,
}

impl PasswordCodec {
    pub fn new(kdf: KdfParams) -> Self {
        PasswordCodec { kdf }
    }

    fn derive_key(&self, password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        let params = Params::new(
            self.kdf.memory_kib,
            self.kdf.iterations,
            self.kdf.parallelism,
            Some(32),
        )
        .map_err(|e| AuthError::InvalidSecret(format!("argon2 params error: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut out = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut out[..])
            .map_err(|e| AuthError::InvalidSecret(format!("argon2 error: {e}")))?;
        Ok(out)
    }
}

impl SecretCodec for PasswordCodec {
    fn scheme(&self) -> &'static str {
        PASSWORD_SCHEME
    }

    fn seal(&self, plaintext: &[u8], password: &str) -> Result<String> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = self.derive_key(password, &salt)?;

        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key[..]));
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| AuthError::InvalidSecret(format!("encrypt error: {e}")))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(general_purpose::STANDARD.encode(blob))
    }

    fn open(&self, sealed: &str, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let blob = general_purpose::STANDARD
            .decode(sealed.trim())
            .map_err(|e| AuthError::InvalidSecret(format!("sealed secret is not base64: {e}")))?;
        if blob.len() <= SALT_LEN + NONCE_LEN {
            return Err(AuthError::InvalidSecret("sealed secret is truncated".into()));
        }

        let (salt, rest) = blob.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let key = self.derive_key(password, salt)?;

        let cipher = XChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&key[..]));
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| AuthError::BadPassword)?;
        Ok(Zeroizing::new(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_codec() -> PasswordCodec {
        PasswordCodec::new(KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        })
    }

    #[test]
    fn opens_what_it_sealed() {
        let codec = fast_codec();
        let sealed = codec.seal(b"JBSWY3DPEHPK3PXP", "hunter2").unwrap();
        assert_ne!(sealed, "JBSWY3DPEHPK3PXP");
        let opened = codec.open(&sealed, "hunter2").unwrap();
        assert_eq!(opened.as_slice(), b"JBSWY3DPEHPK3PXP");
    }

    #[test]
    fn wrong_password_is_bad_password() {
        let codec = fast_codec();
        let sealed = codec.seal(b"secret", "right").unwrap();
        assert!(matches!(codec.open(&sealed, "wrong"), Err(AuthError::BadPassword)));
    }

    #[test]
    fn garbage_is_invalid_secret() {
        let codec = fast_codec();
        assert!(matches!(codec.open("not base64!", "pw"), Err(AuthError::InvalidSecret(_))));
        assert!(matches!(codec.open("AAAA", "pw"), Err(AuthError::InvalidSecret(_))));
    }
}
