//! Password-based key derivation (spec §4.7).
//!
//! The source uses libsodium's `crypto_pwhash` (Argon2id) at its
//! "interactive" parameter set to turn the pre-shared secret plus a
//! per-peer salt into a symmetric key. We use the equivalent RustCrypto
//! crate, `argon2`, at parameters chosen to match libsodium's
//! interactive profile (2 iterations, 64 MiB, 1 lane).

use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::CryptoError;
use ladc_common::wire::SALT_LEN;

/// libsodium's `crypto_pwhash_OPSLIMIT_INTERACTIVE` / `MEMLIMIT_INTERACTIVE`.
const INTERACTIVE_ITERATIONS: u32 = 2;
const INTERACTIVE_MEMORY_KIB: u32 = 64 * 1024;
const PARALLELISM: u32 = 1;
const KEY_LEN: usize = 32;

/// A derived 256-bit symmetric key. Implements neither `Debug` nor
/// `Display` on its bytes to avoid accidental logging.
#[derive(Clone)]
pub struct Key(pub(crate) [u8; KEY_LEN]);

impl Key {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(..)")
    }
}

/// Derives a key from `secret` and `salt` via Argon2id at the
/// interactive parameter set. `salt` must be exactly [`SALT_LEN`] bytes.
pub fn derive_key(secret: &str, salt: &[u8; SALT_LEN]) -> Result<Key, CryptoError> {
    let params = Params::new(INTERACTIVE_MEMORY_KIB, INTERACTIVE_ITERATIONS, PARALLELISM, Some(KEY_LEN))
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = [0u8; KEY_LEN];
    argon2
        .hash_password_into(secret.as_bytes(), salt, &mut out)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(Key(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_secret_and_salt_derive_the_same_key() {
        let salt = [7u8; SALT_LEN];
        let a = derive_key("correct horse battery staple", &salt).unwrap();
        let b = derive_key("correct horse battery staple", &salt).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salts_derive_different_keys() {
        let a = derive_key("secret", &[1u8; SALT_LEN]).unwrap();
        let b = derive_key("secret", &[2u8; SALT_LEN]).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
