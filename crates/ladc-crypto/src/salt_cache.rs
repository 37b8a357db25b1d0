//! Per-peer salt/key caching (spec §3 "Peer state", §4.7).
//!
//! Refreshed whenever a received frame's salt differs from the cached
//! one; the comparison itself is constant-time so a MAC-oracle attacker
//! can't use timing to probe which salt we currently hold.

use std::collections::HashMap;
use std::net::IpAddr;

use subtle::ConstantTimeEq;

use crate::error::CryptoError;
use crate::kdf::{derive_key, Key};
use ladc_common::wire::SALT_LEN;

struct Cached {
    salt: [u8; SALT_LEN],
    key: Key,
}

/// Caches one (salt, derived key) pair per peer address, keyed on the
/// secret currently configured. If the secret changes the whole cache
/// is invalidated by constructing a fresh `SaltCache`.
#[derive(Default)]
pub struct SaltCache {
    entries: HashMap<IpAddr, Cached>,
}

impl SaltCache {
    pub fn new() -> Self {
        SaltCache {
            entries: HashMap::new(),
        }
    }

    /// Returns the key to use for `peer` given the salt on an incoming
    /// frame, deriving and caching a fresh key if the salt changed.
    pub fn key_for_received(
        &mut self,
        peer: IpAddr,
        secret: &str,
        frame_salt: &[u8; SALT_LEN],
    ) -> Result<Key, CryptoError> {
        let needs_refresh = match self.entries.get(&peer) {
            Some(cached) => cached.salt.ct_ne(frame_salt).into(),
            None => true,
        };
        if needs_refresh {
            let key = derive_key(secret, frame_salt)?;
            self.entries.insert(
                peer,
                Cached {
                    salt: *frame_salt,
                    key: key.clone(),
                },
            );
            Ok(key)
        } else {
            Ok(self.entries.get(&peer).unwrap().key.clone())
        }
    }

    /// Returns the (salt, key) to use for sending to `peer`, drawing a
    /// fresh random salt on first use. Callers pass a random-salt
    /// generator so this module stays deterministic under test.
    pub fn key_for_send(
        &mut self,
        peer: IpAddr,
        secret: &str,
        fresh_salt: impl FnOnce() -> [u8; SALT_LEN],
    ) -> Result<([u8; SALT_LEN], Key), CryptoError> {
        if let Some(cached) = self.entries.get(&peer) {
            return Ok((cached.salt, cached.key.clone()));
        }
        let salt = fresh_salt();
        let key = derive_key(secret, &salt)?;
        self.entries.insert(
            peer,
            Cached {
                salt,
                key: key.clone(),
            },
        );
        Ok((salt, key))
    }

    /// Drops every cached entry, forcing fresh derivation on next use.
    /// Called when the configured secret changes.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_path_reuses_salt_until_invalidated() {
        let mut cache = SaltCache::new();
        let (salt1, _) = cache
            .key_for_send("1.2.3.4".parse().unwrap(), "secret", || [9u8; SALT_LEN])
            .unwrap();
        let (salt2, _) = cache
            .key_for_send("1.2.3.4".parse().unwrap(), "secret", || [1u8; SALT_LEN])
            .unwrap();
        assert_eq!(salt1, salt2);
        cache.invalidate();
        let (salt3, _) = cache
            .key_for_send("1.2.3.4".parse().unwrap(), "secret", || [1u8; SALT_LEN])
            .unwrap();
        assert_eq!(salt3, [1u8; SALT_LEN]);
    }

    #[test]
    fn receive_path_rederives_on_salt_change() {
        let mut cache = SaltCache::new();
        let peer: IpAddr = "5.6.7.8".parse().unwrap();
        let k1 = cache.key_for_received(peer, "secret", &[1u8; SALT_LEN]).unwrap();
        let k2 = cache.key_for_received(peer, "secret", &[2u8; SALT_LEN]).unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }
}
