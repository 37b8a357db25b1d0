//! Password-derived authenticated encryption envelope for the sync wire
//! protocol (spec §4.7).
//!
//! Wire frame layout: `ciphertext+tag (MESSAGE_LEN + TAG_LEN) || salt
//! (SALT_LEN) || nonce (NONCE_LEN)`. The key is never sent; it is
//! re-derived on both ends from a pre-shared secret and the salt via a
//! memory-hard KDF, matching the source's libsodium
//! `crypto_pwhash`/`crypto_secretbox` pairing one-for-one with the
//! RustCrypto equivalents already used elsewhere in this stack.

mod envelope;
mod error;
mod kdf;
mod salt_cache;

pub use envelope::{decrypt_frame, encrypt_frame, frame_salt_and_nonce, pad, unpad};
pub use error::CryptoError;
pub use kdf::{derive_key, Key};
pub use salt_cache::SaltCache;
