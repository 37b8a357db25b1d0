//! Frame-level authenticated encryption (spec §4.7).
//!
//! `encrypt_frame` always pads its plaintext to [`MESSAGE_LEN`] first —
//! one of the redesign flags in spec §9 calls out the source's
//! inconsistent padding as a bug we must not repeat. Layout on the wire
//! is `ciphertext+tag || salt || nonce`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};

use ladc_common::wire::{FRAME_LEN, MESSAGE_LEN, NONCE_LEN, SALT_LEN, TAG_LEN};

use crate::error::CryptoError;
use crate::kdf::Key;

/// PKCS#7-pads `plaintext` up to [`MESSAGE_LEN`]. Rejects inputs already
/// at or past the limit, matching the source's fixed-size message
/// buffer (spec §4.6: "over-length fields are rejected").
pub fn pad(plaintext: &[u8]) -> Result<[u8; MESSAGE_LEN], CryptoError> {
    if plaintext.len() >= MESSAGE_LEN {
        return Err(CryptoError::BadFrameLen {
            expected: MESSAGE_LEN,
            actual: plaintext.len(),
        });
    }
    let pad_len = MESSAGE_LEN - plaintext.len();
    let mut out = [0u8; MESSAGE_LEN];
    out[..plaintext.len()].copy_from_slice(plaintext);
    out[plaintext.len()..].fill(pad_len as u8);
    Ok(out)
}

/// Strips and validates PKCS#7 padding produced by [`pad`].
pub fn unpad(padded: &[u8; MESSAGE_LEN]) -> Result<Vec<u8>, CryptoError> {
    let pad_len = *padded.last().unwrap() as usize;
    if pad_len == 0 || pad_len > MESSAGE_LEN {
        return Err(CryptoError::BadFrameLen {
            expected: MESSAGE_LEN,
            actual: 0,
        });
    }
    let split = MESSAGE_LEN - pad_len;
    if !padded[split..].iter().all(|&b| b as usize == pad_len) {
        return Err(CryptoError::BadFrameLen {
            expected: MESSAGE_LEN,
            actual: 0,
        });
    }
    Ok(padded[..split].to_vec())
}

/// Encrypts a (pre-padded) 180-byte plaintext with `key`, writing the
/// unencrypted `salt` and `nonce` after the ciphertext+tag as laid out
/// in spec §4.7.
pub fn encrypt_frame(
    plaintext: &[u8; MESSAGE_LEN],
    key: &Key,
    salt: &[u8; SALT_LEN],
    nonce: &[u8; NONCE_LEN],
) -> Result<[u8; FRAME_LEN], CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext.as_slice())
        .map_err(|_| CryptoError::AuthFailed)?;
    debug_assert_eq!(ciphertext.len(), MESSAGE_LEN + TAG_LEN);

    let mut frame = [0u8; FRAME_LEN];
    frame[..MESSAGE_LEN + TAG_LEN].copy_from_slice(&ciphertext);
    frame[MESSAGE_LEN + TAG_LEN..MESSAGE_LEN + TAG_LEN + SALT_LEN].copy_from_slice(salt);
    frame[MESSAGE_LEN + TAG_LEN + SALT_LEN..].copy_from_slice(nonce);
    Ok(frame)
}

/// Splits `frame` into its salt and nonce without touching the
/// ciphertext, so the caller can look up (or derive) the right key
/// before attempting decryption.
pub fn frame_salt_and_nonce(frame: &[u8]) -> Result<([u8; SALT_LEN], [u8; NONCE_LEN]), CryptoError> {
    if frame.len() != FRAME_LEN {
        return Err(CryptoError::BadFrameLen {
            expected: FRAME_LEN,
            actual: frame.len(),
        });
    }
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    salt.copy_from_slice(&frame[MESSAGE_LEN + TAG_LEN..MESSAGE_LEN + TAG_LEN + SALT_LEN]);
    nonce.copy_from_slice(&frame[MESSAGE_LEN + TAG_LEN + SALT_LEN..]);
    Ok((salt, nonce))
}

/// Decrypts `frame` with `key`, returning the 180-byte padded
/// plaintext. A MAC failure is reported as [`CryptoError::AuthFailed`];
/// the caller logs and drops the frame per spec §7.
pub fn decrypt_frame(frame: &[u8], key: &Key) -> Result<[u8; MESSAGE_LEN], CryptoError> {
    if frame.len() != FRAME_LEN {
        return Err(CryptoError::BadFrameLen {
            expected: FRAME_LEN,
            actual: frame.len(),
        });
    }
    let (_, nonce) = frame_salt_and_nonce(frame)?;
    let ciphertext = &frame[..MESSAGE_LEN + TAG_LEN];
    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|_| CryptoError::AuthFailed)?;
    let mut out = [0u8; MESSAGE_LEN];
    out.copy_from_slice(&plaintext);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kdf::derive_key;

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let key = derive_key("secret", &[3u8; SALT_LEN]).unwrap();
        let plaintext = pad(b"hello peer").unwrap();
        let nonce = [5u8; NONCE_LEN];
        let frame = encrypt_frame(&plaintext, &key, &[3u8; SALT_LEN], &nonce).unwrap();
        let decrypted = decrypt_frame(&frame, &key).unwrap();
        assert_eq!(decrypted, plaintext);
        assert_eq!(unpad(&decrypted).unwrap(), b"hello peer");
    }

    #[test]
    fn wrong_key_fails_auth() {
        let key = derive_key("secret", &[3u8; SALT_LEN]).unwrap();
        let other = derive_key("different", &[3u8; SALT_LEN]).unwrap();
        let plaintext = pad(b"x").unwrap();
        let frame = encrypt_frame(&plaintext, &key, &[3u8; SALT_LEN], &[1u8; NONCE_LEN]).unwrap();
        assert!(decrypt_frame(&frame, &other).is_err());
    }

    #[test]
    fn pad_rejects_oversize_input() {
        let too_long = vec![b'x'; MESSAGE_LEN];
        assert!(pad(&too_long).is_err());
    }

    #[test]
    fn unpad_rejects_corrupted_padding() {
        let mut padded = pad(b"abc").unwrap();
        padded[MESSAGE_LEN - 1] = 0;
        assert!(unpad(&padded).is_err());
    }
}
