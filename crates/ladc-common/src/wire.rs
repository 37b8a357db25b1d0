//! Wire-format constants shared between the crypto envelope, the message
//! codec and the peer endpoint (spec §4.6, §4.7).

/// Plaintext payload length of every control/sync message, before
/// PKCS#7 padding. Messages shorter than this are padded up to it;
/// nothing is ever sent that deviates from this length (spec §4.6,
/// §9's "padding on every frame" mandate).
pub const MESSAGE_LEN: usize = 180;

/// Protocol version byte, first byte of every plaintext message.
pub const PROTOCOL_VERSION: u8 = b'0';

/// Key-derivation salt length in bytes.
pub const SALT_LEN: usize = 16;

/// AEAD nonce length in bytes (ChaCha20-Poly1305 standard nonce).
pub const NONCE_LEN: usize = 12;

/// AEAD authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Total length of an encrypted frame on the wire: ciphertext (same
/// length as the plaintext it replaces) + tag + salt + nonce.
pub const FRAME_LEN: usize = MESSAGE_LEN + TAG_LEN + SALT_LEN + NONCE_LEN;

/// Default UDP port for the peer sync protocol.
pub const DEFAULT_PORT: u16 = 16473;

/// Sync sender self-rate-limit (spec §4.8, §5): one frame every this
/// many milliseconds, i.e. 5 frames/sec.
pub const SYNC_FRAME_INTERVAL_MS: u64 = 200;

const _: () = assert!(FRAME_LEN == MESSAGE_LEN + TAG_LEN + SALT_LEN + NONCE_LEN);
