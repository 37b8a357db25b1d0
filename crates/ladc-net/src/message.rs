//! Control/sync message codec (spec §4.6).
//!
//! Two representations share the same verb/payload grammar: the 180-byte
//! padded plaintext frame used on the encrypted UDP wire, and the bare
//! `<verb><payload>` text line accepted, unencrypted and unpadded, on the
//! control FIFO (spec §6). [`Message::parse_line`]/[`render_line`] handle
//! the FIFO form; [`Message::encode_frame`]/[`decode_frame`] handle the
//! wire form by layering the version byte and PKCS#7 padding on top.

use std::fmt;

use ladc_common::wire::{MESSAGE_LEN, PROTOCOL_VERSION};

/// One of the fourteen control/sync verbs (spec §4.6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Add,
    Del,
    Flush,
    Reload,
    Shutdown,
    DumpState,
    SetLogLevel,
    ResetCounters,
    Sync,
    StopSync,
    DumpStatus,
    EnableRule,
    DisableRule,
    MonitoringLevel,
}

impl Verb {
    pub fn code(self) -> u8 {
        match self {
            Verb::Add => b'+',
            Verb::Del => b'-',
            Verb::Flush => b'F',
            Verb::Reload => b'R',
            Verb::Shutdown => b'S',
            Verb::DumpState => b'>',
            Verb::SetLogLevel => b'L',
            Verb::ResetCounters => b'0',
            Verb::Sync => b'X',
            Verb::StopSync => b'x',
            Verb::DumpStatus => b'D',
            Verb::EnableRule => b'Y',
            Verb::DisableRule => b'N',
            Verb::MonitoringLevel => b'M',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            b'+' => Verb::Add,
            b'-' => Verb::Del,
            b'F' => Verb::Flush,
            b'R' => Verb::Reload,
            b'S' => Verb::Shutdown,
            b'>' => Verb::DumpState,
            b'L' => Verb::SetLogLevel,
            b'0' => Verb::ResetCounters,
            b'X' => Verb::Sync,
            b'x' => Verb::StopSync,
            b'D' => Verb::DumpStatus,
            b'Y' => Verb::EnableRule,
            b'N' => Verb::DisableRule,
            b'M' => Verb::MonitoringLevel,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    #[error("empty line")]
    Empty,
    #[error("unknown verb {0:?}")]
    UnknownVerb(char),
    #[error("wrong protocol version {0:?}")]
    WrongVersion(u8),
    #[error("frame too short")]
    TooShort,
    #[error("payload exceeds the maximum frame length")]
    PayloadTooLong,
    #[error("non-utf8 payload")]
    NotUtf8,
}

/// A parsed control/sync message: a verb plus its raw payload text. The
/// payload grammar varies per verb (spec §4.6 table) and is interpreted
/// by the dispatcher, not here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub verb: Verb,
    pub payload: String,
}

impl Message {
    pub fn new(verb: Verb, payload: impl Into<String>) -> Self {
        Message {
            verb,
            payload: payload.into(),
        }
    }

    /// Parses a FIFO line (spec §6: "one control message per line, same
    /// grammar as §4.6, unencrypted and unpadded"). Blank lines and
    /// comments (`#`) parse to `Ok(None)`.
    pub fn parse_line(line: &str) -> Result<Option<Message>, MessageError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let mut chars = line.chars();
        let verb_char = chars.next().ok_or(MessageError::Empty)?;
        let verb = Verb::from_code(verb_char as u8).ok_or(MessageError::UnknownVerb(verb_char))?;
        Ok(Some(Message::new(verb, chars.as_str())))
    }

    /// Renders as a FIFO line, without a trailing newline.
    pub fn render_line(&self) -> String {
        format!("{}{}", self.verb.code() as char, self.payload)
    }

    /// Builds the unpadded `version || verb || payload` plaintext that
    /// [`ladc_crypto::pad`] then pads to [`MESSAGE_LEN`] (spec §4.6:
    /// "first byte is the protocol version, second byte a single-
    /// character verb").
    pub fn encode_frame(&self) -> Result<[u8; MESSAGE_LEN], MessageError> {
        let mut raw = Vec::with_capacity(2 + self.payload.len());
        raw.push(PROTOCOL_VERSION);
        raw.push(self.verb.code());
        raw.extend_from_slice(self.payload.as_bytes());
        if raw.len() >= MESSAGE_LEN {
            return Err(MessageError::PayloadTooLong);
        }
        ladc_crypto::pad(&raw).map_err(|_| MessageError::PayloadTooLong)
    }

    /// Parses a decrypted, unpadded 180-byte plaintext frame (spec §4.6:
    /// "parsing is strict: non-printable verbs, wrong version, unknown
    /// verbs, and over-length fields are rejected").
    pub fn decode_frame(padded: &[u8; MESSAGE_LEN]) -> Result<Message, MessageError> {
        let raw = ladc_crypto::unpad(padded).map_err(|_| MessageError::TooShort)?;
        if raw.len() < 2 {
            return Err(MessageError::TooShort);
        }
        if raw[0] != PROTOCOL_VERSION {
            return Err(MessageError::WrongVersion(raw[0]));
        }
        let verb = Verb::from_code(raw[1]).ok_or(MessageError::UnknownVerb(raw[1] as char))?;
        let payload = String::from_utf8(raw[2..].to_vec()).map_err(|_| MessageError::NotUtf8)?;
        Ok(Message::new(verb, payload))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_round_trips_through_frame() {
        let msg = Message::new(Verb::Add, "1.2.3.4,sshd-fail,1700000000,2");
        let frame = msg.encode_frame().unwrap();
        let decoded = Message::decode_frame(&frame).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn verb_only_messages_have_empty_payload() {
        let msg = Message::new(Verb::Flush, "");
        assert_eq!(msg.render_line(), "F");
        assert_eq!(Message::parse_line("F").unwrap().unwrap(), msg);
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        assert_eq!(Message::parse_line("").unwrap(), None);
        assert_eq!(Message::parse_line("# a comment").unwrap(), None);
    }

    #[test]
    fn unknown_verb_is_rejected() {
        assert!(matches!(Message::parse_line("Z").unwrap_err(), MessageError::UnknownVerb('Z')));
    }

    #[test]
    fn wrong_protocol_version_is_rejected() {
        let mut raw = vec![b'9', b'F'];
        raw.resize(MESSAGE_LEN - 1, 0);
        let padded = ladc_crypto::pad(&raw).unwrap();
        assert!(matches!(Message::decode_frame(&padded).unwrap_err(), MessageError::WrongVersion(b'9')));
    }
}
