//! The `add` command's payload grammar (spec §4.6), shared between the
//! wire message codec, the control dispatcher and the snapshot file
//! format (spec §4.9: "lines are valid `+` command payloads").
//!
//! Grammar: `<addr>[/<prefix>],<rule>[,<end-time>[,<factor>]]`.
//! `end-time` is either a decimal Unix timestamp or the literal `inf`
//! for the "never expires" sentinel (spec §9: explicit, sentinel-aware
//! handling rather than a raw `time_t` near `INT_MAX`).

use std::fmt;

/// A parsed `add` payload (verb `+` in spec §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddPayload {
    pub address: String,
    pub rule: String,
    pub end_time: Option<EndTime>,
    pub factor: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTime {
    At(u64),
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarError(pub String);

impl fmt::Display for GrammarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed add payload: {}", self.0)
    }
}

impl std::error::Error for GrammarError {}

pub fn format_add_payload(payload: &AddPayload) -> String {
    let mut s = format!("{},{}", payload.address, payload.rule);
    if let Some(end_time) = payload.end_time {
        s.push(',');
        match end_time {
            EndTime::At(t) => s.push_str(&t.to_string()),
            EndTime::Never => s.push_str("inf"),
        }
        if let Some(factor) = payload.factor {
            s.push(',');
            s.push_str(&factor.to_string());
        }
    }
    s
}

pub fn parse_add_payload(text: &str) -> Result<AddPayload, GrammarError> {
    let mut parts = text.splitn(4, ',');
    let address = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GrammarError("missing address".to_string()))?
        .to_string();
    let rule = parts
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GrammarError("missing rule".to_string()))?
        .to_string();
    let end_time = match parts.next() {
        Some("inf") => Some(EndTime::Never),
        Some(t) => Some(EndTime::At(
            t.parse().map_err(|_| GrammarError(format!("bad end-time \"{t}\"")))?,
        )),
        None => None,
    };
    let factor = match parts.next() {
        Some(f) => Some(f.parse().map_err(|_| GrammarError(format!("bad factor \"{f}\"")))?),
        None => None,
    };
    Ok(AddPayload {
        address,
        rule,
        end_time,
        factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_full_payload() {
        let payload = AddPayload {
            address: "1.2.3.4".to_string(),
            rule: "sshd-fail".to_string(),
            end_time: Some(EndTime::At(1700000000)),
            factor: Some(2),
        };
        let text = format_add_payload(&payload);
        assert_eq!(parse_add_payload(&text).unwrap(), payload);
    }

    #[test]
    fn round_trips_never_sentinel() {
        let payload = AddPayload {
            address: "10.0.0.0/8".to_string(),
            rule: "r".to_string(),
            end_time: Some(EndTime::Never),
            factor: None,
        };
        let text = format_add_payload(&payload);
        assert_eq!(parse_add_payload(&text).unwrap(), payload);
    }

    #[test]
    fn minimal_payload_has_no_deadline_or_factor() {
        let payload = AddPayload {
            address: "1.2.3.4".to_string(),
            rule: "r".to_string(),
            end_time: None,
            factor: None,
        };
        assert_eq!(format_add_payload(&payload), "1.2.3.4,r");
        assert_eq!(parse_add_payload("1.2.3.4,r").unwrap(), payload);
    }

    #[test]
    fn rejects_missing_rule() {
        assert!(parse_add_payload("1.2.3.4").is_err());
    }
}
