//! Pattern compiler (spec §4.1).
//!
//! Scans a template string left to right, turning `%name%` tokens into
//! regex fragments and recording, for every token, the subexpression
//! index a successful match's capture at that index binds to.

use regex::Regex;

use ladc_common::LadcError;

/// Hard cap on total capture groups in a compiled pattern (spec §4.1).
pub const MAX_CAPTURE_GROUPS: usize = 20;

const HOST_FRAGMENT: &str = "([.:[:xdigit:]]+)";
const DEFAULT_FRAGMENT: &str = "(.+)";

/// One `%name%` token recorded during compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternToken {
    pub name: String,
    /// 1-based regex capture-group index this token's value appears at.
    pub capture_index: usize,
    /// The regex fragment this token was expanded to, reused verbatim
    /// when a rule property later needs to reference the same
    /// replacement (spec §3, reserved `host`/`service` properties).
    pub replacement: String,
}

/// A compiled pattern: the derived regex, the ordered token list, and
/// whether a `host` token was seen.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub template: String,
    pub regex: Regex,
    pub tokens: Vec<PatternToken>,
    pub has_host_token: bool,
}

/// Counts unescaped literal `(` characters in `text`, used to keep the
/// capture-group numbering in sync with the surrounding literal regex
/// (spec §4.1: "for every literal `(` in the surrounding text, bump the
/// group counter").
fn count_open_parens(text: &str) -> usize {
    let mut count = 0;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == '(' {
            count += 1;
        }
    }
    count
}

/// Compiles `template` against an optional per-source `prefix` and the
/// rule's `service` string (spec §4.1).
pub fn compile(template: &str, prefix: Option<&str>, service: Option<&str>) -> Result<CompiledPattern, LadcError> {
    let full = match prefix {
        Some(p) if !p.is_empty() => format!("{p}{template}"),
        _ => template.to_string(),
    };

    let mut regex_src = String::with_capacity(full.len() * 2);
    let mut tokens = Vec::new();
    let mut has_host_token = false;
    let mut group_counter = 0usize;
    let mut literal_start = 0usize;

    let bytes = full.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if i + 1 >= bytes.len() {
                    return Err(LadcError::config(format!(
                        "pattern \"{full}\" ends with a trailing unescaped backslash"
                    )));
                }
                i += 2;
            }
            b'%' => {
                // Flush the literal run preceding this token so its
                // open-parens are counted before we touch the counter.
                let literal = &full[literal_start..i];
                group_counter += count_open_parens(literal);
                regex_src.push_str(literal);

                let Some(end) = full[i + 1..].find('%') else {
                    return Err(LadcError::config(format!(
                        "pattern \"{full}\" has an unterminated '%' token"
                    )));
                };
                let raw_name = &full[i + 1..i + 1 + end];
                i = i + 1 + end + 1;
                literal_start = i;

                if raw_name.is_empty() {
                    // "%%" -> literal '%'
                    regex_src.push('%');
                    continue;
                }

                let name = raw_name.to_ascii_lowercase();
                if name == "host" {
                    if has_host_token {
                        return Err(LadcError::config(format!(
                            "only one %host% token allowed per pattern \"{full}\""
                        )));
                    }
                    has_host_token = true;
                    regex_src.push_str(HOST_FRAGMENT);
                    group_counter += 1;
                    tokens.push(PatternToken {
                        name,
                        capture_index: group_counter,
                        replacement: HOST_FRAGMENT.to_string(),
                    });
                } else if name == "service" && service.is_some() {
                    let service = service.unwrap();
                    let open = count_open_parens(service);
                    let first_capture = group_counter + 1;
                    regex_src.push_str(service);
                    group_counter += open;
                    if open > 0 {
                        tokens.push(PatternToken {
                            name,
                            capture_index: first_capture,
                            replacement: service.to_string(),
                        });
                    }
                } else {
                    regex_src.push_str(DEFAULT_FRAGMENT);
                    group_counter += 1;
                    tokens.push(PatternToken {
                        name,
                        capture_index: group_counter,
                        replacement: DEFAULT_FRAGMENT.to_string(),
                    });
                }
            }
            _ => {
                i += 1;
            }
        }
    }
    let trailing = &full[literal_start..];
    group_counter += count_open_parens(trailing);
    regex_src.push_str(trailing);

    // Checked once the whole template (tokens and every literal `(`,
    // including any trailing the last token) has been counted, so a
    // pattern with no `%name%` tokens at all still gets the cap
    // enforced (spec §4.1; original dies on the 21st group, so exactly
    // `MAX_CAPTURE_GROUPS` groups is still valid).
    if group_counter > MAX_CAPTURE_GROUPS {
        return Err(LadcError::config(format!(
            "pattern \"{full}\" has too many subexpressions (max {MAX_CAPTURE_GROUPS})"
        )));
    }

    let regex = Regex::new(&regex_src)
        .map_err(|e| LadcError::config(format!("pattern \"{full}\" compiled to invalid regex: {e}")))?;

    Ok(CompiledPattern {
        template: full,
        regex,
        tokens,
        has_host_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_token_compiles_to_ip_literal_fragment() {
        let p = compile("Host: %host% failed", None, None).unwrap();
        assert!(p.has_host_token);
        let caps = p.regex.captures("Host: 1.2.3.4 failed").unwrap();
        assert_eq!(&caps[1], "1.2.3.4");
    }

    #[test]
    fn double_percent_is_a_literal_percent() {
        let p = compile("100%% done by %user%", None, None).unwrap();
        let caps = p.regex.captures("100% done by alice").unwrap();
        assert_eq!(&caps[1], "alice");
    }

    #[test]
    fn second_host_token_is_a_compile_error() {
        assert!(compile("%host% and %host%", None, None).is_err());
    }

    #[test]
    fn trailing_backslash_is_a_compile_error() {
        assert!(compile("foo\\", None, None).is_err());
    }

    #[test]
    fn service_token_counts_its_own_parens() {
        let p = compile("svc %service% says %msg%", None, Some("(sshd|su)")).unwrap();
        let caps = p.regex.captures("svc sshd says hi").unwrap();
        assert_eq!(&caps[1], "sshd");
        assert_eq!(&caps[2], "hi");
    }

    #[test]
    fn compilation_is_idempotent() {
        let a = compile("Host: %host% port %port%", None, None).unwrap();
        let b = compile("Host: %host% port %port%", None, None).unwrap();
        assert_eq!(a.regex.as_str(), b.regex.as_str());
    }

    #[test]
    fn too_many_capture_groups_is_rejected() {
        let template: String = (0..25).map(|i| format!("%p{i}%")).collect();
        assert!(compile(&template, None, None).is_err());
    }

    #[test]
    fn exactly_max_capture_groups_is_accepted() {
        let template: String = (0..MAX_CAPTURE_GROUPS).map(|i| format!("%p{i}%")).collect();
        assert!(compile(&template, None, None).is_ok());
    }

    #[test]
    fn one_over_max_capture_groups_is_rejected() {
        let template: String = (0..MAX_CAPTURE_GROUPS + 1).map(|i| format!("%p{i}%")).collect();
        assert!(compile(&template, None, None).is_err());
    }

    #[test]
    fn literal_parens_with_no_tokens_are_still_capped() {
        let literal: String = "(".repeat(MAX_CAPTURE_GROUPS + 1) + &")".repeat(MAX_CAPTURE_GROUPS + 1);
        assert!(compile(&literal, None, None).is_err());
    }
}
