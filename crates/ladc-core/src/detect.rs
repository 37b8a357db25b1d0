//! Pure matching helpers for the detection pipeline (spec §4.2).
//!
//! Kept free of locks/async so the capture-extraction logic can be
//! unit-tested without spinning up an [`crate::engine::Engine`].

use ladc_common::{HostAddress, Property};
use ladc_config::CompiledPattern;

/// Extracts the bindings named by `pattern`'s tokens from a successful
/// match against `line`, returning `None` if the pattern doesn't match
/// at all.
pub fn extract_bindings(pattern: &CompiledPattern, line: &str) -> Option<Vec<Property>> {
    let captures = pattern.regex.captures(line)?;
    let mut bindings = Vec::with_capacity(pattern.tokens.len());
    for token in &pattern.tokens {
        if let Some(m) = captures.get(token.capture_index) {
            let mut prop = Property::new(&token.name, m.as_str());
            prop = prop.with_capture(token.capture_index, token.replacement.clone());
            bindings.push(prop);
        }
    }
    Some(bindings)
}

/// Pulls the `host` binding out of a binding set and parses it as an
/// address, per spec §3: "`host` (value must parse as an address)".
pub fn host_binding(bindings: &[Property]) -> Option<HostAddress> {
    let host = bindings.iter().find(|p| p.is_host())?;
    HostAddress::parse(host.value()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_and_other_bindings() {
        let pattern = ladc_config::compile_pattern("Failed login from %host% as %user%", None, None).unwrap();
        let bindings = extract_bindings(&pattern, "Failed login from 1.2.3.4 as root").unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(host_binding(&bindings).unwrap().to_text(), "1.2.3.4");
    }

    #[test]
    fn non_matching_line_yields_none() {
        let pattern = ladc_config::compile_pattern("Failed login from %host%", None, None).unwrap();
        assert!(extract_bindings(&pattern, "totally unrelated line").is_none());
    }
}
