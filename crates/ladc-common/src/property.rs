//! (name, value) bindings produced by a pattern match, plus the metadata
//! a pattern needs to re-derive a capture's regex fragment.

/// The two reserved property names (spec §3). `Host`'s value must parse
/// as an address; its replacement fragment is the IP-literal regex.
/// `Service`'s replacement is taken verbatim from the owning rule's
/// service string.
pub const HOST_PROPERTY: &str = "host";
pub const SERVICE_PROPERTY: &str = "service";

/// Maximum property name length (bytes), matching the source's bounded
/// token-name buffer.
pub const MAX_PROPERTY_NAME_LEN: usize = 63;

/// A single (name, value) binding. `capture_index` and `replacement` are
/// only meaningful for properties derived from a pattern token; bindings
/// synthesised at substitution time (rule overlay, defaults) leave them
/// `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    value: String,
    capture_index: Option<usize>,
    replacement: Option<String>,
}

impl Property {
    /// Lower-cases and truncates `name` to the bounded length, matching
    /// intake normalisation (spec §3).
    pub fn new(name: impl AsRef<str>, value: impl Into<String>) -> Self {
        let mut name = name.as_ref().to_ascii_lowercase();
        name.truncate(MAX_PROPERTY_NAME_LEN);
        Property {
            name,
            value: value.into(),
            capture_index: None,
            replacement: None,
        }
    }

    pub fn with_capture(mut self, index: usize, replacement: impl Into<String>) -> Self {
        self.capture_index = Some(index);
        self.replacement = Some(replacement.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn capture_index(&self) -> Option<usize> {
        self.capture_index
    }

    pub fn replacement(&self) -> Option<&str> {
        self.replacement.as_deref()
    }

    pub fn is_host(&self) -> bool {
        self.name == HOST_PROPERTY
    }

    pub fn is_service(&self) -> bool {
        self.name == SERVICE_PROPERTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_lowercased_on_intake() {
        let p = Property::new("HoSt", "1.2.3.4");
        assert_eq!(p.name(), "host");
        assert!(p.is_host());
    }

    #[test]
    fn name_is_bounded() {
        let long = "x".repeat(200);
        let p = Property::new(&long, "v");
        assert_eq!(p.name().len(), MAX_PROPERTY_NAME_LEN);
    }
}
