//! Build and envelope protocol versions

/// Envelope protocol stamped on every event this build produces
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest envelope protocol this build still imports
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Banner line, e.g. `fieldsync v0.1.0 (protocol 1)`
pub fn version_string() -> String {
    format!("fieldsync v{} (protocol {})", env!("CARGO_PKG_VERSION"), PROTOCOL_VERSION)
}

/// True if events stamped with `protocol_version` can be imported and replayed
pub fn is_protocol_compatible(protocol_version: u32) -> bool {
    (MIN_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&protocol_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_window() {
        assert!(is_protocol_compatible(PROTOCOL_VERSION));
        assert!(!is_protocol_compatible(PROTOCOL_VERSION + 1));
        assert!(!is_protocol_compatible(MIN_PROTOCOL_VERSION - 1));
    }

    #[test]
    fn test_version_string_names_protocol() {
        let banner = version_string();
        assert!(banner.starts_with("fieldsync v"));
        assert!(banner.ends_with(&format!("(protocol {})", PROTOCOL_VERSION)));
    }
}
