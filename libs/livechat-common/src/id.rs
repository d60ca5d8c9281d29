use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = livechat_common::id::prefixed_ulid("vs");
/// assert!(id.starts_with("vs_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    /// Viewer session on the comment gateway.
    pub const VIEWER_SESSION: &str = "vs";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_ulid_has_prefix_and_ulid_body() {
        let id = prefixed_ulid(prefix::VIEWER_SESSION);
        assert!(id.starts_with("vs_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 2 + 1 + 26);
    }

    #[test]
    fn ids_are_unique() {
        let a = prefixed_ulid("vs");
        let b = prefixed_ulid("vs");
        assert_ne!(a, b);
    }
}
