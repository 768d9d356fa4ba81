/// Canonicalize an instance identifier by stripping an optional `#fragment`.
///
/// For federation identity, `https://example.com#primary` and `https://example.com`
/// must map to the same principal for policy and signature-key lookups.
pub fn canonical_instance_id(value: &str) -> &str {
    value.split('#').next().unwrap_or(value)
}

/// Compare two instance identifiers after canonicalization.
pub fn instance_ids_equivalent(left: &str, right: &str) -> bool {
    canonical_instance_id(left) == canonical_instance_id(right)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fragment() {
        assert_eq!(
            canonical_instance_id("https://example.com#primary"),
            "https://example.com"
        );
    }

    #[test]
    fn no_fragment_is_unchanged() {
        assert_eq!(canonical_instance_id("https://example.com"), "https://example.com");
    }

    #[test]
    fn equivalence_ignores_fragment() {
        assert!(instance_ids_equivalent(
            "https://example.com#a",
            "https://example.com#b"
        ));
        assert!(!instance_ids_equivalent(
            "https://example.com",
            "https://other.example.com"
        ));
    }
}
