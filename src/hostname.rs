//! Hostname extraction and site matching.
//!
//! Vault items and connections are matched by hostname suffix so that an
//! item saved for `example.com` also serves `mail.example.com`. The suffix
//! must fall on a label boundary: `evil-example.com` does not match
//! `example.com`.

use url::Url;

use crate::error::{Error, Result};

/// Extracts the hostname from a sender origin or URL.
///
/// # Errors
///
/// - [`Error::Url`] if `origin` does not parse
/// - [`Error::ConnectionRefused`] if the URL has no host (e.g. `about:blank`)
pub fn hostname_of(origin: &str) -> Result<String> {
    let url = Url::parse(origin)?;
    url.host_str()
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| Error::connection_refused(format!("no hostname in {origin}")))
}

/// Returns `true` if `requested` is `site` or a subdomain of it.
///
/// Comparison is ASCII case-insensitive. An empty `site` never matches.
#[must_use]
pub fn is_within_site(requested: &str, site: &str) -> bool {
    if site.is_empty() || requested.len() < site.len() {
        return false;
    }

    let bytes = requested.as_bytes();
    let split = bytes.len() - site.len();
    if !bytes[split..].eq_ignore_ascii_case(site.as_bytes()) {
        return false;
    }

    split == 0 || bytes[split - 1] == b'.'
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_exact_match() {
        assert!(is_within_site("example.com", "example.com"));
    }

    #[test]
    fn test_subdomain_match() {
        assert!(is_within_site("mail.example.com", "example.com"));
        assert!(is_within_site("a.b.example.com", "example.com"));
    }

    #[test]
    fn test_lookalike_rejected() {
        assert!(!is_within_site("evil-example.com", "example.com"));
        assert!(!is_within_site("notexample.com", "example.com"));
    }

    #[test]
    fn test_reverse_direction_rejected() {
        assert!(!is_within_site("example.com", "mail.example.com"));
    }

    #[test]
    fn test_empty_site_never_matches() {
        assert!(!is_within_site("example.com", ""));
    }

    #[test]
    fn test_case_insensitive() {
        assert!(is_within_site("Mail.Example.COM", "example.com"));
    }

    #[test]
    fn test_hostname_of_origin() {
        assert_eq!(
            hostname_of("https://Mail.Example.com:8443/login?x=1").expect("host"),
            "mail.example.com"
        );
    }

    #[test]
    fn test_hostname_of_rejects_hostless() {
        assert!(hostname_of("about:blank").is_err());
        assert!(hostname_of("not a url").is_err());
    }

    proptest! {
        #[test]
        fn prop_subdomains_always_match(
            label in "[a-z][a-z0-9]{0,8}",
            site in "[a-z]{1,8}\\.[a-z]{2,4}",
        ) {
            let requested = format!("{label}.{site}");
            prop_assert!(is_within_site(&requested, &site));
        }

        #[test]
        fn prop_glued_prefix_never_matches(
            prefix in "[a-z0-9-]{1,8}",
            site in "[a-z]{1,8}\\.[a-z]{2,4}",
        ) {
            let requested = format!("{prefix}{site}");
            prop_assert!(!is_within_site(&requested, &site));
        }
    }
}
