//! Domain extraction and display names.
//!
//! `extract_domain` turns an arbitrary URL into its registrable domain using
//! the public suffix list, so `www.example.co.uk` becomes `example.co.uk`
//! rather than `co.uk`.

use url::{Host, Url};

/// Extracts the registrable domain from a URL.
///
/// Returns an empty string when the input cannot be parsed as an absolute
/// URL or has no host.  Hosts without a registrable part (IP literals,
/// single-label names such as `localhost`, bare public suffixes) are
/// returned as-is, lower-cased.
pub fn extract_domain(url: &str) -> String {
    let parsed = match Url::parse(url.trim()) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::trace!(url = %url, error = %err, "unparsable url");
            return String::new();
        }
    };
    match parsed.host() {
        Some(Host::Domain(host)) => {
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            if host.is_empty() {
                return String::new();
            }
            match psl::domain_str(&host) {
                Some(registrable) => registrable.to_string(),
                None => host,
            }
        }
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => String::new(),
    }
}

static SITE_NAMES: &[(&str, &str)] = &[
    ("youtube.com", "YouTube"),
    ("instagram.com", "Instagram"),
    ("facebook.com", "Facebook"),
    ("twitter.com", "Twitter"),
    ("x.com", "X"),
    ("linkedin.com", "LinkedIn"),
    ("reddit.com", "Reddit"),
    ("tiktok.com", "TikTok"),
    ("whatsapp.com", "WhatsApp"),
    ("messenger.com", "Messenger"),
    ("steampowered.com", "Steam"),
];

/// Human readable name for well-known distracting sites.
pub fn site_name(domain: &str) -> Option<&'static str> {
    SITE_NAMES
        .iter()
        .find(|(d, _)| *d == domain)
        .map(|(_, name)| *name)
}
