use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
///
/// These errors cover both parsing failures and security policy violations
/// designed to prevent SSRF (Server-Side Request Forgery) attacks through
/// links embedded in untrusted feed documents.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates an operator-supplied feed URL.
///
/// Only the scheme is checked: the root feed is trusted configuration and may
/// legitimately live on an internal host.
pub fn validate_feed_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;
    check_scheme(&url)?;
    Ok(url)
}

/// Resolves a link found inside a feed document against the page it came from.
///
/// Links that stay on `trusted_host` (the root feed's host) are accepted as-is.
/// Links to any other host must not target localhost or private ranges.
///
/// # Examples
///
/// ```
/// use atomimport::util::resolve_link;
/// use url::Url;
///
/// let page = Url::parse("http://10.0.0.5/feeds/datasets.atom").unwrap();
/// let prev = resolve_link(&page, "archive/1.atom", Some("10.0.0.5")).unwrap();
/// assert_eq!(prev.as_str(), "http://10.0.0.5/feeds/archive/1.atom");
///
/// // A document on a public host cannot point us at an internal one
/// let page = Url::parse("https://data.example.org/feed.atom").unwrap();
/// assert!(resolve_link(&page, "http://192.168.1.1/secret", Some("data.example.org")).is_err());
/// ```
pub fn resolve_link(
    base: &Url,
    href: &str,
    trusted_host: Option<&str>,
) -> Result<Url, UrlValidationError> {
    let url = base.join(href.trim())?;
    check_scheme(&url)?;

    if trusted_host.is_some() && url.host_str() == trusted_host {
        return Ok(url);
    }

    check_public_host(&url)?;
    Ok(url)
}

fn check_scheme(url: &Url) -> Result<(), UrlValidationError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

fn check_public_host(url: &Url) -> Result<(), UrlValidationError> {
    if let Some(host) = url.host_str() {
        if host == "localhost" {
            return Err(UrlValidationError::Localhost);
        }

        // Strip brackets from IPv6 addresses for parsing
        let host_for_parse = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if let Ok(ip) = host_for_parse.parse::<IpAddr>() {
            if ip.is_loopback() {
                return Err(UrlValidationError::Localhost);
            }
            if is_private_ip(&ip) {
                return Err(UrlValidationError::PrivateIp(ip.to_string()));
            }
        }
    }

    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

/// Last non-empty path segment of a URL, percent-decoded.
pub fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()?
        .filter(|s| !s.is_empty())
        .next_back()?;
    let bytes = urlencoding::decode_binary(segment.as_bytes());
    let decoded = String::from_utf8_lossy(&bytes).into_owned();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://data.example.org/feeds/datasets.atom").unwrap()
    }

    #[test]
    fn test_feed_url_schemes() {
        assert!(validate_feed_url("https://example.com/feed.atom").is_ok());
        assert!(validate_feed_url("http://127.0.0.1:4272/datasets.atom").is_ok());
        assert!(validate_feed_url("file:///etc/passwd").is_err());
        assert!(validate_feed_url("ftp://example.com").is_err());
        assert!(validate_feed_url("not a url").is_err());
    }

    #[test]
    fn test_relative_link_resolved_against_page() {
        let url = resolve_link(&page(), "datasets-1.atom", Some("data.example.org")).unwrap();
        assert_eq!(url.as_str(), "https://data.example.org/feeds/datasets-1.atom");

        let url = resolve_link(&page(), "/files/abcd0001.tif", Some("data.example.org")).unwrap();
        assert_eq!(url.as_str(), "https://data.example.org/files/abcd0001.tif");
    }

    #[test]
    fn test_trusted_host_may_be_private() {
        let base = Url::parse("http://127.0.0.1:8080/datasets.atom").unwrap();
        let url = resolve_link(&base, "page2.atom", Some("127.0.0.1")).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8080/page2.atom");
    }

    #[test]
    fn test_foreign_private_hosts_rejected() {
        let trusted = Some("data.example.org");
        assert!(resolve_link(&page(), "http://localhost/x", trusted).is_err());
        assert!(resolve_link(&page(), "http://127.0.0.1/x", trusted).is_err());
        assert!(resolve_link(&page(), "http://192.168.1.1:8080/x", trusted).is_err());
        assert!(resolve_link(&page(), "http://10.0.0.1/x", trusted).is_err());
        assert!(resolve_link(&page(), "http://169.254.1.1/x", trusted).is_err());
        assert!(resolve_link(&page(), "http://[::1]/x", trusted).is_err());
        assert!(resolve_link(&page(), "http://[fe80::1]/x", trusted).is_err());
        assert!(resolve_link(&page(), "http://0.0.0.0/x", trusted).is_err());
    }

    #[test]
    fn test_foreign_public_host_accepted() {
        let url = resolve_link(
            &page(),
            "https://mirror.example.net/abcd0001.tif",
            Some("data.example.org"),
        )
        .unwrap();
        assert_eq!(url.host_str(), Some("mirror.example.net"));
    }

    #[test]
    fn test_link_scheme_rejected() {
        let result = resolve_link(&page(), "file:///etc/passwd", Some("data.example.org"));
        assert!(matches!(result, Err(UrlValidationError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_filename_from_url() {
        let url = Url::parse("https://example.org/files/abcd0001.tif?download=1").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("abcd0001.tif"));

        let url = Url::parse("https://example.org/files/run%203.txt").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("run 3.txt"));

        let url = Url::parse("https://example.org/files/caf%C3%A9%FF.dat").unwrap();
        assert_eq!(filename_from_url(&url).as_deref(), Some("caf\u{e9}\u{fffd}.dat"));

        let url = Url::parse("https://example.org/").unwrap();
        assert_eq!(filename_from_url(&url), None);
    }
}
