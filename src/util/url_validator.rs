use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Reasons an imported feed address is refused.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The address is not an absolute URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Only http and https feeds can be fetched.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The host is a private, link-local or unspecified address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validate an address taken from an imported subscription list.
///
/// Imported lists are third-party documents, so besides requiring http(s)
/// this rejects loopback and private hosts that a hostile list could use to
/// make the refresh probe the local network.
///
/// ```
/// use feedfold::util::validate_url;
///
/// assert!(validate_url("https://example.com/feed.xml").is_ok());
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://10.0.0.8/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;
    if !is_http(&url) {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }

    match url.host() {
        Some(url::Host::Domain(host)) if host.eq_ignore_ascii_case("localhost") => {
            Err(UrlValidationError::Localhost)
        }
        Some(url::Host::Ipv4(ip)) => check_ip(IpAddr::V4(ip)).map(|()| url),
        Some(url::Host::Ipv6(ip)) => check_ip(IpAddr::V6(ip)).map(|()| url),
        _ => Ok(url),
    }
}

fn check_ip(ip: IpAddr) -> Result<(), UrlValidationError> {
    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    let private = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    };
    if private {
        Err(UrlValidationError::PrivateIp(ip.to_string()))
    } else {
        Ok(())
    }
}

fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Returns the value when it parses as an absolute http(s) URL.
pub fn http_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    Url::parse(trimmed)
        .ok()
        .filter(is_http)
        .map(|_| trimmed.to_owned())
}

/// True when `url` is hosted on `domain` or one of its subdomains.
pub fn host_matches(url: &str, domain: &str) -> bool {
    Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| {
            host == domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|rest| rest.ends_with('.'))
        })
}
