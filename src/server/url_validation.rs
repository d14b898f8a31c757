use crate::error::ProxyError;
use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Parse the caller-supplied `url` parameter into an absolute http(s) URL.
///
/// # Errors
/// Returns [`ProxyError::InvalidUrl`] for relative URLs, garbage, and
/// non-HTTP(S) schemes.
pub fn parse_target_url(raw: &str) -> Result<Url, ProxyError> {
    let parsed = Url::parse(raw.trim()).map_err(|_| ProxyError::InvalidUrl(raw.to_string()))?;

    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        _ => Err(ProxyError::InvalidUrl(raw.to_string())),
    }
}

/// Reject targets on private, loopback or link-local addresses.
///
/// Only enabled with `BLOCK_PRIVATE_ORIGINS`. IP literals are checked
/// against blocked ranges; hostnames are accepted without DNS resolution,
/// so DNS rebinding is not covered.
///
/// # Errors
/// Returns [`ProxyError::BlockedOrigin`] for non-HTTP(S) schemes, missing
/// hosts, `localhost`, and blocked IPv4/IPv6 literals.
pub fn validate_origin_url(url: &str) -> Result<(), ProxyError> {
    let blocked = || ProxyError::BlockedOrigin(url.to_string());
    let parsed = Url::parse(url).map_err(|_| blocked())?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(blocked());
    }

    match parsed.host().ok_or_else(blocked)? {
        Host::Ipv4(ip) if is_blocked_ipv4(ip) => Err(blocked()),
        Host::Ipv6(ip) if is_blocked_ipv6(ip) => Err(blocked()),
        Host::Domain(name) if name.eq_ignore_ascii_case("localhost") => Err(blocked()),
        _ => Ok(()),
    }
}

/// `0.0.0.0/8`, RFC 1918, loopback, link-local (cloud metadata) and CGNAT.
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 0
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || (a == 100 && (64..=127).contains(&b))
}

/// Loopback, unspecified, link-local `fe80::/10`, unique-local `fc00::/7`,
/// and IPv4-mapped addresses that would be blocked as IPv4.
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xffc0) == 0xfe80
        || (first & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_http_targets() {
        let url = parse_target_url("https://cdn.example.com/live/index.m3u8?token=abc").unwrap();
        assert_eq!(url.host_str(), Some("cdn.example.com"));
        assert!(parse_target_url("http://1.2.3.4/stream").is_ok());
    }

    #[test]
    fn rejects_relative_and_garbage_targets() {
        for raw in ["", "not-a-url", "/local/path.m3u8", "cdn.example.com/x", "://x"] {
            assert!(
                matches!(parse_target_url(raw), Err(ProxyError::InvalidUrl(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_non_http_targets() {
        assert!(parse_target_url("ftp://cdn.example.com/file.ts").is_err());
        assert!(parse_target_url("file:///etc/passwd").is_err());
        assert!(parse_target_url("data:text/plain,hello").is_err());
    }

    #[test]
    fn blocks_private_ipv4() {
        for url in [
            "http://127.0.0.1/stream",
            "http://10.1.2.3/stream",
            "http://172.16.0.1/stream",
            "http://172.31.255.255/stream",
            "http://192.168.1.1/stream",
            "http://169.254.169.254/latest/meta-data/",
            "http://0.1.2.3/stream",
            "http://100.64.0.1/stream",
        ] {
            assert!(validate_origin_url(url).is_err(), "{url} should be blocked");
        }
    }

    #[test]
    fn blocks_private_ipv6_and_localhost() {
        for url in [
            "http://[::1]/stream",
            "http://[fe80::1]/stream",
            "http://[fd00::1]/stream",
            "http://[::ffff:10.0.0.1]/stream",
            "http://localhost:8080/stream",
        ] {
            assert!(validate_origin_url(url).is_err(), "{url} should be blocked");
        }
    }

    #[test]
    fn allows_public_hosts() {
        for url in [
            "https://cdn.example.com/stream.m3u8",
            "http://8.8.8.8/dns",
            "http://172.15.255.255/stream",
            "http://172.32.0.0/stream",
            "http://[2001:db8::1]/stream",
        ] {
            assert!(validate_origin_url(url).is_ok(), "{url} should be allowed");
        }
    }
}
