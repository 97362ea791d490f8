//! Hostname helpers: cookie scoping and the localhost gate.

use std::net::{IpAddr, Ipv6Addr};

/// Registrable root domain used to scope identity cookies across subdomains
///
/// Takes the last two dot-separated labels (`a.shop.example.com` ->
/// `example.com`). Returns `None` for IP literals and single-label hosts, which
/// can only carry host-only cookies.
pub fn root_domain(hostname: &str) -> Option<String> {
    let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() || parse_ip(&host).is_some() {
        return None;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 2 || labels.iter().any(|l| l.is_empty()) {
        return None;
    }

    Some(labels[labels.len() - 2..].join("."))
}

/// Whether a hostname is loopback, private or otherwise local-only
pub fn is_local_hostname(hostname: &str) -> bool {
    let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();

    if host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }

    match parse_ip(&host) {
        Some(IpAddr::V4(ip)) => {
            ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
        }
        Some(IpAddr::V6(ip)) => {
            ip.is_loopback()
                || ip.is_unspecified()
                || is_unique_local(&ip)
                || ip.to_ipv4_mapped().map_or(false, |v4| {
                    v4.is_loopback() || v4.is_private() || v4.is_link_local()
                })
        }
        None => false,
    }
}

/// Parse an IP literal, accepting bracketed IPv6 (`[::1]`)
fn parse_ip(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

fn is_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_domain_last_two_labels() {
        assert_eq!(root_domain("example.com").as_deref(), Some("example.com"));
        assert_eq!(root_domain("a.example.com").as_deref(), Some("example.com"));
        assert_eq!(root_domain("x.y.shop.example.com").as_deref(), Some("example.com"));
        assert_eq!(root_domain("WWW.Example.COM.").as_deref(), Some("example.com"));
    }

    #[test]
    fn test_root_domain_host_only_cases() {
        assert_eq!(root_domain("localhost"), None);
        assert_eq!(root_domain("192.168.1.5"), None);
        assert_eq!(root_domain("[::1]"), None);
        assert_eq!(root_domain(""), None);
    }

    #[test]
    fn test_local_hostnames() {
        for host in [
            "localhost",
            "app.localhost",
            "printer.local",
            "127.0.0.1",
            "10.0.0.8",
            "172.20.1.1",
            "192.168.1.5",
            "169.254.3.4",
            "0.0.0.0",
            "::1",
            "[::1]",
            "fd12:3456::1",
        ] {
            assert!(is_local_hostname(host), "{} should be local", host);
        }
    }

    #[test]
    fn test_public_hostnames() {
        for host in [
            "example.com",
            "8.8.8.8",
            "172.32.0.1",
            "2001:4860::8888",
            "localhost.example.com",
        ] {
            assert!(!is_local_hostname(host), "{} should not be local", host);
        }
    }
}
