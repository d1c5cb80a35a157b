//! Node self-registration.
//!
//! Workers announce themselves with `(node_id, url)`. A node that
//! binds to the wildcard address advertises `0.0.0.0` in its URL; the
//! control plane substitutes the address it actually saw the request
//! come from, preferring the first `X-Forwarded-For` hop when the
//! direct peer is a loopback proxy.

use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

/// The wildcard host some workers advertise before they know their
/// own address.
const WILDCARD_HOST: &str = "0.0.0.0";

/// Resolve the client IP for a request: the direct peer, unless the
/// peer is loopback and a proxy supplied `X-Forwarded-For` — then the
/// first hop of that header.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    let peer_ip = peer.ip();
    if peer_ip.is_loopback() {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first_hop) = forwarded.split(',').next() {
                if let Ok(ip) = first_hop.trim().parse() {
                    return ip;
                }
            }
        }
    }
    peer_ip
}

/// Rewrite a wildcard-host URL to the observed client address.
/// URLs without the wildcard pass through untouched.
pub fn resolve_advertised_url(url: &str, headers: &HeaderMap, peer: SocketAddr) -> String {
    if url.contains(WILDCARD_HOST) {
        let ip = client_ip(headers, peer);
        url.replace(WILDCARD_HOST, &ip.to_string())
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer(addr: &str) -> SocketAddr {
        addr.parse().unwrap()
    }

    #[test]
    fn test_plain_url_passes_through() {
        let headers = HeaderMap::new();
        let url = resolve_advertised_url(
            "http://10.0.0.5:9000",
            &headers,
            peer("192.168.1.20:51000"),
        );
        assert_eq!(url, "http://10.0.0.5:9000");
    }

    #[test]
    fn test_wildcard_substitutes_peer_ip() {
        let headers = HeaderMap::new();
        let url = resolve_advertised_url(
            "http://0.0.0.0:9000",
            &headers,
            peer("192.168.1.20:51000"),
        );
        assert_eq!(url, "http://192.168.1.20:9000");
    }

    #[test]
    fn test_loopback_peer_uses_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        let url = resolve_advertised_url("http://0.0.0.0:9000", &headers, peer("127.0.0.1:51000"));
        assert_eq!(url, "http://1.2.3.4:9000");
    }

    #[test]
    fn test_non_loopback_peer_ignores_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let url = resolve_advertised_url(
            "http://0.0.0.0:9000",
            &headers,
            peer("192.168.1.20:51000"),
        );
        assert_eq!(url, "http://192.168.1.20:9000");
    }

    #[test]
    fn test_loopback_peer_without_header_keeps_loopback() {
        let headers = HeaderMap::new();
        let url = resolve_advertised_url("http://0.0.0.0:9000", &headers, peer("127.0.0.1:51000"));
        assert_eq!(url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_malformed_forwarded_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        let url = resolve_advertised_url("http://0.0.0.0:9000", &headers, peer("127.0.0.1:51000"));
        assert_eq!(url, "http://127.0.0.1:9000");
    }
}
