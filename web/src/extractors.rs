//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation id
//! - `ClientIp`: client address used as the rate-limit key
//! - `TrustedProxies`: peers allowed to name the client in forwarding headers

use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Uses the id stored by the correlation middleware when installed, then the
/// `X-Correlation-ID` header, and otherwise generates a new UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = parts
            .extensions
            .get::<Uuid>()
            .copied()
            .or_else(|| {
                parts
                    .headers
                    .get(CORRELATION_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Peers whose forwarding headers are believed.
///
/// Install with [`axum::Extension`]. Without it, or when the socket peer is
/// not listed, [`ClientIp`] is the socket address and `X-Forwarded-For` /
/// `X-Real-IP` are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustedProxies(Arc<[IpAddr]>);

impl TrustedProxies {
    /// Trust forwarding headers set by `proxies`.
    pub fn new(proxies: impl IntoIterator<Item = IpAddr>) -> Self {
        Self(proxies.into_iter().collect())
    }

    /// Whether no proxy is trusted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `ip` is a trusted proxy.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.0.contains(&ip)
    }
}

/// Client IP address, used as the rate-limit key.
///
/// # Priority
///
/// 1. Connection address (when served with `into_make_service_with_connect_info`)
/// 2. If that peer is a [`TrustedProxies`] member: the right-most untrusted
///    `X-Forwarded-For` entry, then `X-Real-IP`
/// 3. `127.0.0.1` when the connection address is unknown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = extract_client_ip(&parts.headers, parts.extensions.get(), parts.extensions.get());

        Ok(Self(ip))
    }
}

fn extract_client_ip(
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
    trusted: Option<&TrustedProxies>,
) -> IpAddr {
    let Some(ConnectInfo(peer)) = connect_info else {
        return IpAddr::V4(Ipv4Addr::LOCALHOST);
    };
    let peer = peer.ip();

    match trusted {
        Some(trusted) if trusted.contains(peer) => {
            forwarded_client(headers, trusted).unwrap_or(peer)
        }
        _ => peer,
    }
}

fn forwarded_client(headers: &HeaderMap, trusted: &TrustedProxies) -> Option<IpAddr> {
    let chain: Vec<IpAddr> = headers
        .get_all("X-Forwarded-For")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(','))
        .filter_map(|entry| entry.trim().parse::<IpAddr>().ok())
        .collect();

    // Walk back through trusted hops; the first untrusted one is the client.
    let forwarded = chain
        .iter()
        .rev()
        .find(|ip| !trusted.contains(**ip))
        .or_else(|| chain.first())
        .copied();
    if forwarded.is_some() {
        return forwarded;
    }

    headers
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn client_ip(req: Request<()>) -> ClientIp {
        let (mut parts, ()) = req.into_parts();
        ClientIp::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let req = Request::builder()
            .header(CORRELATION_ID_HEADER, uuid.to_string())
            .body(())
            .unwrap();

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn correlation_id_prefers_middleware_extension() {
        let stored = Uuid::new_v4();
        let mut req = Request::builder()
            .header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .unwrap();
        req.extensions_mut().insert(stored);

        let (mut parts, ()) = req.into_parts();
        let correlation_id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();

        assert_eq!(correlation_id.0, stored);
    }

    fn from_peer(peer: &str) -> axum::http::request::Builder {
        let addr: SocketAddr = peer.parse().unwrap();
        let mut builder = Request::builder();
        builder.extensions_mut().unwrap().insert(ConnectInfo(addr));
        builder
    }

    fn trusting(req: Request<()>, proxies: &[&str]) -> Request<()> {
        let mut req = req;
        req.extensions_mut().insert(TrustedProxies::new(
            proxies.iter().map(|p| p.parse::<IpAddr>().unwrap()),
        ));
        req
    }

    #[tokio::test]
    async fn client_ip_from_connection() {
        let req = from_peer("192.0.2.10:55000").body(()).unwrap();

        assert_eq!(client_ip(req).await.0.to_string(), "192.0.2.10");
    }

    #[tokio::test]
    async fn forwarding_headers_ignored_without_trusted_proxies() {
        let req = from_peer("192.0.2.10:55000")
            .header("X-Forwarded-For", "203.0.113.1")
            .header("X-Real-IP", "198.51.100.42")
            .body(())
            .unwrap();

        assert_eq!(client_ip(req).await.0.to_string(), "192.0.2.10");
    }

    #[tokio::test]
    async fn forwarding_headers_ignored_from_untrusted_peer() {
        let req = from_peer("192.0.2.10:55000")
            .header("X-Forwarded-For", "203.0.113.1")
            .body(())
            .unwrap();
        let req = trusting(req, &["10.0.0.1"]);

        assert_eq!(client_ip(req).await.0.to_string(), "192.0.2.10");
    }

    #[tokio::test]
    async fn trusted_proxy_forwards_right_most_untrusted_hop() {
        let req = from_peer("10.0.0.1:443")
            .header("X-Forwarded-For", "198.18.0.1, 203.0.113.1, 10.0.0.2")
            .body(())
            .unwrap();
        let req = trusting(req, &["10.0.0.1", "10.0.0.2"]);

        assert_eq!(client_ip(req).await.0.to_string(), "203.0.113.1");
    }

    #[tokio::test]
    async fn trusted_proxy_falls_back_to_x_real_ip() {
        let req = from_peer("10.0.0.1:443")
            .header("X-Real-IP", "198.51.100.42")
            .body(())
            .unwrap();
        let req = trusting(req, &["10.0.0.1"]);

        assert_eq!(client_ip(req).await.0.to_string(), "198.51.100.42");
    }

    #[tokio::test]
    async fn unknown_connection_falls_back_to_localhost() {
        let req = Request::builder()
            .header("X-Forwarded-For", "203.0.113.1")
            .body(())
            .unwrap();

        assert_eq!(client_ip(req).await.0.to_string(), "127.0.0.1");
    }
}
