//! Request rewriting before forwarding upstream
//!
//! Adds the caller's identity as proxy credentials plus the forwarding
//! headers, and turns the inbound request into the proxy-form request the
//! upstream expects.

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::header::{HOST, PROXY_AUTHORIZATION};
use http::{HeaderValue, Method, Request, Version};

use crate::error::{GatewayError, Result};
use crate::identity::Identity;
use crate::wire::UpstreamRequest;

/// Password paired with the identity in the upstream Basic credentials
pub const PLACEHOLDER_PASSWORD: &str = "automatic";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// `Basic base64(user:password)`
pub fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password)))
}

/// Reject an HTTP/2 CONNECT that carries `:scheme` or `:path`.
pub fn validate_connect<B>(req: &Request<B>) -> Result<()> {
    if req.method() != Method::CONNECT || req.version() != Version::HTTP_2 {
        return Ok(());
    }

    let uri = req.uri();
    let has_path = uri
        .path_and_query()
        .map_or(false, |pq| !pq.as_str().is_empty());
    if uri.scheme().is_some() || has_path {
        return Err(GatewayError::protocol(format!(
            "CONNECT with scheme or path: {}",
            uri
        )));
    }
    Ok(())
}

/// Split a CONNECT target into host and port.
///
/// Splits on the last colon so bracketed IPv6 literals keep their colons.
pub fn parse_authority(authority: &str) -> Result<(String, u16)> {
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| GatewayError::protocol("CONNECT target must be host:port"))?;

    if host.is_empty() {
        return Err(GatewayError::protocol("CONNECT target host is empty"));
    }

    let port: u16 = port.parse().map_err(|_| {
        GatewayError::protocol(format!(
            "invalid port '{}': must be a number between 1 and 65535",
            port
        ))
    })?;
    if port == 0 {
        return Err(GatewayError::protocol(
            "invalid port: must be between 1 and 65535",
        ));
    }

    Ok((host.to_string(), port))
}

fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(authority) = req.uri().authority() {
        return Some(authority.as_str().to_string());
    }
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Build the request to send upstream on behalf of `identity`.
///
/// CONNECT becomes a fresh request carrying only method, target, host and a
/// copy of the inbound headers. Anything else is sent in absolute form with
/// an `http` scheme. The inbound request is left untouched.
pub fn rewrite_request<B>(
    req: &Request<B>,
    identity: &Identity,
    remote_addr: SocketAddr,
) -> Result<UpstreamRequest> {
    validate_connect(req)?;

    let (target, host) = if req.method() == Method::CONNECT {
        let authority = req
            .uri()
            .authority()
            .ok_or_else(|| GatewayError::protocol("CONNECT without a target authority"))?
            .as_str()
            .to_string();
        parse_authority(&authority)?;
        (authority.clone(), authority)
    } else {
        let host = request_host(req)
            .ok_or_else(|| GatewayError::protocol("request has no host"))?;
        let path = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| !pq.is_empty())
            .unwrap_or("/");
        (format!("http://{}{}", host, path), host)
    };

    let mut headers = req.headers().clone();
    headers.remove(HOST);

    let credentials = basic_auth(identity.as_str(), PLACEHOLDER_PASSWORD);
    headers.insert(
        PROXY_AUTHORIZATION,
        HeaderValue::from_str(&credentials)
            .map_err(|e| GatewayError::internal(format!("credentials header: {}", e)))?,
    );

    let client_ip = HeaderValue::from_str(&remote_addr.ip().to_string())
        .map_err(|e| GatewayError::internal(format!("forwarded address: {}", e)))?;
    headers.insert(X_FORWARDED_FOR, client_ip.clone());
    headers.insert(X_REAL_IP, client_ip);

    Ok(UpstreamRequest {
        method: req.method().clone(),
        target,
        host,
        headers,
        body: None,
    })
}
