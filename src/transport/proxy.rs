//! Proxy tunnel handshakes.
//!
//! Runs over a freshly dialed proxy socket before any TLS or WebSocket
//! traffic. After a successful handshake the socket is a raw pipe to the
//! bridge; nothing past the proxy's response is read.
//!
//! | Type | Handshake |
//! |------|-----------|
//! | HTTP | `CONNECT host:port HTTP/1.1`, optional `Proxy-Authorization: Basic` |
//! | SOCKS5 | RFC 1928 `CONNECT`, optional RFC 1929 username/password |

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::net::IpAddr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::client::options::{ProxyOptions, ProxyType};
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest accepted HTTP response head from the proxy.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

const SOCKS_VERSION: u8 = 0x05;
const SOCKS_AUTH_NONE: u8 = 0x00;
const SOCKS_AUTH_PASSWORD: u8 = 0x02;
const SOCKS_AUTH_UNACCEPTABLE: u8 = 0xFF;
const SOCKS_CMD_CONNECT: u8 = 0x01;
const SOCKS_ATYP_IPV4: u8 = 0x01;
const SOCKS_ATYP_DOMAIN: u8 = 0x03;
const SOCKS_ATYP_IPV6: u8 = 0x04;

// ============================================================================
// Handshake
// ============================================================================

/// Performs the tunnel handshake for `proxy` towards `host:port`.
///
/// # Errors
///
/// Returns [`Error::ProxyTunnelFailed`] on a refused handshake, a malformed
/// answer, or any socket error.
pub async fn handshake<S>(stream: &mut S, proxy: &ProxyOptions, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!(
        proxy_type = proxy.proxy_type.as_str(),
        proxy = %format!("{}:{}", proxy.host, proxy.port),
        target = %authority(host, port),
        "Opening proxy tunnel"
    );

    match proxy.proxy_type {
        ProxyType::Http => http_connect(stream, proxy, host, port).await,
        ProxyType::Socks5 => socks5_connect(stream, proxy, host, port).await,
    }
}

// ============================================================================
// HTTP CONNECT
// ============================================================================

async fn http_connect<S>(stream: &mut S, proxy: &ProxyOptions, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let target = authority(host, port);
    let mut request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n");
    if let Some((username, password)) = proxy.credentials() {
        let token = BASE64_STANDARD.encode(format!("{username}:{password}"));
        request.push_str(&format!("Proxy-Authorization: Basic {token}\r\n"));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await.map_err(tunnel_io)?;
    stream.flush().await.map_err(tunnel_io)?;

    let head = read_response_head(stream).await?;
    let status = parse_status(&head)?;

    if !(200..300).contains(&status) {
        let status_line = head.lines().next().unwrap_or_default();
        return Err(Error::proxy_tunnel(format!(
            "Proxy refused CONNECT to {target}: {status_line}"
        )));
    }

    trace!(status, "HTTP CONNECT tunnel established");
    Ok(())
}

/// Reads the response head one byte at a time so no tunneled byte is lost.
async fn read_response_head<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(Error::proxy_tunnel("Proxy response head too large"));
        }
        head.push(stream.read_u8().await.map_err(tunnel_io)?);
    }

    String::from_utf8(head).map_err(|_| Error::proxy_tunnel("Proxy response is not valid UTF-8"))
}

fn parse_status(head: &str) -> Result<u16> {
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();

    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| Error::proxy_tunnel(format!("Malformed proxy status line: {status_line}"))),
        _ => Err(Error::proxy_tunnel(format!(
            "Malformed proxy status line: {status_line}"
        ))),
    }
}

// ============================================================================
// SOCKS5
// ============================================================================

async fn socks5_connect<S>(stream: &mut S, proxy: &ProxyOptions, host: &str, port: u16) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let credentials = proxy.credentials();

    // Method negotiation
    let greeting: &[u8] = if credentials.is_some() {
        &[SOCKS_VERSION, 2, SOCKS_AUTH_NONE, SOCKS_AUTH_PASSWORD]
    } else {
        &[SOCKS_VERSION, 1, SOCKS_AUTH_NONE]
    };
    stream.write_all(greeting).await.map_err(tunnel_io)?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await.map_err(tunnel_io)?;
    if choice[0] != SOCKS_VERSION {
        return Err(Error::proxy_tunnel(format!(
            "Unexpected SOCKS version: {}",
            choice[0]
        )));
    }

    match (choice[1], credentials) {
        (SOCKS_AUTH_NONE, _) => {}
        (SOCKS_AUTH_PASSWORD, Some((username, password))) => {
            socks5_authenticate(stream, username, password).await?;
        }
        (SOCKS_AUTH_UNACCEPTABLE, _) => {
            return Err(Error::proxy_tunnel(
                "SOCKS proxy accepted none of the offered authentication methods",
            ));
        }
        (method, _) => {
            return Err(Error::proxy_tunnel(format!(
                "SOCKS proxy selected unsupported method {method}"
            )));
        }
    }

    // CONNECT request
    let mut request = vec![SOCKS_VERSION, SOCKS_CMD_CONNECT, 0x00];
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            request.push(SOCKS_ATYP_IPV4);
            request.extend_from_slice(&ip.octets());
        }
        Ok(IpAddr::V6(ip)) => {
            request.push(SOCKS_ATYP_IPV6);
            request.extend_from_slice(&ip.octets());
        }
        Err(_) => {
            let len = u8::try_from(host.len())
                .map_err(|_| Error::proxy_tunnel("Host name too long for SOCKS5"))?;
            request.push(SOCKS_ATYP_DOMAIN);
            request.push(len);
            request.extend_from_slice(host.as_bytes());
        }
    }
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.map_err(tunnel_io)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.map_err(tunnel_io)?;
    if reply[1] != 0x00 {
        return Err(Error::proxy_tunnel(format!(
            "SOCKS proxy refused CONNECT: {}",
            socks5_reply_message(reply[1])
        )));
    }

    // Bound address is not needed; skip it.
    let skip = match reply[3] {
        SOCKS_ATYP_IPV4 => 4,
        SOCKS_ATYP_IPV6 => 16,
        SOCKS_ATYP_DOMAIN => usize::from(stream.read_u8().await.map_err(tunnel_io)?),
        other => {
            return Err(Error::proxy_tunnel(format!(
                "SOCKS proxy sent unknown address type {other}"
            )));
        }
    };
    let mut bound = vec![0u8; skip + 2];
    stream.read_exact(&mut bound).await.map_err(tunnel_io)?;

    trace!("SOCKS5 tunnel established");
    Ok(())
}

async fn socks5_authenticate<S>(stream: &mut S, username: &str, password: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let user_len = u8::try_from(username.len())
        .map_err(|_| Error::proxy_tunnel("SOCKS username too long"))?;
    let pass_len = u8::try_from(password.len())
        .map_err(|_| Error::proxy_tunnel("SOCKS password too long"))?;

    let mut request = Vec::with_capacity(3 + username.len() + password.len());
    request.push(0x01);
    request.push(user_len);
    request.extend_from_slice(username.as_bytes());
    request.push(pass_len);
    request.extend_from_slice(password.as_bytes());
    stream.write_all(&request).await.map_err(tunnel_io)?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.map_err(tunnel_io)?;
    if status[1] != 0x00 {
        return Err(Error::proxy_tunnel("SOCKS authentication rejected"));
    }
    Ok(())
}

fn socks5_reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `host:port`, bracketing IPv6 literals.
fn authority(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn tunnel_io(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::proxy_tunnel("Proxy closed the connection during the handshake")
    } else {
        Error::proxy_tunnel(format!("Proxy I/O error: {err}"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::duplex;

    async fn read_until_blank_line<S: AsyncRead + Unpin>(stream: &mut S) -> String {
        let mut buf = Vec::new();
        while !buf.ends_with(b"\r\n\r\n") {
            buf.push(stream.read_u8().await.expect("read"));
        }
        String::from_utf8(buf).expect("utf8")
    }

    #[tokio::test]
    async fn test_http_connect_success_leaves_tunnel_bytes() {
        let (mut client, mut proxy_side) = duplex(4096);

        let proxy_task = tokio::spawn(async move {
            let request = read_until_blank_line(&mut proxy_side).await;
            proxy_side
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\nhello")
                .await
                .expect("write");
            request
        });

        let proxy = ProxyOptions::http("proxy", 8000);
        handshake(&mut client, &proxy, "bridge", 7000)
            .await
            .expect("tunnel");

        let mut tunneled = [0u8; 5];
        client.read_exact(&mut tunneled).await.expect("read");
        assert_eq!(&tunneled, b"hello");

        let request = proxy_task.await.expect("join");
        assert!(request.starts_with("CONNECT bridge:7000 HTTP/1.1\r\n"));
        assert!(request.contains("Host: bridge:7000\r\n"));
        assert!(!request.contains("Proxy-Authorization"));
    }

    #[tokio::test]
    async fn test_http_connect_sends_credentials() {
        let (mut client, mut proxy_side) = duplex(4096);

        let proxy_task = tokio::spawn(async move {
            let request = read_until_blank_line(&mut proxy_side).await;
            proxy_side
                .write_all(b"HTTP/1.0 200 OK\r\n\r\n")
                .await
                .expect("write");
            request
        });

        let proxy = ProxyOptions::http("proxy", 8000).with_credentials("user", "pass");
        handshake(&mut client, &proxy, "::1", 7000)
            .await
            .expect("tunnel");

        let request = proxy_task.await.expect("join");
        assert!(request.starts_with("CONNECT [::1]:7000 HTTP/1.1\r\n"));
        // base64("user:pass")
        assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[tokio::test]
    async fn test_http_connect_rejected() {
        let (mut client, mut proxy_side) = duplex(4096);

        tokio::spawn(async move {
            read_until_blank_line(&mut proxy_side).await;
            proxy_side
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .expect("write");
        });

        let proxy = ProxyOptions::http("proxy", 8000);
        let err = handshake(&mut client, &proxy, "bridge", 7000)
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::ProxyTunnelFailed { .. }));
        assert!(err.to_string().contains("407"));
    }

    #[tokio::test]
    async fn test_http_connect_proxy_hangs_up() {
        let (mut client, mut proxy_side) = duplex(4096);

        tokio::spawn(async move {
            read_until_blank_line(&mut proxy_side).await;
            drop(proxy_side);
        });

        let proxy = ProxyOptions::http("proxy", 8000);
        let err = handshake(&mut client, &proxy, "bridge", 7000)
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::ProxyTunnelFailed { .. }));
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("HTTP/1.1 200 OK\r\n\r\n").expect("status"), 200);
        assert!(parse_status("SSH-2.0-OpenSSH\r\n\r\n").is_err());
        assert!(parse_status("HTTP/1.1 abc\r\n\r\n").is_err());
    }

    #[tokio::test]
    async fn test_socks5_connect_with_password() {
        let (mut client, mut proxy_side) = duplex(4096);

        let proxy_task = tokio::spawn(async move {
            let mut greeting = [0u8; 4];
            proxy_side.read_exact(&mut greeting).await.expect("greeting");
            assert_eq!(greeting, [5, 2, 0, 2]);
            proxy_side.write_all(&[5, 2]).await.expect("choice");

            let mut auth = [0u8; 11];
            proxy_side.read_exact(&mut auth).await.expect("auth");
            assert_eq!(&auth, b"\x01\x04user\x04pass");
            proxy_side.write_all(&[1, 0]).await.expect("auth ok");

            let mut head = [0u8; 5];
            proxy_side.read_exact(&mut head).await.expect("request head");
            assert_eq!(head, [5, 1, 0, 3, 6]);
            let mut rest = [0u8; 8];
            proxy_side.read_exact(&mut rest).await.expect("request rest");
            assert_eq!(&rest[..6], b"bridge");
            assert_eq!(u16::from_be_bytes([rest[6], rest[7]]), 7000);

            proxy_side
                .write_all(&[5, 0, 0, 1, 127, 0, 0, 1, 0x1F, 0x90])
                .await
                .expect("reply");
        });

        let proxy = ProxyOptions::socks5("proxy", 1080).with_credentials("user", "pass");
        handshake(&mut client, &proxy, "bridge", 7000)
            .await
            .expect("tunnel");
        proxy_task.await.expect("join");
    }

    #[tokio::test]
    async fn test_socks5_connect_refused() {
        let (mut client, mut proxy_side) = duplex(4096);

        tokio::spawn(async move {
            let mut greeting = [0u8; 3];
            proxy_side.read_exact(&mut greeting).await.expect("greeting");
            proxy_side.write_all(&[5, 0]).await.expect("choice");

            let mut request = [0u8; 10];
            proxy_side.read_exact(&mut request).await.expect("request");
            assert_eq!(request[3], SOCKS_ATYP_IPV4);
            proxy_side
                .write_all(&[5, 5, 0, 1, 0, 0, 0, 0, 0, 0])
                .await
                .expect("reply");
        });

        let proxy = ProxyOptions::socks5("proxy", 1080);
        let err = handshake(&mut client, &proxy, "10.0.0.1", 7000)
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("connection refused"));
    }
}
