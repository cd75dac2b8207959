//! WebSocket HTTP upgrade handshake.
//!
//! The first read from a freshly accepted socket is parsed as an HTTP
//! request line plus headers. If the request asks for a WebSocket upgrade,
//! a `101 Switching Protocols` response carrying the computed
//! `Sec-WebSocket-Accept` value is produced.
//!
//! Header matching is deliberately strict: names are case-sensitive and
//! `Connection` must be exactly `Upgrade`, with no comma-list handling.

use std::collections::HashMap;

use base64::Engine;
use sha1::{Digest, Sha1};
use tracing::{debug, instrument};

use crate::error::{WsError, WsResult};

/// The WebSocket magic GUID used in the handshake.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Request path from the request line.
    pub url: String,
    /// Request headers, keyed by their exact spelling.
    pub headers: HashMap<String, String>,
    /// The computed `Sec-WebSocket-Accept` value.
    pub accept_key: String,
    /// Bytes that followed the header block in the same read.
    pub leftover: Vec<u8>,
}

impl Handshake {
    /// Parse and validate the first read of a connection.
    ///
    /// Reads shorter than `min_size` are rejected outright.
    #[instrument(skip(data), fields(len = data.len()))]
    pub fn parse(data: &[u8], min_size: usize) -> WsResult<Self> {
        if data.len() < min_size {
            return Err(WsError::handshake_rejected(format!(
                "request too short: {} bytes, need at least {min_size}",
                data.len()
            )));
        }

        let (head, leftover) = match find_subsequence(data, HEADER_TERMINATOR) {
            Some(pos) => (&data[..pos], &data[pos + HEADER_TERMINATOR.len()..]),
            None => (data, &[][..]),
        };
        let head = std::str::from_utf8(head)
            .map_err(|_| WsError::handshake_rejected("request is not valid UTF-8"))?;

        if !head.starts_with("GET") {
            return Err(WsError::handshake_rejected("request method must be GET"));
        }

        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let tokens: Vec<&str> = request_line.split(' ').collect();
        if tokens.len() != 3 {
            return Err(WsError::handshake_rejected(format!(
                "malformed request line: {request_line:?}"
            )));
        }
        let url = tokens[1].to_string();

        let mut headers = HashMap::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let parts: Vec<&str> = line.split(": ").collect();
            if parts.len() != 2 {
                return Err(WsError::handshake_rejected(format!(
                    "malformed header line: {line:?}"
                )));
            }
            headers.insert(parts[0].to_string(), parts[1].to_string());
        }

        let accept_key = validate_headers(&headers)?;
        debug!(url = %url, "upgrade request accepted");

        Ok(Self {
            url,
            headers,
            accept_key,
            leftover: leftover.to_vec(),
        })
    }

    /// The `101 Switching Protocols` response for this handshake.
    pub fn response(&self) -> Vec<u8> {
        upgrade_response(&self.accept_key)
    }
}

/// Check the upgrade headers and return the accept key.
fn validate_headers(headers: &HashMap<String, String>) -> WsResult<String> {
    let connection = headers.get("Connection").map_or("", String::as_str);
    if connection != "Upgrade" {
        return Err(WsError::handshake_rejected(format!(
            "Connection must be 'Upgrade' but got '{connection}'"
        )));
    }

    let upgrade = headers.get("Upgrade").map_or("", String::as_str);
    if upgrade != "websocket" {
        return Err(WsError::handshake_rejected(format!(
            "Upgrade must be 'websocket' but got '{upgrade}'"
        )));
    }

    let key = headers.get("Sec-WebSocket-Key").map_or("", String::as_str);
    if key.is_empty() {
        return Err(WsError::handshake_rejected(
            "missing Sec-WebSocket-Key header",
        ));
    }

    Ok(compute_accept_key(key))
}

/// Compute the Sec-WebSocket-Accept value from the key.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let result = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(result)
}

/// Create a WebSocket upgrade response.
pub fn upgrade_response(accept_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\
         Connection: Upgrade\r\n\
         Upgrade: websocket\r\n\r\n"
    )
    .into_bytes()
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request_with(headers: &[(&str, &str)]) -> Vec<u8> {
        let mut req = String::from("GET /chat HTTP/1.1\r\nHost: server.example.com\r\n");
        for (name, value) in headers {
            req.push_str(&format!("{name}: {value}\r\n"));
        }
        req.push_str("\r\n");
        req.into_bytes()
    }

    fn valid_request() -> Vec<u8> {
        request_with(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
            ("Sec-WebSocket-Version", "13"),
        ])
    }

    #[test]
    fn test_compute_accept_key() {
        // RFC 6455 example
        let accept = compute_accept_key(SAMPLE_KEY);
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(accept.len(), 28);
    }

    #[test]
    fn test_parse_valid_request() {
        let handshake = Handshake::parse(&valid_request(), 64).unwrap();
        assert_eq!(handshake.url, "/chat");
        assert_eq!(handshake.accept_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            handshake.headers.get("Host").map(String::as_str),
            Some("server.example.com")
        );
        assert!(handshake.leftover.is_empty());
    }

    #[test]
    fn test_response_format() {
        let response = upgrade_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            response,
            b"HTTP/1.1 101 Switching Protocols\r\n\
              Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
              Connection: Upgrade\r\n\
              Upgrade: websocket\r\n\r\n"
                .to_vec()
        );
    }

    #[test]
    fn test_parse_keeps_leftover_bytes() {
        let mut data = valid_request();
        data.extend_from_slice(&[0x81, 0x80, 1, 2, 3, 4]);
        let handshake = Handshake::parse(&data, 64).unwrap();
        assert_eq!(handshake.leftover, vec![0x81, 0x80, 1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_rejects_short_request() {
        let err = Handshake::parse(b"GET / HTTP/1.1\r\n\r\n", 64).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn test_parse_rejects_non_get() {
        let mut data = valid_request();
        data[..3].copy_from_slice(b"PUT");
        let err = Handshake::parse(&data, 64).unwrap_err();
        assert!(err.to_string().contains("GET"));
    }

    #[test]
    fn test_parse_rejects_bad_request_line() {
        let data = b"GET /chat\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let err = Handshake::parse(data, 64).unwrap_err();
        assert!(err.to_string().contains("request line"));
    }

    #[test]
    fn test_parse_rejects_malformed_header() {
        let data = request_with(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
            ("X-Broken", "a: b"),
        ]);
        let err = Handshake::parse(&data, 64).unwrap_err();
        assert!(err.to_string().contains("malformed header"));
    }

    #[test]
    fn test_parse_rejects_wrong_connection() {
        let data = request_with(&[
            ("Upgrade", "websocket"),
            ("Connection", "keep-alive, Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
        ]);
        let err = Handshake::parse(&data, 64).unwrap_err();
        assert!(err.to_string().contains("Connection"));
    }

    #[test]
    fn test_parse_rejects_wrong_upgrade() {
        let data = request_with(&[
            ("Upgrade", "WebSocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
        ]);
        let err = Handshake::parse(&data, 64).unwrap_err();
        assert!(err.to_string().contains("Upgrade must be"));
    }

    #[test]
    fn test_parse_rejects_missing_key() {
        let data = request_with(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Version", "13"),
        ]);
        let err = Handshake::parse(&data, 64).unwrap_err();
        assert!(err.to_string().contains("Sec-WebSocket-Key"));
    }

    #[test]
    fn test_header_names_are_case_sensitive() {
        let data = request_with(&[
            ("upgrade", "websocket"),
            ("connection", "Upgrade"),
            ("sec-websocket-key", SAMPLE_KEY),
        ]);
        assert!(Handshake::parse(&data, 64).is_err());
    }
}
