//! HTTP/1.1 pieces of the opening handshake.

use bytes::{Buf, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use httparse::Status;

use crate::{error::HandshakeError, options::Request};

/// A cookie sent with, or received in, the opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Parses the `name=value` pair of a `Set-Cookie` header, ignoring its attributes.
    pub fn parse_set_cookie(header: &str) -> Option<Self> {
        let pair = header.split(';').next()?;
        let (name, value) = pair.split_once('=')?;
        let name = name.trim();

        if name.is_empty() {
            return None;
        }

        Some(Self::new(name, value.trim().trim_matches('"')))
    }
}

impl core::fmt::Display for Cookie {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Headers the handshake owns. Custom headers with these names are not sent.
fn is_handshake_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "host"
            | "upgrade"
            | "connection"
            | "sec-websocket-key"
            | "sec-websocket-version"
            | "sec-websocket-protocol"
            | "cookie"
    )
}

/// The client's `GET` upgrade request.
#[derive(Debug)]
pub struct UpgradeRequest<'a> {
    pub request: &'a Request,
    pub key: &'a str,
    pub protocols: &'a [String],
    pub cookies: &'a [Cookie],
    pub headers: &'a HeaderMap,
}

impl UpgradeRequest<'_> {
    pub fn encode(&self, dst: &mut BytesMut) {
        fn write_header(dst: &mut BytesMut, name: &[u8], value: &[u8]) {
            dst.extend_from_slice(name);
            dst.extend_from_slice(b": ");
            dst.extend_from_slice(value);
            dst.extend_from_slice(b"\r\n");
        }

        dst.extend_from_slice(b"GET ");
        dst.extend_from_slice(self.request.path_and_query().as_bytes());
        dst.extend_from_slice(b" HTTP/1.1\r\n");

        write_header(dst, b"Host", self.request.authority().as_bytes());
        write_header(dst, b"Upgrade", b"websocket");
        write_header(dst, b"Connection", b"Upgrade");
        write_header(dst, b"Sec-WebSocket-Version", b"13");
        write_header(dst, b"Sec-WebSocket-Key", self.key.as_bytes());

        let custom = || self.request.headers().iter().chain(self.headers.iter());

        if !custom().any(|(name, _)| *name == header::ORIGIN) {
            write_header(dst, b"Origin", self.request.origin().as_bytes());
        }

        if !self.protocols.is_empty() {
            write_header(
                dst,
                b"Sec-WebSocket-Protocol",
                self.protocols.join(", ").as_bytes(),
            );
        }

        if !self.cookies.is_empty() {
            let cookies = self
                .cookies
                .iter()
                .map(Cookie::to_string)
                .collect::<Vec<_>>()
                .join("; ");

            write_header(dst, b"Cookie", cookies.as_bytes());
        }

        for (name, value) in custom() {
            if is_handshake_header(name) {
                continue;
            }

            write_header(dst, name.as_str().as_bytes(), value.as_bytes());
        }

        dst.extend_from_slice(b"\r\n");
    }
}

/// The server's answer to the upgrade request.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
}

impl Response {
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    pub fn header_value_str(&self, name: HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every cookie set by the response.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(Cookie::parse_set_cookie)
            .collect()
    }
}

#[derive(Debug)]
pub struct ResponseCodec {
    max_headers: usize,
    max_head_len: usize,
}

impl Default for ResponseCodec {
    fn default() -> Self {
        Self::new(64, 16 * 1024)
    }
}

impl ResponseCodec {
    pub const fn new(max_headers: usize, max_head_len: usize) -> Self {
        ResponseCodec {
            max_headers,
            max_head_len,
        }
    }

    /// Decodes a response head from `src`, leaving anything after it in place.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Response>, HandshakeError> {
        let mut headers = vec![httparse::EMPTY_HEADER; self.max_headers];
        let mut response = httparse::Response::new(&mut headers);

        let len = match response.parse(src)? {
            Status::Complete(len) => len,
            Status::Partial if src.len() > self.max_head_len => {
                return Err(HandshakeError::ResponseTooLarge);
            }
            Status::Partial => return Ok(None),
        };

        let status = response
            .code
            .and_then(|code| StatusCode::from_u16(code).ok())
            .ok_or(HandshakeError::Http(httparse::Error::Status))?;

        let mut map = HeaderMap::with_capacity(response.headers.len());

        for header in response.headers.iter() {
            let Ok(name) = HeaderName::from_bytes(header.name.as_bytes()) else {
                continue;
            };

            let Ok(value) = HeaderValue::from_bytes(header.value) else {
                continue;
            };

            map.append(name, value);
        }

        src.advance(len);

        Ok(Some(Response {
            status,
            headers: map,
        }))
    }
}
