use base64::{Engine as _, engine::general_purpose};
use bytes::BytesMut;
use embedded_io_async::{Read, Write};
use http::{HeaderMap, header};
use rand_core::RngCore;
use sha1::{Digest, Sha1};

use crate::{
    error::{Error, HandshakeError},
    functions,
    http::{Cookie, Response, ResponseCodec, UpgradeRequest},
    options::{Options, Request},
};

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// What the server agreed to.
#[derive(Debug, Clone, Default)]
pub struct Negotiated {
    /// The subprotocol selected by the server.
    pub protocol: Option<String>,
    /// Every header of the 101 response.
    pub headers: HeaderMap,
    /// The request cookies, updated by the response's `Set-Cookie` headers.
    pub cookies: Vec<Cookie>,
}

/// 16 random bytes, base64 encoded.
pub fn generate_sec_key<R: RngCore>(rng: &mut R) -> String {
    let mut key: [u8; 16] = [0; 16];

    rng.fill_bytes(&mut key);

    general_purpose::STANDARD.encode(key)
}

/// `base64(sha1(key + GUID))`.
pub fn generate_sec_accept(sec_key: &[u8]) -> String {
    let mut sha1 = Sha1::new();

    sha1.update(sec_key);
    sha1.update(GUID);

    general_purpose::STANDARD.encode(sha1.finalize())
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Checks the server's response against the request that produced it.
pub fn validate(
    response: Response,
    sec_key: &str,
    protocols: &[String],
    cookies: &[Cookie],
) -> Result<Negotiated, HandshakeError> {
    if response.status() != http::StatusCode::SWITCHING_PROTOCOLS {
        return Err(HandshakeError::UnexpectedStatus {
            status: response.status(),
        });
    }

    if !response
        .header_value_str(header::UPGRADE)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
    {
        return Err(HandshakeError::MissingOrInvalidUpgrade);
    }

    if !response
        .header_value_str(header::CONNECTION)
        .is_some_and(|v| has_token(v, "upgrade"))
    {
        return Err(HandshakeError::MissingOrInvalidConnection);
    }

    let sec_accept = generate_sec_accept(sec_key.as_bytes());

    if response
        .header_value_str(header::SEC_WEBSOCKET_ACCEPT)
        .is_none_or(|v| v.trim() != sec_accept)
    {
        return Err(HandshakeError::MissingOrInvalidAccept);
    }

    let protocol = match response.header_value_str(header::SEC_WEBSOCKET_PROTOCOL) {
        None => None,
        Some(protocol) => {
            let protocol = protocol.trim();

            if !protocols.iter().any(|offered| offered == protocol) {
                return Err(HandshakeError::UnsupportedProtocol {
                    protocol: protocol.to_owned(),
                });
            }

            Some(protocol.to_owned())
        }
    };

    let mut merged = cookies.to_vec();

    for cookie in response.cookies() {
        match merged.iter_mut().find(|c| c.name() == cookie.name()) {
            Some(existing) => *existing = cookie,
            None => merged.push(cookie),
        }
    }

    Ok(Negotiated {
        protocol,
        headers: response.into_headers(),
        cookies: merged,
    })
}

/// Runs the opening handshake on a connected transport.
///
/// `cookies` are sent with the request and merged with the response's `Set-Cookie`s.
/// Bytes received after the response head stay in `read_buf`.
pub async fn client_handshake<T, R>(
    transport: &mut T,
    read_buf: &mut BytesMut,
    request: &Request,
    options: &Options,
    cookies: &[Cookie],
    rng: &mut R,
) -> Result<Negotiated, Error>
where
    T: Read + Write,
    R: RngCore,
{
    let sec_key = generate_sec_key(rng);

    let mut dst = BytesMut::new();

    UpgradeRequest {
        request,
        key: &sec_key,
        protocols: options.protocols(),
        cookies,
        headers: options.headers(),
    }
    .encode(&mut dst);

    tracing::debug!(url = %request.uri(), "Sending upgrade request");

    functions::write_all(transport, &dst).await?;

    let mut codec = ResponseCodec::default();

    let response = loop {
        if let Some(response) = codec.decode(read_buf)? {
            break response;
        }

        if functions::read_some(transport, read_buf).await? == 0 {
            return Err(Error::HandshakeFailed(HandshakeError::ConnectionClosed));
        }
    };

    tracing::debug!(status = %response.status(), "Received upgrade response");

    Ok(validate(
        response,
        &sec_key,
        options.protocols(),
        cookies,
    )?)
}
