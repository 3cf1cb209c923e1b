//! Connection configuration.

use core::{str::FromStr, time::Duration};

use http::{HeaderMap, HeaderName, HeaderValue, Uri};

use crate::{error::RequestError, http::Cookie};

/// Where to connect: a `ws` or `wss` URL plus request specific headers.
#[derive(Debug, Clone)]
pub struct Request {
    uri: Uri,
    headers: HeaderMap,
}

impl Request {
    pub fn new(uri: Uri) -> Result<Self, RequestError> {
        match uri.scheme_str() {
            Some("ws") | Some("wss") => {}
            scheme => {
                return Err(RequestError::UnsupportedScheme {
                    scheme: scheme.unwrap_or_default().to_owned(),
                });
            }
        }

        if uri.host().is_none_or(str::is_empty) {
            return Err(RequestError::MissingHost);
        }

        Ok(Self {
            uri,
            headers: HeaderMap::new(),
        })
    }

    pub fn parse(url: &str) -> Result<Self, RequestError> {
        Self::new(url.parse::<Uri>()?)
    }

    /// Adds a header sent with the opening handshake of this request.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn try_with_header(self, name: &str, value: &str) -> Result<Self, RequestError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(http::Error::from)?;
        let value = HeaderValue::from_str(value).map_err(http::Error::from)?;

        Ok(self.with_header(name, value))
    }

    pub const fn uri(&self) -> &Uri {
        &self.uri
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// `wss` requests are TLS and go through the trust policy.
    pub fn is_secure(&self) -> bool {
        self.uri.scheme_str() == Some("wss")
    }

    pub fn host(&self) -> &str {
        self.uri.host().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.uri.port_u16().unwrap_or(self.default_port())
    }

    fn default_port(&self) -> u16 {
        if self.is_secure() { 443 } else { 80 }
    }

    pub fn path_and_query(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|path| path.as_str())
            .filter(|path| !path.is_empty())
            .unwrap_or("/")
    }

    /// `host[:port]`, with the port only when it is not the scheme's default.
    pub fn authority(&self) -> String {
        match self.uri.port_u16() {
            Some(port) if port != self.default_port() => {
                format!("{}:{port}", self.host())
            }
            _ => self.host().to_owned(),
        }
    }

    /// The origin a browser would send for this URL.
    pub fn origin(&self) -> String {
        let scheme = if self.is_secure() { "https" } else { "http" };

        format!("{scheme}://{}", self.authority())
    }
}

impl FromStr for Request {
    type Err = RequestError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        Self::parse(url)
    }
}

impl TryFrom<&str> for Request {
    type Error = RequestError;

    fn try_from(url: &str) -> Result<Self, Self::Error> {
        Self::parse(url)
    }
}

impl TryFrom<Uri> for Request {
    type Error = RequestError;

    fn try_from(uri: Uri) -> Result<Self, Self::Error> {
        Self::new(uri)
    }
}

/// When and how often to reconnect after a retryable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Wait between the closure and the next connection attempt.
    pub delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }

    pub const fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Options applied to every connection attempt.
#[derive(Debug, Clone)]
pub struct Options {
    ping_interval: Option<Duration>,
    allow_untrusted_certificates: bool,
    protocols: Vec<String>,
    cookies: Vec<Cookie>,
    headers: HeaderMap,
    fragment_size: usize,
    max_message_size: usize,
    handshake_timeout: Duration,
    close_timeout: Duration,
    reconnect: ReconnectPolicy,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ping_interval: Some(Duration::from_secs(5)),
            allow_untrusted_certificates: false,
            protocols: Vec::new(),
            cookies: Vec::new(),
            headers: HeaderMap::new(),
            fragment_size: 64 * 1024,
            max_message_size: 16 * 1024 * 1024,
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::disabled(),
        }
    }
}

impl Options {
    /// Keepalive ping interval, `None` disables keepalive.
    pub const fn ping_interval(&self) -> Option<Duration> {
        self.ping_interval
    }

    pub fn with_ping_interval(mut self, ping_interval: Option<Duration>) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    pub const fn allow_untrusted_certificates(&self) -> bool {
        self.allow_untrusted_certificates
    }

    /// Skips trust evaluation. Meant for development servers with self-signed certificates.
    pub fn with_allow_untrusted_certificates(mut self, allow: bool) -> Self {
        self.allow_untrusted_certificates = allow;
        self
    }

    pub fn protocols(&self) -> &[String] {
        &self.protocols
    }

    /// Subprotocols offered in `Sec-WebSocket-Protocol`, most preferred first.
    pub fn with_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn with_cookies(mut self, cookies: impl IntoIterator<Item = Cookie>) -> Self {
        self.cookies = cookies.into_iter().collect();
        self
    }

    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub const fn fragment_size(&self) -> usize {
        self.fragment_size
    }

    /// Outgoing text and binary messages are split into frames of at most this many bytes.
    pub fn with_fragment_size(mut self, fragment_size: usize) -> Self {
        self.fragment_size = fragment_size.max(1);
        self
    }

    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Larger incoming messages close the connection with 1009.
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub const fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub const fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// How long to wait for the server's close frame before dropping the transport.
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub const fn reconnect(&self) -> ReconnectPolicy {
        self.reconnect
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }
}
