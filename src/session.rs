use std::fmt;

use crate::StreamConfig;

const TOKEN_HEADER: &str = "Plotly-Streamtoken";

/// Identity and destination of one logical stream.
#[derive(Clone)]
pub struct StreamSession {
    token: String,
    host: String,
    port: u16,
    headers: Vec<(String, String)>,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("token", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

impl StreamSession {
    pub fn new(token: impl Into<String>, config: &StreamConfig) -> Self {
        let token = token.into();
        let host = config.streaming_domain.clone();
        let headers = vec![
            (TOKEN_HEADER.to_owned(), token.clone()),
            ("Host".to_owned(), host.clone()),
            ("Transfer-Encoding".to_owned(), "chunked".to_owned()),
            ("Content-Type".to_owned(), "text/plain".to_owned()),
        ];
        Self {
            token,
            host,
            port: config.port,
            headers,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Request headers in the order they are written.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}
