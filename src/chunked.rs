//! HTTP/1.1 chunked request writer.
//!
//! The request body is left open: no terminating zero-length chunk is ever
//! sent, so the server keeps reading until one side drops the connection.

use tokio::io::{AsyncWrite, AsyncWriteExt};

const REQUEST_LINE: &str = "POST / HTTP/1.1";
const EOL: &str = "\r\n";

/// Encodes one chunk as `<hex length>\r\n<bytes>\r\n`.
pub fn encode_chunk(payload: &[u8]) -> Vec<u8> {
    let header = format!("{:x}{EOL}", payload.len());
    let mut out = Vec::with_capacity(header.len() + payload.len() + EOL.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(EOL.as_bytes());
    out
}

/// Builds the request line and header block that opens the stream.
pub fn encode_handshake(headers: &[(String, String)]) -> Vec<u8> {
    let mut head = String::with_capacity(128);
    head.push_str(REQUEST_LINE);
    head.push_str(EOL);
    for (name, value) in headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str(EOL);
    }
    head.push_str(EOL);
    head.into_bytes()
}

/// Writes the handshake and chunk-encoded payloads onto a byte stream.
#[derive(Debug)]
pub struct ChunkedWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> ChunkedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_handshake(&mut self, headers: &[(String, String)]) -> std::io::Result<()> {
        self.inner.write_all(&encode_handshake(headers)).await?;
        self.inner.flush().await
    }

    pub async fn write_chunk(&mut self, payload: &[u8]) -> std::io::Result<()> {
        self.inner.write_all(&encode_chunk(payload)).await?;
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.inner.shutdown().await
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Splits a chunk-encoded body back into its payloads.
///
/// Decoding stops at a zero-length chunk or at the first malformed or
/// truncated segment.
pub fn decode_chunks(mut body: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    loop {
        let Some(line_end) = find(body, EOL.as_bytes()) else {
            break;
        };
        let size_field = String::from_utf8_lossy(&body[..line_end]);
        let size_field = size_field.split(';').next().unwrap_or_default().trim();
        let Ok(size) = usize::from_str_radix(size_field, 16) else {
            break;
        };
        if size == 0 {
            break;
        }
        let start = line_end + EOL.len();
        let Some(payload) = start
            .checked_add(size)
            .and_then(|end| body.get(start..end))
        else {
            break;
        };
        chunks.push(payload.to_vec());
        body = body.get(start + size + EOL.len()..).unwrap_or_default();
    }
    chunks
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
