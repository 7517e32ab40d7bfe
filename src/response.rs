use crate::chunked::{decode_chunks, find};

/// What the server sent back before the stream ended.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ServerResponse {
    /// Status code, `None` when no valid status line was received.
    pub status: Option<u16>,
    pub body: String,
}

impl ServerResponse {
    /// Parses raw response bytes.
    ///
    /// Anything that does not start with an `HTTP/` status line yields a
    /// response without status and an empty body.
    pub fn parse(raw: &[u8]) -> Self {
        let (head, body) = match find(raw, b"\r\n\r\n") {
            Some(end) => (&raw[..end], &raw[end + 4..]),
            None => (raw, &[][..]),
        };
        let head = String::from_utf8_lossy(head);
        let mut lines = head.split("\r\n");

        let Some(status) = lines.next().and_then(parse_status_line) else {
            return Self::default();
        };

        let chunked = lines.any(|line| {
            line.split_once(':').is_some_and(|(name, value)| {
                name.trim().eq_ignore_ascii_case("transfer-encoding")
                    && value.trim().eq_ignore_ascii_case("chunked")
            })
        });
        let body = if chunked {
            decode_chunks(body).concat()
        } else {
            body.to_vec()
        };

        Self {
            status: Some(status),
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }
}

fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}
