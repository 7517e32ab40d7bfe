use serde::Serialize;

/// Lifecycle of the connection behind a stream handle.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// One payload to deliver over the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    /// Sent as-is.
    Text(String),
    /// Encoded as a JSON document before sending.
    Json(serde_json::Value),
}

impl Chunk {
    /// Builds a JSON chunk from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Self::from)
    }

    /// Renders the chunk with its single trailing line break.
    pub(crate) fn into_line(self) -> serde_json::Result<String> {
        let mut line = match self {
            Self::Text(text) => text,
            Self::Json(value) => serde_json::to_string(&value)?,
        };
        line.push('\n');
        Ok(line)
    }
}

impl From<String> for Chunk {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Chunk {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<serde_json::Value> for Chunk {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            other => Self::Json(other),
        }
    }
}
