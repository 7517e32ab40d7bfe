use serde::Deserialize;

/// Where the streaming and REST endpoints live.
///
/// Resolved once when a stream is constructed and never re-read on the
/// write path.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Host of the streaming endpoint, also sent as the `Host` header.
    #[serde(alias = "plotly_streaming_domain")]
    pub streaming_domain: String,
    /// TCP port of the streaming endpoint.
    pub port: u16,
    /// Base URL of the REST API.
    #[serde(alias = "plotly_api_domain")]
    pub api_domain: String,
    /// Whether TLS certificates of the REST API are verified.
    #[serde(alias = "plotly_ssl_verification")]
    pub ssl_verification: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            streaming_domain: "stream.plot.ly".to_owned(),
            port: 80,
            api_domain: "https://api.plot.ly".to_owned(),
            ssl_verification: true,
        }
    }
}

impl StreamConfig {
    /// Creates a config pointing at a specific streaming host and port.
    pub fn new(streaming_domain: impl Into<String>, port: u16) -> Self {
        Self {
            streaming_domain: streaming_domain.into(),
            port,
            ..Self::default()
        }
    }

    /// Creates a config from environment variables, falling back to defaults.
    ///
    /// Reads:
    /// - `PLOTLY_STREAMING_DOMAIN`
    /// - `PLOTLY_STREAMING_PORT`
    /// - `PLOTLY_API_DOMAIN`
    /// - `PLOTLY_SSL_VERIFICATION` (`true`/`false`/`1`/`0`)
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> std::result::Result<Self, String> {
        let mut config = Self::default();
        if let Some(domain) = non_empty_var("PLOTLY_STREAMING_DOMAIN") {
            config.streaming_domain = domain;
        }
        if let Some(port) = non_empty_var("PLOTLY_STREAMING_PORT") {
            config.port = port
                .parse()
                .map_err(|_| format!("PLOTLY_STREAMING_PORT is not a valid port: {port}"))?;
        }
        if let Some(domain) = non_empty_var("PLOTLY_API_DOMAIN") {
            config.api_domain = domain;
        }
        if let Some(verify) = non_empty_var("PLOTLY_SSL_VERIFICATION") {
            config.ssl_verification = parse_bool(&verify).ok_or_else(|| {
                format!("PLOTLY_SSL_VERIFICATION must be true or false, got {verify}")
            })?;
        }
        Ok(config)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
