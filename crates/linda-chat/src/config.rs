use std::time::Duration;

use crate::errors::ChatError;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Configuration for the chat client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the chat proxy. Endpoints are resolved below it.
    pub base_url: String,
    /// Optional API key sent in the `X-Gemini-Api-Key` header.
    pub api_key: Option<String>,
    /// Connect and idle-read timeout. Non-streaming calls must also finish
    /// within it; a stream may run longer while bytes keep arriving.
    pub timeout: Duration,
    /// Bounded event buffer size between the stream task and its consumer.
    pub stream_buffer_capacity: usize,
    /// Ask the server to consult its long-term memory.
    pub use_memory: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(45),
            stream_buffer_capacity: 128,
            use_memory: false,
        }
    }
}

impl ClientConfig {
    /// Builds a config from the environment.
    ///
    /// - `LINDA_API_BASE`: base URL (default `http://localhost:8000`).
    /// - `LINDA_API_KEY`: optional API key.
    /// - `LINDA_TIMEOUT_SECS`: request timeout in seconds.
    /// - `LINDA_USE_MEMORY`: `1`/`true`/`yes`/`on` to enable server memory.
    pub fn from_env() -> Result<Self, ChatError> {
        let mut config = Self::default();
        if let Some(base) = read_env("LINDA_API_BASE") {
            config.base_url = base;
        }
        config.api_key = read_env("LINDA_API_KEY");
        if let Some(raw) = read_env("LINDA_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                ChatError::Config(format!("LINDA_TIMEOUT_SECS must be an integer, got {raw:?}"))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = read_env("LINDA_USE_MEMORY") {
            config.use_memory = parse_bool(&raw).ok_or_else(|| {
                ChatError::Config(format!("LINDA_USE_MEMORY must be a boolean, got {raw:?}"))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the base URL (for proxies or test servers).
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sets the API key. Blank keys clear it.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = Some(key.trim().to_string()).filter(|k| !k.is_empty());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub fn use_memory(mut self, enabled: bool) -> Self {
        self.use_memory = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        let base = self.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "base_url must be an http(s) URL, got {base:?}"
            )));
        }
        if self.timeout.is_zero() {
            return Err(ChatError::Config("timeout must be greater than 0".into()));
        }
        if self.stream_buffer_capacity == 0 {
            return Err(ChatError::Config(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn read_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}
