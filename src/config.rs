//! Configuration for the chat synchronization core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration: provider plus persistence backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Model provider settings.
    pub provider: ProviderConfig,
    /// Persistence backend settings.
    pub backend: BackendConfig,
}

impl ChatConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.provider.api_key = Some(key.into());
        self
    }

    /// Set the provider model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.provider.model = model.into();
        self
    }

    /// Set the persistence backend base URL.
    #[must_use]
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend.base_url = url.into();
        self
    }
}

/// Configuration for the streaming model provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of the provider API.
    pub base_url: String,
    /// Model name to request.
    pub model: String,
    /// API key, if the provider requires one.
    pub api_key: Option<String>,
    /// Overall request timeout (covers the whole stream).
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for the conversation persistence backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend API.
    pub base_url: String,
    /// Request timeout for fetch/persist calls.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/api".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
