//! Configuration types for the RPC client

use std::collections::HashMap;
use std::time::Duration;

use schema_rpc_wire::{DEFAULT_PIPE_CAPACITY, codec::DEFAULT_MAX_BODY_SIZE};
use serde::{Deserialize, Serialize};

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout configurations
    pub timeouts: TimeoutConfig,

    /// User agent string
    pub user_agent: String,

    /// Custom headers to include in every request
    pub headers: HashMap<String, String>,

    /// Check return values against the declared return schema before coercion
    pub validate_responses: bool,

    /// Maximum size of a response's JSON document
    pub max_body_size: usize,

    /// Bytes buffered per attached response stream before the parser waits
    pub pipe_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            user_agent: format!("schema-rpc-client/{}", env!("CARGO_PKG_VERSION")),
            headers: HashMap::new(),
            validate_responses: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection timeout
    #[serde(with = "duration_serde")]
    pub connect: Duration,

    /// Whole-call timeout, covering the response body. `None` for calls
    /// that stream without bound.
    #[serde(with = "optional_duration_serde")]
    pub request: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Some(Duration::from_secs(30)),
        }
    }
}

// Durations travel as milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
