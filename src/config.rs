use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Per-client delivery and byte-order settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClientConfig {
    /// Timeout for a single delivery attempt (write + complete reply)
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Additional delivery attempts after the first; worst-case call
    /// latency is `(wait_times + 1) * timeout`
    pub wait_times: u8,

    /// Byte-swap each 16-bit word of outgoing register data before framing
    pub swap_request_words: bool,

    /// Byte-swap each 16-bit word of incoming register data after decoding
    pub swap_reply_words: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            wait_times: 2,
            swap_request_words: false,
            swap_reply_words: false,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::timing("timeout cannot be 0"));
        }

        Ok(())
    }
}
