/// Configuration for the inference engine
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest queue timeout accepted (one hour)
const MAX_QUEUE_TIMEOUT_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a request may wait for the device before failing with
    /// `Timeout`. `None` waits indefinitely.
    #[serde(default)]
    pub queue_timeout_ms: Option<u64>,

    /// Maximum number of cached results per session (0 disables caching)
    #[serde(default = "default_cache_capacity")]
    pub result_cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_timeout_ms: None,
            result_cache_capacity: default_cache_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.result_cache_capacity = 0;
        self
    }

    pub fn queue_timeout(&self) -> Option<Duration> {
        self.queue_timeout_ms.map(Duration::from_millis)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        match self.queue_timeout_ms {
            Some(0) => Err("queue_timeout_ms must be greater than 0".to_string()),
            Some(ms) if ms > MAX_QUEUE_TIMEOUT_MS => Err(format!(
                "queue_timeout_ms cannot exceed {} (one hour)",
                MAX_QUEUE_TIMEOUT_MS
            )),
            _ => Ok(()),
        }
    }
}
