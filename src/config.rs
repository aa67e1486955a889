//! Timer queue configuration

use serde::{Deserialize, Serialize};

/// Configuration for a [`TimerQueue`](crate::TimerQueue).
///
/// The process-wide queue is built from `QueueConfig::default()`; embedders
/// that run their own queue can override the fields below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name assigned to the driver thread.
    #[serde(default = "default_driver_thread_name")]
    pub driver_thread_name: String,

    /// Run the first expired callback of a sweep on the sweeping thread
    /// instead of paying a worker-pool round-trip.
    #[serde(default = "default_true")]
    pub inline_first_fire: bool,
}

fn default_true() -> bool {
    true
}

fn default_driver_thread_name() -> String {
    "tickmux-driver".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            driver_thread_name: default_driver_thread_name(),
            inline_first_fire: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config: QueueConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.driver_thread_name, "tickmux-driver");
        assert!(config.inline_first_fire);
    }

    #[test]
    fn test_overrides() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"driver_thread_name":"t0","inline_first_fire":false}"#)
                .unwrap();
        assert_eq!(config.driver_thread_name, "t0");
        assert!(!config.inline_first_fire);
    }
}
