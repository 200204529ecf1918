use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_STREAM_URL: &str = "wss://api.promptpulse.io/ws/quality";
pub const DEFAULT_API_BASE_URL: &str = "https://api.promptpulse.io/api/v1";
pub const DEFAULT_PLATFORM: &str = "web";
pub const DEFAULT_MODULE: &str = "quality_feedback";

/// Runtime tuning for the feedback subsystem. Every field falls back to
/// the documented default when absent from persisted settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackConfig {
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_module")]
    pub module: String,
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u8,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_success_check_interval_ms")]
    pub success_check_interval_ms: u64,
    #[serde(default = "default_reaffirm_interval_ms")]
    pub reaffirm_interval_ms: u64,
    #[serde(default = "default_cue_clear_ms")]
    pub cue_clear_ms: u64,
    #[serde(default = "default_anonymous_cap")]
    pub anonymous_cap: u32,
    #[serde(default = "default_locate_attempts")]
    pub locate_attempts: u32,
    #[serde(default = "default_locate_delay_ms")]
    pub locate_delay_ms: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            stream_url: default_stream_url(),
            api_base_url: default_api_base_url(),
            platform: default_platform(),
            module: default_module(),
            open_timeout_ms: default_open_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            success_check_interval_ms: default_success_check_interval_ms(),
            reaffirm_interval_ms: default_reaffirm_interval_ms(),
            cue_clear_ms: default_cue_clear_ms(),
            anonymous_cap: default_anonymous_cap(),
            locate_attempts: default_locate_attempts(),
            locate_delay_ms: default_locate_delay_ms(),
        }
    }
}

impl FeedbackConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn success_check_interval(&self) -> Duration {
        Duration::from_millis(self.success_check_interval_ms)
    }

    pub fn reaffirm_interval(&self) -> Duration {
        Duration::from_millis(self.reaffirm_interval_ms)
    }

    pub fn cue_clear(&self) -> Duration {
        Duration::from_millis(self.cue_clear_ms)
    }

    pub fn locate_delay(&self) -> Duration {
        Duration::from_millis(self.locate_delay_ms)
    }
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

fn default_module() -> String {
    DEFAULT_MODULE.to_string()
}

fn default_open_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_reconnect_delay_ms() -> u64 {
    2_000
}

fn default_max_reconnect_attempts() -> u8 {
    5
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_success_check_interval_ms() -> u64 {
    1_000
}

fn default_reaffirm_interval_ms() -> u64 {
    15_000
}

fn default_cue_clear_ms() -> u64 {
    3_000
}

fn default_anonymous_cap() -> u32 {
    3
}

fn default_locate_attempts() -> u32 {
    10
}

fn default_locate_delay_ms() -> u64 {
    500
}
