use std::time::Duration;

use serde::Deserialize;

use crate::enums::{DrawOrder, ProxySizing, TransferPolicy};

pub const DEFAULT_MESH_ENDPOINT: &str = "api/glass_brain/brain_surface";
pub const DEFAULT_VOLUME_ENDPOINT: &str = "api/glass_brain/volume_data";

/// Everything the loader and renderer need, passed in explicitly.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Backend base URL, e.g. `http://localhost:5000`.
    pub base_url: String,
    pub mesh_endpoint: String,
    pub volume_endpoint: String,
    /// Per request timeout in seconds.
    pub request_timeout_secs: u64,
    pub transfer_policy: TransferPolicy,
    /// Minimum normalized intensity that contributes to the volume.
    pub threshold: f32,
    /// Ray marching samples along the longest axis of the volume.
    pub steps: u32,
    pub proxy_sizing: ProxySizing,
    pub draw_order: DrawOrder,
    /// Shell color (sRGB bytes) and opacity.
    pub shell_color: [u8; 3],
    pub shell_opacity: f32,
    pub background: [u8; 4],
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            mesh_endpoint: DEFAULT_MESH_ENDPOINT.to_string(),
            volume_endpoint: DEFAULT_VOLUME_ENDPOINT.to_string(),
            request_timeout_secs: 30,
            transfer_policy: TransferPolicy::default(),
            threshold: 0.01,
            steps: 100,
            proxy_sizing: ProxySizing::default(),
            draw_order: DrawOrder::default(),
            shell_color: [0xf0, 0xf0, 0xf0],
            shell_opacity: 0.2,
            background: [0xe0, 0xe0, 0xe0, 0xff],
        }
    }
}

impl ViewerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads `GLASS_BRAIN_API_URL`, `GLASS_BRAIN_STEPS` and
    /// `GLASS_BRAIN_THRESHOLD`, keeping defaults for anything unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("GLASS_BRAIN_API_URL") {
            config.base_url = url;
        }
        if let Some(steps) = std::env::var("GLASS_BRAIN_STEPS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.steps = steps;
        }
        if let Some(threshold) = std::env::var("GLASS_BRAIN_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.threshold = threshold;
        }
        config
    }

    /// # Errors
    ///
    /// Returns the serde error for malformed JSON or unknown enum values.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_transfer_policy(mut self, policy: TransferPolicy) -> Self {
        self.transfer_policy = policy;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    pub fn with_proxy_sizing(mut self, sizing: ProxySizing) -> Self {
        self.proxy_sizing = sizing;
        self
    }

    pub fn with_draw_order(mut self, order: DrawOrder) -> Self {
        self.draw_order = order;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Joins the base URL and an endpoint path with exactly one slash.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}
