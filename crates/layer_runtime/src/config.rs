use std::path::Path;
use std::time::Duration;

use frame_sync::FrameSyncConfig;
use scene::LayerConfig;
use serde::{Deserialize, Serialize};

use crate::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub frame_sync: FrameSyncConfig,
    pub layer: LayerConfig,
    /// Completed simulation frames the render thread may fall behind by
    /// before the simulation thread waits.
    pub notice_capacity: usize,
    pub frame_wait_timeout_ms: u64,
}

impl RuntimeConfig {
    pub fn from_json_str(text: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path).map_err(|source| RuntimeError::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.notice_capacity == 0 {
            return Err(RuntimeError::ZeroNoticeCapacity);
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_sync: FrameSyncConfig::default(),
            layer: LayerConfig::default(),
            notice_capacity: 2,
            frame_wait_timeout_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sections_parse_with_defaults() {
        let config = RuntimeConfig::from_json_str(
            r#"{
                "frame_sync": { "pending_batch_warning": 9 },
                "layer": { "initially_visible": false },
                "notice_capacity": 4
            }"#,
        )
        .expect("parse runtime config");
        assert_eq!(config.frame_sync.pending_batch_warning, 9);
        assert!(!config.layer.initially_visible);
        assert_eq!(config.notice_capacity, 4);
        assert_eq!(config.frame_wait_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn zero_notice_capacity_fails_validation() {
        let config = RuntimeConfig {
            notice_capacity: 0,
            ..RuntimeConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RuntimeError::ZeroNoticeCapacity)
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let error = RuntimeConfig::load(Path::new("/nonexistent/layer_runtime.json"))
            .expect_err("missing config must fail");
        assert!(error.to_string().contains("/nonexistent/layer_runtime.json"));
    }
}
