use layer_protocol::MatrixCompositionMode;
use serde::{Deserialize, Serialize};

/// Initial state of newly created layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerConfig {
    pub modelview_mode: MatrixCompositionMode,
    pub projection_mode: MatrixCompositionMode,
    pub initially_visible: bool,
    pub child_order: i32,
}

impl LayerConfig {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            modelview_mode: MatrixCompositionMode::ComposeWithParent,
            projection_mode: MatrixCompositionMode::ComposeWithParent,
            initially_visible: true,
            child_order: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = LayerConfig::from_json_str(r#"{ "projection_mode": "replace" }"#)
            .expect("parse layer config");
        assert_eq!(config.projection_mode, MatrixCompositionMode::Replace);
        assert_eq!(config.modelview_mode, MatrixCompositionMode::ComposeWithParent);
        assert!(config.initially_visible);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(LayerConfig::from_json_str(r#"{ "modelview_mode": "multiply" }"#).is_err());
    }
}
