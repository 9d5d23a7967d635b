use serde::{Deserialize, Serialize};
use std::path::Path;

use protoworld_events::EventBusConfig;
use protoworld_kernel::ManagerConfig;
use protoworld_net::ReconcilerConfig;

/// Runtime tunables, read from an optional JSON file.
///
/// Every section and field falls back to its default when absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub events: EventBusConfig,
    pub reconciler: ReconcilerConfig,
    pub manager: ManagerConfig,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.reconciler.validate()?;
        tracing::debug!(path = %path.display(), ?config, "config loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        assert_eq!(AppConfig::load(None).unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"{"reconciler": {"default_expiry_secs": 2.5}, "manager": {"first_entity_id": 100}}"#,
        )
        .unwrap();
        let config = AppConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(config.reconciler.default_expiry_secs, 2.5);
        assert_eq!(config.manager.first_entity_id, 100);
        assert_eq!(config.events, EventBusConfig::default());
    }

    #[test]
    fn negative_default_expiry_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"{"reconciler": {"default_expiry_secs": -3}}"#).unwrap();
        let err = AppConfig::load(Some(tmp.path())).unwrap_err();
        assert!(err.to_string().contains("invalid expiry"));
    }

    #[test]
    fn null_cap_disables_drain_guard() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"{"events": {"max_dispatches_per_drain": null}}"#).unwrap();
        let config = AppConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(config.events.max_dispatches_per_drain, None);
    }
}
