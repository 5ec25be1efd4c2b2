//! Host configuration: engine tuning, templates and logging, loaded from TOML.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tablist_engine::{EngineConfig, RawLayout, RawTemplateSet, TemplateSet};
use tracing::info;

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Scheduler and renderer tuning
    #[serde(default)]
    pub engine: EngineConfig,
    /// Tab list templates, reloadable at runtime
    #[serde(default = "default_templates")]
    pub templates: RawTemplateSet,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// Templates written into a freshly created config file.
fn default_templates() -> RawTemplateSet {
    let mut servers = BTreeMap::new();
    servers.insert(
        "lobby".to_string(),
        RawLayout {
            header: Some("Welcome to the lobby, %viewer%".to_string()),
            footer: None,
            entry: None,
        },
    );

    RawTemplateSet {
        header: "Welcome, %viewer%!".to_string(),
        footer: "%online% online | you are on %viewer_server% (%server_online%)".to_string(),
        entry: "[%server%] %name% %ping%ms".to_string(),
        servers,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            templates: default_templates(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes a default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Re-reads only the template section of an existing config file.
    pub async fn load_templates(path: &Path) -> anyhow::Result<RawTemplateSet> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config.templates)
    }

    /// Checks engine tuning, log level and template syntax.
    pub fn validate(&self) -> Result<(), String> {
        self.engine.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        TemplateSet::compile(&self.templates).map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablist_engine::{SortKey, Visibility};
    use tempfile::{tempdir, NamedTempFile};
    use tokio::fs;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.tick_interval_ms, 50);
        assert_eq!(config.engine.max_entries, 80);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json_format);
        assert!(config.templates.servers.contains_key("lobby"));
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file_writes_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tablist.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[engine]
tick_interval_ms = 25
visibility = "same_server"
sort = ["name", "attribute:rank"]

[templates]
header = "Hub"
entry = "%name%"

[templates.servers.survival]
footer = "Survival: %server_online%"

[logging]
level = "debug"
json_format = true
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(temp_file.path()).await.unwrap();
        assert_eq!(config.engine.tick_interval_ms, 25);
        assert_eq!(config.engine.refresh_every_ticks, 20);
        assert_eq!(config.engine.visibility, Visibility::SameServer);
        assert_eq!(
            config.engine.sort,
            vec![SortKey::Name, SortKey::Attribute("rank".to_string())]
        );
        assert_eq!(config.templates.header, "Hub");
        assert_eq!(config.templates.footer, "");
        assert_eq!(
            config.templates.servers["survival"].footer.as_deref(),
            Some("Survival: %server_online%")
        );
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json_format);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_templates_only() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), "[templates]\nheader = \"Reloaded\"\n")
            .await
            .unwrap();

        let templates = AppConfig::load_templates(temp_file.path()).await.unwrap();
        assert_eq!(templates.header, "Reloaded");
        assert_eq!(templates.entry, "%name%");
    }

    #[tokio::test]
    async fn test_load_templates_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(AppConfig::load_templates(&dir.path().join("absent.toml")).await.is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "warn".to_string();
        config.templates.entry = "%name".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("entry"));

        config.templates.entry = "%name%".to_string();
        config.engine.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
