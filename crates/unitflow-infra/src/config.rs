//! Engine configuration loader for unitflow.
//!
//! Reads `config.toml` from the data directory (`~/.unitflow/` in production)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed.

use std::path::Path;

use unitflow_types::config::EngineConfig;

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - An unparsable file is logged and replaced by defaults.
/// - A relative `template_directory` is resolved against `data_dir`.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no engine config, using defaults");
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "engine config unreadable, using defaults");
            return EngineConfig::default();
        }
    };

    let mut config = match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "ignoring invalid engine config {}: {err}",
                config_path.display()
            );
            return EngineConfig::default();
        }
    };

    if let Some(dir) = config.template_directory.take() {
        config.template_directory = Some(if dir.is_relative() {
            data_dir.join(dir)
        } else {
            dir
        });
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use unitflow_types::config::{BlockedDependencyPolicy, RetryLinkage};

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
template_directory = "templates"
default_task_timeout_ms = 30000
blocked_dependency_policy = "wait"
retry_linkage = "original_only"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.template_directory, Some(tmp.path().join("templates")));
        assert_eq!(config.default_task_timeout_ms, Some(30_000));
        assert_eq!(config.blocked_dependency_policy, BlockedDependencyPolicy::Wait);
        assert_eq!(config.retry_linkage, RetryLinkage::OriginalOnly);
        assert_eq!(config.state_key, "workflow_engine");
    }

    #[tokio::test]
    async fn load_engine_config_keeps_absolute_template_dir() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            "template_directory = \"/srv/unitflow/templates\"\n",
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(
            config.template_directory.as_deref(),
            Some(Path::new("/srv/unitflow/templates"))
        );
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config, EngineConfig::default());
    }
}
