use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundConfig {
    /// Sound resource played when a request is accepted.
    pub acknowledge: Option<String>,
}

/// Runtime configuration shared by every skill bound to one bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillConfig {
    pub lang: String,
    pub sounds: SoundConfig,
    /// Settings live at `<settings_root>/<skill_id>/settings.json`.
    pub settings_root: PathBuf,
    /// Core resources, searched after the skill's own root.
    pub resource_root: Option<PathBuf>,
    /// Topic prefix for handler start/complete telemetry. Disabled when unset.
    pub handler_info: Option<String>,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            lang: "en-us".to_owned(),
            sounds: SoundConfig::default(),
            settings_root: PathBuf::from("skills-settings"),
            resource_root: None,
            handler_info: None,
        }
    }
}

impl SkillConfig {
    /// Read a JSON config file. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed reading {}", path.display()));
            }
        };
        serde_json::from_slice(&raw).with_context(|| format!("failed parsing {}", path.display()))
    }

    pub fn settings_path(&self, skill_id: &str) -> PathBuf {
        self.settings_root.join(skill_id).join("settings.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    #[tokio::test]
    async fn missing_file_uses_defaults() -> Result<()> {
        let config = SkillConfig::load(unique_test_root("hark-config-missing")).await?;
        assert_eq!(config, SkillConfig::default());
        assert_eq!(config.lang, "en-us");
        Ok(())
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() -> Result<()> {
        let root = unique_test_root("hark-config-partial");
        std::fs::create_dir_all(&root)?;
        let path = root.join("hark.json");
        std::fs::write(
            &path,
            br#"{ "lang": "de-de", "sounds": { "acknowledge": "acknowledge.mp3" } }"#,
        )?;

        let config = SkillConfig::load(&path).await?;
        assert_eq!(config.lang, "de-de");
        assert_eq!(config.sounds.acknowledge.as_deref(), Some("acknowledge.mp3"));
        assert_eq!(config.handler_info, None);
        assert_eq!(
            config.settings_path("weather.mark2"),
            PathBuf::from("skills-settings/weather.mark2/settings.json")
        );

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() -> Result<()> {
        let root = unique_test_root("hark-config-bad");
        std::fs::create_dir_all(&root)?;
        let path = root.join("hark.json");
        std::fs::write(&path, b"{ lang")?;

        let err = SkillConfig::load(&path).await.unwrap_err();
        assert!(err.to_string().contains("failed parsing"));

        let _ = std::fs::remove_dir_all(root);
        Ok(())
    }
}
