use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://gitlab.com";
pub const DEFAULT_AI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_SETTINGS_PATH: &str = ".wikisync/config.toml";
pub const SETTINGS_PATH_ENV: &str = "WIKISYNC_CONFIG";

/// Connection to one GitLab project wiki.
///
/// Owned by the application and passed by reference into every remote call;
/// the client never keeps a copy.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub use_relay: bool,
    #[serde(default)]
    pub relay_url: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            project_id: String::new(),
            token: String::new(),
            use_relay: false,
            relay_url: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("base_url", &self.base_url)
            .field("project_id", &self.project_id)
            .field("token", &self.redacted_token())
            .field("use_relay", &self.use_relay)
            .field("relay_url", &self.relay_url)
            .finish()
    }
}

impl ConnectionConfig {
    /// True when listing is worth attempting: token and project id are both set.
    pub fn is_configured(&self) -> bool {
        !self.token.trim().is_empty() && !self.project_id.trim().is_empty()
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.base_url.trim().is_empty() {
            missing.push("base_url");
        }
        if self.project_id.trim().is_empty() {
            missing.push("project_id");
        }
        if self.token.trim().is_empty() {
            missing.push("token");
        }
        missing
    }

    pub fn ensure_complete(&self) -> Result<()> {
        let missing = self.missing_fields();
        if !missing.is_empty() {
            bail!("All fields are required. Missing: {}", missing.join(", "));
        }
        Ok(())
    }

    /// Relay base address when the relay is enabled and non-empty.
    ///
    /// An enabled relay without an address behaves as a disabled relay.
    pub fn active_relay(&self) -> Option<&str> {
        if !self.use_relay {
            return None;
        }
        self.relay_url
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn redacted_token(&self) -> String {
        let token = self.token.trim();
        if token.is_empty() {
            return "(not set)".to_string();
        }
        let prefix: String = token.chars().take(4).collect();
        if token.chars().count() <= 8 {
            "****".to_string()
        } else {
            format!("{prefix}****")
        }
    }

    /// Apply GITLAB_URL / GITLAB_PROJECT_ID / GITLAB_TOKEN / WIKISYNC_RELAY_URL.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| env::var(key).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(base_url) = value("GITLAB_URL") {
            self.base_url = base_url;
        }
        if let Some(project_id) = value("GITLAB_PROJECT_ID") {
            self.project_id = project_id;
        }
        if let Some(token) = value("GITLAB_TOKEN") {
            self.token = token;
        }
        if let Some(relay_url) = value("WIKISYNC_RELAY_URL") {
            self.relay_url = Some(relay_url);
            self.use_relay = true;
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AiSettings {
    pub model: Option<String>,
}

impl AiSettings {
    /// Resolve model: env WIKISYNC_AI_MODEL > config > DEFAULT_AI_MODEL.
    pub fn model(&self) -> String {
        if let Ok(value) = env::var("WIKISYNC_AI_MODEL") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.model
            .clone()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_AI_MODEL.to_string())
    }
}

/// The single persisted record: everything lives under `[connection]` and `[ai]`.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SettingsFile {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub ai: AiSettings,
}

/// Resolve the settings path: flag > WIKISYNC_CONFIG > `.wikisync/config.toml` under `cwd`.
pub fn resolve_settings_path(flag: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(path) = flag {
        return absolutize(path, cwd);
    }
    if let Ok(value) = env::var(SETTINGS_PATH_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return absolutize(Path::new(trimmed), cwd);
        }
    }
    cwd.join(DEFAULT_SETTINGS_PATH)
}

/// Load settings from a TOML file. Returns defaults if the file doesn't exist.
pub fn load_settings(path: &Path) -> Result<SettingsFile> {
    if !path.exists() {
        return Ok(SettingsFile::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: SettingsFile =
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(parsed)
}

pub fn save_settings(path: &Path, settings: &SettingsFile) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("settings path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(settings).context("failed to serialize settings TOML")?;
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionPatch {
    pub base_url: Option<String>,
    pub project_id: Option<String>,
    pub token: Option<String>,
    pub relay_url: Option<String>,
    pub use_relay: Option<bool>,
}

impl ConnectionPatch {
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.project_id.is_none()
            && self.token.is_none()
            && self.relay_url.is_none()
            && self.use_relay.is_none()
    }

    /// Returns `true` when any field changed.
    pub fn apply(&self, connection: &mut ConnectionConfig) -> bool {
        let original = connection.clone();
        if let Some(base_url) = &self.base_url {
            connection.base_url = base_url.trim().to_string();
        }
        if let Some(project_id) = &self.project_id {
            connection.project_id = project_id.trim().to_string();
        }
        if let Some(token) = &self.token {
            connection.token = token.trim().to_string();
        }
        if let Some(relay_url) = &self.relay_url {
            let trimmed = relay_url.trim();
            connection.relay_url = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        if let Some(use_relay) = self.use_relay {
            connection.use_relay = use_relay;
        }
        *connection != original
    }
}

/// Patch `[connection]` in the settings file, keeping `[ai]` as it was.
/// Returns `true` when a write occurred.
pub fn patch_connection(path: &Path, patch: &ConnectionPatch) -> Result<bool> {
    if patch.is_empty() {
        return Ok(false);
    }
    let mut settings = load_settings(path)?;
    if !patch.apply(&mut settings.connection) {
        return Ok(false);
    }
    save_settings(path, &settings)?;
    Ok(true)
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn configured() -> ConnectionConfig {
        ConnectionConfig {
            base_url: "https://gitlab.example.org".to_string(),
            project_id: "group/docs".to_string(),
            token: "glpat-abcdefghijkl".to_string(),
            use_relay: false,
            relay_url: None,
        }
    }

    #[test]
    fn default_connection_targets_gitlab_com() {
        let config = ConnectionConfig::default();
        assert_eq!(config.base_url, "https://gitlab.com");
        assert!(!config.is_configured());
        assert_eq!(config.missing_fields(), vec!["project_id", "token"]);
    }

    #[test]
    fn load_settings_returns_default_for_missing_file() {
        let settings = load_settings(Path::new("/nonexistent/wikisync.toml")).expect("load");
        assert_eq!(settings, SettingsFile::default());
    }

    #[test]
    fn load_settings_parses_connection_table() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
[connection]
base_url = "gitlab.internal"
project_id = "42"
token = "secret-token-value"
use_relay = true
relay_url = "http://localhost:8080/"

[ai]
model = "gemini-test"
"#,
        )
        .expect("write settings");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.connection.base_url, "gitlab.internal");
        assert_eq!(settings.connection.project_id, "42");
        assert!(settings.connection.use_relay);
        assert_eq!(
            settings.connection.active_relay(),
            Some("http://localhost:8080/")
        );
        assert_eq!(settings.ai.model.as_deref(), Some("gemini-test"));
    }

    #[test]
    fn load_settings_fills_missing_base_url() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[connection]\nproject_id = \"7\"\n").expect("write settings");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.connection.base_url, DEFAULT_BASE_URL);
        assert_eq!(settings.connection.project_id, "7");
    }

    #[test]
    fn load_settings_reports_parse_errors() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[connection\nbase_url = 1").expect("write settings");
        let error = load_settings(&path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn save_then_load_keeps_every_field() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("config.toml");
        let settings = SettingsFile {
            connection: ConnectionConfig {
                use_relay: true,
                relay_url: Some("http://relay.local".to_string()),
                ..configured()
            },
            ai: AiSettings::default(),
        };
        save_settings(&path, &settings).expect("save");
        assert_eq!(load_settings(&path).expect("load"), settings);
    }

    #[test]
    fn patch_connection_preserves_ai_section() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[ai]\nmodel = \"keep-me\"\n").expect("write settings");

        let wrote = patch_connection(
            &path,
            &ConnectionPatch {
                project_id: Some(" 99 ".to_string()),
                token: Some("tok".to_string()),
                ..ConnectionPatch::default()
            },
        )
        .expect("patch");
        assert!(wrote);

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.connection.project_id, "99");
        assert_eq!(settings.ai.model.as_deref(), Some("keep-me"));

        let unchanged = patch_connection(
            &path,
            &ConnectionPatch {
                project_id: Some("99".to_string()),
                ..ConnectionPatch::default()
            },
        )
        .expect("patch");
        assert!(!unchanged);
    }

    #[test]
    fn enabled_relay_without_address_counts_as_disabled() {
        let mut config = configured();
        config.use_relay = true;
        config.relay_url = Some("   ".to_string());
        assert_eq!(config.active_relay(), None);

        config.relay_url = Some("http://localhost:8080/".to_string());
        config.use_relay = false;
        assert_eq!(config.active_relay(), None);
    }

    #[test]
    fn ensure_complete_lists_missing_fields() {
        let config = ConnectionConfig {
            base_url: String::new(),
            ..ConnectionConfig::default()
        };
        let error = config.ensure_complete().expect_err("incomplete");
        let message = error.to_string();
        assert!(message.contains("All fields are required."));
        assert!(message.contains("base_url, project_id, token"));
        assert!(configured().ensure_complete().is_ok());
    }

    #[test]
    fn debug_output_never_contains_the_token() {
        let config = configured();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("glpat-abcdefghijkl"));
        assert!(rendered.contains("glpa****"));
        assert_eq!(ConnectionConfig::default().redacted_token(), "(not set)");
    }

    #[test]
    fn overrides_replace_non_blank_values_only() {
        let config = configured().with_overrides(|key| match key {
            "GITLAB_PROJECT_ID" => Some("  ".to_string()),
            "GITLAB_TOKEN" => Some(" env-token ".to_string()),
            "WIKISYNC_RELAY_URL" => Some("http://localhost:9000".to_string()),
            _ => None,
        });
        assert_eq!(config.project_id, "group/docs");
        assert_eq!(config.token, "env-token");
        assert!(config.use_relay);
        assert_eq!(config.active_relay(), Some("http://localhost:9000"));
    }

    #[test]
    fn settings_path_prefers_flag() {
        let cwd = Path::new("/work");
        assert_eq!(
            resolve_settings_path(Some(Path::new("custom.toml")), cwd),
            PathBuf::from("/work/custom.toml")
        );
        assert_eq!(
            resolve_settings_path(Some(Path::new("/etc/wikisync.toml")), cwd),
            PathBuf::from("/etc/wikisync.toml")
        );
    }
}
