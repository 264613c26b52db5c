use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{DEFAULT_CHAT_ENDPOINT, DEFAULT_MODEL, PlanStrategy, PriorityVariant, runtime_dir};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub status: StatusConfig,
    pub planner: PlannerConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: String,
    /// Inline keys, tried after the ones found through `api_key_envs`.
    pub api_keys: Vec<String>,
    pub api_key_envs: Vec<String>,
    pub temperature: f32,
    pub timeout_seconds: u64,
    /// Per-credential request budget for a rolling one-minute window.
    pub max_requests_per_minute: u32,
    pub request_spacing_ms: u64,
    pub rotation_cycles: u32,
    /// Pause after every credential has been rate limited within one cycle.
    pub cooldown_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_CHAT_ENDPOINT.to_string(),
            api_keys: Vec::new(),
            api_key_envs: (1..=3).map(|n| format!("HOMEPLAN_API_KEY_{n}")).collect(),
            temperature: 0.5,
            timeout_seconds: 60,
            max_requests_per_minute: 25,
            request_spacing_ms: 1_500,
            rotation_cycles: 3,
            cooldown_ms: 60_000,
        }
    }
}

impl LlmConfig {
    /// Ordered, de-duplicated credential list: environment first, then inline keys.
    pub fn resolve_api_keys(&self) -> Vec<String> {
        let from_env = self
            .api_key_envs
            .iter()
            .filter_map(|name| std::env::var(name).ok());
        let mut keys: Vec<String> = Vec::new();
        for candidate in from_env.chain(self.api_keys.iter().cloned()) {
            let candidate = candidate.trim().to_string();
            if candidate.is_empty() || keys.contains(&candidate) {
                continue;
            }
            keys.push(candidate);
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub base_url: String,
    /// When this variable is set it overrides `base_url`.
    pub base_url_env: String,
    pub session_id: Option<String>,
    pub trigger: String,
    /// Sent as `max_retries` for every registered task.
    pub max_retries: u32,
    pub timeout_seconds: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8000".to_string(),
            base_url_env: "HOMEPLAN_STATUS_URL".to_string(),
            session_id: None,
            trigger: "user_request".to_string(),
            max_retries: 3,
            timeout_seconds: 10,
        }
    }
}

impl StatusConfig {
    pub fn resolve_base_url(&self) -> String {
        std::env::var(&self.base_url_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| self.base_url.clone())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn resolve_session_id(&self) -> String {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub strategy: PlanStrategy,
    /// Used when the priority menu cannot be answered interactively.
    pub default_priority: PriorityVariant,
    pub max_clarifications: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            strategy: PlanStrategy::Priority,
            default_priority: PriorityVariant::Security,
            max_clarifications: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_iterations: usize,
    pub max_result_chars: usize,
    /// Character budget for non-system messages sent during reconciliation.
    pub transcript_max_chars: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_result_chars: 2_000,
            transcript_max_chars: 16_000,
        }
    }
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".homeplan/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Defaults, then `config.toml`, then user, project and local JSON settings.
    pub fn load(workspace: &Path) -> Result<Self> {
        Self::load_with_user_settings(workspace, Self::user_settings_path().as_deref())
    }

    /// Same layering as [`AppConfig::load`] with an explicit user settings file.
    pub fn load_with_user_settings(workspace: &Path, user_settings: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(&legacy)?;
            let legacy_cfg: toml::Value = toml::from_str(&raw)
                .map_err(|err| anyhow!("failed to parse {}: {err}", legacy.display()))?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_cfg)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = user_settings {
            paths.push(user.to_path_buf());
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|err| anyhow!("failed to parse {}: {err}", path.display()))?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn ensure(workspace: &Path) -> Result<Self> {
        Self::ensure_with_user_settings(workspace, Self::user_settings_path().as_deref())
    }

    pub fn ensure_with_user_settings(
        workspace: &Path,
        user_settings: Option<&Path>,
    ) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::legacy_toml_path(workspace).exists()
            || user_settings.is_some_and(Path::exists)
        {
            return Self::load_with_user_settings(workspace, user_settings);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        #[test]
        fn merge_json_value_is_idempotent_for_flat_objects(
            base in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
            overlay in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..12),
        ) {
            let mut base_value = json!(base);
            let overlay_value = json!(overlay);
            merge_json_value(&mut base_value, &overlay_value);
            let once = base_value.clone();
            merge_json_value(&mut base_value, &overlay_value);
            prop_assert_eq!(base_value, once);
        }
    }

    #[test]
    fn defaults_match_provider_limits() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.max_requests_per_minute, 25);
        assert_eq!(cfg.llm.request_spacing_ms, 1_500);
        assert_eq!(cfg.llm.rotation_cycles, 3);
        assert_eq!(cfg.execution.max_iterations, 10);
        assert_eq!(cfg.execution.max_result_chars, 2_000);
        assert_eq!(cfg.planner.strategy, PlanStrategy::Priority);
        assert_eq!(
            cfg.llm.api_key_envs,
            vec!["HOMEPLAN_API_KEY_1", "HOMEPLAN_API_KEY_2", "HOMEPLAN_API_KEY_3"]
        );
    }

    #[test]
    fn layered_settings_override_nested_fields_only() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let dir = runtime_dir(workspace.path());
        fs::create_dir_all(&dir).expect("runtime dir");
        fs::write(
            dir.join("config.toml"),
            "[llm]\nmodel = \"legacy-model\"\ntemperature = 0.1\n",
        )
        .expect("legacy");
        fs::write(
            dir.join("settings.json"),
            r#"{"llm": {"model": "project-model"}, "execution": {"max_iterations": 4}}"#,
        )
        .expect("project");
        fs::write(
            dir.join("settings.local.json"),
            r#"{"status": {"enabled": false}}"#,
        )
        .expect("local");

        let cfg = AppConfig::load_with_user_settings(workspace.path(), None).expect("load");
        assert_eq!(cfg.llm.model, "project-model");
        assert!((cfg.llm.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(cfg.execution.max_iterations, 4);
        assert_eq!(cfg.execution.max_result_chars, 2_000);
        assert!(!cfg.status.enabled);
        assert_eq!(cfg.status.trigger, "user_request");
    }

    #[test]
    fn ensure_writes_default_project_settings() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let missing_user = workspace.path().join("no-home/.homeplan/settings.json");
        let cfg = AppConfig::ensure_with_user_settings(workspace.path(), Some(&missing_user))
            .expect("ensure");
        assert_eq!(cfg, AppConfig::default());
        assert!(AppConfig::project_settings_path(workspace.path()).exists());
    }

    #[test]
    fn user_settings_sit_between_legacy_and_project_layers() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let home = tempfile::tempdir().expect("home");
        let user = home.path().join("settings.json");
        fs::write(
            &user,
            r#"{"llm": {"model": "user-model", "rotation_cycles": 5}}"#,
        )
        .expect("user");
        let dir = runtime_dir(workspace.path());
        fs::create_dir_all(&dir).expect("runtime dir");
        fs::write(dir.join("settings.json"), r#"{"llm": {"model": "project-model"}}"#)
            .expect("project");

        let cfg = AppConfig::ensure_with_user_settings(workspace.path(), Some(&user))
            .expect("ensure");
        assert_eq!(cfg.llm.model, "project-model");
        assert_eq!(cfg.llm.rotation_cycles, 5);
    }

    #[test]
    fn invalid_project_settings_name_the_file() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let dir = runtime_dir(workspace.path());
        fs::create_dir_all(&dir).expect("runtime dir");
        fs::write(dir.join("settings.json"), "{ not json").expect("write");
        let err = AppConfig::load_with_user_settings(workspace.path(), None).expect_err("must fail");
        assert!(err.to_string().contains("settings.json"));
    }

    #[test]
    fn api_keys_prefer_environment_and_skip_duplicates() {
        let cfg = LlmConfig {
            api_key_envs: vec![
                "HOMEPLAN_TEST_KEY_A".to_string(),
                "HOMEPLAN_TEST_KEY_MISSING".to_string(),
                "HOMEPLAN_TEST_KEY_B".to_string(),
            ],
            api_keys: vec!["inline".to_string(), "env-a".to_string(), "  ".to_string()],
            ..LlmConfig::default()
        };
        // SAFETY: test-only process-level env mutation.
        unsafe {
            std::env::set_var("HOMEPLAN_TEST_KEY_A", "env-a");
            std::env::set_var("HOMEPLAN_TEST_KEY_B", " env-b ");
            std::env::remove_var("HOMEPLAN_TEST_KEY_MISSING");
        }
        assert_eq!(cfg.resolve_api_keys(), vec!["env-a", "env-b", "inline"]);
    }

    #[test]
    fn status_base_url_env_override_drops_trailing_slash() {
        let cfg = StatusConfig {
            base_url: "http://fallback:8000/".to_string(),
            base_url_env: "HOMEPLAN_TEST_STATUS_URL".to_string(),
            ..StatusConfig::default()
        };
        // SAFETY: test-only process-level env mutation.
        unsafe {
            std::env::remove_var("HOMEPLAN_TEST_STATUS_URL");
        }
        assert_eq!(cfg.resolve_base_url(), "http://fallback:8000");
        unsafe {
            std::env::set_var("HOMEPLAN_TEST_STATUS_URL", "http://status.local/");
        }
        assert_eq!(cfg.resolve_base_url(), "http://status.local");
    }

    #[test]
    fn configured_session_id_is_kept() {
        let cfg = StatusConfig {
            session_id: Some("session-42".to_string()),
            ..StatusConfig::default()
        };
        assert_eq!(cfg.resolve_session_id(), "session-42");
        let generated = StatusConfig::default().resolve_session_id();
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }
}
