use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// The closed set of renderable message fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Picture,
    Title,
    Requester,
    Synopsis,
    Rating,
    Links,
    Cast,
    Crew,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Picture => "picture",
            Field::Title => "title",
            Field::Requester => "requester",
            Field::Synopsis => "synopsis",
            Field::Rating => "rating",
            Field::Links => "links",
            Field::Cast => "cast",
            Field::Crew => "crew",
        }
    }

    pub fn parse(name: &str) -> Option<Field> {
        match name {
            "picture" => Some(Field::Picture),
            "title" => Some(Field::Title),
            "requester" => Some(Field::Requester),
            "synopsis" => Some(Field::Synopsis),
            "rating" => Some(Field::Rating),
            "links" => Some(Field::Links),
            "cast" => Some(Field::Cast),
            "crew" => Some(Field::Crew),
            _ => None,
        }
    }
}

/// Per-field knobs. One struct covers every field; unused knobs stay None and
/// each consumer applies its own fallback, so an unknown key never fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_year: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_emoji: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movie_emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tv_emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_tmdb: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_imdb: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_tvdb: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_emoji: Option<String>,
}

static EMPTY_FIELD: FieldSettings = FieldSettings {
    enabled: false,
    show_year: None,
    show_emoji: None,
    movie_emoji: None,
    tv_emoji: None,
    format: None,
    max_length: None,
    fallback: None,
    show_tmdb: None,
    show_imdb: None,
    show_tvdb: None,
    max_items: None,
    separator: None,
    roles: None,
    fallback_emoji: None,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageFormat {
    pub enabled_fields: Vec<String>,
    pub field_order: Vec<String>,
    pub field_settings: HashMap<String, FieldSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub debug_mode: bool,
    pub auto_reload_config: bool,
    /// Seconds between file-modification checks.
    pub config_check_interval: u64,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            debug_mode: false,
            auto_reload_config: true,
            config_check_interval: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageConfig {
    pub message_format: MessageFormat,
    pub settings: GlobalSettings,
}

impl MessageConfig {
    pub fn built_in_default() -> Self {
        let mut field_settings = HashMap::new();
        field_settings.insert(
            "picture".to_string(),
            FieldSettings {
                enabled: true,
                fallback_emoji: Some("🎬".into()),
                ..Default::default()
            },
        );
        field_settings.insert(
            "title".to_string(),
            FieldSettings {
                enabled: true,
                show_year: Some(true),
                show_emoji: Some(true),
                movie_emoji: Some("🎬".into()),
                tv_emoji: Some("📺".into()),
                ..Default::default()
            },
        );
        field_settings.insert(
            "requester".to_string(),
            FieldSettings {
                enabled: true,
                format: Some("Requested by: {username}".into()),
                ..Default::default()
            },
        );
        field_settings.insert(
            "synopsis".to_string(),
            FieldSettings {
                enabled: false,
                max_length: Some(300),
                fallback: Some("No synopsis available.".into()),
                ..Default::default()
            },
        );
        field_settings.insert(
            "rating".to_string(),
            FieldSettings {
                enabled: false,
                show_tmdb: Some(true),
                show_imdb: Some(false),
                fallback: Some("Not Rated".into()),
                ..Default::default()
            },
        );
        field_settings.insert(
            "links".to_string(),
            FieldSettings {
                enabled: false,
                show_imdb: Some(true),
                show_tmdb: Some(true),
                show_tvdb: Some(false),
                ..Default::default()
            },
        );
        field_settings.insert(
            "cast".to_string(),
            FieldSettings {
                enabled: false,
                max_items: Some(5),
                separator: Some(", ".into()),
                format: Some("Cast: {cast_list}".into()),
                ..Default::default()
            },
        );
        field_settings.insert(
            "crew".to_string(),
            FieldSettings {
                enabled: false,
                max_items: Some(3),
                separator: Some(", ".into()),
                format: Some("Crew: {crew_list}".into()),
                roles: Some(vec!["Director".into(), "Producer".into(), "Writer".into()]),
                ..Default::default()
            },
        );

        let default_fields = vec![
            "picture".to_string(),
            "title".to_string(),
            "requester".to_string(),
        ];

        Self {
            message_format: MessageFormat {
                enabled_fields: default_fields.clone(),
                field_order: default_fields,
                field_settings,
            },
            settings: GlobalSettings::default(),
        }
    }

    /// Settings for a field, or an all-defaults stand-in for unknown fields.
    pub fn field(&self, field: Field) -> &FieldSettings {
        self.message_format
            .field_settings
            .get(field.name())
            .unwrap_or(&EMPTY_FIELD)
    }

    pub fn is_field_enabled(&self, field: Field) -> bool {
        self.field(field).enabled
    }

    /// Declared order filtered to fields that are both listed in
    /// `enabled_fields` and individually enabled, then any enabled field
    /// missing from the order list appended once.
    pub fn enabled_fields_in_order(&self) -> Vec<Field> {
        let mf = &self.message_format;
        let mut ordered = Vec::new();

        for name in &mf.field_order {
            let Some(field) = Field::parse(name) else { continue };
            if mf.enabled_fields.iter().any(|f| f == name)
                && self.is_field_enabled(field)
                && !ordered.contains(&field)
            {
                ordered.push(field);
            }
        }

        for name in &mf.enabled_fields {
            let Some(field) = Field::parse(name) else { continue };
            if self.is_field_enabled(field) && !ordered.contains(&field) {
                ordered.push(field);
            }
        }

        ordered
    }

    pub fn is_debug_mode(&self) -> bool {
        self.settings.debug_mode
    }
}

/// Hot-reloadable holder for the message configuration. Readers take one
/// immutable snapshot per operation; the reload timer swaps in a new snapshot
/// when the file's modification time advances past the last successful load.
pub struct ConfigStore {
    path: PathBuf,
    current: ArcSwap<MessageConfig>,
    last_modified: Mutex<Option<SystemTime>>,
}

impl ConfigStore {
    /// Load the configuration file. A missing file synthesizes and persists
    /// the built-in defaults; a malformed file falls back to defaults in
    /// memory only. Neither case is fatal.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut last_modified = None;

        let config = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_yaml::from_str::<MessageConfig>(&text) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded message configuration");
                    last_modified = file_mtime(&path);
                    config
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e,
                        "malformed message configuration, using built-in defaults");
                    MessageConfig::built_in_default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = MessageConfig::built_in_default();
                match write_config(&path, &config) {
                    Ok(()) => {
                        tracing::info!(path = %path.display(),
                            "message configuration not found, created defaults");
                        last_modified = file_mtime(&path);
                    }
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e,
                            "failed to write default message configuration");
                    }
                }
                config
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e,
                    "failed to read message configuration, using built-in defaults");
                MessageConfig::built_in_default()
            }
        };

        Self {
            path,
            current: ArcSwap::from_pointee(config),
            last_modified: Mutex::new(last_modified),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<MessageConfig> {
        self.current.load_full()
    }

    /// Re-read and swap in the configuration file.
    pub fn reload(&self) -> Result<()> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let config: MessageConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;

        self.current.store(Arc::new(config));
        *self.last_modified.lock().expect("config mtime lock") = file_mtime(&self.path);
        Ok(())
    }

    /// Reload when the file has been modified since the last successful load.
    /// Returns whether a reload happened.
    pub fn check_for_updates(&self) -> bool {
        let Some(modified) = file_mtime(&self.path) else {
            return false;
        };

        let stale = {
            let last = self.last_modified.lock().expect("config mtime lock");
            last.is_none_or(|l| modified > l)
        };
        if !stale {
            return false;
        }

        match self.reload() {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "message configuration reloaded");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "message configuration reload failed");
                false
            }
        }
    }
}

/// Poll the configuration file for changes for the lifetime of the process.
pub fn spawn_reload_task(store: Arc<ConfigStore>) {
    let settings = store.snapshot().settings.clone();
    if !settings.auto_reload_config {
        tracing::info!("message configuration auto-reload disabled");
        return;
    }

    tokio::spawn(async move {
        let period = Duration::from_secs(settings.config_check_interval.max(1));
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            store.check_for_updates();
        }
    });
}

fn write_config(path: &Path, config: &MessageConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let text = serde_yaml::to_string(config)?;
    std::fs::write(path, text)?;
    Ok(())
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(enabled_fields: &[&str], field_order: &[&str], on: &[&str]) -> MessageConfig {
        let mut config = MessageConfig::default();
        config.message_format.enabled_fields =
            enabled_fields.iter().map(|s| s.to_string()).collect();
        config.message_format.field_order = field_order.iter().map(|s| s.to_string()).collect();
        for name in on {
            config.message_format.field_settings.insert(
                name.to_string(),
                FieldSettings { enabled: true, ..Default::default() },
            );
        }
        config
    }

    #[test]
    fn order_filters_to_enabled_intersection() {
        let config = config_with(
            &["title", "rating", "synopsis"],
            &["synopsis", "title", "rating"],
            &["title", "rating"],
        );
        assert_eq!(
            config.enabled_fields_in_order(),
            vec![Field::Title, Field::Rating]
        );
    }

    #[test]
    fn stragglers_appended_after_ordered_fields() {
        let config = config_with(
            &["title", "requester", "cast"],
            &["cast"],
            &["title", "requester", "cast"],
        );
        assert_eq!(
            config.enabled_fields_in_order(),
            vec![Field::Cast, Field::Title, Field::Requester]
        );
    }

    #[test]
    fn no_duplicates_under_misconfiguration() {
        let config = config_with(
            &["title", "title"],
            &["title", "title"],
            &["title"],
        );
        assert_eq!(config.enabled_fields_in_order(), vec![Field::Title]);
    }

    #[test]
    fn unknown_field_names_are_skipped() {
        let config = config_with(&["title", "banner"], &["banner", "title"], &["title"]);
        assert_eq!(config.enabled_fields_in_order(), vec![Field::Title]);
    }

    #[test]
    fn disabled_field_excluded_even_when_listed() {
        let config = config_with(&["title", "rating"], &["title", "rating"], &["title"]);
        assert_eq!(config.enabled_fields_in_order(), vec![Field::Title]);
    }

    #[test]
    fn unknown_field_settings_fall_back_to_defaults() {
        let config = MessageConfig::default();
        assert!(!config.is_field_enabled(Field::Crew));
        assert!(config.field(Field::Crew).max_items.is_none());
    }

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = MessageConfig::built_in_default();
        let text = serde_yaml::to_string(&config).unwrap();
        let parsed: MessageConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(
            parsed.enabled_fields_in_order(),
            config.enabled_fields_in_order()
        );
        assert_eq!(
            parsed.field(Field::Synopsis).max_length,
            Some(300)
        );
    }

    #[test]
    fn missing_file_creates_defaults_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_config.yml");
        let store = ConfigStore::load(&path);

        assert!(path.exists());
        let snapshot = store.snapshot();
        assert!(snapshot.is_field_enabled(Field::Title));
        assert!(!snapshot.is_debug_mode());
    }

    #[test]
    fn malformed_file_falls_back_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_config.yml");
        std::fs::write(&path, "message_format: [this is not a mapping").unwrap();

        let store = ConfigStore::load(&path);
        assert!(store.snapshot().is_field_enabled(Field::Title));
        // The malformed file must be left untouched.
        let on_disk = std::fs::read_to_string(&path).unwrap();
        assert!(on_disk.starts_with("message_format: [this"));
    }

    #[test]
    fn reload_picks_up_changed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message_config.yml");
        let store = ConfigStore::load(&path);
        assert!(!store.snapshot().is_debug_mode());

        let mut config = MessageConfig::built_in_default();
        config.settings.debug_mode = true;
        std::fs::write(&path, serde_yaml::to_string(&config).unwrap()).unwrap();

        store.reload().unwrap();
        assert!(store.snapshot().is_debug_mode());
    }
}
