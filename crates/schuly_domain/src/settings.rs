use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDateTime;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;

pub const KEY_PUSH_ENABLED: &str = "push_notifications_enabled";
pub const KEY_AGENDA_ENABLED: &str = "push_agenda_enabled";
pub const KEY_GRADES_ENABLED: &str = "push_grades_enabled";
pub const KEY_ABSENCES_ENABLED: &str = "push_absences_enabled";
pub const KEY_ADVANCE_MINUTES: &str = "push_advance_minutes";
pub const KEY_LAST_PERMISSION_PROMPT: &str = "last_permission_modal_shown";
pub const KEY_API_BASE_URL: &str = "api_base_url";

pub const DEFAULT_ADVANCE_MINUTES: u32 = 5;
pub const MAX_ADVANCE_MINUTES: u32 = 120;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Persisted key/value collaborator. Values are scalars serialized as strings.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Opens the store. A corrupt file is moved aside and the store starts empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                match serde_json::from_str(&raw) {
                    Ok(values) => values,
                    Err(err) => {
                        let backup = sibling_path(&path, "corrupt");
                        warn!(path = %path.display(), backup = %backup.display(), %err, "settings file unreadable; starting from defaults");
                        if let Err(err) = fs::rename(&path, &backup) {
                            warn!(path = %path.display(), %err, "unable to move corrupt settings aside");
                        }
                        BTreeMap::new()
                    }
                }
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = values.len(), "settings file opened");
        Ok(Self {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes through a sibling temp file so a crash never leaves a half-written store.
    fn flush(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let payload = serde_json::to_string_pretty(values)?;
        let staging = sibling_path(&self.path, "tmp");
        fs::write(&staging, payload)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut values = self.values.write();
        let mut next = values.clone();
        next.insert(key.to_string(), value);
        self.flush(&next)?;
        *values = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.write();
        if !values.contains_key(key) {
            return Ok(());
        }
        let mut next = values.clone();
        next.remove(key);
        self.flush(&next)?;
        *values = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub push_enabled: bool,
    pub agenda_enabled: bool,
    pub grades_enabled: bool,
    pub absences_enabled: bool,
    pub advance_minutes: u32,
    pub last_permission_prompt: Option<NaiveDateTime>,
    pub api_base_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            push_enabled: true,
            agenda_enabled: true,
            grades_enabled: true,
            absences_enabled: true,
            advance_minutes: DEFAULT_ADVANCE_MINUTES,
            last_permission_prompt: None,
            api_base_url: None,
        }
    }
}

impl Settings {
    pub fn any_category_enabled(&self) -> bool {
        self.agenda_enabled || self.grades_enabled || self.absences_enabled
    }

    pub fn agenda_reminders_enabled(&self) -> bool {
        self.push_enabled && self.agenda_enabled
    }
}

/// Typed access to the persisted settings.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn load(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            push_enabled: self.read_parsed(KEY_PUSH_ENABLED, defaults.push_enabled),
            agenda_enabled: self.read_parsed(KEY_AGENDA_ENABLED, defaults.agenda_enabled),
            grades_enabled: self.read_parsed(KEY_GRADES_ENABLED, defaults.grades_enabled),
            absences_enabled: self.read_parsed(KEY_ABSENCES_ENABLED, defaults.absences_enabled),
            advance_minutes: self
                .read_parsed(KEY_ADVANCE_MINUTES, defaults.advance_minutes)
                .min(MAX_ADVANCE_MINUTES),
            last_permission_prompt: self.last_permission_prompt(),
            api_base_url: self
                .read_raw(KEY_API_BASE_URL)
                .filter(|url| !url.trim().is_empty()),
        }
    }

    pub fn set_push_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.store.set(KEY_PUSH_ENABLED, enabled.to_string())
    }

    pub fn set_agenda_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.store.set(KEY_AGENDA_ENABLED, enabled.to_string())
    }

    pub fn set_grades_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.store.set(KEY_GRADES_ENABLED, enabled.to_string())
    }

    pub fn set_absences_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.store.set(KEY_ABSENCES_ENABLED, enabled.to_string())
    }

    /// Persists the reminder lead time, clamped to two hours.
    pub fn set_advance_minutes(&self, minutes: u32) -> Result<u32, StoreError> {
        let clamped = minutes.min(MAX_ADVANCE_MINUTES);
        self.store.set(KEY_ADVANCE_MINUTES, clamped.to_string())?;
        Ok(clamped)
    }

    pub fn set_api_base_url(&self, url: Option<&str>) -> Result<(), StoreError> {
        match url.map(str::trim).filter(|url| !url.is_empty()) {
            Some(url) => self.store.set(KEY_API_BASE_URL, url.to_string()),
            None => self.store.remove(KEY_API_BASE_URL),
        }
    }

    pub fn last_permission_prompt(&self) -> Option<NaiveDateTime> {
        let raw = self.read_raw(KEY_LAST_PERMISSION_PROMPT)?;
        match NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT) {
            Ok(at) => Some(at),
            Err(err) => {
                warn!(key = KEY_LAST_PERMISSION_PROMPT, value = %raw, %err, "ignoring unparseable timestamp");
                None
            }
        }
    }

    pub fn record_permission_prompt(&self, at: NaiveDateTime) -> Result<(), StoreError> {
        self.store.set(
            KEY_LAST_PERMISSION_PROMPT,
            at.format(TIMESTAMP_FORMAT).to_string(),
        )
    }

    fn read_raw(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, %err, "settings read failed; using default");
                None
            }
        }
    }

    fn read_parsed<T: FromStr>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.read_raw(key) else {
            return default;
        };
        match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "unparseable setting; using default");
                default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn missing_values_fall_back_to_defaults() {
        let settings = SettingsStore::in_memory().load();
        assert_eq!(settings, Settings::default());
        assert!(settings.agenda_reminders_enabled());
    }

    #[test]
    fn garbage_values_are_ignored() {
        let raw = Arc::new(MemoryStore::new());
        raw.set(KEY_PUSH_ENABLED, "yes please".into()).unwrap();
        raw.set(KEY_ADVANCE_MINUTES, "-4".into()).unwrap();
        raw.set(KEY_LAST_PERMISSION_PROMPT, "last tuesday".into())
            .unwrap();
        let settings = SettingsStore::new(raw).load();
        assert!(settings.push_enabled);
        assert_eq!(settings.advance_minutes, DEFAULT_ADVANCE_MINUTES);
        assert_eq!(settings.last_permission_prompt, None);
    }

    #[test]
    fn setters_round_trip_through_string_values() {
        let raw = Arc::new(MemoryStore::new());
        let store = SettingsStore::new(raw.clone());
        store.set_push_enabled(false).unwrap();
        store.set_grades_enabled(false).unwrap();
        assert_eq!(store.set_advance_minutes(500).unwrap(), MAX_ADVANCE_MINUTES);
        store.set_api_base_url(Some(" https://school.example ")).unwrap();
        let shown = NaiveDate::from_ymd_opt(2025, 1, 2)
            .unwrap()
            .and_hms_opt(7, 45, 0)
            .unwrap();
        store.record_permission_prompt(shown).unwrap();

        assert_eq!(raw.get(KEY_PUSH_ENABLED).unwrap().as_deref(), Some("false"));
        assert_eq!(
            raw.get(KEY_LAST_PERMISSION_PROMPT).unwrap().as_deref(),
            Some("2025-01-02T07:45:00")
        );

        let settings = store.load();
        assert!(!settings.push_enabled);
        assert!(!settings.grades_enabled);
        assert!(settings.any_category_enabled());
        assert_eq!(settings.advance_minutes, MAX_ADVANCE_MINUTES);
        assert_eq!(settings.last_permission_prompt, Some(shown));
        assert_eq!(
            settings.api_base_url.as_deref(),
            Some("https://school.example")
        );

        store.set_api_base_url(None).unwrap();
        assert_eq!(store.load().api_base_url, None);
    }

    #[test]
    fn json_file_store_persists_between_opens() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("settings.json");

        let store = JsonFileStore::open(&path).expect("open new store");
        store.set(KEY_ADVANCE_MINUTES, "12".into()).unwrap();
        store.set(KEY_AGENDA_ENABLED, "false".into()).unwrap();
        store.remove(KEY_AGENDA_ENABLED).unwrap();

        let reopened = JsonFileStore::open(&path).expect("reopen store");
        assert_eq!(reopened.get(KEY_ADVANCE_MINUTES).unwrap().as_deref(), Some("12"));
        assert_eq!(reopened.get(KEY_AGENDA_ENABLED).unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_moved_aside_and_defaults_apply() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.json");
        fs::write(&path, r#"{"push_advance_minutes": "1"#).unwrap();

        let store = JsonFileStore::open(&path).expect("corrupt file still opens");
        assert_eq!(store.get(KEY_ADVANCE_MINUTES).unwrap(), None);
        assert!(temp.path().join("settings.json.corrupt").exists());
        assert_eq!(
            SettingsStore::new(Arc::new(store)).load(),
            Settings::default()
        );

        let store = JsonFileStore::open(&path).expect("reopen");
        store.set(KEY_ADVANCE_MINUTES, "9".into()).unwrap();
        let raw = fs::read_to_string(&path).expect("settings written");
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(parsed.get(KEY_ADVANCE_MINUTES).map(String::as_str), Some("9"));
        assert!(!temp.path().join("settings.json.tmp").exists());
    }

    #[test]
    fn failed_write_keeps_previous_value() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state_dir = temp.path().join("state");
        let path = state_dir.join("settings.json");

        let store = JsonFileStore::open(&path).expect("open store");
        store.set(KEY_ADVANCE_MINUTES, "12".into()).unwrap();

        // Replace the directory with a regular file so the next write cannot land.
        fs::remove_dir_all(&state_dir).unwrap();
        fs::write(&state_dir, "not a directory").unwrap();

        assert!(store.set(KEY_ADVANCE_MINUTES, "42".into()).is_err());
        assert_eq!(store.get(KEY_ADVANCE_MINUTES).unwrap().as_deref(), Some("12"));
        assert!(store.remove(KEY_ADVANCE_MINUTES).is_err());
        assert_eq!(store.get(KEY_ADVANCE_MINUTES).unwrap().as_deref(), Some("12"));

        let typed = SettingsStore::new(Arc::new(store));
        assert!(typed.set_advance_minutes(30).is_err());
        assert_eq!(typed.load().advance_minutes, 12);
    }
}
