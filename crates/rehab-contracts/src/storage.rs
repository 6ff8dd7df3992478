use std::fmt;
use std::path::PathBuf;

use anyhow::{bail, Context};

use crate::session::{SessionSnapshot, SNAPSHOT_SCHEMA_VERSION};

pub const SESSION_STORAGE_KEY: &str = "photo_rehab_state";
pub const THEME_STORAGE_KEY: &str = "photo_rehab_theme";
pub const TEST_MODE_STORAGE_KEY: &str = "photo_rehab_test_mode";

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    pub fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("failed creating {}", self.root.display()))?;
        std::fs::write(&path, value).with_context(|| format!("failed writing {}", path.display()))
    }

    pub fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed removing {}", path.display())),
        }
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            bail!("invalid storage key '{key}'");
        }
        Ok(self.root.join(key))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionLoad {
    Absent,
    Restored(SessionSnapshot),
    /// The stored snapshot was unreadable; its key has been cleared.
    Discarded(String),
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    store: LocalStore,
    key: String,
}

impl SessionStore {
    pub fn new(store: LocalStore) -> Self {
        Self::with_key(store, SESSION_STORAGE_KEY)
    }

    pub fn with_key(store: LocalStore, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Returns `false` without writing when the snapshot has no original image.
    pub fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<bool> {
        if snapshot.original_image.is_none() {
            return Ok(false);
        }
        let encoded = serde_json::to_string(snapshot)?;
        self.store.set_item(&self.key, &encoded)?;
        Ok(true)
    }

    pub fn load(&self) -> anyhow::Result<SessionLoad> {
        let Some(raw) = self.store.get_item(&self.key)? else {
            return Ok(SessionLoad::Absent);
        };
        match parse_snapshot(&raw) {
            Ok(snapshot) => Ok(SessionLoad::Restored(snapshot)),
            Err(reason) => {
                self.store.remove_item(&self.key)?;
                Ok(SessionLoad::Discarded(reason))
            }
        }
    }

    pub fn has_session(&self) -> anyhow::Result<bool> {
        Ok(matches!(
            self.load()?,
            SessionLoad::Restored(SessionSnapshot {
                original_image: Some(_),
                ..
            })
        ))
    }
}

fn parse_snapshot(raw: &str) -> Result<SessionSnapshot, String> {
    let snapshot: SessionSnapshot =
        serde_json::from_str(raw).map_err(|err| format!("unparseable snapshot: {err}"))?;
    if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(format!(
            "unsupported snapshot schema version {} (expected {})",
            snapshot.schema_version, SNAPSHOT_SCHEMA_VERSION
        ));
    }
    Ok(snapshot)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Preferences {
    store: LocalStore,
}

impl Preferences {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    pub fn theme(&self) -> anyhow::Result<Theme> {
        Ok(self
            .store
            .get_item(THEME_STORAGE_KEY)?
            .as_deref()
            .and_then(Theme::parse)
            .unwrap_or(Theme::Dark))
    }

    pub fn set_theme(&self, theme: Theme) -> anyhow::Result<()> {
        self.store.set_item(THEME_STORAGE_KEY, theme.as_str())
    }

    pub fn toggle_theme(&self) -> anyhow::Result<Theme> {
        let next = self.theme()?.toggled();
        self.set_theme(next)?;
        Ok(next)
    }

    pub fn test_mode(&self) -> anyhow::Result<bool> {
        Ok(self
            .store
            .get_item(TEST_MODE_STORAGE_KEY)?
            .map(|raw| raw.trim() == "true")
            .unwrap_or(false))
    }

    pub fn set_test_mode(&self, enabled: bool) -> anyhow::Result<()> {
        self.store
            .set_item(TEST_MODE_STORAGE_KEY, if enabled { "true" } else { "false" })
    }

    pub fn toggle_test_mode(&self) -> anyhow::Result<bool> {
        let next = !self.test_mode()?;
        self.set_test_mode(next)?;
        Ok(next)
    }
}

pub fn test_mode_acknowledgment(enabled: bool) -> String {
    if enabled {
        "Test mode is now ON. API calls will be simulated.".to_string()
    } else {
        "Test mode is now OFF. API calls will be real.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::assets::RestorationAsset;

    fn snapshot_with_original() -> SessionSnapshot {
        SessionSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            original_image: Some("b3JpZw==".to_string()),
            original_mime_type: "image/jpeg".to_string(),
            restoration_results: vec![RestorationAsset {
                title: "Comprehensive Restoration".to_string(),
                prompt: "p".to_string(),
                data: "ZGF0YQ==".to_string(),
            }],
            face_closeups: Vec::new(),
            api_request_log: Vec::new(),
            color_palette: None,
            error_message: String::new(),
        }
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let sessions = SessionStore::new(LocalStore::new(temp.path()));
        let snapshot = snapshot_with_original();

        assert!(sessions.save(&snapshot)?);
        assert!(sessions.has_session()?);
        assert_eq!(sessions.load()?, SessionLoad::Restored(snapshot));
        Ok(())
    }

    #[test]
    fn save_without_original_is_a_noop() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let sessions = SessionStore::new(LocalStore::new(temp.path()));
        let mut snapshot = snapshot_with_original();
        snapshot.original_image = None;

        assert!(!sessions.save(&snapshot)?);
        assert_eq!(sessions.load()?, SessionLoad::Absent);
        assert!(!sessions.has_session()?);
        Ok(())
    }

    #[test]
    fn save_overwrites_previous_snapshot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let sessions = SessionStore::new(LocalStore::new(temp.path()));
        let first = snapshot_with_original();
        let mut second = first.clone();
        second.restoration_results.clear();

        sessions.save(&first)?;
        sessions.save(&second)?;
        assert_eq!(sessions.load()?, SessionLoad::Restored(second));
        Ok(())
    }

    #[test]
    fn corrupt_snapshot_is_discarded_and_cleared() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        store.set_item(SESSION_STORAGE_KEY, "{not json")?;
        let sessions = SessionStore::new(store.clone());

        assert!(matches!(sessions.load()?, SessionLoad::Discarded(_)));
        assert_eq!(store.get_item(SESSION_STORAGE_KEY)?, None);
        assert_eq!(sessions.load()?, SessionLoad::Absent);
        Ok(())
    }

    #[test]
    fn unknown_schema_version_is_discarded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let payload = json!({"schemaVersion": 99, "originalImage": "eA=="});
        store.set_item(SESSION_STORAGE_KEY, &payload.to_string())?;
        let sessions = SessionStore::new(store);

        match sessions.load()? {
            SessionLoad::Discarded(reason) => assert!(reason.contains("99")),
            other => panic!("expected discard, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn snapshot_missing_collections_defaults_them() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        let payload = json!({"schemaVersion": 1, "originalImage": "eA==", "originalMimeType": "image/png"});
        store.set_item(SESSION_STORAGE_KEY, &payload.to_string())?;

        match SessionStore::new(store).load()? {
            SessionLoad::Restored(snapshot) => {
                assert!(snapshot.restoration_results.is_empty());
                assert!(snapshot.api_request_log.is_empty());
            }
            other => panic!("expected restore, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn rejects_path_like_keys() {
        let store = LocalStore::new("/tmp/unused");
        assert!(store.get_item("../escape").is_err());
        assert!(store.get_item("").is_err());
        assert!(store.get_item(".hidden").is_err());
    }

    #[test]
    fn preferences_default_and_toggle() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let prefs = Preferences::new(LocalStore::new(temp.path()));

        assert_eq!(prefs.theme()?, Theme::Dark);
        assert!(!prefs.test_mode()?);

        assert_eq!(prefs.toggle_theme()?, Theme::Light);
        assert!(prefs.toggle_test_mode()?);

        let reopened = Preferences::new(LocalStore::new(temp.path()));
        assert_eq!(reopened.theme()?, Theme::Light);
        assert!(reopened.test_mode()?);
        assert_eq!(
            test_mode_acknowledgment(true),
            "Test mode is now ON. API calls will be simulated."
        );
        Ok(())
    }

    #[test]
    fn unrecognized_theme_falls_back_to_dark() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalStore::new(temp.path());
        store.set_item(THEME_STORAGE_KEY, "sepia")?;
        assert_eq!(Preferences::new(store).theme()?, Theme::Dark);
        Ok(())
    }
}
