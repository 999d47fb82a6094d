//! Persistent AFK/EXP records.
//!
//! Canonical on-disk shape: `{"users": {"<id>": UserRecord}}`. The older
//! `{"afk_users": ..., "user_exp": ...}` layout is migrated on load.

use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::{DateTime, Utc};
use serde::{
    de::{self, DeserializeOwned},
    Deserialize, Serialize,
};
use serde_json::Value;

use crate::{domain::UserId, errors::Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfkSession {
    #[serde(default)]
    pub is_afk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl AfkSession {
    /// Start time of the running session, if the user is away.
    pub fn away_since(&self) -> Option<DateTime<Utc>> {
        if self.is_afk {
            self.started_at
        } else {
            None
        }
    }

    fn repair(&mut self) {
        if !self.is_afk || self.started_at.is_none() {
            self.is_afk = false;
            self.started_at = None;
            self.message = None;
        }
        if self.message.as_deref().is_some_and(|m| m.trim().is_empty()) {
            self.message = None;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: String,
    /// Last known `@username`, stored without the `@`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub exp: u64,
    #[serde(default)]
    pub total_afk_seconds: u64,
    #[serde(default)]
    pub afk_session_count: u64,
    #[serde(default)]
    pub session: AfkSession,
}

impl UserRecord {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            username: None,
            exp: 0,
            total_afk_seconds: 0,
            afk_session_count: 0,
            session: AfkSession::default(),
        }
    }

    pub fn is_afk(&self) -> bool {
        self.session.away_since().is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub users: BTreeMap<UserId, UserRecord>,
}

impl StoreData {
    /// Parse either the canonical or the legacy layout. Entries that do not
    /// fit their schema are skipped; only unparseable JSON or a wrongly shaped
    /// top level is an error.
    pub fn parse(json: &str) -> std::result::Result<Self, serde_json::Error> {
        Self::parse_counting_skips(json).map(|(data, _)| data)
    }

    fn parse_counting_skips(json: &str) -> std::result::Result<(Self, usize), serde_json::Error> {
        let mut value: Value = serde_json::from_str(json)?;
        let Some(root) = value.as_object_mut() else {
            return Err(de::Error::custom("store root must be a JSON object"));
        };
        let is_legacy = !root.contains_key("users")
            && (root.contains_key("afk_users") || root.contains_key("user_exp"));

        let mut skipped = 0;
        let mut data = if is_legacy {
            LegacyStore {
                afk_users: entries(root.remove("afk_users"), "afk_users", &mut skipped)?,
                user_exp: entries(root.remove("user_exp"), "user_exp", &mut skipped)?,
            }
            .migrate()
        } else {
            let mut users = BTreeMap::new();
            for (key, rec) in entries::<UserRecord>(root.remove("users"), "users", &mut skipped)? {
                match key.parse::<UserId>() {
                    Ok(id) => {
                        users.insert(id, rec);
                    }
                    Err(_) => {
                        tracing::warn!(key = %key, "skipping store entry with a non-numeric id");
                        skipped += 1;
                    }
                }
            }
            StoreData { users }
        };
        data.repair();
        Ok((data, skipped))
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Restore invariants on data that may have been hand-edited.
    fn repair(&mut self) {
        for (id, rec) in self.users.iter_mut() {
            rec.user_id = *id;
            rec.session.repair();
        }
    }
}

/// Decode each member of a JSON object on its own. Members that do not decode
/// as `T` are logged, counted in `skipped`, and left out.
fn entries<T: DeserializeOwned>(
    section: Option<Value>,
    name: &str,
    skipped: &mut usize,
) -> std::result::Result<Vec<(String, T)>, serde_json::Error> {
    let map = match section {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(de::Error::custom(format!("`{name}` must be a JSON object"))),
    };

    let mut out = Vec::with_capacity(map.len());
    for (key, raw) in map {
        match serde_json::from_value::<T>(raw) {
            Ok(v) => out.push((key, v)),
            Err(e) => {
                tracing::warn!(section = name, key = %key, error = %e, "skipping unreadable store entry");
                *skipped += 1;
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Default)]
struct LegacyStore {
    afk_users: Vec<(String, LegacyAfkEntry)>,
    user_exp: Vec<(String, u64)>,
}

#[derive(Debug, Deserialize)]
struct LegacyAfkEntry {
    #[serde(default)]
    message: Option<String>,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    user_name: Option<String>,
}

/// Default AFK message of the old file format, equivalent to "unset".
const LEGACY_NO_MESSAGE: &str = "No message set";

impl LegacyStore {
    fn migrate(self) -> StoreData {
        let mut users: BTreeMap<UserId, UserRecord> = BTreeMap::new();

        for (raw_id, exp) in self.user_exp {
            let Ok(id) = raw_id.parse::<UserId>() else {
                continue;
            };
            users.entry(id).or_insert_with(|| UserRecord::new(id, "")).exp = exp;
        }

        for (raw_id, entry) in self.afk_users {
            let Ok(id) = raw_id.parse::<UserId>() else {
                continue;
            };
            let rec = users.entry(id).or_insert_with(|| UserRecord::new(id, ""));
            if let Some(name) = entry.user_name {
                rec.display_name = name;
            }
            rec.afk_session_count += 1;
            rec.session = AfkSession {
                is_afk: true,
                started_at: Some(entry.timestamp),
                message: entry.message.filter(|m| m != LEGACY_NO_MESSAGE),
                ended_at: None,
            };
        }

        StoreData { users }
    }
}

/// Persistence port for the tracker.
pub trait AfkStore: Send + Sync {
    /// Absent or corrupt data yields an empty store.
    fn load(&self) -> Result<StoreData>;

    /// Persist the full record set. Failures map to `Error::StoreWriteFailed`.
    fn save(&self, data: &StoreData) -> Result<()>;
}

/// JSON file store with write-to-temp-then-rename saves.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<StoreData>> {
        let txt = match std::fs::read_to_string(&self.path) {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if txt.trim().is_empty() {
            return Ok(None);
        }
        let (data, skipped) =
            StoreData::parse_counting_skips(&txt).map_err(|e| Error::StoreCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if skipped > 0 {
            tracing::warn!(skipped, "some store entries were unreadable");
            self.keep_copy();
        }
        Ok(Some(data))
    }

    fn aside_path(&self) -> PathBuf {
        let mut aside = self.path.clone().into_os_string();
        aside.push(".corrupt");
        PathBuf::from(aside)
    }

    /// Move an unreadable file aside so the next save does not destroy it.
    fn quarantine(&self) {
        let aside = self.aside_path();
        match std::fs::rename(&self.path, &aside) {
            Ok(()) => tracing::warn!(path = %aside.display(), "corrupt store moved aside"),
            Err(e) => tracing::warn!(error = %e, "could not move corrupt store aside"),
        }
    }

    /// Copy a partly readable file aside; the skipped entries would be lost on
    /// the next save otherwise.
    fn keep_copy(&self) {
        let aside = self.aside_path();
        match std::fs::copy(&self.path, &aside) {
            Ok(_) => tracing::warn!(path = %aside.display(), "copy of the original store kept"),
            Err(e) => tracing::warn!(error = %e, "could not keep a copy of the store"),
        }
    }

    fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "afk.json".to_string());
        let tmp = dir.join(format!(".{file_name}.{}.tmp", std::process::id()));

        let result = (|| {
            let mut f = std::fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            std::fs::rename(&tmp, &self.path)
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }
}

impl AfkStore for JsonFileStore {
    fn load(&self) -> Result<StoreData> {
        match self.read() {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Ok(StoreData::default()),
            Err(e @ Error::StoreCorrupt { .. }) => {
                tracing::warn!(error = %e, "starting with an empty store");
                self.quarantine();
                Ok(StoreData::default())
            }
            Err(e) => Err(e),
        }
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let txt = data.to_json()?;
        self.write_atomic(txt.as_bytes())
            .map_err(|source| Error::StoreWriteFailed {
                path: self.path.clone(),
                source,
            })
    }
}

/// In-process store, mainly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    fail_writes: Mutex<bool>,
}

impl MemoryStore {
    pub fn new(data: StoreData) -> Self {
        Self {
            data: Mutex::new(data),
            fail_writes: Mutex::new(false),
        }
    }

    /// Make subsequent saves fail, simulating a read-only disk.
    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    pub fn snapshot(&self) -> StoreData {
        lock(&self.data).clone()
    }
}

impl AfkStore for MemoryStore {
    fn load(&self) -> Result<StoreData> {
        Ok(self.snapshot())
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        if *lock(&self.fail_writes) {
            return Err(Error::StoreWriteFailed {
                path: PathBuf::from(":memory:"),
                source: std::io::Error::new(std::io::ErrorKind::Other, "writes disabled"),
            });
        }
        *lock(&self.data) = data.clone();
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
