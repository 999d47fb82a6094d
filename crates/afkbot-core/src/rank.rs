//! Rank engine: EXP rewards for AFK time and EXP-to-rank mapping.
//!
//! Ranks use threshold matching: a user holds the tier with the greatest
//! `min_exp` not above their EXP. Any `max_exp` key in the config file is
//! ignored.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::SystemTime,
};

use serde::Deserialize;

use crate::{errors::Error, Result};

pub const DEFAULT_TIER_NAME: &str = "Unranked";
pub const DEFAULT_TIER_COLOR: &str = "#95a5a6";
const DEFAULT_BASE_PER_MINUTE: f64 = 1.0;
const DEFAULT_MAX_PER_SESSION: u64 = 100;

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct RankTier {
    #[serde(default = "default_tier_name")]
    pub name: String,
    #[serde(default)]
    pub min_exp: u64,
    #[serde(default = "default_tier_color")]
    pub color: String,
}

impl RankTier {
    pub fn new(name: impl Into<String>, min_exp: u64, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_exp,
            color: color.into(),
        }
    }

    pub fn unranked() -> Self {
        Self::new(DEFAULT_TIER_NAME, 0, DEFAULT_TIER_COLOR)
    }
}

fn default_tier_name() -> String {
    DEFAULT_TIER_NAME.to_string()
}

fn default_tier_color() -> String {
    DEFAULT_TIER_COLOR.to_string()
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ExpRate {
    #[serde(default = "default_base_per_minute")]
    pub base_per_minute: f64,
    /// `None` means uncapped. Absent from the file means the default cap;
    /// an explicit `null` lifts it.
    #[serde(default = "default_max_per_session")]
    pub max_per_session: Option<u64>,
}

impl Default for ExpRate {
    fn default() -> Self {
        Self {
            base_per_minute: DEFAULT_BASE_PER_MINUTE,
            max_per_session: Some(DEFAULT_MAX_PER_SESSION),
        }
    }
}

fn default_base_per_minute() -> f64 {
    DEFAULT_BASE_PER_MINUTE
}

fn default_max_per_session() -> Option<u64> {
    Some(DEFAULT_MAX_PER_SESSION)
}

/// On-disk shape of `rank_config.json`.
///
/// Accepts either a capped `exp_rate` object or a flat, uncapped
/// `exp_per_minute`; `exp_rate` wins when both are present.
#[derive(Debug, Default, Deserialize)]
struct RankConfigFile {
    #[serde(default)]
    ranks: Vec<RankTier>,
    #[serde(default)]
    exp_rate: Option<ExpRate>,
    #[serde(default)]
    exp_per_minute: Option<f64>,
}

/// Validated rank configuration. Tiers are sorted by `min_exp` and never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct RankConfig {
    tiers: Vec<RankTier>,
    rate: ExpRate,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self::new(Vec::new(), ExpRate::default())
    }
}

impl RankConfig {
    pub fn new(mut tiers: Vec<RankTier>, rate: ExpRate) -> Self {
        if tiers.is_empty() {
            tiers.push(RankTier::unranked());
        }
        // Stable: equal thresholds keep file order.
        tiers.sort_by_key(|t| t.min_exp);
        Self { tiers, rate }
    }

    pub fn parse(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let raw: RankConfigFile = serde_json::from_str(json)?;
        let rate = match (raw.exp_rate, raw.exp_per_minute) {
            (Some(rate), _) => rate,
            (None, Some(per_minute)) => ExpRate {
                base_per_minute: per_minute,
                max_per_session: None,
            },
            (None, None) => ExpRate::default(),
        };
        Ok(Self::new(raw.ranks, rate))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let txt = match std::fs::read_to_string(path) {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigMissing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&txt).map_err(|e| Error::ConfigCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn tiers(&self) -> &[RankTier] {
        &self.tiers
    }

    pub fn rate(&self) -> &ExpRate {
        &self.rate
    }

    pub fn reward_for(&self, duration_minutes: f64) -> u64 {
        reward_for(duration_minutes, &self.rate)
    }

    /// Tier with the greatest `min_exp <= exp`, else the lowest tier.
    pub fn rank_for(&self, exp: u64) -> &RankTier {
        self.tiers
            .iter()
            .rev()
            .find(|t| exp >= t.min_exp)
            .unwrap_or(&self.tiers[0])
    }

    /// Lowest tier strictly above `exp`, or `None` at maximum rank.
    pub fn next_rank(&self, exp: u64) -> Option<&RankTier> {
        self.tiers.iter().find(|t| t.min_exp > exp)
    }

    pub fn exp_to_next(&self, exp: u64) -> Option<u64> {
        self.next_rank(exp).map(|t| t.min_exp - exp)
    }
}

/// EXP earned for an AFK session of `duration_minutes`.
pub fn reward_for(duration_minutes: f64, rate: &ExpRate) -> u64 {
    let raw = duration_minutes * rate.base_per_minute;
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    // Float-to-int casts saturate.
    let reward = raw.floor() as u64;
    match rate.max_per_session {
        Some(cap) => reward.min(cap),
        None => reward,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RankReload {
    /// Re-read the file on every lookup.
    Always,
    /// Keep the parsed config until the file's mtime changes.
    OnChange,
}

impl RankReload {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" => Some(Self::Always),
            "on_change" | "on-change" | "onchange" => Some(Self::OnChange),
            _ => None,
        }
    }
}

#[derive(Default)]
struct CachedConfig {
    config: Option<Arc<RankConfig>>,
    modified: Option<SystemTime>,
}

/// Loads `rank_config.json`, substituting the default config when the file is
/// missing or unreadable.
pub struct RankConfigSource {
    path: PathBuf,
    reload: RankReload,
    cache: Mutex<CachedConfig>,
}

impl RankConfigSource {
    pub fn new(path: impl Into<PathBuf>, reload: RankReload) -> Self {
        Self {
            path: path.into(),
            reload,
            cache: Mutex::new(CachedConfig::default()),
        }
    }

    /// A source that never touches the filesystem.
    pub fn fixed(config: RankConfig) -> Self {
        Self {
            path: PathBuf::new(),
            reload: RankReload::OnChange,
            cache: Mutex::new(CachedConfig {
                config: Some(Arc::new(config)),
                modified: None,
            }),
        }
    }

    pub fn current(&self) -> Arc<RankConfig> {
        if self.reload == RankReload::Always {
            return Arc::new(self.load());
        }

        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok();
        let mut cache = match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cfg) = &cache.config {
            if cache.modified == modified {
                return cfg.clone();
            }
        }

        let cfg = Arc::new(self.load());
        cache.config = Some(cfg.clone());
        cache.modified = modified;
        cfg
    }

    fn load(&self) -> RankConfig {
        match RankConfig::from_file(&self.path) {
            Ok(cfg) => cfg,
            Err(Error::ConfigMissing(path)) => {
                tracing::debug!(path = %path.display(), "rank config missing, using defaults");
                RankConfig::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "rank config unusable, using defaults");
                RankConfig::default()
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_config() -> RankConfig {
    RankConfig::new(
        vec![
            RankTier::new("Legend", 10_000, "#e74c3c"),
            RankTier::new("Newbie", 0, "#95a5a6"),
            RankTier::new("Regular", 100, "#3498db"),
            RankTier::new("Active", 500, "#2ecc71"),
            RankTier::new("Veteran", 1500, "#9b59b6"),
            RankTier::new("Expert", 3000, "#f1c40f"),
            RankTier::new("Master", 5000, "#e67e22"),
        ],
        ExpRate::default(),
    )
}
