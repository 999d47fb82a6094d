use std::{
    env,
    fs,
    path::{Path, PathBuf},
};

use crate::{errors::Error, rank::RankReload, tracker::clamp_limit, Result};

/// Typed configuration, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    /// Empty means every chat may use the bot.
    pub telegram_allowed_chats: Vec<i64>,
    pub command_prefix: String,

    // Storage
    pub data_file: PathBuf,
    pub rank_config_file: PathBuf,
    pub rank_config_reload: RankReload,

    // Commands
    pub leaderboard_default_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            telegram_allowed_chats: Vec::new(),
            command_prefix: "/".to_string(),
            data_file: PathBuf::from("afk.json"),
            rank_config_file: PathBuf::from("rank_config.json"),
            rank_config_reload: RankReload::Always,
            leaderboard_default_limit: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_env()
    }

    /// Build from the current process environment only.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_allowed_chats = parse_csv_i64(env_str("TELEGRAM_ALLOWED_CHATS"));

        let command_prefix = env_str("BOT_PREFIX")
            .and_then(non_empty)
            .map(|s| s.trim().to_string())
            .unwrap_or(defaults.command_prefix);

        let data_file = env_path("AFK_DATA_FILE").unwrap_or(defaults.data_file);
        let rank_config_file = env_path("RANK_CONFIG_FILE").unwrap_or(defaults.rank_config_file);
        let rank_config_reload = match env_str("RANK_CONFIG_RELOAD").and_then(non_empty) {
            None => defaults.rank_config_reload,
            Some(raw) => RankReload::parse(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "RANK_CONFIG_RELOAD must be `always` or `on_change`, got `{raw}`"
                ))
            })?,
        };

        let leaderboard_default_limit = env_i64("LEADERBOARD_DEFAULT_LIMIT")
            .map(clamp_limit)
            .unwrap_or(defaults.leaderboard_default_limit);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_chats,
            command_prefix,
            data_file,
            rank_config_file,
            rank_config_reload,
            leaderboard_default_limit,
        })
    }

    pub fn chat_allowed(&self, chat_id: i64) -> bool {
        self.telegram_allowed_chats.is_empty() || self.telegram_allowed_chats.contains(&chat_id)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
