//! Inbound event hooks: one entry point per chat message and per command.
//!
//! The dispatcher returns plain outcomes; rendering is the adapter's job.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    domain::{Author, UserId},
    errors::Error,
    tracker::{AfkNotice, AfkStarted, AfkTracker, Activity, AwardOutcome, Leaderboard, UserStatus},
    Result,
};

/// A user referenced by a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mention {
    Id(UserId),
    /// `@username`, with or without the `@`.
    Username(String),
}

/// Everything a plain message caused.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageOutcome {
    /// Set when the author was AFK and just came back.
    pub returned: Option<AwardOutcome>,
    /// Mentioned users who are currently AFK.
    pub afk_mentions: Vec<AfkNotice>,
    /// Set when the author's change could not be written; it is kept in
    /// memory and saved with the next successful write.
    pub store_error: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutcome {
    AfkSet(AfkStarted),
    AlreadyAfk { since: DateTime<Utc> },
    Exp(UserStatus),
    Rank(UserStatus),
    Leaderboard(Leaderboard),
    Help,
}

pub struct Dispatcher {
    tracker: Arc<AfkTracker>,
    default_leaderboard_limit: usize,
}

impl Dispatcher {
    pub fn new(tracker: Arc<AfkTracker>, default_leaderboard_limit: usize) -> Self {
        Self {
            tracker,
            default_leaderboard_limit,
        }
    }

    /// Handle any message: the author counts as active, mentions are checked
    /// for AFK users. A failed store write is reported alongside the rest of
    /// the outcome rather than replacing it.
    pub async fn on_message(&self, author: &Author, mentions: &[Mention]) -> MessageOutcome {
        let activity = self.tracker.on_activity(author).await;
        let returned = match activity.activity {
            Activity::Returned(out) => Some(out),
            Activity::Idle => None,
        };
        let store_error = activity.persisted.err().map(|e| e.to_string());

        let mut targets = BTreeSet::new();
        for mention in mentions {
            let id = match mention {
                Mention::Id(id) => Some(*id),
                Mention::Username(name) => self.tracker.user_by_username(name).await,
            };
            if let Some(id) = id.filter(|id| *id != author.id) {
                targets.insert(id);
            }
        }

        let mut afk_mentions = Vec::new();
        for id in targets {
            if let Some(notice) = self.tracker.afk_notice(id).await {
                afk_mentions.push(notice);
            }
        }

        MessageOutcome {
            returned,
            afk_mentions,
            store_error,
        }
    }

    /// Handle a command. Unknown commands yield `Ok(None)`.
    pub async fn on_command(
        &self,
        name: &str,
        args: &str,
        caller: &Author,
    ) -> Result<Option<CommandOutcome>> {
        let args = args.trim();
        let outcome = match name {
            "afk" => {
                let message = (!args.is_empty()).then_some(args);
                match self.tracker.set_afk(caller, message).await {
                    Ok(started) => CommandOutcome::AfkSet(started),
                    Err(Error::AlreadyAfk { since }) => CommandOutcome::AlreadyAfk { since },
                    Err(e) => return Err(e),
                }
            }
            "exp" => CommandOutcome::Exp(self.status_for(args, caller).await?),
            "rank" => CommandOutcome::Rank(self.status_for(args, caller).await?),
            "top" | "leaderboard" => {
                let limit = args
                    .parse::<i64>()
                    .unwrap_or(self.default_leaderboard_limit as i64);
                CommandOutcome::Leaderboard(self.tracker.leaderboard(limit).await)
            }
            "help" | "start" => CommandOutcome::Help,
            _ => return Ok(None),
        };
        Ok(Some(outcome))
    }

    async fn status_for(&self, args: &str, caller: &Author) -> Result<UserStatus> {
        let target = match args.split_whitespace().next() {
            Some(raw) => raw.parse::<UserId>()?,
            None => caller.id,
        };
        let mut status = self.tracker.status_of(target).await;
        if target == caller.id && status.record.display_name.is_empty() {
            status.record.display_name = caller.display_name.clone();
        }
        Ok(status)
    }
}

/// Split `"/cmd@botname rest"` into `("cmd", "rest")`.
///
/// Returns `None` when the text does not start with `prefix`, or when the
/// command is addressed to a bot other than `bot_username`. With no known bot
/// username every suffix is accepted.
pub fn parse_command(
    text: &str,
    prefix: &str,
    bot_username: Option<&str>,
) -> Option<(String, String)> {
    let text = text.trim_start();
    let body = text.strip_prefix(prefix)?;
    let mut parts = body.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let (cmd, addressee) = match first.split_once('@') {
        Some((cmd, bot)) => (cmd, Some(bot)),
        None => (first, None),
    };
    if let (Some(addressee), Some(me)) = (addressee, bot_username) {
        if !addressee.eq_ignore_ascii_case(me.trim_start_matches('@')) {
            return None;
        }
    }

    let cmd = cmd.to_lowercase();
    if cmd.is_empty() {
        return None;
    }
    Some((cmd, rest))
}
