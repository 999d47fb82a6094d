//! Telegram HTML for core outcomes.

use chrono::{DateTime, Utc};

use afkbot_core::{
    domain::Author,
    formatting::{escape_html, format_duration, medal},
    store::UserRecord,
    tracker::{AfkNotice, AfkStarted, AwardOutcome, Leaderboard, UserStatus},
    Error,
};

const NO_MESSAGE: &str = "No message set";

fn name_of(record: &UserRecord) -> String {
    if record.display_name.trim().is_empty() {
        format!("Unknown User ({})", record.user_id)
    } else {
        escape_html(&record.display_name)
    }
}

fn message_or_default(message: Option<&str>) -> String {
    escape_html(message.unwrap_or(NO_MESSAGE))
}

pub(super) fn welcome_back(author: &Author, award: &AwardOutcome) -> String {
    format!(
        "🎉 <b>Welcome back, {}!</b>\nYou were AFK for {}\n\n\
         <b>EXP Earned:</b> +{} EXP\n<b>Total EXP:</b> {} EXP\n<b>Current Rank:</b> {}",
        escape_html(&author.display_name),
        format_duration(award.elapsed_seconds),
        award.reward,
        award.total_exp,
        escape_html(&award.rank.name),
    )
}

pub(super) fn afk_notice(notice: &AfkNotice) -> String {
    format!(
        "🔕 <b>{} is currently AFK</b>\n<b>AFK Message:</b> {}\n<b>AFK Duration:</b> {}",
        escape_html(&notice.display_name),
        message_or_default(notice.message.as_deref()),
        format_duration(notice.elapsed_seconds),
    )
}

pub(super) fn afk_set(started: &AfkStarted) -> String {
    format!(
        "😴 <b>AFK Status Set</b>\n{} is now AFK\n\n<b>Message:</b> {}\n<b>Started:</b> {}",
        escape_html(&started.display_name),
        message_or_default(started.message.as_deref()),
        started.started_at.format("%Y-%m-%d %H:%M UTC"),
    )
}

pub(super) fn already_afk(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - since).num_seconds().max(0) as u64;
    format!(
        "⏳ You have been AFK for {}. Send any message to come back.",
        format_duration(elapsed)
    )
}

pub(super) fn exp_status(status: &UserStatus) -> String {
    let rec = &status.record;
    let mut out = format!(
        "📊 <b>{}'s EXP Status</b>\n<b>Current EXP:</b> {} EXP\n<b>Current Rank:</b> {}\n\
         <b>Time AFK:</b> {} over {} session(s)\n",
        name_of(rec),
        rec.exp,
        escape_html(&status.rank.name),
        format_duration(rec.total_afk_seconds),
        rec.afk_session_count,
    );
    match (&status.next_rank, status.exp_to_next) {
        (Some(next), Some(needed)) => out.push_str(&format!(
            "<b>Next Rank:</b> {} ({} EXP needed)",
            escape_html(&next.name),
            needed
        )),
        _ => out.push_str("🏆 Maximum rank achieved!"),
    }
    out
}

pub(super) fn rank_status(status: &UserStatus) -> String {
    format!(
        "🎖️ <b>{}'s Current Rank</b>\n<b>Rank:</b> {}\n<b>EXP:</b> {} EXP\n<b>Required EXP:</b> {} EXP",
        name_of(&status.record),
        escape_html(&status.rank.name),
        status.record.exp,
        status.rank.min_exp,
    )
}

pub(super) fn leaderboard(board: &Leaderboard) -> String {
    if board.rows.is_empty() {
        return "📋 <b>EXP Leaderboard</b>\nNo users have earned EXP yet!".to_string();
    }

    let mut out = format!("🏆 <b>EXP Leaderboard - Top {}</b>\n", board.rows.len());
    for row in &board.rows {
        out.push_str(&format!(
            "\n{}<b>#{} {}</b>\n{} EXP • {}",
            medal(row.position),
            row.position,
            name_of(&row.record),
            row.record.exp,
            escape_html(&row.rank.name),
        ));
    }
    out.push_str(&format!("\n\n<i>Total users: {}</i>", board.total_users));
    out
}

pub(super) fn help(prefix: &str) -> String {
    let p = escape_html(prefix);
    format!(
        "<b>AFK Reward Bot</b>\n\
         {p}afk [message] - go AFK; your next message brings you back with EXP\n\
         {p}exp [user id] - EXP, rank and progress\n\
         {p}rank [user id] - current rank\n\
         {p}top [n] - EXP leaderboard"
    )
}

pub(super) fn user_error(e: &Error) -> String {
    format!("❌ {}", escape_html(&e.to_string()))
}

pub(super) fn store_failure() -> String {
    "⚠️ Saved in memory, but writing the data file failed. It will be retried on the next change."
        .to_string()
}

pub(super) fn internal_error() -> String {
    "❌ An error occurred while processing the command.".to_string()
}
