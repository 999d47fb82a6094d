use chrono::Utc;

use afkbot_core::{
    dispatch::{parse_command, CommandOutcome},
    domain::Author,
    Error,
};

use crate::router::AppState;

use super::{render, send};

pub(super) async fn handle_command(state: &AppState, chat_id: i64, caller: &Author, text: &str) {
    let Some((name, args)) = parse_command(
        text,
        &state.cfg.command_prefix,
        state.bot_username.as_deref(),
    ) else {
        return;
    };

    let html = match state.afk.on_command(&name, &args, caller).await {
        Ok(Some(outcome)) => render_outcome(state, outcome),
        Ok(None) => return,
        Err(e) if e.is_user_facing() => render::user_error(&e),
        Err(e @ Error::StoreWriteFailed { .. }) => {
            tracing::error!(command = %name, error = %e, "command not persisted");
            render::store_failure()
        }
        Err(e) => {
            tracing::error!(command = %name, error = %e, "command failed");
            render::internal_error()
        }
    };

    send(state, chat_id, &html).await;
}

fn render_outcome(state: &AppState, outcome: CommandOutcome) -> String {
    match outcome {
        CommandOutcome::AfkSet(started) => render::afk_set(&started),
        CommandOutcome::AlreadyAfk { since } => render::already_afk(since, Utc::now()),
        CommandOutcome::Exp(status) => render::exp_status(&status),
        CommandOutcome::Rank(status) => render::rank_status(&status),
        CommandOutcome::Leaderboard(board) => render::leaderboard(&board),
        CommandOutcome::Help => render::help(&state.cfg.command_prefix),
    }
}
