//! Telegram update handlers.
//!
//! Every message from a human is first fed to the core as activity (which
//! returns AFK users and reports mentioned AFK users); command messages are
//! then dispatched as commands.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{Message, MessageEntityKind, User},
};

use afkbot_core::{
    dispatch::Mention,
    domain::{Author, ChatId, UserId},
};

use crate::router::AppState;

mod commands;
mod render;

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    if !state.cfg.chat_allowed(chat_id) {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };
    if user.is_bot {
        return Ok(());
    }

    let author = author_of(user);
    let mentions = mentioned_users(&msg);

    let outcome = state.afk.on_message(&author, &mentions).await;
    if let Some(e) = &outcome.store_error {
        tracing::error!(user = %author.id, error = %e, "activity not persisted");
    }
    if let Some(award) = &outcome.returned {
        let mut html = render::welcome_back(&author, award);
        if outcome.store_error.is_some() {
            html.push_str("\n\n");
            html.push_str(&render::store_failure());
        }
        send(&state, chat_id, &html).await;
    }
    for notice in &outcome.afk_mentions {
        send(&state, chat_id, &render::afk_notice(notice)).await;
    }

    if let Some(text) = msg.text() {
        commands::handle_command(&state, chat_id, &author, text).await;
    }

    Ok(())
}

fn author_of(user: &User) -> Author {
    let author = Author::new(UserId(user.id.0 as i64), user.full_name());
    match &user.username {
        Some(username) => author.with_username(username.clone()),
        None => author,
    }
}

/// Users explicitly referenced by a message: `@username` mentions, text
/// mentions of accounts without a username, and the author of the replied-to
/// message.
fn mentioned_users(msg: &Message) -> Vec<Mention> {
    let mut out = Vec::new();
    let (text, entities) = match (msg.text(), msg.entities()) {
        (Some(text), Some(entities)) => (text, entities),
        _ => (
            msg.caption().unwrap_or(""),
            msg.caption_entities().unwrap_or(&[]),
        ),
    };
    for entity in entities {
        match &entity.kind {
            MessageEntityKind::TextMention { user } => {
                out.push(Mention::Id(UserId(user.id.0 as i64)));
            }
            MessageEntityKind::Mention => {
                if let Some(name) = entity_text(text, entity.offset, entity.length) {
                    out.push(Mention::Username(name));
                }
            }
            _ => {}
        }
    }
    if let Some(replied) = msg.reply_to_message().and_then(|m| m.from()) {
        if !replied.is_bot {
            out.push(Mention::Id(UserId(replied.id.0 as i64)));
        }
    }
    out
}

/// Slice an entity out of message text. Telegram counts offsets and lengths
/// in UTF-16 code units.
fn entity_text(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    let slice = units.get(offset..end)?;
    String::from_utf16(slice).ok()
}

async fn send(state: &AppState, chat_id: i64, html: &str) {
    if let Err(e) = state.messenger.send_html(ChatId(chat_id), html).await {
        tracing::warn!(chat_id, error = %e, "failed to send message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_text_uses_utf16_offsets() {
        let text = "hi 👋 @bob_r are you there";
        // "hi " (3) + waving hand (2 UTF-16 units) + " " (1)
        assert_eq!(entity_text(text, 6, 6).as_deref(), Some("@bob_r"));
        assert_eq!(entity_text("@ann", 0, 4).as_deref(), Some("@ann"));
        assert_eq!(entity_text("@ann", 2, 10), None);
    }
}
