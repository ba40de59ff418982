//! Telegram Transport
//!
//! Wires teloxide to the gateway: messages, voice/audio and inline queries
//! are converted into gateway calls and the replies are sent back, split
//! into Telegram-sized chunks. Runs with long polling or behind a webhook.

use crate::gateway::{chunk_message, ChatUser, Gateway, Reply, ReplyFormat, MAX_MESSAGE_LEN};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    dptree,
    error_handlers::LoggingErrorHandler,
    prelude::*,
    types::{
        ChatAction, InlineQuery, InlineQueryResult, InlineQueryResultArticle, InputMessageContent,
        InputMessageContentText, Message, ParseMode, Update, User,
    },
    update_listeners::webhooks,
};
use tracing::{debug, error, info, warn};

/// How updates reach the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Polling,
    Webhook,
}

/// Run the bot until Ctrl-C
pub async fn run(gateway: Arc<Gateway>, mode: RunMode) -> Result<()> {
    let telegram = gateway.services().config.telegram.clone();
    let bot = Bot::new(&telegram.bot_token);

    match bot.get_me().await {
        Ok(me) => {
            info!("Bot @{} connected", me.username());
            gateway.set_bot_username(me.username());
        }
        Err(e) => warn!("Could not fetch bot identity: {}", e),
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(message_handler))
        .branch(Update::filter_inline_query().endpoint(inline_handler));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![gateway])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("Error in update handler"))
        .enable_ctrlc_handler()
        .build();

    match mode {
        RunMode::Polling => {
            info!("Starting dispatcher with long polling...");
            dispatcher.dispatch().await;
        }
        RunMode::Webhook => {
            let url: reqwest::Url = telegram
                .webhook_url
                .as_deref()
                .context("TELEGRAM_WEBHOOK_URL is required in webhook mode")?
                .parse()
                .context("Invalid TELEGRAM_WEBHOOK_URL")?;
            let addr: SocketAddr = telegram
                .webhook_listen
                .parse()
                .context("Invalid TELEGRAM_WEBHOOK_LISTEN")?;

            let mut options = webhooks::Options::new(addr, url);
            if let Some(secret) = telegram.webhook_secret {
                options = options.secret_token(secret);
            }
            let listener = webhooks::axum(bot, options)
                .await
                .context("Failed to start webhook listener")?;

            info!("Starting dispatcher with webhook on {}", addr);
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("Error from the webhook listener"),
                )
                .await;
        }
    }

    warn!("Dispatcher stopped");
    Ok(())
}

fn chat_user(user: &User) -> ChatUser {
    ChatUser {
        id: user.id.0 as i64,
        first_name: user.first_name.clone(),
        username: user.username.clone(),
    }
}

/// Message handler endpoint for the dispatcher
async fn message_handler(bot: Bot, msg: Message, gateway: Arc<Gateway>) -> ResponseResult<()> {
    let Some(user) = msg.from.as_ref().map(chat_user) else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    let replies = if let Some(text) = msg.text() {
        let preview: String = text.chars().take(50).collect();
        info!(">>> Message received: user={}, chat={}, text={:?}", user.id, chat_id.0, preview);
        if !text.starts_with('/') {
            let _ = bot.send_chat_action(chat_id, ChatAction::Typing).await;
        }
        gateway.handle_text(&user, text).await
    } else if msg.voice().is_some() || msg.audio().is_some() {
        info!(">>> Voice received: user={}, chat={}", user.id, chat_id.0);
        gateway.handle_voice(&user).await
    } else {
        return Ok(());
    };

    for reply in &replies {
        if let Err(e) = send_reply(&bot, chat_id, reply).await {
            error!("Failed to send reply to {}: {:#}", chat_id.0, e);
        }
    }
    Ok(())
}

async fn inline_handler(bot: Bot, query: InlineQuery, gateway: Arc<Gateway>) -> ResponseResult<()> {
    let user = chat_user(&query.from);
    let Some(answer) = gateway.handle_inline(&user, &query.query).await else {
        return Ok(());
    };

    let article = InlineQueryResultArticle::new(
        answer.id,
        answer.title,
        InputMessageContent::Text(InputMessageContentText::new(answer.message_text)),
    )
    .description(answer.description);

    if let Err(e) = bot
        .answer_inline_query(query.id.clone(), vec![InlineQueryResult::Article(article)])
        .cache_time(60)
        .await
    {
        error!("Inline query failed: {}", e);
    }
    Ok(())
}

/// Send one reply, chunked; markdown goes out as HTML with a plain-text retry
async fn send_reply(bot: &Bot, chat_id: ChatId, reply: &Reply) -> Result<()> {
    if reply.text.is_empty() {
        bot.send_message(chat_id, "(no response)").await?;
        return Ok(());
    }

    for chunk in chunk_message(&reply.text, MAX_MESSAGE_LEN) {
        match reply.format {
            ReplyFormat::Plain => {
                bot.send_message(chat_id, &chunk).await?;
            }
            ReplyFormat::Markdown => {
                let html = markdown_to_telegram_html(&chunk);
                if bot
                    .send_message(chat_id, &html)
                    .parse_mode(ParseMode::Html)
                    .await
                    .is_err()
                {
                    bot.send_message(chat_id, &chunk).await?;
                }
            }
        }
    }
    Ok(())
}

fn escape_html(c: char, out: &mut String) {
    match c {
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '&' => out.push_str("&amp;"),
        _ => out.push(c),
    }
}

/// Convert the markdown the replies use (code blocks, inline code, `**bold**`)
/// to Telegram HTML
pub fn markdown_to_telegram_html(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + 64);
    let mut chars = text.chars().peekable();
    let mut in_code_block = false;
    let mut in_inline_code = false;
    let mut in_bold = false;

    while let Some(c) = chars.next() {
        if c == '`' && chars.peek() == Some(&'`') {
            let mut lookahead = chars.clone();
            lookahead.next();
            if lookahead.peek() == Some(&'`') {
                chars.next();
                chars.next();
                if in_code_block {
                    result.push_str("</code></pre>");
                    in_code_block = false;
                } else {
                    // Language tag
                    while let Some(&ch) = chars.peek() {
                        if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                            chars.next();
                        } else {
                            if ch == '\n' {
                                chars.next();
                            }
                            break;
                        }
                    }
                    result.push_str("<pre><code>");
                    in_code_block = true;
                }
                continue;
            }
        }

        if c == '`' && !in_code_block {
            result.push_str(if in_inline_code { "</code>" } else { "<code>" });
            in_inline_code = !in_inline_code;
            continue;
        }

        if c == '*' && chars.peek() == Some(&'*') && !in_code_block && !in_inline_code {
            chars.next();
            result.push_str(if in_bold { "</b>" } else { "<b>" });
            in_bold = !in_bold;
            continue;
        }

        escape_html(c, &mut result);
    }

    // Close any unclosed tags
    if in_inline_code {
        result.push_str("</code>");
    }
    if in_bold {
        result.push_str("</b>");
    }
    if in_code_block {
        result.push_str("</code></pre>");
    }
    result
}
