use crate::audit::{self, AuditEntry, AuditLog};
use crate::config::SyncMode;
use crate::diagnostics;
use crate::pipeline::truncate_for_transport;
use crate::sync::WarningSink;
use crate::tracker::{MessageDeleter, MessageTracker};
use crate::AppState;
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::MessageId;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Journal bot commands:")]
pub enum Command {
    #[command(description = "run diagnostics and show the welcome message.")]
    Start,
    #[command(description = "run a health check.")]
    Health,
    #[command(description = "show recent audit log entries.")]
    Audit(String),
}

impl Command {
    fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "/start",
            Command::Health => "/health",
            Command::Audit(_) => "/audit",
        }
    }
}

/// What an unauthorized caller was trying to do, for the audit trail.
pub enum Attempt<'a> {
    Command(&'a str),
    Message(Option<&'a str>),
}

/// Single allow-listed identity check. Unauthorized traffic gets exactly
/// one UNAUTHORIZED audit entry and no reply at all.
pub fn authorize(
    allowed_user_id: u64,
    audit: &AuditLog,
    user_id: u64,
    username: Option<&str>,
    attempt: Attempt<'_>,
) -> bool {
    if user_id == allowed_user_id {
        return true;
    }
    match attempt {
        Attempt::Command(command) => {
            audit.append(&AuditEntry::unauthorized_command(user_id, username, command));
        }
        Attempt::Message(preview) => {
            audit.append(&AuditEntry::unauthorized_message(user_id, username, preview));
        }
    }
    false
}

/// Deletes Telegram messages on behalf of the retention sweep.
pub struct TelegramDeleter {
    bot: Bot,
}

impl TelegramDeleter {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl MessageDeleter for TelegramDeleter {
    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), String> {
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Sends sync warnings into the user's chat and tracks them for deletion.
pub struct TelegramWarningSink {
    bot: Bot,
    chat_id: ChatId,
    tracker: Arc<MessageTracker>,
}

#[async_trait]
impl WarningSink for TelegramWarningSink {
    async fn warn(&self, text: &str) {
        match self
            .bot
            .send_message(self.chat_id, format!("⚠️ {}", text))
            .await
        {
            Ok(sent) => self.tracker.track(self.chat_id.0, sent.id.0),
            Err(e) => log::warn!("Failed to send sync warning: {}", e),
        }
    }
}

/// Dispatch updates until shutdown.
pub async fn run_bot(bot: Bot, state: Arc<AppState>) {
    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_query));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn send_tracked(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    text: String,
) -> ResponseResult<Message> {
    let sent = bot.send_message(chat_id, text).await?;
    state.tracker.track(chat_id.0, sent.id.0);
    Ok(sent)
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0;
    let username = user.username.as_deref();

    if !authorize(
        state.config.allowed_user_id,
        &state.audit,
        user_id,
        username,
        Attempt::Command(cmd.as_str()),
    ) {
        return Ok(());
    }

    state
        .audit
        .append(&AuditEntry::command(user_id, username, cmd.as_str()));
    state.tracker.track(msg.chat.id.0, msg.id.0);

    match cmd {
        Command::Start => {
            let diag = diagnostics::run_diagnostic(&state.config).await;
            let text = format!(
                "🤖 Journal Bot Online.\n\n{}\n{}\n\nReady for queries.\n\n⏰ All messages will be automatically deleted after {} hours.",
                diag,
                diagnostics::session_status(&state.config),
                state.config.message_retention_hours
            );
            send_tracked(&bot, &state, msg.chat.id, text).await?;
        }
        Command::Health => {
            let diag = diagnostics::run_diagnostic(&state.config).await;
            send_tracked(&bot, &state, msg.chat.id, diag).await?;
        }
        Command::Audit(args) => {
            let count = args
                .split_whitespace()
                .next()
                .and_then(|s| s.parse::<usize>().ok())
                .unwrap_or(10)
                .min(50);
            let entries = state.audit.read_recent(count);
            let text = truncate_for_transport(&audit::format_entries(&entries));
            send_tracked(&bot, &state, msg.chat.id, text).await?;
        }
    }
    Ok(())
}

async fn handle_query(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(query) = msg.text() else {
        return Ok(());
    };
    // Unrecognized commands fall through to this endpoint; ignore them
    // rather than sending them to Claude.
    if query.starts_with('/') {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = user.id.0;
    let username = user.username.clone();

    if !authorize(
        state.config.allowed_user_id,
        &state.audit,
        user_id,
        username.as_deref(),
        Attempt::Message(Some(query)),
    ) {
        return Ok(());
    }

    state.tracker.track(msg.chat.id.0, msg.id.0);

    let eager = state.config.sync_mode == SyncMode::Auto;
    let status_text = if eager {
        "🔄 Syncing & Thinking..."
    } else {
        "🤔 Thinking..."
    };
    let status = send_tracked(&bot, &state, msg.chat.id, status_text.to_string()).await?;

    let sink = TelegramWarningSink {
        bot: bot.clone(),
        chat_id: msg.chat.id,
        tracker: state.tracker.clone(),
    };

    let reply = match state
        .pipeline
        .handle(user_id, username.as_deref(), query, Some(&sink))
        .await
    {
        Ok(text) => text,
        Err(e) => format!("🔥 Error: {}", e),
    };

    bot.edit_message_text(msg.chat.id, status.id, reply).await?;
    Ok(())
}
