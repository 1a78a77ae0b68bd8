use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;

mod audit;
mod config;
mod diagnostics;
mod pipeline;
mod process;
mod scheduler;
mod session;
mod sync;
mod telegram;
mod tracker;

use audit::{AuditEntry, AuditLog};
use config::{Config, SyncMode};
use pipeline::QueryPipeline;
use scheduler::{Scheduler, SchedulerConfig};
use session::SessionStore;
use sync::SyncOrchestrator;
use telegram::TelegramDeleter;
use tracker::MessageTracker;

pub struct AppState {
    pub config: Config,
    pub audit: Arc<AuditLog>,
    pub tracker: Arc<MessageTracker>,
    pub pipeline: Arc<QueryPipeline>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();

    println!("--- STARTUP DIAGNOSTICS ---");
    println!("{}", diagnostics::run_diagnostic(&config).await);
    println!("---------------------------");

    let audit = Arc::new(AuditLog::new(config.audit_log_path.clone()));
    audit.append(&AuditEntry::startup());

    let sessions = Arc::new(SessionStore::new(
        config.sessions_enabled,
        config.session_expiry_hours,
    ));
    let tracker = Arc::new(MessageTracker::new(config.message_retention_hours));
    let sync = Arc::new(SyncOrchestrator::new(
        config.journal_path.clone(),
        config.sync_script.clone(),
    ));
    let pipeline = Arc::new(QueryPipeline::new(
        config.claude_bin.clone(),
        config.journal_path.clone(),
        config.sync_mode == SyncMode::Auto,
        sessions.clone(),
        sync.clone(),
        audit.clone(),
    ));

    let bot = Bot::new(config.telegram_token.clone());
    let sync_interval = match config.sync_mode {
        SyncMode::Auto => None,
        SyncMode::Timer(minutes) => Some(Duration::from_secs(minutes * 60)),
    };
    let scheduler = Arc::new(Scheduler::new(
        tracker.clone(),
        sessions.clone(),
        sync.clone(),
        Arc::new(TelegramDeleter::new(bot.clone())),
        sync_interval,
        SchedulerConfig::default(),
    ));

    let (scheduler_shutdown_tx, scheduler_shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(scheduler.start(scheduler_shutdown_rx));

    log::info!(
        "🗑️ Message auto-deletion enabled: {} hours retention",
        config.message_retention_hours
    );
    match config.sync_mode {
        SyncMode::Auto => log::info!("🔄 Sync mode: auto (before/after each query)"),
        SyncMode::Timer(minutes) => log::info!("🔄 Sync mode: timer (every {} minutes)", minutes),
    }
    if config.sessions_enabled {
        log::info!(
            "💬 Session mode enabled: {}h expiry",
            config.session_expiry_hours
        );
    } else {
        log::info!("💬 Session mode disabled (single-shot queries)");
    }

    let state = Arc::new(AppState {
        config,
        audit,
        tracker,
        pipeline,
    });

    telegram::run_bot(bot, state).await;

    // Dispatcher returned (ctrl-c); stop the background loops too
    let _ = scheduler_shutdown_tx.send(());
}
