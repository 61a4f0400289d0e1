//! Process entry point: load config, wire every component up, run the
//! scheduler until the kill switch fires or a termination signal arrives.
//!
//! Grounded on the teacher's `interfaces/cli/src/main.rs` — `clap` for the
//! surface, `tracing_subscriber::fmt` with `EnvFilter` for logs, `dotenvy`
//! for local secrets — simplified from its multi-mode TUI/daemon/Telegram
//! process supervisor down to the single long-running loop this system is.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{watch, Mutex, Notify, Semaphore};
use tracing_subscriber::EnvFilter;

use agent_bus::{Bus, RedisBus, GPU_QUEUE};
use agent_clipboard::Clipboard;
use agent_cognition::CognitionEngine;
use agent_config::AppConfig;
use agent_context::OverflowWriter;
use agent_journal::{BusPruneHook, Journal};
use agent_llm::HttpLlmClient;
use agent_normalizer::RawInboxLog;
use agent_scheduler::{CommunicationsLog, Scheduler, SchedulerOptions};
use agent_todo::TodoStore;
use agent_toolbox::{Identity, SubscriptionSet, Toolbox, ToolboxContext};

#[derive(Debug, Parser)]
#[command(name = "agentd", version, about = "A persistent, tool-using LLM agent runtime")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config/default.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the agent loop. The default when no subcommand is given.
    Run,
    /// Load and resolve the config, print the paths it points at, and exit.
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config).with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => {
            println!("agent: {}", config.agent.name);
            println!("home: {}", config.home_dir().display());
            println!("bus endpoint: {}", config.bus.endpoint);
            println!("llm provider: {} ({})", config.llm.provider, config.llm.base_url);
            println!("working log: {}", config.working_log_path().display());
            println!("todo db: {}", config.todo_db_path().display());
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

async fn run(config: AppConfig) -> Result<()> {
    std::fs::create_dir_all(config.home_dir())?;

    let bus: Arc<dyn Bus> = Arc::new(
        RedisBus::connect(&config.bus.endpoint, config.bus.password.as_deref()).await.context("connecting to the bus")?,
    );

    let prune_hook = Arc::new(BusPruneHook { bus: bus.clone(), agent_name: config.agent.name.clone(), queue: GPU_QUEUE.to_string() });
    let journal = Arc::new(
        Journal::new(
            config.agent.name.clone(),
            config.working_log_path(),
            config.tier1_archive_dir(),
            bus.clone(),
            config.journal.prune_high_water_mark,
            config.journal.prune_keep_tail,
        )
        .with_prune_hook(prune_hook),
    );

    let clipboard = Arc::new(Clipboard::open(config.clipboard_path()).await.context("opening clipboard")?);
    let todo = Arc::new(TodoStore::open(config.todo_db_path()).context("opening todo store")?);

    let api_key = config.llm.api_key.clone().unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!("no LLM API key configured; calls to the provider will fail");
    }
    let llm_client = Arc::new(HttpLlmClient::new(
        config.llm.base_url.clone(),
        api_key,
        config.llm.flash_model.clone(),
        config.llm.pro_model.clone(),
        Duration::from_secs(config.llm.http_timeout_secs),
    ));
    let cognition =
        Arc::new(CognitionEngine::new(llm_client, config.governor.limit as usize, Duration::from_secs_f64(config.governor.window_secs)));

    let toolbox_ctx = Arc::new(ToolboxContext {
        agent_name: config.agent.name.clone(),
        home_dir: config.home_dir(),
        identity_path: config.identity_path(),
        priors_source_path: config.priors_source_path(),
        bus: bus.clone(),
        journal: journal.clone(),
        clipboard: clipboard.clone(),
        todo: todo.clone(),
        http: reqwest::Client::new(),
        notify_push_endpoint: std::env::var("AGENT_NOTIFY_PUSH_ENDPOINT").ok(),
        subprocess_semaphore: Arc::new(Semaphore::new(config.concurrency.tracked_subprocess_limit)),
        subprocess_timeout_secs: config.concurrency.subprocess_timeout_secs,
        ssh_timeout_secs: config.concurrency.ssh_timeout_secs,
        identity: Mutex::new(Identity::load_or_default(config.identity_path(), &config.agent.name)),
        subscriptions: Mutex::new(SubscriptionSet::load(config.subscriptions_path())),
        subprocess_wakeup: Arc::new(Notify::new()),
    });
    let toolbox = Arc::new(Toolbox::new(toolbox_ctx.clone()));

    let genesis_text = std::fs::read_to_string(config.genesis_path()).unwrap_or_default();
    let opts = SchedulerOptions {
        agent_name: config.agent.name.clone(),
        genesis_text,
        chat_cooldown_secs: config.scheduler.chat_cooldown_secs,
        inbox_cooldown_min_secs: config.scheduler.inbox_cooldown_min_secs,
        inbox_cooldown_max_secs: config.scheduler.inbox_cooldown_max_secs,
        governor_cooldown_secs: config.scheduler.governor_cooldown_secs,
        dedupe_ttl_secs: config.scheduler.dedupe_ttl_secs,
        burst_drain_limit: config.scheduler.burst_drain_limit,
        alarm_batch_limit: config.scheduler.alarm_batch_limit,
    };

    let overflow = OverflowWriter::new(config.overflow_dir());
    let sweep_age = Duration::from_secs(config.journal.overflow_sweep_days.max(0) as u64 * 86400);
    match overflow.sweep_older_than(sweep_age) {
        Ok(removed) if removed > 0 => tracing::info!(removed, "swept stale overflow sidecar files"),
        Ok(_) => {}
        Err(err) => tracing::warn!(?err, "failed to sweep overflow directory"),
    }

    let scheduler = Arc::new(Scheduler::new(
        opts,
        bus.clone(),
        journal,
        todo,
        clipboard,
        cognition,
        toolbox,
        toolbox_ctx,
        overflow,
        CommunicationsLog::new(config.communications_log_path()),
        RawInboxLog::new(config.inbox_dump_path()),
        config.episodes_dir(),
        config.priors_stub_path(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = scheduler.clone();
    let mut handle = tokio::spawn(async move { scheduler_task.run(shutdown_rx).await });

    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
            }
            Ok::<(), std::io::Error>(())
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await
        }
    };

    tokio::select! {
        result = &mut handle => {
            result.context("joining scheduler task")??;
        }
        result = terminate => {
            result.context("waiting for a termination signal")?;
            tracing::info!("shutdown signal received, stopping scheduler");
            let _ = shutdown_tx.send(true);
            handle.await.context("joining scheduler task")??;
        }
    }

    Ok(())
}
