//! CLI command execution.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;

use teamchat::api::{Backend, RequestClient};
use teamchat::channel::{ChannelConfig, InboundMessage, RealtimeChannel};
use teamchat::chat::{HealthMonitor, SessionStore};
use teamchat::config::ClientConfig;
use teamchat::models::{find_agent, ChatSession, Message, MessageStatus, DEFAULT_AGENTS};
use teamchat::storage::{BackupLog, PersistentStore, SOCKET_BACKUP_KEY};

use super::args::{Cli, Commands};

/// Directory name for per-message backups under the temp dir.
const EPHEMERAL_DIR: &str = "teamchat-backup";

/// Everything a command may need, built once per invocation.
struct App {
    config: ClientConfig,
    client: Arc<RequestClient>,
    durable: PersistentStore,
    store: Arc<SessionStore>,
}

impl App {
    fn open(cli: &Cli) -> Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => ClientConfig::default_data_dir()?,
        };
        let config = ClientConfig::new(cli.backend.as_str(), data_dir);

        let durable = PersistentStore::open_or_memory(&config.data_dir);
        let ephemeral = PersistentStore::open_or_memory(&ephemeral_dir());
        let client = Arc::new(RequestClient::new(&config));
        let store = Arc::new(SessionStore::new(
            client.clone(),
            durable.clone(),
            ephemeral,
            config.store,
        ));

        Ok(Self {
            config,
            client,
            durable,
            store,
        })
    }

    async fn refresh_health(&self) -> bool {
        let healthy = self.client.check_health().await;
        self.store.set_connected(healthy);
        healthy
    }

    fn channel(&self) -> RealtimeChannel {
        RealtimeChannel::new(ChannelConfig::from_client(&self.config), self.durable.clone())
    }

    fn current(&self) -> Result<ChatSession> {
        self.store
            .current_session()
            .context("No active session. Run 'teamchat new' or 'teamchat switch <id>'.")
    }
}

fn ephemeral_dir() -> PathBuf {
    std::env::temp_dir().join(EPHEMERAL_DIR)
}

/// Execute a parsed CLI invocation.
pub async fn execute(cli: Cli) -> Result<()> {
    let app = App::open(&cli)?;

    match cli.command {
        Commands::Sessions { archived } => list_sessions(&app, archived),
        Commands::New => {
            let session = app.store.create_session();
            println!("Created session {}", session.id);
            Ok(())
        }
        Commands::Switch { id } => {
            let id = resolve_session(&app, &id)?;
            if !app.store.switch_session(&id) {
                bail!("Session {id} is archived and cannot be focused");
            }
            println!("Switched to {id}");
            Ok(())
        }
        Commands::Archive { id } => {
            let id = resolve_session(&app, &id)?;
            app.store.archive_session(&id);
            println!("Archived {id}");
            Ok(())
        }
        Commands::Delete { id } => {
            let id = resolve_session(&app, &id)?;
            app.store.delete_session(&id);
            println!("Deleted {id}");
            Ok(())
        }
        Commands::Send {
            reply_to,
            wait,
            text,
        } => send(&app, &text.join(" "), reply_to, wait).await,
        Commands::Retry { message_id } => {
            app.refresh_health().await;
            let message = app.store.retry_message(&message_id).await?;
            println!("Resent {} ({})", message.id, message.status);
            Ok(())
        }
        Commands::Edit { message_id, text } => {
            app.current()?;
            if !app.store.edit_message(&message_id, &text.join(" ")) {
                bail!("Message {message_id} not found in the current session");
            }
            println!("Edited {message_id}");
            Ok(())
        }
        Commands::Rm { message_id } => {
            app.current()?;
            if !app.store.delete_message(&message_id) {
                bail!("Message {message_id} not found in the current session");
            }
            println!("Deleted message {message_id}");
            Ok(())
        }
        Commands::History { all } => {
            let session = app.current()?;
            let messages = if all {
                session.messages.clone()
            } else {
                app.store.visible_messages(&session.id).unwrap_or_default()
            };
            print_history(&session, &messages);
            Ok(())
        }
        Commands::More { pages } => {
            let session = app.current()?;
            let mut loaded = false;
            for _ in 0..pages {
                if !app.store.load_more_messages(&session.id).await {
                    break;
                }
                loaded = true;
            }
            if !loaded {
                println!("No older messages.");
            }
            let messages = app.store.visible_messages(&session.id).unwrap_or_default();
            print_history(&session, &messages);
            Ok(())
        }
        Commands::Listen => listen(&app).await,
        Commands::Health => {
            if app.refresh_health().await {
                println!("Backend {} is healthy", app.config.backend_url);
            } else {
                println!("Backend {} is unreachable", app.config.backend_url);
            }
            Ok(())
        }
        Commands::Agents => {
            println!("{:<10} {:<20}", "NAME", "ROLE");
            println!("{}", "-".repeat(30));
            for agent in DEFAULT_AGENTS {
                println!("{:<10} {:<20}", agent.name, agent.role);
            }
            Ok(())
        }
        Commands::Restore { message_id } => {
            let message = app
                .store
                .restore_backup(&message_id)
                .with_context(|| format!("No backup found for message {message_id}"))?;
            print_message(&message);
            Ok(())
        }
        Commands::Backlog => {
            let log: BackupLog<InboundMessage> = BackupLog::new(
                app.durable.clone(),
                SOCKET_BACKUP_KEY,
                app.config.socket_backup_limit,
            );
            let entries = log.entries();
            if entries.is_empty() {
                println!("No realtime messages received yet.");
            }
            for entry in entries {
                println!(
                    "[{}] {}: {}",
                    entry.backup_timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    entry.item.agent_name,
                    entry.item.message
                );
            }
            Ok(())
        }
    }
}

/// Match a full session id or a unique prefix of one.
fn resolve_session(app: &App, query: &str) -> Result<String> {
    let sessions = app.store.sessions();
    if sessions.iter().any(|s| s.id == query) {
        return Ok(query.to_string());
    }

    let matches: Vec<_> = sessions.iter().filter(|s| s.id.starts_with(query)).collect();
    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => bail!("No session matches '{query}'"),
        _ => bail!("'{query}' matches {} sessions, use a longer prefix", matches.len()),
    }
}

fn list_sessions(app: &App, archived: bool) -> Result<()> {
    let sessions = if archived {
        app.store.archived_sessions()
    } else {
        app.store.active_sessions()
    };
    if sessions.is_empty() {
        println!("No sessions found.");
        return Ok(());
    }

    let current = app.store.current_session_id();
    println!(
        "  {:<38} {:<24} {:<6} {:<7} {:<16}",
        "ID", "TITLE", "MSGS", "UNREAD", "UPDATED"
    );
    println!("{}", "-".repeat(95));
    for session in sessions {
        let marker = if current.as_deref() == Some(session.id.as_str()) {
            '*'
        } else {
            ' '
        };
        let title: String = session.title.chars().take(24).collect();
        println!(
            "{marker} {:<38} {:<24} {:<6} {:<7} {:<16}",
            session.id,
            title,
            session.messages.len(),
            session.unread_count,
            session.updated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        );
    }
    Ok(())
}

fn print_history(session: &ChatSession, messages: &[Message]) {
    println!(
        "{} ({} of {} messages)",
        session.title,
        messages.len(),
        session.messages.len()
    );
    println!();
    for message in messages {
        print_message(message);
    }
}

fn print_message(message: &Message) {
    let who = match message.agent_name.as_deref() {
        Some(name) => find_agent(name).map_or_else(
            || name.to_string(),
            |agent| format!("{name} ({})", agent.role),
        ),
        None => message.role.as_str().to_string(),
    };
    let mut flags = Vec::new();
    if message.status != MessageStatus::Sent {
        flags.push(message.status.as_str());
    }
    if message.edited {
        flags.push("edited");
    }
    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" ({})", flags.join(", "))
    };

    println!(
        "[{}] {who}{flags} {}",
        message.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        message.id
    );
    if let Some(reply_to) = &message.reply_to {
        println!("  in reply to {reply_to}");
    }
    println!("{}", message.display_content());
    if let Some(blocks) = &message.code_blocks {
        if !message.deleted {
            let languages: Vec<_> = blocks.iter().map(|b| b.language.as_str()).collect();
            println!("  code: {}", languages.join(", "));
        }
    }
    println!();
}

async fn send(app: &App, text: &str, reply_to: Option<String>, wait: Option<u64>) -> Result<()> {
    app.refresh_health().await;
    if let Some(banner) = app.store.connection_banner() {
        eprintln!("{banner}");
    }

    // Connect first so replies to this message are not missed.
    let channel = wait.map(|_| {
        let channel = app.channel();
        let _ingest = app.store.attach(&channel);
        let _print = channel.on_message(|m| println!("{}: {}", m.agent_name, m.message));
        channel.connect();
        channel
    });

    let result = app.store.send_message(text, reply_to).await;
    if let Ok(message) = &result {
        println!("Sent {}", message.id);
    }

    if let (Some(channel), Some(secs)) = (&channel, wait) {
        if result.is_ok() {
            tokio::time::sleep(Duration::from_secs(secs)).await;
        }
        channel.disconnect().await;
    }

    result?;
    Ok(())
}

async fn listen(app: &App) -> Result<()> {
    let channel = app.channel();
    let _ingest = app.store.attach(&channel);
    let _print = channel.on_message(|m| {
        println!(
            "[{}] {}: {}",
            m.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            m.agent_name,
            m.message
        );
    });
    let _errors = channel.on_error(|e| eprintln!("{e}"));
    let _up = channel.on_connected(|| eprintln!("Connected."));
    let _down = channel.on_disconnected(|| eprintln!("Disconnected, reconnecting..."));

    let _monitor = HealthMonitor::spawn(
        app.client.clone(),
        app.store.clone(),
        app.config.health_interval,
    );

    eprintln!("Listening on {} (Ctrl-C to stop)", app.config.socket_url());
    channel.connect();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    channel.disconnect().await;
    Ok(())
}
