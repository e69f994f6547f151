//! `inboxsync` - command-line front end for the inbox engine
//!
//! Syncs a mailbox into the local snapshot, then lists, searches and
//! mutates it through the same engine a UI would drive.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inboxsync_core::{
    Config, Draft, EmailId, EnhanceMode, HttpEnhancer, HttpMailProvider, Inbox, MailboxId,
    OpenAiEmbeddings, PageRequest, SearchOutcome, SnapshotRepository, SyncOutcome,
    UpstashVectorIndex,
};

type CliInbox = Inbox<HttpMailProvider, OpenAiEmbeddings, UpstashVectorIndex, HttpEnhancer>;

#[derive(Parser, Debug)]
#[command(name = "inboxsync", version, about = "Sync, browse and search a remote inbox")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pull changes for a mailbox into the local snapshot
    Sync {
        #[arg(long, default_value = "inbox")]
        mailbox: String,
    },
    /// Print one page of the inbox
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 25)]
        size: usize,
        /// One row per email instead of per thread
        #[arg(long)]
        flat: bool,
        /// Case-insensitive substring over subject, sender and snippet
        #[arg(long)]
        filter: Option<String>,
    },
    /// Print every email of a thread, oldest first
    Thread { thread_id: String },
    /// Semantic search over indexed emails
    Search { query: String },
    /// Mark an email read (or unread with --unread)
    Read {
        id: String,
        #[arg(long)]
        unread: bool,
    },
    /// Star an email (or clear the star with --off)
    Star {
        id: String,
        #[arg(long)]
        off: bool,
    },
    /// Send a new email
    Send {
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "")]
        cc: String,
        #[arg(long, default_value = "")]
        bcc: String,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
    },
    /// Rewrite a piece of text with the AI service
    Enhance {
        /// improve, shorten, formal or friendly
        #[arg(long, default_value = "improve")]
        mode: String,
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inboxsync=info,inboxsync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("loading {}", config_path.display()))?;

    let inbox = build_inbox(&config).await?;
    let restored = inbox.restore().await?;
    info!(restored, "Snapshot loaded");

    run(&inbox, cli.command).await
}

async fn build_inbox(config: &Config) -> anyhow::Result<Arc<CliInbox>> {
    let provider = HttpMailProvider::new(&config.provider.base_url, config.provider.token.clone())?;
    let embedder = OpenAiEmbeddings::new(
        &config.embedding.url,
        &config.embedding.model,
        config.embedding.api_key.clone(),
    )?;
    let index = UpstashVectorIndex::new(
        &config.vector.url,
        config.vector.token.clone().unwrap_or_default(),
    )?;
    let enhancer = HttpEnhancer::new(config.enhancer_url())?;

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let snapshot = SnapshotRepository::new(&db_path.to_string_lossy()).await?;

    let inbox = Inbox::new(
        config,
        Arc::new(provider),
        Arc::new(embedder),
        Arc::new(index),
        Arc::new(enhancer),
    )
    .with_snapshot(snapshot);
    Ok(Arc::new(inbox))
}

async fn run(inbox: &Arc<CliInbox>, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Sync { mailbox } => match inbox.trigger_sync(&MailboxId::new(mailbox)).await {
            SyncOutcome::Completed(report) => {
                println!(
                    "synced {}: {} updated, {} removed (cursor {})",
                    report.mailbox,
                    report.upserted.len(),
                    report.deleted.len(),
                    report.cursor
                );
            }
            SyncOutcome::AlreadyInFlight => println!("a sync is already running"),
            SyncOutcome::Failed(e) => bail!("sync failed: {e}"),
        },
        Commands::List {
            page,
            size,
            flat,
            filter,
        } => {
            let request = if flat {
                PageRequest::flat(page, size)
            } else {
                PageRequest::threaded(page, size)
            };
            let request = request.filtered(filter.unwrap_or_default());
            let page = inbox.get_inbox_page(&request)?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
        Commands::Thread { thread_id } => {
            println!("{}", serde_json::to_string_pretty(&inbox.thread(&thread_id))?);
        }
        Commands::Search { query } => match inbox.search(&query).await? {
            Some(SearchOutcome::Semantic(hits)) if hits.is_empty() => println!("no matches"),
            Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
            None => warn!("search superseded"),
        },
        Commands::Read { id, unread } => {
            let id = EmailId::new(id);
            let confirmation = if unread {
                inbox.mark_unread(&id)?
            } else {
                inbox.mark_read(&id)?
            };
            let outcome = confirmation.await?;
            println!("{id}: {outcome:?}");
        }
        Commands::Star { id, off } => {
            let id = EmailId::new(id);
            let outcome = inbox.toggle_star(&id, !off)?.await?;
            println!("{id}: {outcome:?}");
        }
        Commands::Send {
            to,
            cc,
            bcc,
            subject,
            body,
        } => {
            let draft = Draft::new(&to, subject, body).cc(&cc).bcc(&bcc);
            let pending = inbox.send(draft)?;
            info!(provisional = %pending.provisional_id, "Sending");
            let server_id = pending.confirmation.await?;
            println!("sent as {server_id}");
        }
        Commands::Enhance { mode, text } => {
            let Some(mode) = EnhanceMode::parse(&mode) else {
                bail!("unknown mode {mode:?}; expected one of improve, shorten, formal, friendly");
            };
            println!("{}", inbox.enhance(&text, mode).await?);
        }
    }
    Ok(())
}
