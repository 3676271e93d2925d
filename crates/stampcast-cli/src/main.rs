//! Stampcast CLI: watermark media, manage channels and scheduled posts, and
//! run the bot.
//!
//! Configuration comes from the environment (or `.env`). Every command except
//! `annotate` needs `BOT_TOKEN`.

use anyhow::Context;
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use stampcast_cli::{
    init_tracing, process_file, release_staged, resolve_media_kind, schedule_media_post, MediaDraft,
};
use stampcast_core::models::{MediaKind, PostContent, PostListQuery, PostStatus};
use stampcast_core::{parse_schedule_time, Config, OverlayConfig, WorkerConfig};
use stampcast_db::{ChannelRepository, PostRepository};
use stampcast_processing::{MediaPipeline, OverlayRenderer};
use stampcast_transport::LocalTransport;
use stampcast_worker::{Dispatcher, MediaWorker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

const INBOX_QUEUE_CAPACITY: usize = 64;

#[derive(Parser)]
#[command(name = "stampcast", about = "Watermark media and broadcast scheduled posts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watermark a single photo or video file
    Annotate {
        input: PathBuf,
        output: PathBuf,
        /// photo or video; guessed from the input extension when omitted
        #[arg(long)]
        kind: Option<MediaKind>,
    },
    /// Manage destination channels
    Channel {
        #[command(subcommand)]
        sub: ChannelCommands,
    },
    /// Manage scheduled posts
    Post {
        #[command(subcommand)]
        sub: PostCommands,
    },
    /// Deliver everything due right now, once
    Dispatch,
    /// Run the dispatcher, media worker and inbox polling until Ctrl-C
    Serve,
    /// Delete finished posts older than the given number of days
    Purge {
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[derive(Subcommand)]
enum ChannelCommands {
    /// Register a channel or update an existing one
    Add {
        #[arg(allow_negative_numbers = true)]
        channel_id: i64,
        #[arg(long)]
        title: String,
        /// The bot holds admin rights in the channel
        #[arg(long)]
        admin: bool,
    },
    List,
    Remove {
        #[arg(allow_negative_numbers = true)]
        channel_id: i64,
    },
    /// Record whether the bot is an admin of the channel
    SetAdmin {
        #[arg(allow_negative_numbers = true)]
        channel_id: i64,
        #[arg(action = ArgAction::Set)]
        admin: bool,
    },
    /// Update the stored title
    Rename {
        #[arg(allow_negative_numbers = true)]
        channel_id: i64,
        title: String,
    },
}

#[derive(Subcommand)]
enum PostCommands {
    /// Schedule a text or media post
    Schedule {
        #[arg(long, conflicts_with = "media", required_unless_present = "media")]
        text: Option<String>,
        /// Photo or video file; watermarked before it is staged
        #[arg(long)]
        media: Option<PathBuf>,
        #[arg(long, requires = "media")]
        caption: Option<String>,
        #[arg(long, requires = "media")]
        kind: Option<MediaKind>,
        /// RFC 3339, or "YYYY-MM-DD HH:MM" in the configured time zone
        #[arg(long)]
        at: String,
        /// Target channel id; repeat for several channels
        #[arg(long = "channel", required = true, allow_negative_numbers = true)]
        channels: Vec<i64>,
        #[arg(long, allow_negative_numbers = true)]
        owner: i64,
    },
    List {
        #[arg(long)]
        status: Option<PostStatus>,
        #[arg(long, allow_negative_numbers = true)]
        owner: Option<i64>,
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// Show a post with its per-channel delivery markers
    Show { id: Uuid },
    Cancel { id: Uuid },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

async fn open_transport(config: &Config) -> anyhow::Result<LocalTransport> {
    LocalTransport::new(&config.transport_dir)
        .await
        .context("Failed to open transport directory")
}

fn build_pipeline(overlay: &OverlayConfig, worker: &WorkerConfig) -> anyhow::Result<MediaPipeline> {
    let renderer = OverlayRenderer::load(overlay.spec.clone())
        .context("Failed to load watermark assets")?;
    Ok(MediaPipeline::new(Arc::new(renderer), worker))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Commands::Annotate {
        input,
        output,
        kind,
    } = &cli.command
    {
        let overlay = OverlayConfig::from_env().context("Invalid watermark configuration")?;
        let worker = WorkerConfig::from_env().context("Invalid worker configuration")?;
        let pipeline = build_pipeline(&overlay, &worker)?;

        let kind = resolve_media_kind(input, *kind)?;
        let processed = process_file(&pipeline, input, kind).await?;
        tokio::fs::write(output, &processed.data)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;

        return print_json(&serde_json::json!({
            "output": output.display().to_string(),
            "kind": processed.kind,
            "width": processed.width,
            "height": processed.height,
            "sticker_applied": processed.sticker_applied,
            "spec_version": processed.spec_version,
        }));
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let pool = stampcast_db::connect(&config.database_url)
        .await
        .context("Failed to open database")?;
    let posts = PostRepository::new(pool.clone());
    let channels = ChannelRepository::new(pool);

    match cli.command {
        Commands::Annotate { .. } => {}
        Commands::Channel { sub } => match sub {
            ChannelCommands::Add {
                channel_id,
                title,
                admin,
            } => {
                let channel = channels.upsert(channel_id, &title, admin).await?;
                print_json(&channel)?;
            }
            ChannelCommands::List => {
                print_json(&channels.list().await?)?;
            }
            ChannelCommands::Remove { channel_id } => {
                let removed = channels.remove(channel_id).await?;
                print_json(&serde_json::json!({ "channel_id": channel_id, "removed": removed }))?;
            }
            ChannelCommands::SetAdmin { channel_id, admin } => {
                if !channels.set_admin(channel_id, admin).await? {
                    anyhow::bail!("Unknown channel {}", channel_id);
                }
                print_json(&channels.get(channel_id).await?)?;
            }
            ChannelCommands::Rename { channel_id, title } => {
                if !channels.refresh_title(channel_id, &title).await? {
                    anyhow::bail!("Unknown channel {}", channel_id);
                }
                print_json(&channels.get(channel_id).await?)?;
            }
        },
        Commands::Post { sub } => match sub {
            PostCommands::Schedule {
                text,
                media,
                caption,
                kind,
                at,
                channels: targets,
                owner,
            } => {
                let scheduled_at = parse_schedule_time(&at, config.timezone, Utc::now())
                    .with_context(|| format!("Invalid schedule time '{}'", at))?;

                // Check everything create will check before any media is staged.
                posts.check_targets(&targets).await?;

                let id = match (text, media) {
                    (Some(text), _) => {
                        posts
                            .create(PostContent::Text { text }, &targets, scheduled_at, owner)
                            .await?
                    }
                    (None, Some(path)) => {
                        let kind = resolve_media_kind(&path, kind)?;
                        let pipeline = build_pipeline(&config.overlay, &config.worker)?;
                        let processed = process_file(&pipeline, &path, kind).await?;

                        let transport = open_transport(&config).await?;
                        let draft = MediaDraft {
                            processed,
                            caption,
                            targets: &targets,
                            scheduled_at,
                            owner,
                        };
                        schedule_media_post(&posts, &transport, draft).await?
                    }
                    (None, None) => anyhow::bail!("Either --text or --media is required"),
                };
                let post = posts
                    .get(id)
                    .await?
                    .with_context(|| format!("Post {} vanished after creation", id))?;
                print_json(&post)?;
            }
            PostCommands::List {
                status,
                owner,
                limit,
            } => {
                let query = PostListQuery {
                    status,
                    owner,
                    limit: Some(limit),
                };
                print_json(&posts.list(query).await?)?;
            }
            PostCommands::Show { id } => {
                let post = posts
                    .get(id)
                    .await?
                    .with_context(|| format!("Post {} not found", id))?;
                let deliveries = posts.deliveries(id).await?;
                print_json(&serde_json::json!({ "post": post, "deliveries": deliveries }))?;
            }
            PostCommands::Cancel { id } => {
                let transport = open_transport(&config).await?;
                let dispatcher = Dispatcher::new(posts, Arc::new(transport), config.dispatcher.clone());
                let cancelled = dispatcher.cancel_post(id).await?;
                print_json(&serde_json::json!({ "id": id, "cancelled": cancelled }))?;
            }
        },
        Commands::Dispatch => {
            let transport = open_transport(&config).await?;
            let dispatcher = Dispatcher::new(posts, Arc::new(transport), config.dispatcher.clone());
            let report = dispatcher.tick(Utc::now()).await?;
            print_json(&report)?;
        }
        Commands::Serve => serve(config, posts, channels).await?,
        Commands::Purge { days } => {
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            let purged = posts.purge_finished(cutoff).await?;
            if !purged.media_refs.is_empty() {
                let transport = open_transport(&config).await?;
                for media_ref in &purged.media_refs {
                    release_staged(&transport, media_ref).await;
                }
            }
            print_json(&serde_json::json!({
                "purged": purged.count,
                "media_released": purged.media_refs.len(),
                "older_than": cutoff,
            }))?;
        }
    }

    Ok(())
}

async fn serve(
    config: Config,
    posts: PostRepository,
    channels: ChannelRepository,
) -> anyhow::Result<()> {
    let transport = Arc::new(open_transport(&config).await?);
    let pipeline = Arc::new(build_pipeline(&config.overlay, &config.worker)?);

    let dispatcher = Dispatcher::new(posts, transport.clone(), config.dispatcher.clone());
    let dispatcher_handle = dispatcher.start();

    let (events_tx, events_rx) = mpsc::channel(INBOX_QUEUE_CAPACITY);
    let poller = transport.clone().spawn_inbox_poller(
        Duration::from_millis(config.inbox_poll_interval_ms),
        events_tx,
    );
    let worker = MediaWorker::new(transport.clone(), pipeline, channels, &config.worker);
    let worker_handle = tokio::spawn(worker.run(events_rx));

    tracing::info!(
        transport_dir = %transport.root().display(),
        timezone = %config.timezone,
        "Stampcast running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    // Stopping the poller closes the event channel; the worker then finishes
    // in-flight requests and returns.
    poller.shutdown().await;
    dispatcher_handle.shutdown().await;
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Media worker task failed");
    }

    tracing::info!("Stampcast stopped");
    Ok(())
}
