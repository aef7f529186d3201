//! tidings: delayed task engine daemon
//!
//! Subcommands:
//! - `run`: start the engine against in-memory collaborators seeded with demo data
//! - `check-config`: load and validate a config file, print the effective values

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use miette::Result;
use tidings_core::app::{Engine, EngineConfig, EngineDeps, StatusReport};
use tidings_core::domain::{
    ChatMessage, Contact, MediaKind, Poll, PollId, PollStatus, Post, PostId, PostStatus, RoomId,
    Story, StoryId, StoryStatus, TaskKind, UserId,
};
use tidings_core::impls::{InMemoryCache, InMemoryMediaStore, InMemoryRecordStore, RecordingChannel};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Accepts "1", "true", "yes", "on" as true and "0", "false", "no", "off", "" as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "tidings")]
#[command(about = "Delayed task execution and fan-out notification engine", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply when omitted
    #[arg(long, global = true, env = "TIDINGS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine until ctrl-c
    Run {
        /// Journal file for the broker (durable across restarts)
        #[arg(long, env = "TIDINGS_JOURNAL")]
        journal: Option<PathBuf>,

        /// Run due tasks in the caller when the broker is unavailable
        #[arg(long, env = "TIDINGS_INLINE_FALLBACK", value_parser = parse_bool_env)]
        inline_fallback: Option<bool>,

        /// Number of notification workers
        #[arg(long, env = "TIDINGS_NOTIFY_WORKERS")]
        notify_workers: Option<usize>,

        /// Seconds until the demo post is published
        #[arg(long, default_value = "5")]
        publish_in: i64,

        /// Number of demo followers to notify
        #[arg(long, default_value = "3")]
        followers: usize,
    },

    /// Validate the config and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tidings_core=info,tidings=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Run {
            journal,
            inline_fallback,
            notify_workers,
            publish_in,
            followers,
        } => {
            if journal.is_some() {
                config.journal_path = journal;
            }
            if let Some(enabled) = inline_fallback {
                config.inline_fallback = enabled;
            }
            if let Some(n) = notify_workers {
                config.workers_per_kind.insert(TaskKind::NotifyFanout, n);
            }
            run(config, publish_in, followers).await
        }
        Commands::CheckConfig => {
            config.validate().map_err(|e| miette::miette!("{}", e))?;
            println!("{}", to_pretty(&config)?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path).map_err(|e| miette::miette!("{}", e)),
        None => Ok(EngineConfig::default()),
    }
}

fn to_pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| miette::miette!("{}", e))
}

async fn run(config: EngineConfig, publish_in: i64, followers: usize) -> Result<()> {
    let store = Arc::new(InMemoryRecordStore::new());
    let media = Arc::new(InMemoryMediaStore::new());
    let due = DemoSchedule::after(Utc::now(), publish_in)?;
    seed(&store, &media, &due, followers).await;

    let deps = EngineDeps::new(
        store.clone(),
        Arc::new(InMemoryCache::new()),
        media.clone(),
        Arc::new(RecordingChannel::new()),
    );
    let engine = Engine::start(config, deps)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    let recovery = engine.recovery_report();
    info!(
        submitted = recovery.submitted,
        overdue = recovery.overdue,
        "demo data scheduled; press ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal");

    let report: StatusReport = engine
        .status()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("{}", to_pretty(&report)?);

    engine
        .shutdown()
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    Ok(())
}

/// Due times of the demo records: post at +n, story at +2n, poll at +3n seconds.
#[derive(Debug, Clone, Copy)]
struct DemoSchedule {
    now: DateTime<Utc>,
    post: DateTime<Utc>,
    story: DateTime<Utc>,
    poll: DateTime<Utc>,
}

impl DemoSchedule {
    fn after(now: DateTime<Utc>, publish_in: i64) -> Result<Self> {
        let offset = |factor: i64| -> Result<DateTime<Utc>> {
            publish_in
                .checked_mul(factor)
                .and_then(Duration::try_seconds)
                .and_then(|delta| now.checked_add_signed(delta))
                .ok_or_else(|| {
                    miette::miette!(
                        "--publish-in {} is out of range for the demo schedule",
                        publish_in
                    )
                })
        };
        Ok(Self {
            now,
            post: offset(1)?,
            story: offset(2)?,
            poll: offset(3)?,
        })
    }
}

/// Demo records. The engine picks them up through its startup recovery scan.
async fn seed(
    store: &InMemoryRecordStore,
    media: &InMemoryMediaStore,
    due: &DemoSchedule,
    followers: usize,
) {
    let now = due.now;
    let author = UserId::new("author-1");

    store
        .insert_post(Post {
            id: PostId::new("post-1"),
            author_id: author.clone(),
            author_name: "Demo Author".to_string(),
            title: "Hello from tidings".to_string(),
            status: PostStatus::Scheduled,
            schedule_time: Some(due.post),
            created_at: now,
            fanout_completed: false,
        })
        .await;

    for i in 1..=followers {
        let follower = UserId::new(format!("follower-{i}"));
        store.follow(follower.clone(), author.clone(), now).await;
        store
            .insert_contact(Contact {
                follower_id: follower,
                email: format!("follower-{i}@example.com"),
            })
            .await;
    }

    let media_ref = "stories/story-1.jpg";
    media.put_object(media_ref, MediaKind::Image).await;
    store
        .insert_story(Story {
            id: StoryId::new("story-1"),
            author_id: author.clone(),
            media_ref: media_ref.to_string(),
            media_kind: MediaKind::Image,
            status: StoryStatus::Active,
            expires_at: due.story,
        })
        .await;

    store
        .insert_poll(Poll {
            id: PollId::new("poll-1"),
            status: PollStatus::Open,
            expires_at: due.poll,
        })
        .await;

    let room = RoomId::new("lobby");
    for i in 0..60 {
        store
            .push_message(ChatMessage {
                room: room.clone(),
                sender: author.clone(),
                content: format!("message {i}"),
                created_at: now - Duration::seconds(60 - i),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_schedule_spaces_records_by_publish_in() {
        let now = Utc::now();
        let due = DemoSchedule::after(now, 5).unwrap();
        assert_eq!(due.post, now + Duration::seconds(5));
        assert_eq!(due.story, now + Duration::seconds(10));
        assert_eq!(due.poll, now + Duration::seconds(15));
    }

    #[test]
    fn out_of_range_publish_in_is_an_error() {
        let now = Utc::now();
        assert!(DemoSchedule::after(now, i64::MAX).is_err());
        assert!(DemoSchedule::after(now, i64::MAX / 2).is_err());
        // Duration の範囲内でも日時が溢れる値
        assert!(DemoSchedule::after(now, 9_000_000_000_000).is_err());
    }

    #[test]
    fn parse_bool_env_accepts_common_spellings() {
        assert_eq!(parse_bool_env("Yes"), Ok(true));
        assert_eq!(parse_bool_env(""), Ok(false));
        assert!(parse_bool_env("maybe").is_err());
    }
}
