use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use worldsync::config::days_window;
use worldsync::storage::{
    ActivityLog, ArchiveStore, ClassificationStore, PresenceStore, SessionStore,
};
use worldsync::worker::{BatchJob, RunSummary};
use worldsync::{
    ActivityClassifier, BatchRunner, BatchWorker, Character, DiffEngine, DurabilityMode,
    DurableStore, EntityKind, IngestPush, InMemoryPresenceStore, Lfm, PartitionRegistry,
    QuestAreaMap, SessionDeriver, SyncConfig, SystemClock, TrackedEntity, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "worldsync")]
#[command(about = "Snapshot diffing and quest-session derivation for game-world feeds")]
struct Cli {
    /// Directory holding the durable store and presence snapshots
    #[arg(long, env = "WORLDSYNC_DATA_DIR", default_value = "./worldsync-data")]
    data_dir: PathBuf,

    /// Comma-separated world names; defaults to the built-in list
    #[arg(long, value_delimiter = ',')]
    worlds: Vec<String>,

    /// fsync the write-ahead log after every record
    #[arg(long)]
    sync_writes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply collector pushes (JSON files) to the presence cache
    Ingest {
        #[arg(long, value_enum, default_value_t = KindArg::Characters)]
        kind: KindArg,
        #[arg(long, default_value_t = worldsync::config::DEFAULT_HISTORY_CAP)]
        history_cap: usize,
        #[arg(required = true)]
        pushes: Vec<PathBuf>,
    },
    /// Replay location events into quest sessions
    DeriveSessions {
        /// JSON array of {id, area_id, name}
        #[arg(long)]
        quests: PathBuf,
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Classify archived characters as actively played or not
    Classify {
        #[command(flatten)]
        worker: WorkerArgs,
    },
    /// Print what the store holds
    Inspect {
        /// Show timeline, sessions and classification for one entity
        #[arg(long)]
        entity: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Characters,
    Lfms,
}

/// Overrides for the `WORKER_*` environment.
#[derive(Args)]
struct WorkerArgs {
    #[arg(long)]
    shard_count: Option<u32>,
    #[arg(long)]
    shard_index: Option<u32>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    lookback_days: Option<u64>,
    #[arg(long)]
    max_batches: Option<u64>,
    /// Keep running and poll for new work until interrupted
    #[arg(long)]
    follow: bool,
}

impl WorkerArgs {
    fn config(&self) -> Result<WorkerConfig> {
        let mut config = WorkerConfig::from_env().context("invalid WORKER_* environment")?;
        let index = self.shard_index.unwrap_or(config.shard_index);
        let count = self.shard_count.unwrap_or(config.shard_count);
        config = config.shard(index, count);
        if let Some(size) = self.batch_size {
            config = config.batch_size(size);
        }
        if let Some(days) = self.lookback_days {
            config = config.lookback_window(days_window(days, "--lookback-days")?);
        }
        if let Some(max) = self.max_batches {
            config = config.max_batches(max);
        }
        config.validate().context("invalid worker configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let registry = Arc::new(if cli.worlds.is_empty() {
        PartitionRegistry::default_worlds()
    } else {
        PartitionRegistry::new(cli.worlds.iter().map(String::as_str))
            .context("invalid --worlds")?
    });
    let mode = if cli.sync_writes {
        DurabilityMode::Sync
    } else {
        DurabilityMode::Async
    };
    let store = Arc::new(
        DurableStore::open(&cli.data_dir, mode)
            .with_context(|| format!("failed to open {}", cli.data_dir.display()))?,
    );

    match cli.command {
        Command::Ingest {
            kind,
            history_cap,
            pushes,
        } => {
            let config = SyncConfig::new().history_cap(history_cap);
            match kind {
                KindArg::Characters => {
                    ingest::<Character>(&cli.data_dir, registry, store, config, &pushes).await
                }
                KindArg::Lfms => {
                    ingest::<Lfm>(&cli.data_dir, registry, store, config, &pushes).await
                }
            }
        }
        Command::DeriveSessions { quests, worker } => {
            let config = worker.config()?;
            let lookup = QuestAreaMap::load(&quests)
                .with_context(|| format!("failed to load quests from {}", quests.display()))?;
            if lookup.is_empty() {
                bail!("{} maps no areas to quests", quests.display());
            }
            let job = SessionDeriver::new(
                store.clone() as Arc<dyn ActivityLog>,
                store.clone() as Arc<dyn SessionStore>,
                Arc::new(lookup),
                Arc::new(SystemClock),
                &config,
            )?;
            let summary = drive(job, store, config, worker.follow).await?;
            println!(
                "sessions: {} batches, {} events, {} sessions written",
                summary.batches, summary.rows, summary.written
            );
            Ok(())
        }
        Command::Classify { worker } => {
            let config = worker.config()?;
            let job = ActivityClassifier::new(
                store.clone() as Arc<dyn ClassificationStore>,
                store.clone() as Arc<dyn ActivityLog>,
                Arc::new(SystemClock),
                &config,
            )?;
            let summary = drive(job, store, config, worker.follow).await?;
            println!(
                "classify: {} batches, {} characters classified",
                summary.batches, summary.written
            );
            Ok(())
        }
        Command::Inspect { entity } => inspect(&store, entity).await,
    }
}

fn presence_path(data_dir: &Path, kind: EntityKind) -> PathBuf {
    data_dir.join(format!("presence-{}.snapshot", kind.store_suffix()))
}

async fn ingest<T: TrackedEntity>(
    data_dir: &Path,
    registry: Arc<PartitionRegistry>,
    store: Arc<DurableStore>,
    config: SyncConfig,
    pushes: &[PathBuf],
) -> Result<()> {
    let presence = Arc::new(InMemoryPresenceStore::<T>::new(&registry));
    let snapshot = presence_path(data_dir, T::KIND);
    let restored = presence.load(&snapshot).await?;
    tracing::info!(restored, kind = %T::KIND, "presence cache loaded");

    let engine = DiffEngine::new(
        registry,
        presence.clone() as Arc<dyn PresenceStore<T>>,
        store.clone(),
        store.clone() as Arc<dyn ArchiveStore>,
        Arc::new(SystemClock),
        config,
    )?;

    for path in pushes {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let push = IngestPush::from_json(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        let outcome = engine
            .apply_push(push)
            .await
            .with_context(|| format!("failed to apply {}", path.display()))?;
        println!(
            "{}: {} events, {} online, {} offline",
            path.display(),
            outcome.event_count(),
            outcome.logged_on().count(),
            outcome.logged_off().count()
        );
        for name in &outcome.unknown_partitions {
            println!("  skipped unknown world '{}'", name);
        }
    }

    for key in presence.partition_keys() {
        let online = presence.len(&key).await?;
        if online > 0 {
            println!("{}: {} online", key, online);
        }
    }
    presence
        .save(&snapshot)
        .await
        .context("failed to save presence cache")?;
    Ok(())
}

async fn drive<J: BatchJob + 'static>(
    job: J,
    store: Arc<DurableStore>,
    config: WorkerConfig,
    follow: bool,
) -> Result<RunSummary> {
    let runner = BatchRunner::start(job, store, config).await?;
    if !follow {
        return Ok(runner.run_once().await?);
    }

    let worker = BatchWorker::spawn(Arc::new(runner));
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("interrupt received, stopping after the current batch");
    Ok(worker.stop().await?)
}

async fn inspect(store: &DurableStore, entity: Option<u64>) -> Result<()> {
    let Some(entity_id) = entity else {
        let tables = store.tables().await;
        println!("events:          {}", tables.event_count());
        println!("  unprocessed:   {}", tables.pending_count());
        println!("archived:        {}", tables.archive_count());
        println!("quest sessions:  {}", tables.session_count());
        println!("open sessions:   {}", tables.open_session_count());
        println!("classifications: {}", tables.classification_count());
        return Ok(());
    };

    for event in store.timeline(entity_id).await? {
        println!(
            "#{:<8} {} {:<13} {}",
            event.event_id,
            event.timestamp().to_rfc3339(),
            event.payload().tag(),
            serde_json::to_string(event.payload())?
        );
    }
    if let Some(record) = store.archived(entity_id).await? {
        println!(
            "archived {} from {} (level {:?})",
            record.archived_at.to_rfc3339(),
            record.partition,
            record.total_level
        );
    }
    for session in store.sessions_for(entity_id).await? {
        println!(
            "quest {} {} -> {} ({:.0}s)",
            session.quest_id,
            session.entry_timestamp.to_rfc3339(),
            session
                .exit_timestamp
                .map(|exit| exit.to_rfc3339())
                .unwrap_or_else(|| "open".to_string()),
            session.duration_seconds().unwrap_or_default()
        );
    }
    if let Some(open) = store.get_open_session(entity_id).await? {
        println!(
            "open quest {} since {}",
            open.quest_id,
            open.entry_timestamp.to_rfc3339()
        );
    }
    if let Some(row) = store.classification(entity_id).await? {
        println!(
            "active={} score={:.3} checked {}",
            row.is_active,
            row.score,
            row.checked_at.to_rfc3339()
        );
    }
    Ok(())
}
