use std::{
    env,
    fs::{self, create_dir_all},
    io,
    path::PathBuf,
    process,
    sync::Arc,
};

use anyhow::{Context as _, Result, bail};
use dirs::{config_dir, data_local_dir};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use shelf_core::{
    Config, Context, FsCoverCache, FsDownloadManager, MigrationConfig, MigrationError,
    MigrationOptions, MigrationOrchestrator, SearchResult,
};
use shelf_db::Library as _;
use tokio::{select, signal};
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, fmt::time::LocalTime, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

const USAGE: &str = "usage:
  shelf migrate <entry id>... [--replace|--copy]
  shelf migrate-one <from id> [<to id>] [--replace|--copy]
  shelf sources

Without --replace or --copy matches are only searched and listed.";

#[derive(Debug)]
enum Command {
    Migrate {
        config: MigrationConfig,
        /// `Some(true)` replaces the old entries, `Some(false)` keeps them.
        finalize: Option<bool>,
    },
    Sources,
}

fn parse_args(args: Vec<String>) -> Result<Command> {
    let finalize = match (
        args.iter().any(|arg| arg == "--replace"),
        args.iter().any(|arg| arg == "--copy"),
    ) {
        (true, true) => bail!("--replace and --copy are mutually exclusive"),
        (true, false) => Some(true),
        (false, true) => Some(false),
        (false, false) => None,
    };
    let mut positional = args.iter().filter(|arg| !arg.starts_with("--"));
    let command = positional.next().map(String::as_str);
    let ids = positional
        .map(|id| {
            id.parse::<u64>()
                .with_context(|| format!("invalid entry id {id}"))
        })
        .collect::<Result<Vec<_>>>()?;

    match (command, ids.as_slice()) {
        (Some("sources"), []) => Ok(Command::Sources),
        (Some("migrate"), [_, ..]) => Ok(Command::Migrate {
            config: MigrationConfig::List {
                entry_ids: ids.to_vec(),
            },
            finalize,
        }),
        (Some("migrate-one"), [from]) => Ok(Command::Migrate {
            config: MigrationConfig::Single {
                from: *from,
                to: None,
            },
            finalize,
        }),
        (Some("migrate-one"), [from, to]) => Ok(Command::Migrate {
            config: MigrationConfig::Single {
                from: *from,
                to: Some(*to),
            },
            finalize,
        }),
        _ => bail!("{USAGE}"),
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = app_main().await {
        error!("AppError: {err:?}");
        eprintln!("{:?}", err);
        process::exit(1);
    }
}

async fn app_main() -> Result<()> {
    let command = parse_args(env::args().skip(1).collect())?;

    let log_dir = env::var("SHELF_LOG_DIR")
        .map(|path| {
            if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            }
        })
        .unwrap_or_else(|_| {
            #[cfg(debug_assertions)]
            return None;
            #[allow(unused)]
            Some(
                data_local_dir()
                    .map(|d| d.join("Shelf").join("logs"))
                    .unwrap_or_else(|| "logs".into()),
            )
        });

    let stderr_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(io::stderr);

    let file_layer = log_dir
        .as_ref()
        .map(|log_dir| {
            Result::<_, anyhow::Error>::Ok(
                tracing_subscriber::fmt::layer().pretty().with_writer(
                    RollingFileAppender::builder()
                        .rotation(Rotation::DAILY)
                        .filename_prefix("shelf")
                        .filename_suffix("log")
                        .build(log_dir)?,
                ),
            )
        })
        .transpose()?;

    tracing_subscriber::registry()
        .with(
            stderr_layer.with_timer(LocalTime::rfc_3339()).with_filter(
                EnvFilter::builder()
                    .with_default_directive("shelf=debug".parse()?)
                    .with_env_var("SHELF_LOG")
                    .from_env_lossy(),
            ),
        )
        .with(
            file_layer
                .map(|file_layer| -> Result<_> {
                    Ok(file_layer
                        .with_timer(LocalTime::rfc_3339())
                        .with_ansi(false)
                        .with_filter(
                            EnvFilter::builder()
                                .with_default_directive("shelf=debug".parse()?)
                                .with_env_var("SHELF_LOG")
                                .from_env_lossy(),
                        ))
                })
                .transpose()?,
        )
        .try_init()?;

    let config_file = env::var("SHELF_CONFIG_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(debug_assertions)]
            return "config.toml".into();
            #[allow(unused)]
            config_dir()
                .map(|d| d.join("Shelf").join("config.toml"))
                .unwrap_or_else(|| "config.toml".into())
        });
    let database_file = env::var("SHELF_DB_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(debug_assertions)]
            return "data.db".into();
            #[allow(unused)]
            data_local_dir()
                .map(|d| d.join("Shelf").join("data.db"))
                .unwrap_or_else(|| "data.db".into())
        });
    if !config_file.exists() {
        if let Some(dir) = config_file.parent() {
            create_dir_all(dir)?;
        }
        let default_config = "migration_sources = []\n";
        fs::write(&config_file, default_config)?;
    }
    if !database_file.exists()
        && let Some(dir) = database_file.parent()
    {
        create_dir_all(dir)?;
    }
    let config: Config = Figment::new()
        .merge(Toml::file_exact(&config_file))
        .merge(Env::prefixed("SHELF_CONF_"))
        .extract()?;

    let sources = Arc::new(config.build_sources()?);
    if let Command::Sources = command {
        for source in sources.all() {
            println!("{:>6}  {}", source.id(), source.label());
        }
        return Ok(());
    }

    let db = native_db::Builder::new().create(&shelf_db::MODELS, database_file)?;
    shelf_db::migrate(&db)?;
    let db = Arc::new(db);

    let context = Context {
        library: db.clone(),
        sources,
        covers: Arc::new(FsCoverCache::new(&config.cover_cache_dir)),
        downloads: Arc::new(FsDownloadManager::new(&config.downloads_dir)),
    };

    let Command::Migrate {
        config: migration,
        finalize,
    } = command
    else {
        return Ok(());
    };
    run_migration(context, MigrationOptions::from(&config), migration, finalize).await
}

async fn run_migration(
    context: Context,
    options: MigrationOptions,
    migration: MigrationConfig,
    finalize: Option<bool>,
) -> Result<()> {
    let library = context.library.clone();
    let orchestrator = MigrationOrchestrator::start(context, options, migration);

    {
        let mut unfinished = orchestrator.subscribe_unfinished();
        let mut notices = orchestrator.subscribe_notices();
        tokio::spawn(async move {
            loop {
                select! {
                    changed = unfinished.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let left = *unfinished.borrow_and_update();
                        info!("{left} entries left to search");
                    }
                    notice = notices.recv() => {
                        match notice {
                            Ok(notice) => warn!("{notice}"),
                            Err(_) => break,
                        }
                    }
                }
            }
        });
    }

    select! {
        _ = orchestrator.wait_for_search() => {}
        _ = signal::ctrl_c() => {
            warn!("Interrupted, cancelling search");
            orchestrator.dispose();
            return Ok(());
        }
    }

    for item in orchestrator.items() {
        let target = match item.search_result() {
            SearchResult::Result(id) => library
                .entry(id)
                .await?
                .map(|e| format!("{} ({})", e.title, e.url))
                .unwrap_or_else(|| id.to_string()),
            SearchResult::NotFound => "no match".to_string(),
            SearchResult::Searching => "still searching".to_string(),
        };
        info!(
            "{} \"{}\" [{}] -> {target}",
            item.entry.id, item.entry.title, item.source_label
        );
    }

    let Some(replace) = finalize else {
        orchestrator.dispose();
        return Ok(());
    };
    if orchestrator.manual_migrations_count() > 0 {
        warn!(
            "{} entries had no match and are left as they are",
            orchestrator.manual_migrations_count()
        );
    }

    let mut finalize = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            if let [item] = orchestrator.items().as_slice() {
                orchestrator.migrate_one(item.entry.id, !replace).await
            } else {
                orchestrator.migrate_all(replace).await
            }
        })
    };
    let result = select! {
        result = &mut finalize => result?,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, stopping after the current entry");
            orchestrator.cancel_finalize().await;
            finalize.await?
        }
    };
    orchestrator.dispose();
    match result {
        Ok(()) => {
            info!("Migration finished");
            Ok(())
        }
        Err(MigrationError::Cancelled) => {
            warn!("Migration cancelled");
            Ok(())
        }
        Err(MigrationError::Failed(err)) => Err(err),
    }
}
