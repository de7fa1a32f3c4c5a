use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use visit_atlas::{
    config::ServerConfig,
    editor::{save_failure_message, EditorSession},
    server, staging,
    storage::VisitFileStore,
    BackupRotation,
};

#[derive(Parser)]
#[command(name = "visit-atlas")]
#[command(about = "Mark the places you have been. Keep the record on your own disk.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Project root holding the pages, geojson/ and data/
    #[arg(long, global = true, env = "VISIT_ATLAS_ROOT")]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the local editor server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
        /// Loopback address to bind
        #[arg(long)]
        bind: Option<IpAddr>,
        /// Number of store backups to keep
        #[arg(long)]
        retain: Option<usize>,
    },
    /// Copy the deployable files into an output directory
    Stage {
        /// Output directory
        #[arg(short, long, default_value = "dist")]
        out: PathBuf,
    },
    /// Record or clear a visit for one feature
    Mark {
        /// Feature id, e.g. 13101
        id: String,
        /// Display name
        #[arg(short, long, default_value = "")]
        name: String,
        /// Comma-separated visit dates
        #[arg(short, long, default_value = "")]
        dates: String,
        /// Free-text note
        #[arg(long, default_value = "")]
        note: String,
    },
    /// List stored visits
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env().context("reading environment")?;
    if let Some(root) = cli.root {
        config.root = root;
    }

    match cli.command {
        Some(Commands::Serve { port, bind, retain }) => {
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(retain) = retain {
                config.retain = retain;
            }
            run_server(config).await?;
        }
        Some(Commands::Stage { out }) => {
            stage(&config, &out)?;
        }
        Some(Commands::Mark {
            id,
            name,
            dates,
            note,
        }) => {
            mark(&config, &id, &name, &dates, &note)?;
        }
        Some(Commands::List) => {
            list(&config)?;
        }
        None => {
            run_server(config).await?;
        }
    }

    Ok(())
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    info!("Starting editor server in {}", config.root.display());
    server::serve(config).await.context("editor server failed")?;
    Ok(())
}

fn stage(config: &ServerConfig, out: &Path) -> anyhow::Result<()> {
    let report = staging::stage(&config.root, out, &config.store)
        .with_context(|| format!("staging into {}", out.display()))?;
    println!("Built to {}/ ({} files)", out.display(), report.copied.len());
    Ok(())
}

fn open_store(config: &ServerConfig) -> VisitFileStore {
    VisitFileStore::with_rotation(config.store_file(), BackupRotation::new(config.retain))
}

fn mark(config: &ServerConfig, id: &str, name: &str, dates: &str, note: &str) -> anyhow::Result<()> {
    let store = open_store(config);
    let visits = store
        .load()
        .with_context(|| format!("loading {}", store.path().display()))?;

    let mut session = EditorSession::new(visits);
    session.select_id(id, name);
    let outcome = session
        .apply_edit(name, dates, note)
        .context("no feature selected")?;

    match store.save_store(session.visits()) {
        Ok(saved) => {
            println!("{} {}", outcome.label(), id);
            if let Some(backup) = saved.backup {
                println!("backup: {}", backup.display());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", save_failure_message(&e));
            Err(e.into())
        }
    }
}

fn list(config: &ServerConfig) -> anyhow::Result<()> {
    let store = open_store(config);
    let visits = store
        .load()
        .with_context(|| format!("loading {}", store.path().display()))?;

    println!("{} visited", visits.len());
    println!("{}", "─".repeat(50));
    for (id, record) in visits.iter() {
        println!(
            "{} {} [{}] {}",
            id,
            record.name,
            record.visit_dates().join(", "),
            record.note
        );
    }
    for (id, value) in visits.unrecognized() {
        println!("{} (unreadable entry kept as is: {})", id, value);
    }
    Ok(())
}
