use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alistsync::config::{parse_interval, split_list, LoggingConfig};
use alistsync::sync::create_sync_engine_from_config;
use alistsync::{AlistClient, AuthMethod, Config, RemoteFs, SyncPair};

#[derive(Parser)]
#[command(name = "alistsync")]
#[command(about = "One-way directory synchronization for AList storages")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every configured directory pair (default)
    Sync(SyncArgs),

    /// Verify the server is reachable and the credentials work
    Check,

    /// Show copy tasks queued on the server
    Tasks,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Default)]
struct SyncArgs {
    /// Directory pairs as `src:dst`, separated by `;` or `,`
    #[arg(long)]
    pairs: Option<String>,

    /// What to do with destination extras: none, move, delete
    #[arg(long)]
    delete_action: Option<String>,

    /// Remove source files once the destination holds them
    #[arg(long)]
    move_file: bool,

    /// Comma separated paths to leave untouched
    #[arg(long)]
    exclude: Option<String>,

    /// Only copy files whose name matches this regular expression
    #[arg(long)]
    filter: Option<String>,

    /// Smallest file size in bytes to copy
    #[arg(long)]
    size_min: Option<u64>,

    /// Largest file size in bytes to copy
    #[arg(long)]
    size_max: Option<u64>,

    /// Repeat the sync on an interval (e.g. 30m, 1h) until Ctrl+C
    #[arg(long)]
    every: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Init { force }) = cli.command {
        init_logging(cli.verbose, &LoggingConfig::default())?;
        return cmd_init(cli.config, force);
    }

    let mut config = Config::load_or_default(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging)?;
    info!("Starting alistsync v{}", env!("CARGO_PKG_VERSION"));

    config.apply_env();

    match cli.command {
        None => cmd_sync(SyncArgs::default(), config).await,
        Some(Commands::Sync(args)) => cmd_sync(args, config).await,
        Some(Commands::Check) => cmd_check(&config).await,
        Some(Commands::Tasks) => cmd_tasks(&config).await,
        Some(Commands::Init { .. }) => Ok(()),
    }
}

/// Initialize logging based on verbosity level and the configured format
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layer = match logging.format.as_str() {
        "json" => fmt::layer().json().boxed(),
        "pretty" => fmt::layer().pretty().with_ansi(logging.color).boxed(),
        _ => fmt::layer().compact().with_ansi(logging.color).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    Ok(())
}

/// Fold command line flags over the file and environment settings
fn apply_sync_args(config: &mut Config, args: &SyncArgs) {
    if let Some(pairs) = &args.pairs {
        config.sync.pairs = vec![pairs.clone()];
    }
    if let Some(action) = &args.delete_action {
        config.sync.delete_action = action.clone();
    }
    if args.move_file {
        config.sync.move_file = true;
    }
    if let Some(exclude) = &args.exclude {
        config.sync.exclude_dirs = split_list(exclude);
    }
    if let Some(filter) = &args.filter {
        config.sync.file_filter = Some(filter.clone());
    }
    if args.size_min.is_some() {
        config.sync.size_min = args.size_min;
    }
    if args.size_max.is_some() {
        config.sync.size_max = args.size_max;
    }
}

/// Sync all configured pairs, once or on an interval
async fn cmd_sync(args: SyncArgs, mut config: Config) -> Result<()> {
    apply_sync_args(&mut config, &args);
    config.validate()?;

    let pairs = config.pairs();
    if pairs.is_empty() {
        bail!("No directory pairs configured. Set sync.pairs, DIR_PAIRS or --pairs");
    }

    let Some(every) = args.every.as_deref() else {
        if !run_once(&config, &pairs).await? {
            std::process::exit(1);
        }
        return Ok(());
    };

    let period = parse_interval(every)?;
    println!(
        "🔁 Syncing {} pairs every {} (Ctrl+C to stop)",
        pairs.len(),
        format_period(period)
    );

    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = run_once(&config, &pairs).await {
                    error!("Sync run failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Run every pair once and print the summary. Returns whether all pairs succeeded.
async fn run_once(config: &Config, pairs: &[SyncPair]) -> Result<bool> {
    let engine = create_sync_engine_from_config(config)?;

    println!("🔄 Syncing {} directory pairs", pairs.len());
    let summary = engine.run(pairs).await?;
    let ops = &summary.operations;

    println!("\n🎉 Synchronization Complete!");
    println!("   📊 Total pairs: {}", summary.total_pairs);
    println!("   ✅ Successful pairs: {}", summary.successful_pairs);
    println!("   ❌ Failed pairs: {}", summary.failed_pairs);
    println!(
        "   📥 Copies queued: {} ({} replacing changed files)",
        ops.copies, ops.replaced
    );
    println!("   📁 Directories created: {}", ops.directories_created);
    if ops.trashed > 0 || ops.deleted > 0 {
        println!(
            "   🗑️  Extras trashed: {}, deleted: {}",
            ops.trashed, ops.deleted
        );
    }
    if ops.source_removals > 0 || ops.directories_pruned > 0 {
        println!(
            "   ✂️  Source files removed: {}, empty directories pruned: {}",
            ops.source_removals, ops.directories_pruned
        );
    }
    println!("   ⏭️  Skipped items: {}", ops.skipped);
    println!("   ⏱️  Duration: {:.2}s", summary.duration.as_secs_f64());

    if summary.failed_pairs > 0 {
        println!("\n🔍 Failed Pairs:");
        for outcome in summary.outcomes.iter().filter(|o| !o.success) {
            println!(
                "   ❌ {} -> {}: {}",
                outcome.source_dir,
                outcome.dest_dir,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    Ok(summary.all_succeeded())
}

fn format_period(period: Duration) -> String {
    let secs = period.as_secs();
    match secs {
        s if s % 86400 == 0 => format!("{}d", s / 86400),
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

/// Authenticate against the server and report which credentials worked
async fn cmd_check(config: &Config) -> Result<()> {
    config.validate()?;
    let client = AlistClient::new(&config.credentials())?;

    println!("🔍 Checking {}", config.connection.base_url);
    let result = client.authenticate().await;
    client.close().await;

    match result {
        Ok(AuthMethod::Token) => println!("✅ Token accepted"),
        Ok(AuthMethod::Password) => println!("✅ Logged in with username and password"),
        Err(e) => {
            println!("❌ Authentication failed: {}", e);
            std::process::exit(1);
        }
    }

    let pairs = config.pairs();
    if pairs.is_empty() {
        warn!("No directory pairs configured");
    } else {
        println!("   {} directory pairs configured", pairs.len());
    }

    Ok(())
}

/// List copy tasks the server is still working on and the ones it finished
async fn cmd_tasks(config: &Config) -> Result<()> {
    config.validate()?;
    let client = AlistClient::new(&config.credentials())?;
    client.authenticate().await?;

    let pending = client.list_pending_copy_tasks().await;
    let done = client.list_done_copy_tasks().await;
    client.close().await;

    println!("⏳ Pending copy tasks ({}):", pending.len());
    for task in &pending {
        println!("   {}", task);
    }
    println!("\n✅ Finished copy tasks ({}):", done.len());
    for task in &done {
        println!("   {}", task);
    }

    Ok(())
}

/// Write a default configuration file
fn cmd_init(config_path: Option<PathBuf>, force: bool) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path,
        None => Config::default_config_path()?,
    };

    if config_path.exists() && !force {
        println!("⚠️  Config already exists: {:?}", config_path);
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    let mut config = Config::default();
    config.sync.pairs = vec!["/source:/destination".to_string()];
    config.save(&config_path)?;

    info!("Configuration saved to: {:?}", config_path);
    println!("✅ alistsync initialized successfully!");
    println!("   Config: {:?}", config_path);
    println!("   Next: set connection credentials and pairs, then run 'alistsync check'");

    Ok(())
}
