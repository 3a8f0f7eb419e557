//! pricewatch CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use pricewatch::{
    commands::{
        cmd_crawl, cmd_init, cmd_latest_prices, cmd_list_links, cmd_price_history, cmd_purge,
        cmd_refresh_item, cmd_retire_item, cmd_schedule_disable, cmd_schedule_set,
        cmd_schedule_show, cmd_serve, cmd_set_links, cmd_show_links, cmd_status,
        parse_slot_assignments, print_crawl_report, print_history, print_latest_prices,
        print_link_changes, print_link_targets, print_links, print_purge_report, print_schedule,
        print_scheduler_status, print_status, CrawlOptions,
    },
    config::Config,
    error::Result,
    progress::LogWriterFactory,
    tracker::PriceTracker,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pricewatch")]
#[command(version, about = "Track item prices across a reference source and competitors", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Name recorded as the author of changes
    #[arg(long, global = true, env = "PRICEWATCH_ACTOR", default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize pricewatch configuration and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Manage the per-item source links
    Links {
        #[command(subcommand)]
        action: LinksAction,
    },

    /// Query recorded prices
    Prices {
        #[command(subcommand)]
        action: PricesAction,
    },

    /// Run a crawl in the foreground
    Crawl {
        /// Only crawl this item
        #[arg(long)]
        item: Option<String>,

        /// Include the reference slot
        #[arg(long)]
        include_reference: bool,
    },

    /// Manage the daily crawl schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show store counts, schedule and recent runs
    Status {
        /// Number of recent runs to show
        #[arg(long, default_value = "5")]
        runs: usize,
    },

    /// Delete old observations
    Purge {
        /// Keep this many days (defaults to store.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Run the daily scheduler until interrupted
    Serve,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum LinksAction {
    /// Show the active links of an item
    Show {
        item: String,

        /// Include the reference slot
        #[arg(long)]
        all_slots: bool,
    },

    /// Replace links for the given slots (N= retires slot N)
    Set {
        item: String,

        /// Slot assignment as N=URL, repeatable
        #[arg(long = "slot", value_name = "N=URL", required = true)]
        slots: Vec<String>,

        /// Allow writing the reference slot
        #[arg(long)]
        include_reference: bool,

        /// Crawl the changed slots right away
        #[arg(long)]
        refresh: bool,
    },

    /// Retire every link of an item
    Retire { item: String },

    /// List every active link
    List {
        /// Include the reference slot
        #[arg(long)]
        include_reference: bool,
    },
}

#[derive(Subcommand)]
enum PricesAction {
    /// Latest price per active slot
    Latest {
        item: String,

        /// Leave out the reference slot
        #[arg(long)]
        exclude_reference: bool,
    },

    /// Daily price history of one slot
    History {
        item: String,

        slot: i64,

        /// Window size in days, ending today
        #[arg(long, default_value = "30")]
        days: u32,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Show the stored schedule and next run
    Show,

    /// Set the daily run time (HH:MM, configured time zone)
    Set {
        time: String,

        /// Include the reference slot in scheduled runs
        #[arg(long)]
        include_reference: bool,
    },

    /// Stop scheduled crawls
    Disable,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (plain, json) = if cli.log_json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(LogWriterFactory)), None)
    };

    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "pricewatch", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref()).await?;
    let tracker = PriceTracker::open(config).await?;

    let result = dispatch(&cli, &tracker).await;
    tracker.close().await;
    result
}

async fn dispatch(cli: &Cli, tracker: &PriceTracker) -> Result<()> {
    let show_progress = !cli.json && !cli.log_json;

    match &cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Links { action } => handle_links(cli, tracker, action, show_progress).await?,

        Commands::Prices { action } => match action {
            PricesAction::Latest {
                item,
                exclude_reference,
            } => {
                let view = cmd_latest_prices(tracker, item, *exclude_reference).await;
                output(cli.json, &view, print_latest_prices)?;
            }
            PricesAction::History { item, slot, days } => {
                let view = cmd_price_history(tracker, item, *slot, *days).await?;
                output(cli.json, &view, print_history)?;
            }
        },

        Commands::Crawl {
            item,
            include_reference,
        } => {
            let options = CrawlOptions {
                item_key: item.clone(),
                slots: Vec::new(),
                include_reference: *include_reference,
                actor: cli.actor.clone(),
                show_progress,
            };
            let report = cmd_crawl(tracker, options).await?;
            output(cli.json, &report, print_crawl_report)?;
        }

        Commands::Schedule { action } => match action {
            ScheduleAction::Show => {
                let view = cmd_schedule_show(tracker).await?;
                output(cli.json, &view, print_schedule)?;
            }
            ScheduleAction::Set {
                time,
                include_reference,
            } => {
                let status = cmd_schedule_set(tracker, time, *include_reference, &cli.actor).await?;
                output(cli.json, &status, print_scheduler_status)?;
            }
            ScheduleAction::Disable => {
                let status = cmd_schedule_disable(tracker, &cli.actor).await?;
                output(cli.json, &status, print_scheduler_status)?;
            }
        },

        Commands::Status { runs } => {
            let status = cmd_status(tracker, *runs).await?;
            output(cli.json, &status, print_status)?;
        }

        Commands::Purge { days } => {
            let report = cmd_purge(tracker, *days).await?;
            output(cli.json, &report, print_purge_report)?;
        }

        Commands::Serve => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
            };
            let status = cmd_serve(tracker, shutdown).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            }
        }
    }
    Ok(())
}

async fn handle_links(
    cli: &Cli,
    tracker: &PriceTracker,
    action: &LinksAction,
    show_progress: bool,
) -> Result<()> {
    match action {
        LinksAction::Show { item, all_slots } => {
            let view = cmd_show_links(tracker, item, *all_slots).await?;
            output(cli.json, &view, print_links)?;
        }
        LinksAction::Set {
            item,
            slots,
            include_reference,
            refresh,
        } => {
            let assignments = parse_slot_assignments(slots)?;
            let changes =
                cmd_set_links(tracker, item, &assignments, &cli.actor, *include_reference).await?;
            // The process exits afterwards, so refresh in the foreground
            let report = if *refresh {
                cmd_refresh_item(tracker, item, &changes.updated, &cli.actor, show_progress).await?
            } else {
                None
            };
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "changes": changes,
                        "refresh": report,
                    }))?
                );
            } else {
                print_link_changes(&changes);
                if let Some(report) = &report {
                    print_crawl_report(report);
                }
            }
        }
        LinksAction::Retire { item } => {
            let changes = cmd_retire_item(tracker, item, &cli.actor).await?;
            output(cli.json, &changes, print_link_changes)?;
        }
        LinksAction::List { include_reference } => {
            let targets = cmd_list_links(tracker, *include_reference).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&targets)?);
            } else {
                print_link_targets(&targets);
            }
        }
    }
    Ok(())
}

fn output<T: Serialize>(json: bool, value: &T, print: fn(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force } = cli.command else {
        unreachable!()
    };

    // A .toml path names the config file; anything else is a directory
    let (base_dir, config_path) = if let Some(path) = cli.config {
        if path.extension().is_some_and(|e| e == "toml") {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        } else {
            (path.clone(), path.join("config.toml"))
        }
    } else {
        let base = Config::default_base_dir();
        (base.clone(), base.join("config.toml"))
    };

    if config_path.exists() && !force {
        eprintln!(
            "Config file already exists at: {}\nUse --force to overwrite.",
            config_path.display()
        );
        std::process::exit(1);
    }

    let config = cmd_init(Some(base_dir), &config_path, force).await?;
    println!("✓ pricewatch initialized successfully");
    println!("  Config: {}", config.paths.config_file.display());
    println!("  Database: {}", config.paths.db_file.display());
    println!("\nNext steps:");
    println!("  1. Edit source.link_prefixes and the extraction rules in the config file");
    println!("  2. Add links: pricewatch links set ITEM --slot 1=URL");
    println!("  3. Start the daily scheduler: pricewatch serve");
    Ok(())
}

async fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'pricewatch init' first.",
            config_path.display()
        );
        std::process::exit(1);
    }

    Config::load(&config_path)
}
