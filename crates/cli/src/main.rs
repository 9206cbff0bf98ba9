use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "catarina")]
#[command(about = "Catarina CLI — WhatsApp clinic gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and default files (config.json, PROMPT.md).
    Init {
        /// Config file path (default: CATARINA_CONFIG_PATH or ~/.catarina/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the webhook gateway.
    Gateway {
        /// Config file path (default: CATARINA_CONFIG_PATH or ~/.catarina/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15161)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Query the calendar and print available slots (operator check).
    Slots {
        /// Config file path (default: CATARINA_CONFIG_PATH or ~/.catarina/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Start date YYYY-MM-DD (default today)
        #[arg(long, value_name = "DATE")]
        start: Option<String>,

        /// Lookahead window in days
        #[arg(long, default_value_t = 14)]
        days: u32,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("catarina {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Slots {
            config,
            start,
            days,
        }) => {
            if let Err(e) = run_slots(config, start, days).await {
                log::error!("slots failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{}",
        config.gateway.bind,
        config.gateway.port
    );
    lib::gateway::run_gateway(config, path).await
}

async fn run_slots(
    config_path: Option<std::path::PathBuf>,
    start: Option<String>,
    days: u32,
) -> anyhow::Result<()> {
    use lib::calendar::{CalendarClient, CalendarCredentials};
    use lib::slots;

    let (config, _path) = lib::config::load_config(config_path)?;
    let credentials = lib::config::resolve_calendar_credentials(&config).map(
        |(client_id, client_secret, refresh_token)| CalendarCredentials {
            client_id,
            client_secret,
            refresh_token,
        },
    );
    let calendar = CalendarClient::new(credentials, lib::config::resolve_calendar_id(&config));

    let now = chrono::Utc::now();
    let reference = slots::resolve_reference_date(start.as_deref(), now);
    let window_end = reference + chrono::Duration::days(days as i64);
    let busy = calendar.busy_intervals(reference, window_end).await?;
    let free = slots::find_free_slots(&busy, reference, days, now);

    if free.is_empty() {
        println!("no free slots in the next {} days", days);
        return Ok(());
    }
    for slot in &free {
        println!("{}", slot.label());
    }
    println!("total: {}", free.len());
    Ok(())
}
