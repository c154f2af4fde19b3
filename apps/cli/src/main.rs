//! McpRouter command line
//!
//! `mcprouter serve` runs the router over HTTP (or stdio with `--stdio`);
//! `mcprouter validate` checks a profiles file without starting anything.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mcprouter_core::{branding, JsonFileProfileStore, ProfileStore, RouterConfig};
use mcprouter_gateway::{ConnectorRegistry, Namespace, RouterServer};
use tracing::{info, warn};

const DEFAULT_LOG_FILTER: &str = "info,mcprouter_gateway=debug,mcprouter_core=debug";

#[derive(Parser)]
#[command(name = "mcprouter", version, about = "Aggregate many MCP servers behind one endpoint")]
struct Cli {
    /// Also write daily-rotated log files to this directory
    #[arg(long, global = true, env = "MCPROUTER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the router
    Serve(ServeArgs),
    /// Parse a profiles file, check aliases and print the exposed namespaces
    Validate {
        /// Profiles file (defaults to the configured one)
        #[arg(long)]
        profiles: Option<PathBuf>,
        /// Router config file, for the namespace separator
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Router config file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Profiles file (JSON, standard mcpServers format)
    #[arg(long)]
    profiles: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Serve a single client on stdin/stdout instead of HTTP
    #[arg(long)]
    stdio: bool,
    /// Profile for the stdio client (defaults to the default profile)
    #[arg(long, requires = "stdio")]
    profile: Option<String>,
}

fn init_tracing(log_dir: Option<&PathBuf>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    // stdout belongs to the stdio frontend
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(branding::LOG_PREFIX)
                .filename_suffix("log")
                .build(dir)
                .context("Failed to create log file appender")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_ref())?;

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Validate { profiles, config } => validate(profiles, config).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = RouterConfig::load(args.config.as_deref())?;
    if let Some(path) = args.profiles {
        config.profiles_path = path;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        profiles = %config.profiles_path.display(),
        "Starting {}",
        branding::APP_NAME
    );

    let stdio_profile = args
        .stdio
        .then(|| args.profile.unwrap_or_else(|| config.default_profile.clone()));

    let store = Arc::new(JsonFileProfileStore::new(config.profiles_path.clone()));
    let server = RouterServer::new(config, store, Arc::new(ConnectorRegistry::new()));

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    });

    match stdio_profile {
        Some(profile) => server.run_stdio(profile).await,
        None => server.run_http().await,
    }
}

async fn validate(profiles: Option<PathBuf>, config: Option<PathBuf>) -> Result<()> {
    let config = RouterConfig::load(config.as_deref())?;
    let path = profiles.unwrap_or(config.profiles_path);
    let store = JsonFileProfileStore::new(&path);
    let snapshot = store.load().await?;
    let namespace = Namespace::new(config.namespace_separator);
    let desired = snapshot.desired_backends();

    println!("Profiles file: {}", path.display());
    println!("Namespacing:   {}", namespace.describe());
    println!();
    println!("{:<24} {:<20} {:<8} {}", "SERVER", "ALIAS", "TYPE", "STATUS");

    let mut problems = 0usize;
    let mut taken: BTreeMap<String, String> = BTreeMap::new();
    for (name, def) in &snapshot.servers {
        let alias = def.effective_alias();
        let status = if def.disabled {
            "disabled".to_string()
        } else if !desired.contains_key(name) {
            "not in any profile".to_string()
        } else if let Err(e) = namespace.validate_alias(name, alias) {
            problems += 1;
            e.to_string()
        } else if let Some(owner) = taken.get(alias) {
            problems += 1;
            format!("alias already used by '{}'", owner)
        } else {
            taken.insert(alias.to_string(), name.clone());
            "ok".to_string()
        };
        println!(
            "{:<24} {:<20} {:<8} {}",
            name,
            alias,
            def.transport.transport_type(),
            status
        );
    }

    println!();
    for (name, profile) in &snapshot.profiles {
        println!("profile {:<16} {}", name, profile.servers.join(", "));
    }
    for (profile, server) in snapshot.dangling_references() {
        problems += 1;
        println!("profile '{}' references undefined server '{}'", profile, server);
    }

    if problems > 0 {
        anyhow::bail!("{} problem(s) found in {}", problems, path.display());
    }
    println!();
    println!("OK");
    Ok(())
}
