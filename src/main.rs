mod activity;
mod api;
mod cli;
mod commands;
mod config;
mod display;
mod error;
mod export;
mod http;
mod models;
mod session;
mod storage;
mod transport;

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gradebook", about = "Admin client for the grade tracking service")]
pub struct Args {
    #[arg(long, env = "GRADEBOOK_API_URL", help = "Service base URL")]
    pub base_url: Option<String>,

    #[arg(long, env = "GRADEBOOK_TIMEOUT_MS", help = "Request timeout in milliseconds")]
    pub timeout_ms: Option<u64>,

    #[arg(long, help = "Config file path (replaces the layered config files)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Session file path")]
    pub storage: Option<PathBuf>,

    #[arg(long, help = "Debug output (HTTP requests and session transitions)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<commands::Command>,
}

fn init_tracing(debug: bool) {
    let default = if debug { "gradebook=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    if let Err(e) = run() {
        cli::report(&e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.debug);

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    // Flags and environment win over files
    if let Some(url) = &args.base_url {
        cfg.api.base_url = Some(url.clone());
    }
    if let Some(ms) = args.timeout_ms {
        cfg.api.timeout_ms = Some(ms);
    }
    if let Some(path) = &args.storage {
        cfg.storage.path = Some(path.to_string_lossy().into_owned());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow!("Invalid configuration ({} errors)", errors.len()));
    }

    let storage_path = cfg
        .storage_path()
        .ok_or_else(|| anyhow!("No home directory; set [storage] path or --storage"))?;
    debug!(base_url = cfg.base_url(), storage = %storage_path.display(), "starting");

    let storage: Rc<dyn storage::KeyValueStore> = Rc::new(storage::FileStore::new(storage_path));
    let transport = Rc::new(transport::Transport::new(
        cfg.base_url(),
        cfg.timeout(),
        Box::new(http::UreqBackend::new()),
        storage.clone(),
    ));
    let session = session::SessionStore::new(transport.clone(), storage);

    let activity = match cfg.activity_path() {
        Some(path) => {
            let run_id = uuid::Uuid::new_v4().to_string();
            match activity::ActivityLog::new(&path, &run_id, cfg.base_url()) {
                Ok(log) => Some(log),
                Err(e) => {
                    tracing::warn!(error = %e, "activity log disabled");
                    None
                }
            }
        }
        None => None,
    };

    let command = args.command;
    let ctx = cli::Context::new(cfg, transport, session, activity);
    ctx.session.initialize();

    match command {
        Some(cmd) => cli::run_once(&ctx, &cmd),
        None => cli::run_repl(ctx),
    }
}
