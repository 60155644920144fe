//! block-engine: run the block manager until SIGINT/SIGTERM

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use clap::Parser;
use tracing::{info, warn};

use block_engine::blocks::{self, NCLI};
use block_engine::{logging, BlockId, EngineConfig, Manager};

/// Identifier of the configuration server block added by `--listen`
const NCLI_ID: BlockId = BlockId(-1);

#[derive(Parser, Debug)]
#[command(name = "block-engine")]
#[command(version, about = "Pluggable block data-flow engine", long_about = None)]
struct Args {
    /// Text configuration applied at startup
    #[arg(short, long)]
    conf: Option<PathBuf>,

    /// Serve configuration commands on this Unix socket path
    #[arg(short = 'L', long)]
    listen: Option<PathBuf>,

    /// Engine settings (JSON)
    #[arg(short, long)]
    engine_config: Option<PathBuf>,

    /// Log filter directive, overrides the engine settings
    #[arg(short, long)]
    log_level: Option<String>,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);
extern "C" fn signal_handler(_sig: i32) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.engine_config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    logging::init(&level);

    // SAFETY: signal_handler is a valid extern "C" fn with stable address. It only performs
    // a single atomic store, which is async-signal-safe per POSIX.
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as *const () as libc::sighandler_t);
        libc::signal(libc::SIGINT, signal_handler as *const () as libc::sighandler_t);
    }

    let mut manager = Manager::with_config(config);
    blocks::register_builtin(manager.factories_mut());

    if let Some(path) = &args.listen {
        manager.block_add(NCLI_ID, NCLI)?;
        manager.block_conf(NCLI_ID, &format!("path={}", path.display()))?;
        manager.block_start(NCLI_ID)?;
    }

    if let Some(path) = &args.conf {
        if let Err(e) = manager.load_from_file(path) {
            warn!("Startup configuration incomplete: {}", e);
        }
    }

    info!(version = block_engine::VERSION, blocks = manager.block_count(), "Engine ready");
    manager.run_until(&SHUTDOWN);
    Ok(())
}
