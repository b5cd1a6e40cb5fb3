//! Command-line front end over [`mergefs::registry`]. Generalizes the
//! teacher's `examples/shadow_fs/main.rs` one-shot "mirror a directory"
//! invocation into a small control surface over several live mounts.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mergefs::config::load_mount_config;
use mergefs::registry::{self, MountId};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mergefsctl", about = "Control surface for mergefs composite mounts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mounts the source stack described by a TOML config file.
    Mount { config: PathBuf },
    /// Unmounts by numeric id, as printed by `list`.
    Unmount {
        id: u64,
        #[arg(long)]
        force: bool,
    },
    /// Lists every currently registered mount.
    List,
    /// Shows detail for one mount plus the built-in source implementations.
    Status { id: u64 },
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();
    registry::init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Mount { config } => run_mount(config).await,
        Command::Unmount { id, force } => run_unmount(id, force).await,
        Command::List => run_list().await,
        Command::Status { id } => run_status(id).await,
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mergefsctl: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run_mount(config_path: PathBuf) -> Result<(), String> {
    let config = load_mount_config(&config_path).await.map_err(|e| e.to_string())?;
    let mount_point = config.mount_point.clone();
    let id = registry::add(config).await.map_err(|e| e.to_string())?;
    println!("mounted {mount_point} as id {}", id.0);
    Ok(())
}

async fn run_unmount(id: u64, force: bool) -> Result<(), String> {
    registry::remove(MountId(id), !force).await.map_err(|e| e.to_string())
}

async fn run_list() -> Result<(), String> {
    for info in registry::list().await {
        println!(
            "{:>4}  {:<20} writable={:<5} sources={}",
            info.id.0, info.mount_point, info.writable, info.source_count
        );
    }
    Ok(())
}

async fn run_status(id: u64) -> Result<(), String> {
    let info = registry::info(MountId(id)).await.map_err(|e| e.to_string())?;
    println!("mount {}: {} writable={} sources={}", info.id.0, info.mount_point, info.writable, info.source_count);
    println!("built-in sources: {}", registry::list_plugins().join(", "));
    Ok(())
}
