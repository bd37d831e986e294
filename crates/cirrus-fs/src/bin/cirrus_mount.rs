//! cirrus-mount: serve a cirrus volume over WebDAV.
//!
//! Starts a local WebDAV server backed by an in-memory demo volume,
//! optionally seeded from a local directory, enabling direct access from
//! Finder, Windows Explorer, or any WebDAV client.
//!
//! # Usage
//!
//! ```bash
//! # Serve the contents of ./data as a WebDAV volume
//! cirrus-mount ./data
//!
//! # Then mount in Finder: Cmd+K -> http://localhost:4918
//! ```

use cirrus_fs::{webdav, MountConfig, Volume};
use cirrus_remote::MemoryRemote;
use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// Serve a cirrus volume over a local WebDAV server.
///
/// The volume can be mounted from Finder (Cmd+K), Windows Explorer, or any
/// WebDAV-compatible client.
#[derive(Parser, Debug)]
#[command(name = "cirrus-mount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory whose contents seed the volume (served from memory)
    #[arg(value_name = "SEED_DIR")]
    seed: Option<PathBuf>,

    /// Port to listen on (default: 4918)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for the durable lock/property tables
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Cache freshness window in seconds; 0 disables caching
    #[arg(long)]
    ttl: Option<i64>,

    /// TOML config file; flags given on the command line win
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refuse all mutating requests
    #[arg(long)]
    read_only: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    let mut config = match &args.config {
        Some(path) => match MountConfig::from_toml_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load config {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => MountConfig::default(),
    };
    if let Some(port) = args.port {
        config.listen_port = port;
    }
    if let Some(state_dir) = &args.state_dir {
        config.state_dir = state_dir.clone();
    }
    if let Some(ttl) = args.ttl {
        config.cache_ttl_secs = ttl;
    }
    if args.read_only {
        config.read_only = true;
    }

    let remote = MemoryRemote::new();
    if let Some(seed) = &args.seed {
        if !seed.is_dir() {
            error!("Not a directory: {}", seed.display());
            process::exit(1);
        }
        info!("Seeding volume from {}", seed.display());
        match seed_from_dir(&remote, seed) {
            Ok(count) => info!("Seeded {} file(s)", count),
            Err(e) => {
                error!("Failed to seed volume: {}", e);
                process::exit(1);
            }
        }
    }

    let port = config.listen_port;
    let volume = match Volume::open(Arc::new(remote), config).await {
        Ok(volume) => volume,
        Err(e) => {
            error!("Failed to open volume: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = webdav::serve(volume, port).await {
        error!("Server error: {}", e);
        process::exit(1);
    }
}

/// Walk a directory tree into the in-memory remote. Returns the file count.
fn seed_from_dir(remote: &MemoryRemote, dir: &Path) -> io::Result<usize> {
    let mut count = 0;
    let mut pending = vec![(dir.to_path_buf(), remote.root())];
    while let Some((dir, parent_uid)) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("._") || name == ".DS_Store" {
                continue;
            }
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                let uid = remote.add_folder(&parent_uid, &name);
                pending.push((entry.path(), uid));
            } else if metadata.is_file() {
                let bytes = fs::read(entry.path())?;
                remote.add_file(&parent_uid, &name, &bytes);
                count += 1;
            }
        }
    }
    Ok(count)
}
