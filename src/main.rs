//! drivecache - local-first mirror of a remote drive
//!
//! Small command-line front end over the `drivecache` library.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use drivecache::drive::{self, EntryKind, NoInteractiveLogin, OAuthClient, TokenManager};
use drivecache::{AppConfig, DiskStore, FileStore, LocalStore, Notices, SyncState};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Connect and sync the root folder (default)
    Sync,
    /// List a folder
    List { folder_id: String },
    /// Download a track to a file
    Fetch { track_id: String, out_path: PathBuf },
    /// Store a refresh token obtained elsewhere
    Login {
        refresh_token: String,
        account: Option<String>,
    },
    /// Forget the signed-in user
    Logout,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"drivecache - Local-first cache of a OneDrive or Google Drive file tree

USAGE:
    drivecache [--offline]                       # Sync the root folder (default)
    drivecache [--offline] ls <folder-id>
    drivecache [--offline] fetch <track-id> <out-path>
    drivecache login <refresh-token> [account]
    drivecache logout
    drivecache help

COMMANDS:
    sync    Connect, sync the root folder and print the roots
    ls      List a folder, from the remote when connected, else from cache
    fetch   Write a track's content to a file, downloading it if not cached
    login   Store a refresh token; later commands sign in silently with it
    logout  Forget credentials for the configured backend
    help    Show this help message

OPTIONS:
    --offline   Serve everything from the local cache

CONFIG:
    <config_dir>/drivecache/config.json
    {{"drive": {{"type": "graph"}}, "clientId": "..."}}

ENVIRONMENT:
    DRIVECACHE_BACKEND        graph | picker
    DRIVECACHE_CLIENT_ID      OAuth client id
    DRIVECACHE_CLIENT_SECRET  OAuth client secret (confidential clients only)
    DRIVECACHE_CACHE_DIR      Cache directory override
    RUST_LOG                  Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_args() -> Result<(Command, bool)> {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let offline = match args.iter().position(|arg| arg == "--offline") {
        Some(index) => {
            args.remove(index);
            true
        }
        None => false,
    };

    let Some(command) = args.first() else {
        return Ok((Command::Sync, offline));
    };

    let command = match command.as_str() {
        "sync" => Command::Sync,
        "ls" => {
            if args.len() < 2 {
                return Err(anyhow!("Usage: drivecache ls <folder-id>"));
            }
            Command::List {
                folder_id: args[1].clone(),
            }
        }
        "fetch" => {
            if args.len() < 3 {
                return Err(anyhow!("Usage: drivecache fetch <track-id> <out-path>"));
            }
            Command::Fetch {
                track_id: args[1].clone(),
                out_path: PathBuf::from(&args[2]),
            }
        }
        "login" => {
            if args.len() < 2 {
                return Err(anyhow!("Usage: drivecache login <refresh-token> [account]"));
            }
            Command::Login {
                refresh_token: args[1].clone(),
                account: args.get(2).cloned(),
            }
        }
        "logout" => Command::Logout,
        "help" | "--help" | "-h" => Command::Help,
        other => {
            eprintln!("Unknown command: {}", other);
            Command::Help
        }
    };
    Ok((command, offline))
}

fn describe(kind: &EntryKind) -> &'static str {
    match kind {
        EntryKind::Folder { .. } => "dir  ",
        EntryKind::AudioTrack { .. } => "track",
        EntryKind::File => "file ",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (command, offline) = match parse_args() {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };
    if matches!(command, Command::Help) {
        print_help();
        return Ok(());
    }

    let config = AppConfig::load()?;
    let cache_dir = config.cache_dir();
    let disk = Arc::new(DiskStore::with_dir(cache_dir.clone()));
    let store: Arc<dyn LocalStore> = disk.clone();
    let notices = Notices::new();
    let mut notice_rx = notices.subscribe();

    // Ctrl+C abandons whatever is in flight
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, cancelling...");
            on_signal.cancel();
        }
    });

    if let Command::Login {
        refresh_token,
        account,
    } = &command
    {
        store.init().await.context("Failed to open cache")?;
        let tokens = TokenManager::new(
            config.drive.kind,
            store.clone(),
            Arc::new(OAuthClient::from_config(&config)),
            Arc::new(NoInteractiveLogin),
            notices.clone(),
        );
        tokens.seed(refresh_token, account.as_deref()).await?;
        println!("Stored refresh token for {}.", config.drive.kind);
        return Ok(());
    }

    let remote = drive::from_config(
        &config,
        store.clone(),
        Arc::new(NoInteractiveLogin),
        notices.clone(),
    );
    let files = FileStore::new(store.clone(), Some(remote), notices);

    if let Command::Logout = command {
        store.init().await.context("Failed to open cache")?;
        files.reset_user().await?;
        println!("Signed out of {}.", config.drive.kind);
        return Ok(());
    }
    if offline {
        files.set_online(false);
    }

    info!(backend = %config.drive.kind, cache = %cache_dir.display(), "Opening cache");
    if let Err(e) = files.configure(&cancel).await {
        error!(error = %e, "Initial sync failed");
    }
    if files.state() == SyncState::ReadyOffline && !offline {
        warn!("Not connected; serving from cache");
    }

    let outcome = run(&files, command, &cancel).await;
    files.flush_metadata().await;
    disk.entry_cache().log_metrics();

    while let Ok(notice) = notice_rx.try_recv() {
        let label = if notice.is_persistent() {
            "action needed"
        } else {
            "notice"
        };
        eprintln!("[{}] {}", label, notice);
    }
    outcome
}

async fn run(files: &FileStore, command: Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::Sync => {
            let roots = files.get_root_entries().await?;
            if roots.is_empty() {
                println!("No root entries cached.");
            }
            for entry in roots {
                println!("{}  {}  ({})", describe(&entry.kind), entry.name, entry.id);
            }
        }
        Command::List { folder_id } => {
            let children = files
                .get_children(&folder_id, cancel)
                .await
                .with_context(|| format!("Failed to list {}", folder_id))?;
            for entry in children {
                println!("{}  {}  ({})", describe(&entry.kind), entry.name, entry.id);
            }
        }
        Command::Fetch { track_id, out_path } => {
            let data = files
                .request_blob(&track_id, cancel)
                .await
                .with_context(|| format!("Failed to fetch {}", track_id))?;
            tokio::fs::write(&out_path, &data)
                .await
                .with_context(|| format!("Failed to write {:?}", out_path))?;
            println!("Wrote {} bytes to {}", data.len(), out_path.display());
        }
        Command::Login { .. } | Command::Logout | Command::Help => {}
    }
    Ok(())
}
