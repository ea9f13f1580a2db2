use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use feedfold::{App, AppError, Config, ItemRequest};

/// Get the config directory path (~/.config/feedfold/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedfold"))
}

/// Atomically write `content` to `dst` using write-to-temp-then-rename.
/// The destination is never left in a partial state.
fn atomic_write(dst: &Path, content: &[u8]) -> Result<()> {
    // Unpredictable temp name, created with create_new so an existing file or
    // symlink at that path is never followed.
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions or disk space",
                temp_path.display()
            )
        })?;

    temp_file.write_all(content).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to write to temporary file '{}': disk may be full",
            temp_path.display()
        )
    })?;

    temp_file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to sync temporary file '{}' to disk: disk may be full",
            temp_path.display()
        )
    })?;
    drop(temp_file);

    #[cfg(windows)]
    if dst.exists() {
        std::fs::remove_file(dst).with_context(|| {
            let _ = std::fs::remove_file(&temp_path);
            format!(
                "Failed to remove existing '{}' before atomic replace",
                dst.display()
            )
        })?;
    }

    std::fs::rename(&temp_path, dst).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}': check permissions",
            temp_path.display(),
            dst.display()
        )
    })?;

    Ok(())
}

#[derive(Parser, Debug)]
#[command(
    name = "feedfold",
    version,
    about = "Feed subscriptions, folders and bookmarks kept as append-only event logs"
)]
struct Args {
    /// Config file (default: ~/.config/feedfold/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show feeds, folders, tags and cached titles
    Feeds,
    /// Subscribe to a feed (YouTube channel pages are resolved to their feed)
    Add {
        url: String,
        #[arg(long)]
        folder: Option<String>,
    },
    /// Unsubscribe from a feed
    Remove { url: String },
    /// Subscribe to every feed in an OPML file
    Import { file: PathBuf },
    /// Write subscriptions as OPML (stdout unless --output is given)
    Export {
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Refetch every feed and rebuild the item cache
    Refresh,
    /// Tag a feed ("favorite" marks it as a favorite)
    Tag { url: String, tag: String },
    /// Remove a tag from a feed
    Untag { url: String, tag: String },
    /// Create, move or remove folders
    Folder {
        #[command(subcommand)]
        command: FolderCommand,
    },
    /// Put a feed in exactly one folder (the root folder when omitted)
    MoveFeed {
        url: String,
        #[arg(long)]
        folder: Option<String>,
    },
    /// List cached items
    Items(ItemArgs),
    /// Save or drop bookmarks
    Bookmark {
        #[command(subcommand)]
        command: BookmarkCommand,
    },
    /// Mark items viewed or unviewed
    Viewed {
        #[command(subcommand)]
        command: ViewedCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    Add {
        name: String,
        #[arg(long)]
        parent: Option<String>,
    },
    /// Move a folder under --parent, or to the top level
    Move {
        folder: String,
        #[arg(long)]
        parent: Option<String>,
    },
    Remove { folder: String },
}

#[derive(Subcommand, Debug)]
enum BookmarkCommand {
    /// Save an item snapshot given as a JSON object
    Add { entry: String },
    Remove { id: String },
}

#[derive(Subcommand, Debug)]
enum ViewedCommand {
    Mark { id: String },
    Unmark { id: String },
}

#[derive(clap::Args, Debug)]
struct ItemArgs {
    /// Page length, or "all"
    #[arg(long)]
    limit: Option<String>,
    #[arg(long)]
    page: Option<String>,
    /// all, viewed or unviewed
    #[arg(long)]
    view: Option<String>,
    #[arg(long)]
    include_viewed: bool,
    #[arg(long)]
    favorites_only: bool,
    /// recent, views or likes
    #[arg(long)]
    sort: Option<String>,
    /// all, today, week or month
    #[arg(long)]
    range: Option<String>,
    /// Folder path, or __bookmarks__ for saved items
    #[arg(long)]
    folder: Option<String>,
}

impl From<ItemArgs> for ItemRequest {
    fn from(args: ItemArgs) -> Self {
        Self {
            limit: args.limit,
            page: args.page,
            view: args.view,
            include_viewed: args.include_viewed,
            favorites_only: args.favorites_only,
            sort: args.sort,
            range: args.range,
            folder: args.folder,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize response")?;
    println!("{json}");
    Ok(())
}

/// Print the response, or report a rejected request and exit non-zero.
fn emit<T: Serialize>(result: Result<T, AppError>) -> Result<()> {
    match result {
        Ok(value) => print_json(&value),
        Err(AppError::Validation(message)) => {
            eprintln!("Error: {message}");
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .with_env_overrides();
    let paths = config.data_paths(&config_dir);
    tracing::debug!(?paths, "Resolved data paths");

    let app = App::from_config(&config, &paths).context("Failed to create HTTP client")?;

    match args.command {
        Command::Feeds => emit(app.feed_state().await),
        Command::Add { url, folder } => emit(app.add_feed(&url, folder.as_deref()).await),
        Command::Remove { url } => emit(app.remove_feed(&url).await),
        Command::Import { file } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read import file: {}", file.display()))?;
            emit(app.import_opml(&String::from_utf8_lossy(&bytes)).await)
        }
        Command::Export { output } => {
            let opml = app.export_opml().await.context("Failed to export OPML")?;
            match output {
                Some(path) => {
                    atomic_write(&path, opml.as_bytes())?;
                    eprintln!("Exported OPML to: {}", path.display());
                }
                None => println!("{opml}"),
            }
            Ok(())
        }
        Command::Refresh => emit(app.refresh().await),
        Command::Tag { url, tag } => emit(app.tag_feed(&url, &tag).await),
        Command::Untag { url, tag } => emit(app.untag_feed(&url, &tag).await),
        Command::Folder { command } => match command {
            FolderCommand::Add { name, parent } => {
                emit(app.add_folder(&name, parent.as_deref()).await)
            }
            FolderCommand::Move { folder, parent } => {
                emit(app.move_folder(&folder, parent.as_deref()).await)
            }
            FolderCommand::Remove { folder } => emit(app.remove_folder(&folder).await),
        },
        Command::MoveFeed { url, folder } => emit(app.move_feed(&url, folder.as_deref()).await),
        Command::Items(item_args) => emit(app.list_items(&item_args.into()).await),
        Command::Bookmark { command } => match command {
            BookmarkCommand::Add { entry } => {
                let entry: serde_json::Value =
                    serde_json::from_str(&entry).context("Bookmark entry is not valid JSON")?;
                emit(app.add_bookmark(entry).await)
            }
            BookmarkCommand::Remove { id } => emit(app.remove_bookmark(&id).await),
        },
        Command::Viewed { command } => match command {
            ViewedCommand::Mark { id } => emit(app.mark_viewed(&id).await),
            ViewedCommand::Unmark { id } => emit(app.unmark_viewed(&id).await),
        },
    }
}
