use std::path::PathBuf;

use anyhow::Context;
use bucketviewd::config::Settings;
use bucketviewd::runtime::Runtime;
use bucketviewd::sync::paths::{Location, join_path};
use bucketviewd::sync::records::FileRecord;
use bucketviewd::sync::store::{Status, StoreSnapshot};
use bucketviewd::sync::tree::{FolderTree, NodeId};
use bucketviewd::sync::upload::{LocalFile, UploadStatus};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "bucketviewd",
    version,
    about = "Browse an S3-compatible bucket as folders"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// List the subfolders and files of a folder
    Ls {
        #[arg(default_value = "/")]
        route: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Use the listing saved by the last run when there is one
        #[arg(long)]
        cached: bool,
    },
    /// Print the whole folder tree
    Tree,
    /// Create a folder inside another one
    Mkdir { route: String, name: String },
    /// Delete a file by key
    Rm { key: String },
    /// Delete an empty folder
    Rmdir { route: String },
    /// Move a file into another folder
    Mv { key: String, folder: String },
    /// Upload local files into a folder
    Upload {
        #[arg(long, default_value = "/")]
        to: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Keep re-listing the bucket until Ctrl-C
    Watch,
    /// Print the effective settings with secrets redacted
    Settings,
}

#[derive(Serialize)]
struct FolderListing<'a> {
    folder: &'a str,
    page: Option<u32>,
    selected: Option<&'a FileRecord>,
    folders: Vec<&'a str>,
    files: Vec<&'a FileRecord>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load()?;
    if cli.command == Command::Settings {
        println!("{}", serde_json::to_string_pretty(&settings.snapshot())?);
        return Ok(());
    }

    let runtime = Runtime::bootstrap(settings).await?;
    let result = run_command(&runtime, cli.command).await;
    runtime.shutdown().await;
    result
}

async fn run_command(runtime: &Runtime, command: Command) -> anyhow::Result<()> {
    runtime.require_connected().await?;
    if command == Command::Watch {
        return runtime.watch().await;
    }

    let store = runtime.store();
    let from_cache = matches!(command, Command::Ls { cached: true, .. })
        && store.status().await == Status::Success;
    if !from_cache {
        store
            .try_refresh()
            .await
            .context("failed to list bucket")?;
    }

    match command {
        Command::Ls { route, json, .. } => {
            let snapshot = match Location::parse(&route).file {
                Some(key) => {
                    let snapshot = store.navigate(&route).await;
                    if snapshot.current_file.is_none() {
                        anyhow::bail!("file not found: {key}");
                    }
                    snapshot
                }
                None => store.open_folder(&route).await?,
            };
            print_listing(&snapshot, json)?;
        }
        Command::Tree => {
            let snapshot = store.snapshot().await;
            print_tree(&snapshot.folders, snapshot.folders.root(), 0);
        }
        Command::Mkdir { route, name } => {
            store.open_folder(&route).await?;
            store.create_folder().await;
            if store.make_folder(&name).await?.is_none() {
                store.remove_editing_folder().await;
                anyhow::bail!("folder marker for {name:?} was not stored");
            }
            println!("created {}", join_path(&store.current_folder().await, name.trim()));
        }
        Command::Rm { key } => {
            store.delete_file(&key).await?;
            if store.select_file(&key).await.is_some() {
                anyhow::bail!("{key} is still listed after delete");
            }
            println!("deleted {key}");
        }
        Command::Rmdir { route } => {
            let path = Location::parse(&route).path;
            store.delete_folder(&path).await?;
            if store.snapshot().await.folders.find_path(&path).is_some() {
                anyhow::bail!("{path} is still listed after delete");
            }
            println!("deleted {path}");
        }
        Command::Mv { key, folder } => {
            let target = Location::parse(&folder).path;
            store.move_file(&key, &target).await?;
            store.settle().await;
            if store.select_file(&key).await.is_some() {
                anyhow::bail!("{key} was not moved");
            }
            println!("moved {key} to {target}");
        }
        Command::Upload { to, files } => {
            store.open_folder(&to).await?;
            let mut local = Vec::with_capacity(files.len());
            for path in &files {
                local.push(
                    LocalFile::from_path(path)
                        .await
                        .with_context(|| format!("failed to read {}", path.display()))?,
                );
            }
            let items = runtime.uploads().add(local).await;
            let mut failed = 0;
            for item in &items {
                match item.status {
                    UploadStatus::Success => {
                        println!("uploaded {}", item.key.as_deref().unwrap_or_default())
                    }
                    _ => {
                        failed += 1;
                        println!(
                            "failed {}: {}",
                            item.name,
                            item.error.as_deref().unwrap_or("not dispatched")
                        );
                    }
                }
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} uploads failed", items.len());
            }
        }
        Command::Watch | Command::Settings => {}
    }
    Ok(())
}

fn print_listing(snapshot: &StoreSnapshot, json: bool) -> anyhow::Result<()> {
    let listing = FolderListing {
        folder: &snapshot.current_folder,
        page: snapshot.page,
        selected: snapshot.current_file.as_ref(),
        folders: snapshot
            .subfolders()
            .into_iter()
            .map(|folder| folder.name.as_str())
            .collect(),
        files: snapshot.files_in_current(),
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("{}", listing.folder);
    if let Some(file) = listing.selected {
        println!("* {}\t{}\t{}", file.data.key, file.data.size, file.url);
    }
    for folder in &listing.folders {
        println!("  {folder}/");
    }
    for file in &listing.files {
        println!(
            "  {}\t{}\t{}\t{}",
            file.filename_minus_date,
            file.data.size,
            if file.date.is_empty() { "-" } else { file.date.as_str() },
            file.url
        );
    }
    Ok(())
}

fn print_tree(tree: &FolderTree, id: NodeId, depth: usize) {
    let node = tree.node(id);
    if depth == 0 {
        println!("{}", node.name);
    } else {
        println!("{}{}/", "  ".repeat(depth), node.name);
    }
    for child in tree.children_of(id) {
        print_tree(tree, *child, depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Command {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn ls_defaults_to_root() {
        assert_eq!(
            parse(&["bucketviewd", "ls"]),
            Command::Ls {
                route: "/".to_string(),
                json: false,
                cached: false,
            }
        );
    }

    #[test]
    fn ls_accepts_cached_flag() {
        assert_eq!(
            parse(&["bucketviewd", "ls", "/file/docs/a.txt", "--cached"]),
            Command::Ls {
                route: "/file/docs/a.txt".to_string(),
                json: false,
                cached: true,
            }
        );
    }

    #[test]
    fn upload_requires_files() {
        assert!(Cli::try_parse_from(["bucketviewd", "upload"]).is_err());
        assert_eq!(
            parse(&["bucketviewd", "upload", "--to", "/docs", "a.png", "b.png"]),
            Command::Upload {
                to: "/docs".to_string(),
                files: vec![PathBuf::from("a.png"), PathBuf::from("b.png")],
            }
        );
    }

    #[test]
    fn mv_takes_key_and_folder() {
        assert_eq!(
            parse(&["bucketviewd", "mv", "docs/a.txt", "/docs/img"]),
            Command::Mv {
                key: "docs/a.txt".to_string(),
                folder: "/docs/img".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(Cli::try_parse_from(["bucketviewd", "sync"]).is_err());
    }
}
