//! foldsync - push, list and pull whole folders against a foldsyncd server

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use foldsync::cli::{init_tracing, RemoteOpts};
use foldsync::progress::{format_bytes, DownloadSpinner, UploadProgress};
use foldsync::Client;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "foldsync - whole-folder sync client")]
struct Args {
    #[command(flatten)]
    remote: RemoteOpts,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// No progress display
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Connect and print the server greeting
    Probe,
    /// List folders stored on the server
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Exit 0 if the slot exists on the server, 1 if not
    Check {
        /// Slot name, e.g. reports_1234
        name: String,
    },
    /// Upload a local directory, replacing its previous upload
    Push {
        dir: PathBuf,
    },
    /// Download a slot into <dest>/<name without identity>
    Pull {
        name: String,
        #[arg(default_value = ".")]
        dest: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let remote = args.remote.remote()?;
    let config = args.remote.client_config()?;
    let client = Client::with_config(remote.host, remote.port, config);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let code = rt.block_on(run(&client, &args))?;
    std::process::exit(code);
}

async fn run(client: &Client, args: &Args) -> Result<i32> {
    match &args.command {
        Cmd::Probe => {
            let greeting = client
                .probe()
                .await
                .with_context(|| format!("probe {}", client.addr()))?;
            println!("{} {}", client.addr(), greeting);
        }
        Cmd::List { json } => {
            let folders = client.list_folders().await.context("list folders")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&folders)?);
            } else if folders.is_empty() {
                println!("(no folders)");
            } else {
                println!("{:<32} {:>12} {:>12}", "NAME", "ID", "SIZE");
                for f in &folders {
                    println!(
                        "{:<32} {:>12} {:>12}",
                        f.display_name,
                        f.identity,
                        format_bytes(f.size_bytes)
                    );
                }
            }
        }
        Cmd::Check { name } => {
            let present = client
                .check_folder(name)
                .await
                .with_context(|| format!("check {name}"))?;
            println!("{name}: {}", if present { "present" } else { "absent" });
            if !present {
                return Ok(1);
            }
        }
        Cmd::Push { dir } => {
            let progress = UploadProgress::new(args.quiet);
            let result = client
                .upload_folder(dir, |i, n, rel| progress.file(i, n, rel))
                .await;
            match result {
                Ok(outcome) => {
                    progress.finish(outcome.summary.files, outcome.summary.bytes);
                    println!("stored as {}", outcome.remote_name);
                }
                Err(e) => {
                    progress.abandon(&e.to_string());
                    return Err(e).with_context(|| format!("push {}", dir.display()));
                }
            }
        }
        Cmd::Pull { name, dest } => {
            let mut spinner = DownloadSpinner::new(args.quiet);
            let result = client
                .download_folder(name, dest, |rel| spinner.file(rel))
                .await;
            match result {
                Ok(target) => spinner.finish(&target.display().to_string()),
                Err(e) => {
                    spinner.abandon(&e.to_string());
                    return Err(e).with_context(|| format!("pull {name}"));
                }
            }
        }
    }
    Ok(0)
}
