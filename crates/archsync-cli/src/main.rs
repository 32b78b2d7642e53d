//! archsync: keep archives and directory trees in sync.
//!
//! # Usage
//!
//! ```bash
//! # Add everything under ./site to bundle.zip, skipping unchanged files
//! archsync add bundle.zip site
//!
//! # Extract only what is missing locally
//! archsync --mode if_missing extract bundle.zip out
//!
//! # Wrap a 7z payload into a self-extracting installer
//! archsync sfx setup.exe site --info Title="My App"
//! ```

use archsync_format::PathPattern;
use archsync_runtime::{
    ArchiveSession, ArchiveType, EntrySelection, SfxBuilder, SyncConfig, SyncMode, SyncPolicy,
};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

/// Idempotent archive to filesystem synchronization.
#[derive(Parser, Debug)]
#[command(name = "archsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding checksum manifests (overrides the config file)
    #[arg(long, global = true, value_name = "DIR")]
    cache_root: Option<PathBuf>,

    /// Path to the 7-Zip executable (overrides the config file)
    #[arg(long, global = true, value_name = "FILE")]
    seven_zip: Option<PathBuf>,

    /// idempotent, overwrite, or if_missing
    #[arg(long, global = true, default_value = "idempotent")]
    mode: SyncMode,

    /// Archive type (zip or 7z); detected when omitted
    #[arg(long = "type", global = true, value_name = "TYPE")]
    archive_type: Option<ArchiveType>,

    /// Password forwarded to the 7z backend
    #[arg(long, global = true)]
    password: Option<String>,

    /// Wildcard of paths to always skip (repeatable)
    #[arg(long, global = true, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Regular expression of paths to always skip (repeatable)
    #[arg(long, global = true, value_name = "REGEX")]
    exclude_regex: Vec<String>,

    /// Wildcard of paths to skip once present on the other side
    #[arg(long, global = true, value_name = "PATTERN")]
    exclude_unless_missing: Vec<String>,

    /// Wildcard of paths to skip unless the archive changed since the last sync
    #[arg(long, global = true, value_name = "PATTERN")]
    exclude_unless_archive_changed: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add files from a directory to an archive
    Add {
        archive: PathBuf,
        source: PathBuf,
        /// Paths or globs relative to SOURCE
        #[arg(default_value = "*")]
        specs: Vec<String>,
    },
    /// Extract archive entries into a directory
    Extract {
        archive: PathBuf,
        destination: PathBuf,
        /// Entry paths to extract; all entries when omitted
        entries: Vec<String>,
    },
    /// Print one entry of a zip archive to stdout
    View { archive: PathBuf, entry: PathBuf },
    /// List archive entries
    List { archive: PathBuf },
    /// Build a self-extracting package
    Sfx {
        output: PathBuf,
        source: PathBuf,
        #[arg(default_value = "*")]
        specs: Vec<String>,
        /// Control block option as KEY=VALUE (repeatable)
        #[arg(long, value_name = "KEY=VALUE", value_parser = parse_info)]
        info: Vec<(String, String)>,
        /// Workspace folder name
        #[arg(long)]
        workspace_name: Option<String>,
    },
}

fn parse_info(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got {}", raw))
}

fn load_config(args: &Args) -> archsync_runtime::Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::from_toml_file(path)?,
        None => SyncConfig::default(),
    };
    if let Some(cache_root) = &args.cache_root {
        config = config.with_cache_root(cache_root);
    }
    if let Some(seven_zip) = &args.seven_zip {
        config = config.with_seven_zip_path(seven_zip);
    }
    Ok(config)
}

fn build_policy(args: &Args) -> archsync_runtime::Result<SyncPolicy> {
    let mut policy = SyncPolicy::new(args.mode);
    for pattern in &args.exclude {
        policy = policy.exclude(pattern.as_str());
    }
    for pattern in &args.exclude_regex {
        policy = policy.exclude(PathPattern::regex(pattern)?);
    }
    for pattern in &args.exclude_unless_missing {
        policy = policy.exclude_unless_missing(pattern.as_str());
    }
    for pattern in &args.exclude_unless_archive_changed {
        policy = policy.exclude_unless_archive_changed(pattern.as_str());
    }
    if let Some(archive_type) = args.archive_type {
        policy = policy.with_archive_type(archive_type);
    }
    if let Some(password) = &args.password {
        policy = policy.with_password(password.as_str());
    }
    Ok(policy)
}

fn run(args: Args) -> archsync_runtime::Result<()> {
    let config = load_config(&args)?;
    let policy = build_policy(&args)?;

    match args.command {
        Command::Add {
            archive,
            source,
            specs,
        } => {
            let mut session = ArchiveSession::open(&archive, policy, config, None)?;
            let manifest = session.add(&source, &specs)?;
            info!("{} now tracks {} entries", archive.display(), manifest.len());
        }
        Command::Extract {
            archive,
            destination,
            entries,
        } => {
            let mut session = ArchiveSession::open(&archive, policy, config, None)?;
            let selection = EntrySelection::from_specs(&entries);
            session.extract(&destination, &selection)?;
        }
        Command::View { archive, entry } => {
            let session = ArchiveSession::open(&archive, policy, config, None)?;
            let bytes = session.view_file(&entry.to_string_lossy())?;
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
        Command::List { archive } => {
            let session = ArchiveSession::open(&archive, policy, config, None)?;
            let mut stdout = io::stdout().lock();
            for entry in session.list()? {
                let suffix = if entry.is_directory { "/" } else { "" };
                writeln!(stdout, "{}{}", entry.relative_path, suffix)?;
            }
        }
        Command::Sfx {
            output,
            source,
            specs,
            info,
            workspace_name,
        } => {
            let mut builder = SfxBuilder::new(&output, policy, config);
            if let Some(name) = workspace_name {
                builder = builder.with_workspace_name(name);
            }
            let options: BTreeMap<String, String> = info.into_iter().collect();
            let manifest = builder.create(&source, &specs, &options)?;
            info!("{} packages {} entries", output.display(), manifest.len());
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(args) {
        error!("{}", e);
        process::exit(1);
    }
}
