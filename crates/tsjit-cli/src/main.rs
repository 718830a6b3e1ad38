use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tsjit_core::alias::ConfigResolver;
use tsjit_core::cache::{CODE_EXTENSION, MAP_EXTENSION};
use tsjit_core::config::CacheSettings;
use walkdir::WalkDir;

/// tsjit - inspect and maintain the just-in-time transform cache
#[derive(Parser, Debug)]
#[command(name = "tsjit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete every cached artifact
    ClearCache {
        /// Cache root (default: TSJIT_CACHE_DIR or the system temp directory)
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },

    /// Summarize what the cache holds
    Stats {
        /// Cache root (default: TSJIT_CACHE_DIR or the system temp directory)
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },

    /// Resolve an import specifier through the path aliases applying to FILE
    Resolve {
        /// File the import is written in
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Import specifier, e.g. `lib/util`
        #[arg(value_name = "SPECIFIER")]
        specifier: String,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct CacheStats {
    shards: usize,
    code_files: usize,
    map_files: usize,
    total_bytes: u64,
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays parseable
    // Set RUST_LOG=debug for detailed logs
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::ClearCache { cache_dir } => clear_cache(&cache_root(cache_dir)),
        Command::Stats { cache_dir } => print_stats(&cache_root(cache_dir)),
        Command::Resolve { file, specifier } => resolve(&file, &specifier),
    }
}

fn cache_root(cache_dir: Option<PathBuf>) -> PathBuf {
    cache_dir.unwrap_or_else(|| CacheSettings::from_env().cache_root)
}

fn clear_cache(root: &Path) -> anyhow::Result<()> {
    if !root.exists() {
        println!("Cache directory {} does not exist", root.display());
        return Ok(());
    }

    let stats = collect_stats(root);
    std::fs::remove_dir_all(root)
        .with_context(|| format!("Failed to remove cache directory {}", root.display()))?;

    info!("Removed cache directory {}", root.display());
    println!(
        "Removed {} artifact(s) ({} bytes) from {}",
        stats.code_files + stats.map_files,
        stats.total_bytes,
        root.display()
    );
    Ok(())
}

fn print_stats(root: &Path) -> anyhow::Result<()> {
    let stats = collect_stats(root);

    println!("Cache directory: {}", root.display());
    println!("Shards:          {}", stats.shards);
    println!("Code artifacts:  {}", stats.code_files);
    println!("Map artifacts:   {}", stats.map_files);
    println!("Total bytes:     {}", stats.total_bytes);
    Ok(())
}

fn collect_stats(root: &Path) -> CacheStats {
    let mut stats = CacheStats::default();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() {
            if entry.depth() == 1 {
                stats.shards += 1;
            }
            continue;
        }

        // Leftover temp files from interrupted writes are not artifacts
        let extension = entry.path().extension().and_then(|e| e.to_str());
        match extension {
            Some(CODE_EXTENSION) => stats.code_files += 1,
            Some(MAP_EXTENSION) => stats.map_files += 1,
            _ => {
                debug!("Skipping {}", entry.path().display());
                continue;
            }
        }
        stats.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
    }

    stats
}

fn resolve(file: &Path, specifier: &str) -> anyhow::Result<()> {
    let file = if file.is_absolute() {
        file.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to read current directory")?
            .join(file)
    };

    let Some(fingerprint) = ConfigResolver::default().resolve_for(&file) else {
        println!("No path aliases apply to {}", file.display());
        return Ok(());
    };

    match fingerprint.resolve_import(specifier) {
        Some(resolved) => println!("{}", resolved.display()),
        None => println!("No alias matches '{specifier}'"),
    }
    Ok(())
}
