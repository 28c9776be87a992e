//! s3direct CLI - download objects from S3
//!
//! Thin front end over `S3Util`. Settings come from a TOML file when one
//! exists, with command line flags taking precedence.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use s3direct_client::S3Util;
use s3direct_common::Config;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "s3direct")]
#[command(about = "Download S3 objects, optionally bypassing the page cache")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/s3direct/s3direct.toml")]
    config: String,

    /// Bucket to read from
    #[arg(short, long, env = "S3DIRECT_BUCKET")]
    bucket: Option<String>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Endpoint of an S3-compatible store (e.g. http://minio:9000)
    #[arg(long)]
    endpoint: Option<String>,

    /// Write files with direct I/O
    #[arg(long)]
    direct_io: bool,

    /// Direct I/O buffer size in pages
    #[arg(long)]
    buffer_pages: Option<usize>,

    /// Download rate limit in MB/s (0 disables)
    #[arg(long)]
    read_ratelimit_mb: Option<u32>,

    /// Log level (defaults to the config file's, then "info")
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download one object
    Get {
        /// Object key
        key: String,
        /// Local file to write
        path: PathBuf,
    },
    /// Download one object given as s3://bucket/key
    GetUrl {
        /// Full object path
        url: String,
        /// Local file to write
        path: PathBuf,
    },
    /// Download every object directly under a prefix
    GetPrefix {
        /// Key prefix
        prefix: String,
        /// Local directory to write into
        dir: PathBuf,
        /// Delimiter separating key levels; empty keeps nested keys
        #[arg(short, long, default_value = "/")]
        delimiter: String,
    },
    /// List keys under a prefix
    Ls {
        /// Key prefix
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Show object metadata
    Head {
        /// Object key
        key: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if Path::new(&args.config).exists() {
        Config::from_file(&args.config)
            .with_context(|| format!("loading config from {}", args.config))?
    } else {
        Config::default()
    };

    // CLI takes precedence over the config file
    if let Some(bucket) = &args.bucket {
        config.s3.bucket.clone_from(bucket);
    }
    if let Some(region) = &args.region {
        config.s3.region.clone_from(region);
    }
    if args.endpoint.is_some() {
        config.s3.endpoint_override.clone_from(&args.endpoint);
    }
    if args.direct_io {
        config.direct_io.enabled = true;
    }
    if let Some(pages) = args.buffer_pages {
        config.direct_io.buffer_pages = pages;
    }
    if let Some(mb) = args.read_ratelimit_mb {
        config.s3.read_ratelimit_mb = mb;
    }
    Ok(config)
}

/// Format bytes as a human-readable size string.
fn format_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn build_util(config: &Config) -> Result<std::sync::Arc<S3Util>> {
    config.validate()?;
    match S3Util::build_with_config(config) {
        Some(util) => Ok(util),
        None => bail!("failed to initialize S3 client for bucket {}", config.s3.bucket),
    }
}

fn download(util: &S3Util, key: &str, path: &Path, direct_io: bool) -> Result<()> {
    let resp = util.get_object(key, path, direct_io);
    if !resp.is_ok() {
        bail!("{key}: {}", resp.error());
    }
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or_default();
    println!("{key} -> {} ({})", path.display(), format_size(size));
    Ok(())
}

fn run(args: Args, mut config: Config) -> Result<bool> {
    let direct_io = config.direct_io.enabled;

    if let Commands::GetUrl { url, .. } = &args.command {
        let (bucket, _) = S3Util::parse_full_s3_path(url)?;
        config.s3.bucket = bucket;
    }

    let util = build_util(&config)?;
    info!(bucket = util.bucket(), uri = util.endpoint_uri(), direct_io, "ready");

    match args.command {
        Commands::Get { key, path } => download(&util, &key, &path, direct_io)?,
        Commands::GetUrl { url, path } => {
            let (_, key) = S3Util::parse_full_s3_path(&url)?;
            download(&util, &key, &path, direct_io)?;
        }
        Commands::GetPrefix {
            prefix,
            dir,
            delimiter,
        } => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;
            let resp = util.get_objects(&prefix, &dir, &delimiter, direct_io);
            if !resp.is_ok() {
                bail!("listing {prefix}: {}", resp.error());
            }

            let mut failed = 0usize;
            for d in resp.body() {
                if d.is_ok() {
                    println!("{} -> {}", d.key, d.local_path.display());
                } else {
                    failed += 1;
                    eprintln!("FAILED {}: {}", d.key, d.response.error());
                }
            }
            println!();
            println!(
                "{} downloaded, {failed} failed",
                resp.body().len() - failed
            );
            return Ok(failed == 0);
        }
        Commands::Ls { prefix } => {
            let resp = util.list_objects(&prefix);
            if !resp.is_ok() {
                bail!("listing {prefix}: {}", resp.error());
            }
            for key in resp.body() {
                println!("{key}");
            }
        }
        Commands::Head { key, json } => {
            let resp = util.get_object_metadata(&key);
            if !resp.is_ok() {
                bail!("{key}: {}", resp.error());
            }
            let mut entries: Vec<_> = resp.body().iter().collect();
            entries.sort();
            if json {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&map)?);
            } else {
                for (name, value) in entries {
                    println!("{name:<32} {value}");
                }
            }
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args, config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024 / 2), "2.5 GiB");
    }

    #[test]
    fn test_cli_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s3direct.toml");
        std::fs::write(
            &path,
            "[s3]\nbucket = \"from-file\"\nregion = \"eu-west-1\"\n\n[direct_io]\nbuffer_pages = 4\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "s3direct",
            "--config",
            path.to_str().unwrap(),
            "--bucket",
            "from-cli",
            "--direct-io",
            "ls",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.s3.bucket, "from-cli");
        assert_eq!(config.s3.region, "eu-west-1");
        assert!(config.direct_io.enabled);
        assert_eq!(config.direct_io.buffer_pages, 4);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let args = Args::parse_from([
            "s3direct",
            "--config",
            "/nonexistent/s3direct.toml",
            "head",
            "k",
        ]);
        let config = load_config(&args).unwrap();
        assert!(config.s3.bucket.is_empty());
        assert_eq!(config.direct_io.buffer_pages, 1);
    }
}
