//! stowage - command-line access to an S3-compatible object store
//!
//! Usage:
//!   stowage [-c config.toml] [--metrics] <command> [args...]
//!
//! Configuration comes from the TOML file when given, otherwise from
//! `STOWAGE_*` environment variables. A bucket of `-` means the configured
//! default bucket.

use anyhow::{Context, bail};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use stowage::config::Config;
use stowage::hooks::TracingHook;
use stowage::metrics::Metrics;
use stowage::object::{DownloadTarget, ObjectDescriptor, UploadSource};
use stowage::{CallOptions, SharedClient, StowageError};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: stowage [-c config.toml] [--metrics] <command> [args...]

commands:
  put <bucket> <key> <file> [content-type]   upload a local file
  get <bucket> <key> <file>                  download to a local file
  exists <bucket> <key>                      print true/false
  size <bucket> <key>                        print object size in bytes
  head <bucket> <key>                        print size, etag, content type, metadata
  rm <bucket> <key>                          delete an object
  presign <bucket> <key> [ttl] [get|put]     print a presigned URL (default 3600s, get)
  set-meta <bucket> <key> [k=v ...]          replace user metadata";

/// Default lifetime of presigned URLs, in seconds
const DEFAULT_PRESIGN_TTL: i64 = 3600;

#[derive(Debug)]
struct Cli {
    config_path: Option<String>,
    show_metrics: bool,
    show_help: bool,
    command: Vec<String>,
}

impl Cli {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut cli = Self {
            config_path: None,
            show_metrics: false,
            show_help: false,
            command: Vec::new(),
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    cli.config_path = Some(args.next().context("--config needs a path")?);
                }
                "--metrics" => cli.show_metrics = true,
                "-h" | "--help" => {
                    cli.show_help = true;
                    return Ok(cli);
                }
                _ => {
                    cli.command.push(arg);
                    cli.command.extend(args.by_ref());
                }
            }
        }

        if cli.command.is_empty() {
            bail!("{USAGE}");
        }
        Ok(cli)
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing; stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse(std::env::args().skip(1))?;
    if cli.show_help {
        println!("{USAGE}");
        return Ok(());
    }

    // Load configuration
    let config = if let Some(ref config_path) = cli.config_path {
        info!("Loading configuration from {}", config_path);
        Config::from_file(config_path)?
    } else {
        debug!("Using environment configuration (STOWAGE_* variables)");
        Config::from_env()
    };

    debug!("Configuration: {:?}", config);

    let runtime = Builder::new_multi_thread().enable_all().build()?;
    runtime.block_on(async_main(config, cli))
}

async fn async_main(config: Config, cli: Cli) -> anyhow::Result<()> {
    let metrics = if config.metrics.enabled {
        Some(Arc::new(Metrics::new(&config.metrics)?))
    } else {
        None
    };

    let mut shared = SharedClient::new(config.storage.clone()).with_hook(Arc::new(TracingHook));
    if let Some(ref metrics) = metrics {
        shared = shared.with_hook(metrics.clone());
    }

    // Ctrl-C cancels the in-flight request
    let cancel_token = CancellationToken::new();
    let cancel_for_signal = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, cancelling...");
            cancel_for_signal.cancel();
        }
    });

    let result = run_command(&shared, &cli.command, cancel_token).await;
    shared.close().await;

    if cli.show_metrics {
        if let Some(ref metrics) = metrics {
            eprintln!("{}", metrics.gather()?);
        }
    }

    result
}

async fn run_command(
    shared: &SharedClient,
    command: &[String],
    cancel_token: CancellationToken,
) -> anyhow::Result<()> {
    let client = shared.get_instance().await?;
    let call = client.with_options(CallOptions::new().cancel_on(cancel_token));

    let (name, args) = command.split_first().context(USAGE)?;
    match (name.as_str(), args) {
        ("put", [bucket, key, file, rest @ ..]) => {
            let mut desc = descriptor(bucket, key);
            if let Some(content_type) = rest.first() {
                desc = desc.with_content_type(content_type.as_str());
            }
            let result = call
                .upload(&desc, UploadSource::Path(PathBuf::from(file)))
                .await?;
            println!(
                "uploaded {}/{} ({} bytes, etag {})",
                result.bucket,
                result.key,
                result.size,
                result.etag.as_deref().unwrap_or("-")
            );
        }
        ("get", [bucket, key, file]) => {
            let written = call
                .download(&descriptor(bucket, key), DownloadTarget::Path(PathBuf::from(file)))
                .await?;
            println!("downloaded {written} bytes to {file}");
        }
        ("exists", [bucket, key]) => {
            println!("{}", call.exists(&descriptor(bucket, key)).await?);
        }
        ("size", [bucket, key]) => {
            println!("{}", call.size(&descriptor(bucket, key)).await?);
        }
        ("head", [bucket, key]) => {
            let head = call.head(&descriptor(bucket, key)).await?;
            println!("size: {}", head.size);
            println!("etag: {}", head.etag.as_deref().unwrap_or("-"));
            println!("content-type: {}", head.content_type.as_deref().unwrap_or("-"));
            let mut entries: Vec<_> = head.metadata.iter().collect();
            entries.sort();
            for (k, v) in entries {
                println!("meta {k}: {v}");
            }
        }
        ("rm", [bucket, key]) => {
            call.delete(&descriptor(bucket, key)).await?;
        }
        ("presign", [bucket, key, rest @ ..]) => {
            let ttl = match rest.first() {
                Some(raw) => raw.parse().context("ttl must be an integer")?,
                None => DEFAULT_PRESIGN_TTL,
            };
            let desc = descriptor(bucket, key);
            let url = match rest.get(1).map(String::as_str) {
                None | Some("get") => call.presigned_url(&desc, ttl).await?,
                Some("put") => call.presigned_upload_url(&desc, ttl).await?,
                Some(other) => bail!("unknown presign method {other:?}"),
            };
            println!("{}", url.url);
        }
        ("set-meta", [bucket, key, pairs @ ..]) => {
            let metadata = parse_pairs(pairs)?;
            let result = call.update_metadata(&descriptor(bucket, key), metadata).await?;
            println!("updated {}/{} ({} bytes)", result.bucket, result.key, result.size);
        }
        _ => bail!("{USAGE}"),
    }

    Ok(())
}

fn descriptor(bucket: &str, key: &str) -> ObjectDescriptor {
    if bucket == "-" {
        ObjectDescriptor::in_default_bucket(key)
    } else {
        ObjectDescriptor::new(bucket, key)
    }
}

fn parse_pairs(pairs: &[String]) -> Result<HashMap<String, String>, StowageError> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| StowageError::InvalidArgument(format!("expected k=v, got {pair:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| (*s).to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn test_help_is_not_an_error() {
        let cli = Cli::parse(args(&["--help"])).unwrap();
        assert!(cli.show_help);

        let cli = Cli::parse(args(&["-c", "stowage.toml", "-h"])).unwrap();
        assert!(cli.show_help);
        assert_eq!(cli.config_path.as_deref(), Some("stowage.toml"));
    }

    #[test]
    fn test_parse_command() {
        let cli = Cli::parse(args(&["--metrics", "presign", "-", "k", "60"])).unwrap();
        assert!(cli.show_metrics);
        assert!(!cli.show_help);
        assert_eq!(cli.command, vec!["presign", "-", "k", "60"]);
    }

    #[test]
    fn test_missing_command_is_rejected() {
        assert!(Cli::parse(args(&[])).is_err());
    }

    #[test]
    fn test_parse_pairs() {
        let pairs = parse_pairs(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(pairs.get("b").map(String::as_str), Some("x=y"));
        assert!(parse_pairs(&["novalue".to_string()]).is_err());
    }
}
