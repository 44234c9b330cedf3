//! Chainsock - connect to a host through a proxy chain
//!
//! This is the main entry point for the chainsock command-line tool.

use anyhow::{anyhow, Context, Result};
use chainsock::config::{load_config, ClientConfig};
use chainsock::{Endpoint, InternalError, Session};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Longest response line printed
const LINE_BUFFER_SIZE: usize = 16 * 1024;

/// Chainsock - connect to a host through SOCKS4/SOCKS5/HTTP proxy chains
#[derive(Parser, Debug)]
#[command(name = "chainsock")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target as host:port ([v6]:port for IPv6 literals)
    target: String,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Proxy URL (type://[user:pass@]host:port), repeat to build a chain
    #[arg(short, long = "proxy")]
    proxies: Vec<String>,

    /// Timeout per operation in milliseconds (0 disables it)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Negotiate TLS with the target
    #[arg(long)]
    tls: bool,

    /// Line to send after connecting (CRLF is appended)
    #[arg(long)]
    send: Option<String>,

    /// Number of response lines to print
    #[arg(long, default_value_t = 1)]
    lines: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level, args.json_log)?;

    // Load configuration, command-line proxies extend the configured chain
    let mut config = match args.config {
        Some(ref path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config.client
        }
        None => ClientConfig::default(),
    };
    config.proxies.extend(args.proxies.iter().cloned());
    if let Some(timeout) = args.timeout {
        config.timeout_ms = timeout;
    }
    config.validate().map_err(|e| anyhow!(e))?;

    let target: Endpoint = args
        .target
        .parse()
        .map_err(|_| anyhow!("Invalid target {:?}, expected host:port", args.target))?;

    info!("Chainsock v{}", chainsock::VERSION);
    let mut session = Session::from_config(&config).context("Failed to build proxy chain")?;
    run(&mut session, &target, &args).map_err(|_| {
        anyhow!(session
            .error_detailed()
            .unwrap_or_else(|| "unknown error".to_string()))
    })?;

    session.disconnect();
    Ok(())
}

/// Connect, send the payload and print the response lines
fn run(session: &mut Session, target: &Endpoint, args: &Args) -> chainsock::Result<()> {
    session.connect(target.host(), target.port(), args.tls)?;

    if let Some(ref text) = args.send {
        let payload = format!("{}\r\n", text);
        session.send(payload.as_bytes(), 0)?;
    }

    let mut line = vec![0u8; LINE_BUFFER_SIZE];
    for _ in 0..args.lines {
        match session.readline(&mut line) {
            Ok(len) => println!("{}", String::from_utf8_lossy(&line[..len])),
            Err(e) if e.internal_kind() == Some(InternalError::RemoteDisconnected) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// Setup logging based on command-line flags
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "chainsock",
            "-p",
            "socks5://10.0.0.1:1080",
            "--proxy",
            "http://10.0.0.2:3128",
            "--timeout",
            "500",
            "--tls",
            "--send",
            "HEAD / HTTP/1.0",
            "--lines",
            "3",
            "example.com:443",
        ])
        .unwrap();
        assert_eq!(args.proxies.len(), 2);
        assert_eq!(args.timeout, Some(500));
        assert!(args.tls);
        assert_eq!(args.lines, 3);
        assert_eq!(args.target, "example.com:443");
    }

    #[test]
    fn test_args_require_target() {
        assert!(Args::try_parse_from(["chainsock"]).is_err());
    }
}
