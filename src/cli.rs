//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use anetd_core::transfer::constants::{CONNECT_TIMEOUT_SECS, MAX_REDIRECTS, READ_TIMEOUT_SECS};

/// Fetch a URL over HTTP/1.0 or HTTPS.
///
/// Proxies are taken from `http_proxy` / `https_proxy`.
#[derive(Parser, Debug)]
#[command(name = "anetd")]
#[command(author, version, about)]
pub struct Args {
    /// URL to fetch (http:// or https://)
    pub url: String,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Extra request header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Query argument as `name=value`; values split on ',' and ' ' (repeatable)
    #[arg(short = 'a', long = "arg", value_parser = parse_argument)]
    pub arguments: Vec<(String, String)>,

    /// Request body
    #[arg(short = 'd', long)]
    pub data: Option<String>,

    /// Server credentials as `user:password`
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Proxy credentials as `user:password`
    #[arg(long)]
    pub proxy_user: Option<String>,

    /// Write the body into this directory instead of printing it
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// TCP connect timeout in seconds (0 disables)
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS)]
    pub connect_timeout: u64,

    /// Socket read timeout in seconds (0 disables)
    #[arg(long, default_value_t = READ_TIMEOUT_SECS)]
    pub read_timeout: u64,

    /// Maximum redirects to follow (0-50)
    #[arg(long, default_value_t = MAX_REDIRECTS, value_parser = clap::value_parser!(u32).range(0..=50))]
    pub max_redirects: u32,

    /// Print the response summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected 'Name: value', got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in '{raw}'"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn parse_argument(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected 'name=value', got '{raw}'"))?;
    if name.is_empty() {
        return Err(format!("empty argument name in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}
