//! HTTP Probe
//!
//! Sends one request through the `CapacitorHttp` plugin. Without a native host
//! the request runs on the in-process fallback.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package http-probe -- https://httpbin.org/get -p q=rust -H accept=application/json
//! cargo run --package http-probe -- https://httpbin.org/post -X POST -d '{"hello":"world"}'
//! ```

use anyhow::{Context, Result, bail};
use capacitor::plugins::HttpResponseType;
use capacitor::prelude::*;
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Request URL.
    url: String,

    /// HTTP method.
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Header as `name=value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Query parameter as `key=value`. Repeatable.
    #[arg(short = 'p', long = "param")]
    params: Vec<String>,

    /// JSON body. Plain text when it does not parse as JSON.
    #[arg(short, long)]
    data: Option<String>,

    /// Decode the body as base64 instead of text.
    #[arg(long)]
    binary: bool,

    /// Return redirect responses instead of following them.
    #[arg(long)]
    no_redirects: bool,

    /// Configuration file (defaults to capacitor.toml lookup).
    #[arg(short, long)]
    config: Option<String>,
}

fn split_pair(raw: &str) -> Result<(&str, &str)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("expected key=value, got {raw:?}"),
    }
}

fn options_from(args: &Args) -> Result<HttpOptions> {
    let mut options = HttpOptions::new(&args.url).method(&args.method);
    for header in &args.headers {
        let (name, value) = split_pair(header)?;
        options = options.header(name, value);
    }
    for param in &args.params {
        let (key, value) = split_pair(param)?;
        options = options.param(key, value);
    }
    if let Some(data) = &args.data {
        let body = serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.clone()));
        options = options.data(body);
    }
    if args.binary {
        options = options.response_type(HttpResponseType::Arraybuffer);
    }
    options.disable_redirects = args.no_redirects;
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = Capacitor::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    let cap = builder
        .build()
        .context("failed to start the Capacitor runtime")?
        .install()?;
    info!(platform = %cap.get_platform(), "Runtime ready");

    let plugins = register_core_plugins(cap.registry());
    if !cap.is_plugin_available("WebView") {
        warn!("WebView is native-only; running without it");
    }

    let options = options_from(&args)?;
    let response = plugins.http.request(&options).await?;

    println!("{} {}", response.status, response.url);
    for (name, value) in &response.headers {
        println!("{name}: {value}");
    }
    println!();
    match &response.data {
        Value::String(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}
