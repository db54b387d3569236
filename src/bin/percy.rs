//! Percy Rust CLI.
//!
//! Small utilities around the SDK: check that a Percy CLI server is running,
//! or take one DOM snapshot of a page in an already running Chrome.
//!
//! Usage examples:
//!   $ percy healthcheck
//!   $ percy snapshot --cdp-url ws://127.0.0.1:9222/devtools/browser/<id> \
//!       --url https://example.com --name "Home page" --widths 375,1280

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chromiumoxide::Browser;
use chromiumoxide::handler::Handler;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use percy_rs::{
    ChromiumoxideHandle, LogCallback, LogLevel, Options, Percy, PercyConfig, PercyConfigOverrides,
    PercyLogRecord, Verbosity,
};
use serde_json::Value as JsonValue;
use tokio::runtime::Runtime;

#[derive(Parser)]
#[command(name = "percy", author, version, about = "Percy Rust SDK utilities")]
struct Cli {
    /// Increase log verbosity (pass once for debug diagnostics).
    #[arg(long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether a compatible Percy CLI server is reachable.
    Healthcheck,
    /// Take a DOM snapshot of a page in a running Chrome.
    Snapshot(SnapshotArgs),
}

#[derive(Args)]
struct SnapshotArgs {
    /// DevTools websocket URL of the running browser.
    #[arg(long)]
    cdp_url: String,

    /// Page to open before taking the snapshot.
    #[arg(long)]
    url: String,

    /// Snapshot name shown in the Percy build.
    #[arg(long)]
    name: String,

    /// Widths to render the snapshot at.
    #[arg(long, value_delimiter = ',')]
    widths: Vec<u32>,

    /// Minimum height of the rendered snapshot.
    #[arg(long)]
    min_height: Option<u32>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_env_logger(cli.verbose);

    let config = PercyConfig::from_env().context("failed to read Percy configuration")?;
    let mut overrides = PercyConfigOverrides::default().logger(make_logger_callback());
    if cli.verbose > 0 {
        overrides = overrides.verbose(Verbosity::Detailed);
    }
    let percy = Percy::new(config.with_overrides(overrides))?;

    match cli.command {
        Command::Healthcheck => run_healthcheck(&percy),
        Command::Snapshot(args) => run_snapshot(&percy, args),
    }
}

fn run_healthcheck(percy: &Percy) -> Result<()> {
    if !percy.is_enabled() {
        bail!("Percy CLI at {} is not available", percy.config().cli_api);
    }
    println!("enabled: true");
    println!("session mode: {}", percy.session_mode());
    Ok(())
}

fn run_snapshot(percy: &Percy, args: SnapshotArgs) -> Result<()> {
    let runtime = Runtime::new().context("failed to start tokio runtime")?;

    let (browser, handler) = runtime
        .block_on(Browser::connect(args.cdp_url.as_str()))
        .with_context(|| format!("failed to connect to {}", args.cdp_url))?;
    let handler_task = runtime.spawn(drive_handler(handler));

    let page = runtime.block_on(async {
        let page = browser.new_page(args.url.as_str()).await?;
        page.wait_for_navigation().await?;
        Ok::<_, chromiumoxide::error::CdpError>(page)
    })?;
    info!("opened {}", args.url);

    let handle = ChromiumoxideHandle::new(runtime.handle().clone(), &browser, page);
    let options = snapshot_options(&args);
    let result = percy.snapshot(&handle, &args.name, options.as_ref());

    handler_task.abort();

    match result? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => warn!("snapshot \"{}\" was not taken", args.name),
    }
    Ok(())
}

fn snapshot_options(args: &SnapshotArgs) -> Option<Options> {
    let mut options = Options::new();
    if !args.widths.is_empty() {
        options.insert("widths".into(), JsonValue::from(args.widths.clone()));
    }
    if let Some(min_height) = args.min_height {
        options.insert("minHeight".into(), JsonValue::from(min_height));
    }
    (!options.is_empty()).then_some(options)
}

async fn drive_handler(mut handler: Handler) {
    while let Some(result) = handler.next().await {
        if let Err(err) = result {
            warn!("chromiumoxide handler error: {err}");
        }
    }
}

fn make_logger_callback() -> LogCallback {
    Arc::new(|record: &PercyLogRecord| match record.level {
        LogLevel::Error => error!("{}", record.message),
        LogLevel::Info => info!("{}", record.message),
        LogLevel::Debug => debug!("{}", record.message),
    })
}

fn init_env_logger(verbose: u8) {
    if env::var("RUST_LOG").is_err() {
        let level = if verbose > 0 { "debug" } else { "info" };
        unsafe {
            env::set_var("RUST_LOG", level);
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
