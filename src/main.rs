//! Foreman - Entry Point
//!
//! Loads the three JSON config files, connects to Slack and runs the
//! command loop against the local docker daemon.

use anyhow::Context;
use clap::Parser;
use foreman::config::expand_path;
use foreman::{Bot, Config, DockerCli, DockerConfig, SlackChannel, SlackConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "foreman", version, about = "Chat-ops bot for containerized game servers")]
struct Args {
    /// Main configuration file
    #[arg(short = 'c', long = "config", default_value = "./config.json")]
    config: String,

    /// Command permission table
    #[arg(short = 'p', long = "permissions", default_value = "./permissions.json")]
    permissions: String,

    /// Server registry
    #[arg(short = 's', long = "servers", default_value = "./servers.json")]
    servers: String,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Only log warnings and errors
    #[arg(short = 'q', long, conflicts_with = "debug")]
    quiet: bool,

    /// JSON log lines on stderr
    #[arg(long)]
    log_json: bool,

    /// Load malformed permission entries as deny-all instead of failing
    #[arg(long)]
    lenient_permissions: bool,
}

fn log_level(args: &Args) -> Level {
    if args.debug {
        return Level::DEBUG;
    }
    if args.quiet {
        return Level::WARN;
    }
    std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO)
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = log_level(args);

    if args.log_json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args)?;
    info!("Foreman v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load(
        &expand_path(&args.config),
        &expand_path(&args.permissions),
        &expand_path(&args.servers),
        args.lenient_permissions,
    )
    .context("failed to load configuration")?;

    let mut slack = SlackConfig::new(&config.token);
    if let Some(api_base) = config.api_base.as_deref() {
        slack = slack.with_api_base(api_base);
    }
    let transport = SlackChannel::new(slack).context("failed to build Slack client")?;

    let runtime = DockerCli::new(DockerConfig {
        docker_bin: config.runtime.docker_bin.clone(),
        timeout: Duration::from_secs(config.runtime.timeout_secs.max(1)),
    });

    Bot::new(
        Arc::new(transport),
        Arc::new(runtime),
        config.permissions,
        config.servers,
    )
    .with_username(config.username)
    .with_poll_interval(config.poll_interval)
    .run()
    .await
    .context("bot stopped with an error")?;

    Ok(())
}
