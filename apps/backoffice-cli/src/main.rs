use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod common;
mod config;
mod request;
mod tenant;
mod token;

use common::Context;

/// Back-office API client
#[derive(Parser)]
#[command(name = "backoffice", about = "Back-office API client", version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Token and tenant storage file
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the stored access and refresh tokens
    Token(token::TokenArgs),
    /// Manage the stored tenant
    Tenant(tenant::TenantArgs),
    /// Call the backend and print the response
    Request(request::RequestArgs),
    /// Print the effective configuration
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = Context::load(cli.config.as_deref(), cli.store)?;
    match cli.command {
        Commands::Token(args) => args.run(&ctx),
        Commands::Tenant(args) => args.run(&ctx),
        Commands::Request(args) => args.run(&ctx).await,
        Commands::Config(args) => args.run(&ctx),
    }
}

/// `RUST_LOG` wins; otherwise the level follows `-v`.
fn init_logging(verbose: u8) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}
