use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use imapdict::{Config, MailClient};

#[derive(Parser)]
#[command(version, about = "Fetch and expire mail on an IMAP4 server")]
struct Cli {
    /// Config file (default: <config dir>/imapdict/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print matching messages as JSON
    Fetch {
        /// IMAP search criteria, passed through verbatim
        #[arg(long)]
        search: Option<String>,
        /// IANA timezone for the date and time fields
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Delete messages older than the given number of days
    Delete {
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let (config, created, path) = match &cli.config {
        Some(path) => Config::load_or_create_at(path)?,
        None => Config::load_or_create()?,
    };
    if created {
        info!(path = %path.display(), "wrote default config, fill in the [imap] section and run again");
        return Ok(());
    }

    let client = MailClient::from_config(config.imap.clone());

    match cli.command {
        Command::Fetch { search, timezone } => {
            let search = search.unwrap_or(config.fetch.search);
            let timezone = timezone.unwrap_or(config.fetch.timezone);
            let records = tokio::task::spawn_blocking(move || client.fetch(&search, &timezone))
                .await?
                .context("fetch failed")?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Delete { days } => {
            let days = days.unwrap_or(config.delete.days);
            let deleted = tokio::task::spawn_blocking(move || client.delete(days))
                .await?
                .context("delete failed")?;
            println!("{}", deleted.count);
        }
    }

    Ok(())
}
