mod commands;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;
use crate::output::OutputFormat;

/// Spdb administration tool
///
/// Puts, fetches and erases chunks in an Spdb store served by an Spdb
/// server. URLs take the form `spdbp:://host[:port]::dir`.
#[derive(Parser, Debug)]
#[command(name = "spdb-admin", version, about)]
struct Cli {
    /// Output format (table or json).
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Enable verbose logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Connect timeout in milliseconds, -1 to block.
    #[arg(long, default_value_t = 10_000, allow_hyphen_values = true)]
    connect_timeout_ms: i64,

    /// Per read/write timeout in milliseconds, -1 to block.
    #[arg(long, default_value_t = 60_000, allow_hyphen_values = true)]
    io_timeout_ms: i64,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .with_writer(std::io::stderr)
        .init();

    let config = spdb_client::ClientConfig {
        put_threading: false,
        connect_timeout_ms: cli.connect_timeout_ms,
        io_timeout_ms: cli.io_timeout_ms,
        app_name: "spdb-admin".to_string(),
        ..spdb_client::ClientConfig::default()
    };

    let text = cli.command.run(config, cli.format).await?;
    print!("{text}");
    Ok(())
}
