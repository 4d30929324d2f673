//! pagelog CLI
//!
//! Command-line interface for pagelog - a synced log of pages read.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use pagelog_core::Config;

mod commands;
mod output;
mod tui;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "pagelog")]
#[command(about = "pagelog - Log pages read, synced across devices")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use a different config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Use a volatile in-memory store instead of the configured one
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the TUI interface
    Tui,
    /// Log pages read
    Add {
        /// Number of pages (a positive whole number)
        #[arg(allow_hyphen_values = true)]
        pages: String,
    },
    /// Delete a reading
    Delete {
        /// Reading ID (or unique prefix)
        id: String,
    },
    /// List all readings
    List,
    /// Show today's and total pages
    Stats,
    /// Show pages read per day
    History {
        /// Only show the most recent days
        #[arg(long)]
        days: Option<usize>,
    },
    /// Show or share the user identity
    Identity {
        #[command(subcommand)]
        command: Option<IdentityCommands>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Host the local store for other devices
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:4040")]
        listen: String,
    },
}

#[derive(Subcommand, Clone)]
enum IdentityCommands {
    /// Show the current user id
    Show,
    /// Print a token that signs another device in as this user
    Token,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (data_dir, store_url, app_id, bootstrap_token, log_file)
        key: String,
        /// Value to set
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Commands that don't need the store
    match &cli.command {
        Some(Commands::Config { command }) => {
            return handle_config_command(command.clone(), config_path, &output);
        }
        // TUI (default when no command given) sets up its own logging
        Some(Commands::Tui) | None => {
            return tui::run(config_path, cli.memory).await;
        }
        _ => {}
    }

    init_logging();

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match cli.command {
        Some(Commands::Identity { command }) => match command.unwrap_or(IdentityCommands::Show) {
            IdentityCommands::Show => commands::identity::show(&config, &output).await,
            IdentityCommands::Token => commands::identity::token(&config, &output).await,
        },
        Some(Commands::Serve { listen }) => {
            commands::serve::run(&config, &listen, cli.memory, &output).await
        }
        Some(command) => {
            let mut session = commands::open_session(&config, cli.memory).await?;
            match command {
                Commands::Add { pages } => {
                    commands::reading::add(&mut session, &pages, &output).await
                }
                Commands::Delete { id } => {
                    commands::reading::delete(&mut session, &id, &output).await
                }
                Commands::List => commands::reading::list(&mut session, &output).await,
                Commands::Stats => commands::reading::show_stats(&mut session, &output).await,
                Commands::History { days } => {
                    commands::reading::history(&mut session, days, &output).await
                }
                // Handled above
                Commands::Tui
                | Commands::Config { .. }
                | Commands::Identity { .. }
                | Commands::Serve { .. } => Ok(()),
            }
        }
        None => Ok(()),
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Log to stderr, filtered by PAGELOG_LOG (default: warn)
fn init_logging() {
    let env_filter =
        EnvFilter::try_from_env("PAGELOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
