//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use hrdesk_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "hrdesk")]
#[command(version)]
#[command(about = "Command line client for the HR administration API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the API base URL (wins over config and HRDESK_BASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in and store the token pair
    Login {
        /// User name
        #[arg(short, long)]
        user: String,

        /// Password (read from stdin when omitted)
        #[arg(long, env = "HRDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Log out (clear stored tokens)
    Logout,

    /// Show whether a session is stored and when its access token expires
    Status,

    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        #[arg(value_name = "METHOD")]
        method: String,

        /// Resource path relative to the base URL (e.g. Goal/Goals)
        #[arg(value_name = "PATH")]
        path: String,

        /// JSON request body
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,

        /// Extra header, "Name: value" (repeatable)
        #[arg(short = 'H', long = "header", value_name = "HEADER")]
        headers: Vec<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
    /// Print a fresh config generated from defaults
    Generate,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let config = config::Config::load().context("load config")?;

    let _log_guard = logging::init(&config.log).context("init logging")?;

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    let Cli { command, base_url } = cli;
    let target = commands::Target {
        config: &config,
        base_url: base_url.as_deref(),
    };
    rt.block_on(dispatch(command, &target))
}

async fn dispatch(command: Commands, target: &commands::Target<'_>) -> Result<()> {
    match command {
        Commands::Login { user, password } => {
            commands::auth::login(target, &user, password.as_deref()).await
        }
        Commands::Logout => commands::auth::logout(),
        Commands::Status => commands::auth::status(),
        Commands::Request {
            method,
            path,
            data,
            headers,
        } => {
            commands::request::run(commands::request::RequestOptions {
                target,
                method: &method,
                path: &path,
                data: data.as_deref(),
                headers: &headers,
            })
            .await
        }
        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
            ConfigCommands::Generate => commands::config::generate(),
        },
    }
}
