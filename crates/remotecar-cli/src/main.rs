//! remotecar - command-line tool for a connected-vehicle cloud account
//!
//! Logs in, lists vehicles, runs remote commands and saves anonymized
//! vehicle fingerprints.

mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use remotecar_client::{
    Account, ClientConfig, ClientError, Credentials, FileTokenStore, GpsPosition, Login, Region,
    TokenStore,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::commands::CommandArgs;
use crate::config::{Args, Config, MergedConfig};
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "remotecar")]
#[command(author, version, about = "Connected vehicle cloud CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Account region: rest_of_world, north_america or china
    #[arg(short, long, env = "REMOTECAR_REGION")]
    region: Option<String>,

    /// Account username
    #[arg(short, long, env = "REMOTECAR_USERNAME")]
    username: Option<String>,

    /// Account password; not needed while a stored session can be refreshed
    #[arg(short, long, env = "REMOTECAR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Captcha token for the first password login
    #[arg(long)]
    captcha_token: Option<String>,

    /// Your latitude; the vehicle finder needs it to report a position
    #[arg(long, allow_negative_numbers = true, requires = "observer_longitude")]
    observer_latitude: Option<f64>,

    /// Your longitude
    #[arg(long, allow_negative_numbers = true, requires = "observer_latitude")]
    observer_longitude: Option<f64>,

    /// Session file (default: <config dir>/remotecar/tokens.json)
    #[arg(long, env = "REMOTECAR_TOKEN_STORE")]
    token_store: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, env = "REMOTECAR_CONFIG")]
    config: Option<PathBuf>,

    /// Output format [default: table]
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login,

    /// List vehicles with their remote command support
    Status,

    /// Run a remote command on a vehicle
    Command(CommandArgs),

    /// Save anonymized API responses of all vehicles
    Fingerprint {
        /// Parent directory of the timestamped output (default: ~/vehicle_fingerprint)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(Args {
        region: cli.region.as_deref(),
        username: cli.username.as_deref(),
        token_store: cli.token_store.as_deref(),
        output: cli.output.map(|o| o.as_str()),
        no_color: cli.no_color,
    })?;

    // Create output context
    let format = OutputFormat::from_str(&merged.output, true)
        .map_err(|e| anyhow::anyhow!("Invalid output format '{}': {}", merged.output, e))?;
    let ctx = OutputContext::new(format, merged.no_color, cli.quiet);

    // Ctrl+C cancels whatever is in flight
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    ctrlc::set_handler(move || on_interrupt.cancel())
        .context("Failed to install Ctrl+C handler")?;

    let result = run(&cli, &merged, &cancel, &ctx).await;
    if let Err(err) = &result {
        match err.downcast_ref::<ClientError>() {
            Some(ClientError::CaptchaRequired { region }) => ctx.error(&format!(
                "A captcha token is required to log in to {}. Solve the captcha and pass it with --captcha-token.",
                region
            )),
            Some(ClientError::Cancelled) => ctx.warn("Cancelled"),
            _ => {}
        }
    }
    result
}

async fn run(
    cli: &Cli,
    merged: &MergedConfig,
    cancel: &CancellationToken,
    ctx: &OutputContext,
) -> Result<()> {
    let account = create_account(cli, merged).await?;

    match &cli.command {
        Commands::Login => commands::login(&account, cancel, ctx).await?,

        Commands::Status => commands::status(&account, cancel, ctx).await?,

        Commands::Command(args) => commands::command(&account, args, cancel, ctx).await?,

        Commands::Fingerprint { dir } => {
            commands::fingerprint(&account, dir.as_deref(), cancel, ctx).await?
        }
    }

    Ok(())
}

/// Build the account from credentials or the stored session
async fn create_account(cli: &Cli, merged: &MergedConfig) -> Result<Account> {
    let region: Region = merged.region.parse()?;
    let mut client_config = match &merged.client_config {
        Some(path) => ClientConfig::from_yaml_file(path)
            .with_context(|| format!("Failed to load client config {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let (Some(latitude), Some(longitude)) = (cli.observer_latitude, cli.observer_longitude) {
        client_config.observer_position = Some(GpsPosition::new(latitude, longitude)?);
    }
    if matches!(cli.command, Commands::Fingerprint { .. }) {
        client_config.log_responses = true;
    }
    let Some(username) = merged.username.clone() else {
        bail!("No username given; pass --username or set it in the config file");
    };
    let store = Arc::new(FileTokenStore::new(&merged.token_store));
    tracing::debug!(
        region = %region,
        token_store = %merged.token_store.display(),
        with_password = cli.password.is_some(),
        "Creating account"
    );

    let login = match &cli.password {
        Some(password) => Login::Credentials(Credentials::new(username.clone(), password)),
        None => {
            let stored = store
                .load(&username)
                .await
                .context("Failed to read token store")?;
            match stored {
                Some(session) if !session.refresh_token.is_empty() => Login::RefreshToken {
                    refresh_token: session.refresh_token,
                    gcid: session.gcid,
                },
                _ => bail!(
                    "No stored session for {}; pass --password to log in",
                    username
                ),
            }
        }
    };

    let mut builder = Account::builder(login, region)
        .config(client_config)
        .account_key(username)
        .token_store(store);
    if let Some(token) = &cli.captcha_token {
        builder = builder.captcha_token(token.clone());
    }
    Ok(builder.build().await?)
}
