//! slotbook CLI: book, inspect and cancel time slots stored in the local WAL.
//!
//! ```bash
//! slotbook register alice hunter22
//! slotbook login alice hunter22
//! export SLOTBOOK_TOKEN=eyJ...
//! slotbook create --user alice --date 2024-05-01 --start 10:00 --end 11:00
//! slotbook list --date 2024-05-01
//! slotbook update 01HV... --end 11:30
//! slotbook compactor
//! ```
//!
//! Booking commands require an access token from `login`.
//! Results are printed to stdout as JSON, logs go to stderr.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use slotbook::auth::{
    Argon2Credentials, AuthError, AuthService, Claims, RsaJwtTokens, TokenPayload, TokenService,
};
use slotbook::compactor;
use slotbook::config::Config;
use slotbook::engine::Engine;
use slotbook::model::{BookingFields, DeleteConfirmation};
use slotbook::time::parse_date;

#[derive(Parser)]
#[command(name = "slotbook")]
#[command(version, about = "Time-slot reservations with overlap detection")]
struct Cli {
    /// Access token issued by `login`
    #[arg(long, global = true, env = "SLOTBOOK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Book a time slot
    Create {
        #[arg(short, long)]
        user: String,
        /// YYYY-MM-DD
        #[arg(short, long)]
        date: String,
        /// HH:mm
        #[arg(short, long)]
        start: String,
        /// HH:mm
        #[arg(short, long)]
        end: String,
    },
    /// List reservations, optionally for one date
    List {
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Show one reservation
    Get { id: String },
    /// Change some fields of a reservation
    Update {
        id: String,
        #[arg(short, long)]
        user: Option<String>,
        #[arg(short, long)]
        date: Option<String>,
        #[arg(short, long)]
        start: Option<String>,
        #[arg(short, long)]
        end: Option<String>,
    },
    /// Cancel a reservation
    Delete { id: String },
    /// Create an account
    Register { username: String, password: String },
    /// Exchange credentials for an access token
    Login { username: String, password: String },
    /// Show the account the access token belongs to
    Whoami,
    /// Rewrite the WAL down to current state
    Compact,
    /// Keep compacting the WAL in the background until interrupted
    Compactor,
}

impl Commands {
    /// Everything touching reservations is gated on a valid access token.
    fn needs_token(&self) -> bool {
        matches!(
            self,
            Commands::Create { .. }
                | Commands::List { .. }
                | Commands::Get { .. }
                | Commands::Update { .. }
                | Commands::Delete { .. }
        )
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

/// Stands in when no signing keys are configured; commands that never touch
/// tokens still work.
struct MissingKeys(String);

impl TokenService for MissingKeys {
    fn issue(&self, _payload: &TokenPayload) -> Result<String, AuthError> {
        Err(AuthError::Config(self.0.clone()))
    }

    fn verify(&self, _token: &str) -> Result<Claims, AuthError> {
        Err(AuthError::Config(self.0.clone()))
    }
}

fn parse_id(raw: &str) -> Result<Ulid, Box<dyn std::error::Error>> {
    Ulid::from_string(raw).map_err(|_| format!("Booking with ID \"{raw}\" not found").into())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn auth_service(engine: Arc<Engine>, config: &Config) -> AuthService {
    let tokens: Arc<dyn TokenService> = match RsaJwtTokens::from_config(
        config.jwt_private_key.as_deref(),
        config.jwt_public_key.as_deref(),
        config.token_ttl_secs,
    ) {
        Ok(tokens) => Arc::new(tokens),
        Err(e) => Arc::new(MissingKeys(e.to_string())),
    };
    AuthService::new(engine, Arc::new(Argon2Credentials::new()), tokens)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    slotbook::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), config.conflict_mode)?);
    info!(
        data_dir = %config.data_dir.display(),
        mode = ?config.conflict_mode,
        "store opened"
    );

    let auth = auth_service(engine.clone(), &config);
    if cli.command.needs_token() {
        let user = auth.authorize(cli.token.as_deref())?;
        info!(username = %user.username, "authorized");
    }

    match cli.command {
        Commands::Create { user, date, start, end } => {
            let fields = BookingFields::new(&user, &date, &start, &end);
            print_json(&engine.create(&fields).await?)?;
        }
        Commands::List { date: None } => print_json(&engine.list())?,
        Commands::List { date: Some(raw) } => {
            let date = parse_date(&raw).ok_or("Date must be in the format YYYY-MM-DD")?;
            print_json(&engine.list_by_date(date).await)?;
        }
        Commands::Get { id } => print_json(&engine.get(parse_id(&id)?)?)?,
        Commands::Update { id, user, date, start, end } => {
            let fields = BookingFields {
                user,
                date,
                start_time: start,
                end_time: end,
            };
            print_json(&engine.update(parse_id(&id)?, &fields).await?)?;
        }
        Commands::Delete { id } => {
            let id = parse_id(&id)?;
            engine.delete(id).await?;
            print_json(&DeleteConfirmation::new(id))?;
        }
        Commands::Register { username, password } => {
            print_json(&auth.register(&username, &password).await?)?;
        }
        Commands::Login { username, password } => {
            print_json(&auth.login(&username, &password).await?)?;
        }
        Commands::Whoami => print_json(&auth.authorize(cli.token.as_deref())?)?,
        Commands::Compact => {
            engine.compact_wal().await?;
            print_json(&serde_json::json!({ "compacted": true }))?;
            return Ok(());
        }
        Commands::Compactor => {
            info!(threshold = config.compact_threshold, "compactor running");
            tokio::select! {
                _ = compactor::run_compactor(engine.clone(), config.compact_threshold) => {}
                _ = shutdown_signal() => info!("shutdown signal received, stopping compactor"),
            }
        }
    }

    compactor::compact_if_due(&engine, config.compact_threshold).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_commands_require_a_token() {
        let create = Cli::try_parse_from([
            "slotbook", "create", "-u", "a", "-d", "2024-05-01", "-s", "10:00", "-e", "11:00",
        ])
        .unwrap();
        assert!(create.command.needs_token());
        for args in [["slotbook", "list"], ["slotbook", "get"], ["slotbook", "delete"]] {
            let mut args = args.to_vec();
            if args[1] != "list" {
                args.push("01HV3Z8Q5Y0000000000000000");
            }
            assert!(Cli::try_parse_from(args).unwrap().command.needs_token());
        }
        for args in [
            vec!["slotbook", "register", "alice", "pw"],
            vec!["slotbook", "login", "alice", "pw"],
            vec!["slotbook", "whoami"],
            vec!["slotbook", "compactor"],
        ] {
            assert!(!Cli::try_parse_from(args).unwrap().command.needs_token());
        }
    }

    #[test]
    fn token_flag_is_accepted_after_the_subcommand() {
        let cli = Cli::try_parse_from(["slotbook", "list", "--token", "abc"]).unwrap();
        assert_eq!(cli.token.as_deref(), Some("abc"));
    }
}
