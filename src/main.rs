mod api;
mod config;
mod events;
mod guard;
mod profile;
mod router;
mod screens;
mod session;
mod shell;
mod store;
mod token;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "acad", about = "Terminal client for the academic administration portal")]
pub struct Args {
    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "ACAD_API_URL", help = "API base URL")]
    pub api_url: Option<String>,

    #[arg(long, help = "Directory holding the stored session")]
    pub storage_dir: Option<PathBuf>,

    #[arg(long, help = "Keep the session in memory for this run only")]
    pub ephemeral: bool,

    #[arg(long, help = "Debug output (print settings and storage location)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and store the session
    Login {
        email: String,
        #[arg(long, help = "Password (prompted if omitted; also read from ACAD_PASSWORD)")]
        password: Option<String>,
    },
    /// Register a new account
    Signup { email: String, name: String, id: String },
    /// Forget the stored session
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Navigate to a path, optionally running one action there
    Open {
        path: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        action: Vec<String>,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    if let Some(url) = &args.api_url {
        cfg.api_url = url.clone();
    }
    if let Some(dir) = &args.storage_dir {
        cfg.storage_dir = Some(dir.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        return Err(anyhow!("Invalid configuration"));
    }

    let storage: Rc<dyn store::Storage> = if args.ephemeral {
        Rc::new(store::MemoryStorage::new())
    } else {
        Rc::new(store::FileStorage::new(&cfg.storage_path()))
    };

    if args.debug {
        eprintln!("[DEBUG] API: {}", cfg.api_url);
        if args.ephemeral {
            eprintln!("[DEBUG] Session storage: memory");
        } else {
            eprintln!("[DEBUG] Session storage: {}", cfg.storage_path().display());
        }
        eprintln!("[DEBUG] Event log: {}", cfg.event_log_path().display());
        eprintln!("[DEBUG] Token leeway: {}s", cfg.token_leeway_secs);
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let events = match events::EventLog::new(&cfg.event_log_path(), &run_id) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("Warning: event log disabled: {}", e);
            events::EventLog::disabled()
        }
    };

    let transport = Box::new(api::UreqTransport::new(Duration::from_millis(
        cfg.timeout_ms,
    )));
    let input = Box::new(shell::RustylineInput::new()?);
    let ctx = shell::Context::new(
        cfg,
        store::SessionStore::new(storage),
        transport,
        events,
        input,
    )?;
    ctx.start(Utc::now());

    match args.command {
        None => shell::run_repl(&ctx),
        Some(command) => run_command(&ctx, command),
    }
}

fn run_command(ctx: &shell::Context, command: Command) -> Result<()> {
    let mut out = std::io::stdout();
    match command {
        Command::Login { email, password } => {
            if let Some(user) = ctx.session.current() {
                println!("Already logged in as {}. Run `acad logout` first.", user.email);
                return Ok(());
            }
            let password = match password {
                Some(p) => p,
                None => ctx.read_secret("Password: ")?,
            };
            let user = ctx.login(&email, &password)?;
            println!("Login successful! Welcome, {}.", user.name);
            shell::whoami(ctx, &mut out)?;
        }
        Command::Signup { email, name, id } => {
            ctx.navigate("/signup", &mut out)?;
            ctx.run_action(&["signup".to_string(), email, name, id], &mut out)?;
        }
        Command::Logout => {
            ctx.logout();
            println!("Logged out");
        }
        Command::Whoami => shell::whoami(ctx, &mut out)?,
        Command::Open { path, action } => {
            ctx.navigate(&path, &mut out)?;
            if !action.is_empty() {
                let result = ctx.run_action(&action, &mut out);
                ctx.sync_with_session(&mut out)?;
                result?;
            }
        }
    }
    Ok(())
}
