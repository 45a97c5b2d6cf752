//! combridge - bridge SDF's COM chat to an external messaging endpoint
//!
//! The binary connects to COM over ssh and uses this terminal as the
//! endpoint: chat from the remote is printed to stdout, and lines typed on
//! stdin go through the command router.
//!
//! # Quick Start
//!
//! ```text
//! combridge -u alice             # ssh alice@sdf.org com
//! combridge -c ./bridge.toml     # explicit config file
//! ```
//!
//! # Commands
//!
//! | Input | Action |
//! |-------|--------|
//! | t:中文 | Translate and send |
//! | g:room | Go to room |
//! | e:action | Emote |
//! | s:user text | Private message |
//! | w / l / I | Who / rooms / idle |
//! | W:room / p:room | Who in / peek into another room |
//! | r:N | Review N lines |
//! | q | Disconnect |

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use combridge::bridge::{Bridge, CachedTranslator, CommandRouter, Forwarder, Outward, Passthrough};
use combridge::config::Config;
use combridge::core::transport::ProcessTransport;

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_HOST: &str = "sdf.org";

/// Command line options
#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    user: Option<String>,
    host: Option<String>,
}

fn print_version() {
    eprintln!("combridge {}", VERSION);
}

fn print_help() {
    eprintln!("combridge {} - Bridge SDF COM chat to an external endpoint", VERSION);
    eprintln!();
    eprintln!("Usage: combridge [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>   Config file (default: ~/.combridge/config.toml)");
    eprintln!("  -u, --user <NAME>     SDF username; also used to recognize our own echo");
    eprintln!("      --host <HOST>     SSH host (default: {})", DEFAULT_HOST);
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Once connected, type 'help' for the command list and 'q' to quit.");
    eprintln!();
    eprintln!("Log file: ~/.combridge/combridge.log (level via RUST_LOG)");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            flag @ ("-c" | "--config" | "-u" | "--user" | "--host") => {
                i += 1;
                let Some(value) = args.get(i) else {
                    return Err(format!("Missing argument for {}", flag));
                };
                match flag {
                    "-c" | "--config" => parsed.config = Some(PathBuf::from(value)),
                    "-u" | "--user" => parsed.user = Some(value.clone()),
                    _ => parsed.host = Some(value.clone()),
                }
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn init_logging() {
    let log_path = Config::data_dir()
        .map(|dir| dir.join("combridge.log"))
        .unwrap_or_else(|| PathBuf::from("combridge.log"));

    // Open log file (append mode)
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

/// This terminal as the outward endpoint
struct Stdout;

#[async_trait]
impl Outward for Stdout {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        println!("{}", text);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    init_logging();
    info!("combridge {} starting...", VERSION);

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Command line overrides config file
    if let Some(user) = &args.user {
        config.identity.username = user.clone();
        let host = args.host.as_deref().unwrap_or(DEFAULT_HOST);
        config.remote.set_login(user, host);
    } else if let Some(host) = &args.host {
        let user = config.identity.username.clone();
        if user.is_empty() {
            anyhow::bail!("--host needs a username (-u or [identity] username)");
        }
        config.remote.set_login(&user, host);
    }
    if config.identity.username.is_empty() {
        config.identity.username = env::var("USER").unwrap_or_default();
        info!("no username configured, assuming {:?}", config.identity.username);
    }

    info!("Remote: {} {}", config.remote.command, config.remote.args_for(&config.terminal).join(" "));

    let transport = ProcessTransport::spawn(&config.remote, &config.terminal)?;
    let translator = Arc::new(CachedTranslator::new(Passthrough));
    let forwarder = Arc::new(
        Forwarder::new(Arc::new(Stdout), translator.clone()).translate_incoming(config.bridge.translate_incoming),
    );

    let mut bridge = Bridge::new(config, transport)?;
    for kind in Forwarder::KINDS {
        bridge.on(kind, forwarder.clone());
    }
    let router = CommandRouter::new(bridge.handle(), translator);
    let mut running = tokio::spawn(bridge.run());

    eprintln!("Connected. Type 'help' for commands, 'q' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    let quit = line.trim() == "q";
                    println!("{}", router.route(&line).await);
                    if quit {
                        break;
                    }
                }
                None => {
                    // stdin closed
                    router.route("q").await;
                    break;
                }
            },
            finished = &mut running => {
                match finished? {
                    Ok(()) => eprintln!("Remote closed the session."),
                    Err(e) => {
                        error!("bridge failed: {}", e);
                        eprintln!("Error: {}", e);
                    }
                }
                return Ok(());
            }
        }
    }

    if let Err(e) = running.await? {
        error!("bridge failed: {}", e);
    }
    info!("combridge exiting");
    Ok(())
}
