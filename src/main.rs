//! sofa-mcp — tool server entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI flags and load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Build the tool services and start the supervisor bus
//!   6. Spawn Ctrl-C → shutdown signal watcher
//!   7. Run the comms subsystem (HTTP or stdio) until shutdown
//!   8. Cancel token + join supervisor

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use sofa_mcp::config::{self, TransportMode};
use sofa_mcp::engine::{PythonRunner, ScriptRunner};
use sofa_mcp::error::AppError;
use sofa_mcp::logger;
use sofa_mcp::subsystems::{self, tools::{ToolsSubsystem, Toolbox}};
use sofa_mcp::supervisor::{self, bus::SupervisorBus, dispatch::BusHandler};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // .env is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let mut config = config::load(args.config_path.as_deref())?;
    if args.stdio {
        config.transport.mode = TransportMode::Stdio;
    }

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        server = %config.server_name,
        work_dir = %config.work_dir.display(),
        python = %config.engine.python.display(),
        transport = config.transport.mode.as_str(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    tokio::fs::create_dir_all(&config.work_dir).await?;

    let shutdown = CancellationToken::new();

    let runner: Arc<dyn ScriptRunner> = Arc::new(PythonRunner::new(config.engine.python.clone()));
    let toolbox = Arc::new(Toolbox::new(runner, &config));

    // Build the supervisor bus (buffer = 64 messages).
    let bus = SupervisorBus::new(64);
    let bus_handle = bus.handle.clone();

    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    let handlers: Vec<Box<dyn BusHandler>> = vec![Box::new(ToolsSubsystem::new(toolbox))];

    let sup_token = shutdown.clone();
    let sup_handle = tokio::spawn(async move {
        supervisor::run(bus, sup_token, handlers).await;
    });

    match config.transport.mode {
        TransportMode::Http => info!(
            "serving on http://{}{}",
            config.transport.bind, config.transport.path
        ),
        TransportMode::Stdio => info!("serving on stdio"),
    }

    let comms = subsystems::comms::start(&config, bus_handle, shutdown.clone());
    let outcome = comms.join().await;

    // Stdin EOF ends the stdio channel without Ctrl-C; stop everything else too.
    shutdown.cancel();
    sup_handle.await.ok();

    outcome
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    stdio: bool,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut stdio = false;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: sofa-mcp [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("      --stdio                Serve JSON-RPC on stdin/stdout instead of HTTP");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "--stdio" => stdio = true,
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => eprintln!("warning: ignoring unknown argument '{other}'"),
        }
    }

    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug
    //   -vvvv+  → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, stdio }
}
