#![forbid(unsafe_code)]

//! `gdbrpc`: serve one GDB session to remote clients.
//!
//! Spawns gdb, binds the RPC listener and runs until Ctrl-C or SIGTERM.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use gdbrpc::config::GlobalConfig;
use gdbrpc::debugger::gdb::GdbProcess;
use gdbrpc::server::dispatch::Dispatcher;
use gdbrpc::server::Server;
use gdbrpc::telemetry::{self, LogFormat};
use gdbrpc::{AppError, Result};

#[derive(Debug, Parser)]
#[command(name = "gdbrpc", about = "Serve a GDB session over RPC", version, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface to bind (overrides `server.host`).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides `server.port`).
    #[arg(long, short)]
    port: Option<u16>,

    /// Debugger executable (overrides `server.gdb.program`).
    #[arg(long)]
    gdb: Option<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Write logs to a timestamped file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Reject `!cmd` / `shell cmd` requests.
    #[arg(long)]
    no_shell: bool,

    /// Arguments passed through to gdb, e.g. `-- --args ./prog 1 2`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    gdb_args: Vec<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = load_config(&args)?;

    let log_file = config
        .server
        .log_dir
        .as_deref()
        .map(|dir| telemetry::log_file_path(dir, "server"));
    telemetry::init(args.log_format, log_file.as_deref(), "info")?;
    info!("gdbrpc server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    let server = &mut config.server;
    if let Some(host) = &args.host {
        server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        server.port = port;
    }
    if let Some(program) = &args.gdb {
        server.gdb.program.clone_from(program);
    }
    if let Some(dir) = &args.log_dir {
        server.log_dir = Some(dir.clone());
    }
    if args.no_shell {
        server.shell.enabled = false;
    }
    server.gdb.args.extend(args.gdb_args.iter().cloned());

    config.validate()?;
    Ok(config)
}

async fn run(config: GlobalConfig) -> Result<()> {
    let server_config = config.server;

    let gdb = GdbProcess::spawn(&server_config.gdb).await?;
    info!(pid = ?gdb.pid(), "debugger started");

    let dispatcher = Dispatcher::new(Box::new(gdb), server_config.shell.clone());
    let host = server_config.host.clone();
    let port = server_config.port;
    let mut server = Server::new(server_config, dispatcher);

    let addr = server.start(&host, port).await.map_err(|err| {
        error!(%err, "failed to start server");
        err
    })?;
    println!("gdbrpc server started on {addr}");

    shutdown_signal().await;
    info!("shutdown signal received");

    server.stop().await;
    info!("gdbrpc shut down");
    Ok(())
}

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
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}
