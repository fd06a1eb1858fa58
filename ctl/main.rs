#![forbid(unsafe_code)]

//! `gdbrpc-cli`: interactive console for a `gdbrpc` server.
//!
//! Reads commands at a `gdb> ` prompt and prints each result. Ctrl-C asks
//! the server to interrupt whatever is executing. With `--command` the
//! given commands run once and the process exits, for use from scripts.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use futures_util::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info};

use gdbrpc::client::Client;
use gdbrpc::config::GlobalConfig;
use gdbrpc::telemetry::{self, LogFormat};
use gdbrpc::{AppError, Result};

const PROMPT: &str = "gdb> ";

const HELP: &str = "\
Commands are sent to the remote gdb verbatim, except:
  !<cmd>, shell <cmd>   run a program on the server host
  @<name> <args>        invoke a server-side handler
  help                  show this text
  exit, quit            leave the console
Ctrl-C interrupts the command currently executing on the server.";

#[derive(Debug, Parser)]
#[command(
    name = "gdbrpc-cli",
    about = "Console for a gdbrpc server",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server host (overrides `client.host`).
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides `client.port`).
    #[arg(long, short)]
    port: Option<u16>,

    /// Per-call timeout in seconds (overrides `client.call_timeout_seconds`).
    #[arg(long)]
    timeout: Option<u64>,

    /// Run these commands and exit instead of starting the console.
    #[arg(long = "command", short = 'c')]
    commands: Vec<String>,

    /// With `--command`, post instead of waiting for each result.
    #[arg(long, requires = "commands")]
    post: bool,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Write logs to a timestamped file in this directory.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let log_file = args
        .log_dir
        .as_deref()
        .map(|dir| telemetry::log_file_path(dir, "client"));
    telemetry::init(args.log_format, log_file.as_deref(), "warn")?;

    let config = load_config(&args)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args, config))
}

fn load_config(args: &Cli) -> Result<GlobalConfig> {
    let mut config = match &args.config {
        Some(path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };

    let client = &mut config.client;
    if let Some(host) = &args.host {
        client.host.clone_from(host);
    }
    if let Some(port) = args.port {
        client.port = port;
    }
    if let Some(timeout) = args.timeout {
        client.call_timeout_seconds = timeout;
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: Cli, config: GlobalConfig) -> Result<()> {
    let client = Client::connect(&config.client).await?;
    info!(peer = %client.peer(), "connected");

    let result = if args.commands.is_empty() {
        repl(&client).await
    } else {
        one_shot(&client, &args.commands, args.post).await
    };

    client.disconnect().await;
    result
}

async fn one_shot(client: &Client, commands: &[String], post: bool) -> Result<()> {
    for command in commands {
        if post {
            let handle = client.post(command).await?;
            println!("posted {}", handle.id());
        } else {
            let output = call_interruptible(client, command).await?;
            print_output(&output);
        }
    }
    Ok(())
}

async fn repl(client: &Client) -> Result<()> {
    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());

    loop {
        print!("{PROMPT}");
        std::io::stdout()
            .flush()
            .map_err(|err| AppError::Io(format!("stdout: {err}")))?;

        let line = tokio::select! {
            line = lines.next() => line,
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| AppError::Io(format!("ctrl-c handler: {err}")))?;
                println!();
                send_interrupt(client).await;
                continue;
            }
        };

        let line = match line {
            None => {
                println!();
                break;
            }
            Some(Err(err)) => return Err(AppError::Io(format!("stdin: {err}"))),
            Some(Ok(line)) => line,
        };

        let command = line.trim();
        match command {
            "" => continue,
            "exit" | "quit" => break,
            "help" => {
                println!("{HELP}");
                continue;
            }
            _ => {}
        }

        match call_interruptible(client, command).await {
            Ok(output) => print_output(&output),
            Err(err) if err.is_connection_error() => {
                eprintln!("{err}");
                return Err(err);
            }
            Err(err) => eprintln!("{err}"),
        }
    }

    Ok(())
}

/// Run `command`, turning Ctrl-C into an interrupt while still waiting for
/// the call's own (interrupted) outcome.
async fn call_interruptible(client: &Client, command: &str) -> Result<String> {
    let call = client.call(command);
    tokio::pin!(call);

    loop {
        tokio::select! {
            result = &mut call => return result,
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| AppError::Io(format!("ctrl-c handler: {err}")))?;
                eprintln!("^C");
                send_interrupt(client).await;
            }
        }
    }
}

async fn send_interrupt(client: &Client) {
    match client.interrupt().await {
        Ok(detail) if detail.is_empty() => debug!("interrupt sent while idle"),
        Ok(detail) => debug!(detail, "interrupt sent"),
        Err(err) => eprintln!("interrupt failed: {err}"),
    }
}

fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    if output.ends_with('\n') {
        print!("{output}");
    } else {
        println!("{output}");
    }
}
