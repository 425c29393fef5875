#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::print_stderr,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::use_debug,
        clippy::dbg_macro,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
        reason = "Test-only output and panic-based assertions are permitted."
    )
)]
// sentinel-gate-cli/src/main.rs
// ============================================================================
// Module: Sentinel Gate CLI entry point
// Description: Command dispatcher for running the gateway's stdio and HTTP
//              transports.
// Purpose: Load configuration, assemble the gateway's collaborators, and
//          run the selected transport to completion.
// Dependencies: clap, sentinel-gate-config, sentinel-gate-core,
//               sentinel-gate-gateway, sentinel-gate-cli, tokio.
// ============================================================================

//! ## Overview
//! The `sentinel-gate` binary has one job per invocation: load a
//! [`GatewayConfig`], spawn the configured upstreams, and drive either
//! [`McpServer::serve_stdio`] or [`McpServer::serve_http`] until the
//! process receives a shutdown signal.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::io::Write;

use clap::{ArgAction, Args, Parser, Subcommand};
use sentinel_gate_cli::StdioUpstreamProvider;
use sentinel_gate_cli::upstream::discover_tools;
use sentinel_gate_config::GatewayConfig;
use sentinel_gate_core::diagnostic::{DiagnosticSink, StderrDiagnosticSink};
use sentinel_gate_core::policy::AllowAllPolicyEngine;
use sentinel_gate_gateway::{InMemoryApiKeyStore, McpServer, ToolCache};
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "sentinel-gate",
    disable_help_subcommand = true,
    disable_version_flag = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute. Optional so that `--version` alone,
    /// with no subcommand, parses successfully instead of clap rejecting
    /// the invocation for a missing required subcommand.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the gateway, serving MCP clients over stdio or HTTP.
    Serve(ServeCommand),
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to `sentinel-gate.toml` or the
    /// `SENTINELGATE_CONFIG` environment override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Serve over stdio instead of the configured HTTP listener (the
    /// default when this flag is absent).
    #[arg(long, action = ArgAction::SetTrue)]
    stdio: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`] from a message.
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();

    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&format!("sentinel-gate {version}"))
            .map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))?;
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command {
        Some(Commands::Serve(command)) => command_serve(command).await,
        None => {
            write_stderr_line("no subcommand given; run with `serve` to start the gateway")
                .map_err(|err| CliError::new(format!("failed to write to stderr: {err}")))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command: loads configuration, spawns upstreams,
/// assembles the gateway, and runs the selected transport until shutdown.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    let config = GatewayConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load configuration: {err}")))?;
    config.validate().map_err(|err| CliError::new(format!("invalid configuration: {err}")))?;

    let diagnostics: Arc<dyn DiagnosticSink> = Arc::new(StderrDiagnosticSink);

    let upstreams = Arc::new(
        StdioUpstreamProvider::spawn(&config.router.upstreams)
            .map_err(|err| CliError::new(format!("failed to start upstreams: {err}")))?,
    );
    let tool_cache = Arc::new(ToolCache::new());
    discover_tools(&upstreams, &tool_cache)
        .await
        .map_err(|err| CliError::new(format!("upstream tool discovery failed: {err}")))?;

    let server = Arc::new(
        McpServer::new(
            config,
            upstreams,
            tool_cache,
            Arc::new(InMemoryApiKeyStore::new()),
            Arc::new(AllowAllPolicyEngine),
            diagnostics,
        )
        .map_err(|err| CliError::new(format!("failed to initialize gateway: {err}")))?,
    );

    let shutdown_trigger = Arc::clone(&server);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown_trigger.shutdown().await;
        }
    });

    let result = if command.stdio {
        server.serve_stdio().await.map_err(|err| CliError::new(format!("stdio transport failed: {err}")))
    } else {
        Arc::clone(&server)
            .serve_http()
            .await
            .map_err(|err| CliError::new(format!("http transport failed: {err}")))
    };

    signal_task.abort();
    server.shutdown().await;
    result?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes one line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes one line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
