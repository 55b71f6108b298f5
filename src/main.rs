//! imagegen-mcp: MCP server exposing text-to-image generation as a tool
//!
//! Speaks JSON-RPC 2.0 over stdio. One tool, `generate-image`: prompt in,
//! image file on disk out, via the OpenAI images API.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use imagegen_mcp::mcp::server::ImagegenServer;
use imagegen_mcp::openai::OpenAiClient;
use imagegen_mcp::paths::PathResolver;

/// MCP server exposing text-to-image generation as a tool.
///
/// Reads JSON-RPC 2.0 requests from stdin and writes responses to stdout;
/// logging goes to stderr only.
#[derive(Parser, Debug)]
#[command(name = "imagegen-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
fn get_log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Output goes to stderr; stdout is reserved for protocol messages.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Entry point for the imagegen-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    init_tracing(get_log_level(args.verbose, args.quiet));

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting imagegen-mcp server"
    );

    let resolver = match PathResolver::from_env() {
        Ok(resolver) => resolver,
        Err(e) => {
            error!(error = %e, "Could not determine download directory");
            return ExitCode::FAILURE;
        }
    };
    info!(download_dir = %resolver.default_dir().display(), "Download directory configured");

    let backend = OpenAiClient::new();
    let mut server = ImagegenServer::new(backend, resolver);

    info!("MCP server ready, waiting for client connection...");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(server.run()) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn quiet_wins_over_verbose() {
        assert_eq!(get_log_level(3, true), Level::ERROR);
    }

    #[test]
    fn verbosity_ladder() {
        assert_eq!(get_log_level(0, false), Level::WARN);
        assert_eq!(get_log_level(1, false), Level::INFO);
        assert_eq!(get_log_level(2, false), Level::DEBUG);
        assert_eq!(get_log_level(3, false), Level::TRACE);
    }
}
