mod build;
mod config;
mod enrich;
mod inject;
mod location;
mod marker;
mod rewrite;
mod serve;

use std::io;

use clap::{Parser, Subcommand};

/// Explicit subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Serve a site directory, enriching pages on the fly
    Serve {
        /// Path to the site root directory
        dir: String,
        /// Interface address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Starting port number for the HTTP server
        #[arg(long, default_value = "3333")]
        port: u16,
    },
    /// Write an enriched copy of the site into an output directory
    Build {
        /// Path to the site root directory
        dir: String,
        /// Output directory for the enriched site
        #[arg(long, default_value = "dist")]
        out: String,
    },
}

/// Full CLI with explicit subcommands.
#[derive(Parser)]
#[command(
    name = "sitechrome",
    version,
    about = "Injects shared navigation and footer chrome into static site pages",
    after_help = "INVOCATION FORMS:\n  sitechrome <dir>                 Serve the site (legacy)\n  sitechrome serve [OPTIONS] <dir> Serve the site, enriching pages per request\n  sitechrome build [OPTIONS] <dir> Write an enriched copy of the site"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Legacy positional form: sitechrome <dir>
#[derive(Parser)]
#[command(
    name = "sitechrome",
    version,
    about = "Injects shared navigation and footer chrome into static site pages"
)]
struct LegacyCli {
    /// Path to a site root directory to serve
    dir: String,
}

/// Resolved dispatch mode after CLI argument parsing.
enum DispatchMode {
    Legacy {
        dir: String,
    },
    Serve {
        dir: String,
        bind: String,
        port: u16,
    },
    Build {
        dir: String,
        out: String,
    },
}

fn resolve_dispatch_mode() -> DispatchMode {
    match Cli::try_parse() {
        Ok(cli) => match cli.command {
            Commands::Serve { dir, bind, port } => DispatchMode::Serve { dir, bind, port },
            Commands::Build { dir, out } => DispatchMode::Build { dir, out },
        },
        Err(clap_err) => {
            // Pass --help, --version, and subcommand-level help through to
            // the full Cli handler.
            use clap::error::ErrorKind;
            if matches!(
                clap_err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) {
                clap_err.exit();
            }
            // Fall back to legacy positional parse: sitechrome <dir>
            match LegacyCli::try_parse() {
                Ok(legacy) => DispatchMode::Legacy { dir: legacy.dir },
                Err(legacy_err) => legacy_err.exit(),
            }
        }
    }
}

fn build_runtime() -> io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

fn main() -> io::Result<()> {
    match resolve_dispatch_mode() {
        DispatchMode::Legacy { dir } => {
            eprintln!("[legacy] serve dispatched for: {dir}");
            build_runtime()?.block_on(serve::run_serve(
                dir,
                "127.0.0.1".to_owned(),
                3333,
            ))
        }
        DispatchMode::Serve { dir, bind, port } => {
            build_runtime()?.block_on(serve::run_serve(dir, bind, port))
        }
        DispatchMode::Build { dir, out } => build_runtime()?.block_on(build::run_build(dir, out)),
    }
}
