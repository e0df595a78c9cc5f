//! ShapeForge CLI
//!
//! Compile embedding models into fixed-shape artifacts once, then run them
//! many times.
//!
//! # Usage
//!
//! ```bash
//! shapeforge compile --model sentence-transformers/all-MiniLM-L6-v2 \
//!     --batch-size 1 --sequence-length 384 --output ./artifacts
//! # "location" from the compile output, e.g.
//! # ./artifacts/sentence-transformers-all-MiniLM-L6-v2-<hash>/b1_s384
//! shapeforge embed --artifact "$LOCATION" --text "I like to eat apples"
//! shapeforge list --store ./artifacts
//! ```
//!
//! # Environment Variables
//!
//! - `SHAPEFORGE_HOME`: Base directory for the default store and registry
//! - `RUST_LOG`: Logging level (e.g., "info", "debug", "trace")
//!
//! # Exit Codes
//!
//! 0 on success. Failures exit with the code of their failure kind:
//! InvalidShape 2, SourceModelNotFound 3, UnsupportedModelKind 4,
//! CompilationError 5, WriteError 6, NotFound 7, CorruptArtifact 8,
//! ShapeMismatch 9, ExecutionError 10, Timeout 11, anything else 1.

use clap::{Parser, Subcommand};
use shapeforge_core::{CompileError, FailureKind, ShapeError, StoreError};
use shapeforge_runtime::EngineError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

use config::ForgeConfig;

/// ShapeForge - compile-once, run-many embedding artifacts
#[derive(Parser)]
#[command(name = "shapeforge")]
#[command(version)]
#[command(about = "Compile embedding models to fixed-shape artifacts and run them")]
#[command(propagate_version = true)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a model for one fixed shape and publish it to the store
    ///
    /// Both shape dimensions are required. An existing artifact is reused
    /// unless it is stale or `--force` is given.
    Compile(commands::CompileArgs),
    /// Embed texts with a compiled artifact
    Embed(commands::EmbedArgs),
    /// Print an artifact's metadata
    Inspect {
        /// Artifact location
        location: PathBuf,
    },
    /// List every artifact in a store
    List(commands::ListArgs),
    /// Remove an artifact from its store
    Delete {
        /// Artifact location
        location: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(output) => {
            println!("{}", output);
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!("{:#}", error);
            ExitCode::from(exit_code_for_error(&error))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let config = ForgeConfig::load(cli.config.as_deref())?;

    let output = match cli.command {
        Commands::Compile(args) => commands::compile(args, &config)?,
        Commands::Embed(args) => commands::embed(args, &config).await?,
        Commands::Inspect { location } => commands::inspect(&location)?,
        Commands::List(args) => commands::list(args, &config)?,
        Commands::Delete { location } => commands::delete(&location)?,
    };

    Ok(serde_json::to_string_pretty(&output)?)
}

/// Map an error to the exit code of its failure kind
fn exit_code_for_error(error: &anyhow::Error) -> u8 {
    let kind = if let Some(e) = error.downcast_ref::<CompileError>() {
        e.kind()
    } else if let Some(e) = error.downcast_ref::<EngineError>() {
        e.kind()
    } else if let Some(e) = error.downcast_ref::<StoreError>() {
        e.kind()
    } else if let Some(e) = error.downcast_ref::<ShapeError>() {
        e.kind()
    } else {
        FailureKind::Other
    };

    kind.exit_code()
}
