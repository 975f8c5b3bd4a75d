//! # Stitcher
//!
//! Command-line entry point for the stitching graph engine.
//!
//! ## Usage
//!
//! ```bash
//! stitcher load --source gsrs --file gsrs.json --map I_UNII=unii,N_Name=name --id-field id
//! stitcher components
//! stitcher resolve --json
//! stitcher find I_UNII R16CO5Y76E
//! ```

use clap::Parser;
use stitcher::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // STITCHER_LOG_FORMAT=json switches to machine-parseable logs.
    let log_format = std::env::var("STITCHER_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stitcher=info,stitcher_core=info".into());

    // logs go to stderr so command output on stdout stays parseable
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
