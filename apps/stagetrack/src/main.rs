//! # stagetrack
//!
//! Tracks features through the multi-stage delivery workflow.
//!
//! ## Usage
//!
//! ```bash
//! stagetrack init checkout
//! stagetrack validate checkout 1
//! stagetrack complete checkout 1 --output architecture.md --check "pass:Components identified"
//! stagetrack rollback checkout 1 "boundaries were wrong"
//! stagetrack status checkout --json
//! ```

use clap::Parser;
use stagetrack::cli::{self, Cli};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = cli::usage_exit_code(&e);
            let _ = e.print();
            std::process::exit(code);
        }
    };

    // STAGETRACK_LOG_FORMAT=json enables machine-parseable logs.
    let log_format = std::env::var("STAGETRACK_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "stagetrack=debug,stagetrack_core=debug"
    } else {
        "stagetrack=info,stagetrack_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

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

    if let Err(e) = cli::execute(cli) {
        if e.is_refusal() {
            tracing::debug!(error = %e, "operation refused");
        } else {
            tracing::error!(error = %e, "command failed");
        }
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}
