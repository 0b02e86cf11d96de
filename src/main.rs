mod app;
mod cli;
mod error;

use crate::app::Outcome;
use crate::cli::Parsed;
use serde::Serialize;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for requests rejected by validation.
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the JSON response; everything else goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = match cli::parse(std::env::args_os()) {
        Parsed::Run(cli) => cli,
        Parsed::Exit(err) => err.exit(),
        Parsed::Rejected(rejection) => {
            print(&rejection);
            return ExitCode::from(EXIT_REJECTED);
        },
    };
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(cancel.clone()));

    match app::run(cli.config.as_deref(), cli.command, cancel).await {
        Ok(Outcome::Response(body)) => print(&body),
        Ok(Outcome::Rejected(rejection)) => {
            print(&rejection);
            ExitCode::from(EXIT_REJECTED)
        },
        Err(err) => {
            error!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

/// Stop batches from starting new documents on Ctrl-C.
async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, finishing in-flight documents");
        cancel.cancel();
    }
}

fn print(body: &impl Serialize) -> ExitCode {
    match serde_json::to_string_pretty(body) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        },
        Err(err) => {
            error!("could not encode response: {err}");
            ExitCode::FAILURE
        },
    }
}
