use clap::error::ErrorKind as ClapErrorKind;
use clap::{Args, Parser, Subcommand};
use norma_pipeline::wire::{AcquireRangeRequest, AcquireRequest, DEFAULT_LIST_LIMIT, DEFAULT_MAX_DOCS, ErrorResponse};
use std::ffi::OsString;
use std::path::PathBuf;

/// Acquire, cache and replay InfoLEG norms.
///
/// Every command prints a single JSON response on stdout. Logs go to stderr
/// and are filtered with `RUST_LOG`.
#[derive(Debug, Parser)]
#[command(name = "norma", version, about, long_about = None)]
pub(crate) struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Result of reading the command line.
#[derive(Debug)]
pub(crate) enum Parsed {
    Run(Cli),
    /// Malformed arguments, answered like any other invalid request.
    Rejected(ErrorResponse),
    /// `--help` and friends: let clap print and exit.
    Exit(clap::Error),
}

pub(crate) fn parse<I, T>(args: I) -> Parsed
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match Cli::try_parse_from(args) {
        Ok(cli) => Parsed::Run(cli),
        Err(err)
            if matches!(
                err.kind(),
                ClapErrorKind::DisplayHelp
                    | ClapErrorKind::DisplayVersion
                    | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            Parsed::Exit(err)
        },
        Err(err) => Parsed::Rejected(ErrorResponse::invalid_request(usage_message(&err))),
    }
}

/// First paragraph of clap's rendered error on one line, without the
/// `error:` label or the usage block.
fn usage_message(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    let paragraph: Vec<&str> = rendered.lines().map(str::trim).take_while(|line| !line.is_empty()).collect();
    paragraph.join(" ").trim_start_matches("error:").trim().to_string()
}

#[derive(Debug, Args)]
pub(crate) struct SingleArgs {
    pub infoleg_id: u64,
    /// Skip the cache lookup and always fetch from the origin
    #[arg(long)]
    pub force: bool,
}
impl From<&SingleArgs> for AcquireRequest {
    fn from(args: &SingleArgs) -> Self {
        Self { infoleg_id: args.infoleg_id, force: args.force }
    }
}

#[derive(Debug, Args)]
pub(crate) struct RangeArgs {
    pub start_id: u64,
    pub end_id: u64,
    /// Attempt at most this many IDs from the start of the range (1-100)
    #[arg(long, default_value_t = DEFAULT_MAX_DOCS)]
    pub max_docs: u32,
    /// Skip the cache lookup and always fetch from the origin
    #[arg(long)]
    pub force: bool,
}
impl From<&RangeArgs> for AcquireRangeRequest {
    fn from(args: &RangeArgs) -> Self {
        Self { start_id: args.start_id, end_id: args.end_id, max_docs: args.max_docs, force: args.force }
    }
}

#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Fetch one norm into the cache unless already cached
    Scrape(SingleArgs),
    /// Fetch a range of norms into the cache
    ScrapeRange(RangeArgs),
    /// Fetch (or reuse) one norm, then send it to the processing queue
    Process(SingleArgs),
    /// Fetch (or reuse) a range of norms, sending each to the processing queue
    ProcessRange(RangeArgs),
    /// Send a cached version to the processing queue again
    Replay {
        infoleg_id: u64,
        /// `latest`, `v<n>` or `<n>`
        #[arg(long, default_value = "latest")]
        version: String,
    },
    /// Replay several cached versions from a JSON `{"documents": [...]}` body
    ReplayBatch {
        /// Read the request from this file instead of stdin (`-` is stdin)
        input: Option<PathBuf>,
    },
    /// Inspect the cache
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Debug, Subcommand)]
pub(crate) enum CacheCommand {
    /// Aggregate entry counts and sizes
    Stats,
    /// Most recently cached versions, newest first
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: u32,
    },
}
