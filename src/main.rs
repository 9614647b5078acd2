//! bobs CLI
//!
//! Thin binary over the library: loads settings, builds the filter set,
//! runs a scan against a Bitcoin Core node and prints the matches at the
//! requested detail level.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::{debug, error, info, warn};

use bobs::collector::{ScanResult, Target};
use bobs::rest::{RestClient, RestConfig};
use bobs::scanner::{ScanRequest, Scanner};
use bobs::settings::Settings;
use bobs::transaction::Transaction;

#[derive(Parser)]
#[command(name = "bobs", version, about = "Observe the Bitcoin chain and mempool")]
struct Cli {
    /// Path to a JSON settings file.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a block range or the current mempool.
    Scan(ScanArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Start height; negative counts back from the chain tip.
    #[arg(short, long, default_value_t = -10, allow_negative_numbers = true)]
    start: i64,

    /// End height; with a negative start, 0 means the tip and a positive
    /// value is a block count.
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    end: i64,

    /// What to scan.
    #[arg(short, long, value_enum, default_value_t = TargetArg::Blocks)]
    target: TargetArg,

    /// Named filter from the settings file; repeat to combine with OR.
    #[arg(short, long = "filter")]
    filters: Vec<String>,

    /// Increase output detail; repeat for more.
    #[arg(short = 'd', long = "detail", action = ArgAction::Count)]
    detail: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    Blocks,
    Mempool,
}

impl From<TargetArg> for Target {
    fn from(target: TargetArg) -> Self {
        match target {
            TargetArg::Blocks => Target::Blocks,
            TargetArg::Mempool => Target::Mempool,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bobs=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match &cli.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };
    let Command::Scan(args) = cli.command;

    // Filter resolution fails fast, before any network activity.
    let filters = settings.build_filter_set(&args.filters)?;

    let client = RestClient::new(RestConfig {
        endpoint: settings.network.endpoint.clone(),
        timeout_secs: settings.network.timeout_secs,
        ..Default::default()
    })?;
    let scanner = Scanner::new(client, &settings);

    let cancel = scanner.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the block in flight");
            cancel.cancel();
        }
    });

    let mut progress = scanner.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow();
            debug!(done = p.done, total = p.total, "progress");
        }
    });

    let request = ScanRequest {
        start: args.start,
        end: args.end,
        target: args.target.into(),
        filters,
    };
    let result = scanner.scan(request).await?;
    print_result(&result, args.detail);
    Ok(())
}

fn print_result(result: &ScanResult, detail: u8) {
    for tx in result.txs() {
        match detail {
            0 => println!("{}", tx.txid),
            1 => println!("{}", base_line(tx)),
            _ => {
                println!("{}", base_line(tx));
                println!("  in:  {}", tx.in_addrs().join(", "));
                println!("  out: {}", tx.out_addrs().join(", "));
            }
        }
    }

    let meta = &result.meta;
    info!(
        matched = result.len(),
        scanned = meta.txs_scanned,
        blocks = meta.blocks_scanned,
        elapsed_ms = meta.elapsed.as_millis() as u64,
        "scan finished"
    );
    if let Some(from) = meta.clamped_from {
        warn!(from, "range was clamped to the node's lowest stored block");
    }
    if !meta.gaps.is_empty() {
        warn!(gaps = ?meta.gaps, "some blocks could not be fetched");
    }
    if meta.cancelled {
        warn!("scan was cancelled, results are partial");
    }
}

fn base_line(tx: &Transaction) -> String {
    let height = tx
        .height
        .map(|h| h.to_string())
        .unwrap_or_else(|| "mempool".to_string());
    format!(
        "{}  height={}  {}-in {}-out  vsize={}  fee={} sat ({} sat/vB)",
        tx.txid,
        height,
        tx.n_in(),
        tx.n_out(),
        tx.vsize,
        tx.abs_fee,
        tx.rel_fee
    )
}
