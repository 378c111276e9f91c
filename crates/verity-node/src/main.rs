//! verity - settlement eligibility verification runner.

mod config;
mod oracle;
mod report;
mod sources;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::NodeConfig;
use oracle::HttpOracle;
use report::PackKind;
use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use verity_core::{VerificationRequest, VerificationResult, Verifier};

#[derive(Debug, Parser)]
#[command(name = "verity", version, about = "Verify business eligibility for a settlement")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify one candidate and print the result as JSON
    Verify {
        /// JSON file holding one verification request
        request: PathBuf,
        /// Also render an HTML evidence pack
        #[arg(long, value_enum)]
        pack: Option<PackKind>,
        /// Where to write the evidence pack
        #[arg(long, value_name = "PATH", requires = "pack")]
        out: Option<PathBuf>,
        /// Write both client and internal packs into this directory
        #[arg(long, value_name = "DIR")]
        packs_dir: Option<PathBuf>,
    },
    /// Verify every candidate in a JSON array and print one outcome each
    Batch {
        /// JSON file holding an array of verification requests
        requests: PathBuf,
        /// Candidates verified at once (overrides VERITY_BATCH_CONCURRENCY)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Write client and internal packs for each verified candidate
        #[arg(long, value_name = "DIR")]
        packs_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = NodeConfig::from_env()?;
    info!(
        provider = ?config.oracle.provider,
        model = %config.oracle.model,
        concurrency = config.verifier.concurrency,
        "starting verity"
    );

    let oracle = HttpOracle::new(config.oracle.clone())?;
    let verifier = Verifier::new(config.verifier.clone(), Arc::new(oracle))
        .context("failed to build verifier")?;
    let verifier = Arc::new(sources::register_all(verifier)?);

    match cli.command {
        Command::Verify {
            request,
            pack,
            out,
            packs_dir,
        } => run_verify(&verifier, &request, pack, out, packs_dir.as_deref()).await,
        Command::Batch {
            requests,
            concurrency,
            packs_dir,
        } => {
            let concurrency = concurrency.unwrap_or(config.batch_concurrency);
            run_batch(&verifier, &requests, concurrency, packs_dir.as_deref()).await
        },
    }
}

async fn run_verify(
    verifier: &Verifier,
    path: &Path,
    pack: Option<PackKind>,
    out: Option<PathBuf>,
    packs_dir: Option<&Path>,
) -> Result<()> {
    let request: VerificationRequest = read_json(path)?;
    let result = verifier
        .verify(&request)
        .await
        .with_context(|| format!("verification failed for '{}'", request.subject.name))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("failed to serialize result")?
    );

    if let Some(kind) = pack {
        let out = out.unwrap_or_else(|| report::default_file_name(&request.subject.name, kind));
        let html = report::render_pack(&request, &result, kind);
        report::write_pack(&out, &html)?;
        info!(path = %out.display(), "evidence pack written");
    }
    if let Some(dir) = packs_dir {
        write_packs(dir, &request, &result)?;
    }
    Ok(())
}

async fn run_batch(
    verifier: &Arc<Verifier>,
    path: &Path,
    concurrency: usize,
    packs_dir: Option<&Path>,
) -> Result<()> {
    let requests: Vec<VerificationRequest> = read_json(path)?;
    let names: Vec<String> = requests
        .iter()
        .map(|request| request.subject.name.clone())
        .collect();

    let outcomes = verifier.verify_batch(requests, concurrency).await;

    let mut failures = 0_usize;
    let mut report: Vec<Value> = Vec::with_capacity(outcomes.len());
    for (name, outcome) in names.iter().zip(&outcomes) {
        match outcome {
            Ok(result) => {
                let mut entry = json!({ "business": name, "result": result });
                if let Some(dir) = packs_dir {
                    let packs = write_packs(dir, result.raw_findings().request(), result)?;
                    entry["packs"] = json!({
                        "client": packs.client.display().to_string(),
                        "internal": packs.internal.display().to_string(),
                    });
                }
                report.push(entry);
            },
            Err(err) => {
                failures += 1;
                error!(business = %name, error = %err, "candidate failed");
                report.push(json!({ "business": name, "error": err.to_string() }));
            },
        }
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize batch report")?
    );
    info!(
        candidates = outcomes.len(),
        failures, "batch verification finished"
    );
    Ok(())
}

fn write_packs(
    dir: &Path,
    request: &VerificationRequest,
    result: &VerificationResult,
) -> Result<report::DualPacks> {
    let packs = report::write_dual_packs(dir, request, result)?;
    info!(
        client = %packs.client.display(),
        internal = %packs.internal.display(),
        "evidence packs written"
    );
    Ok(packs)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
