use anyhow::Result;
use clap::Parser;
use proxy_sweep::{
    config::{
        ProbeConfig, RunConfig, DEFAULT_ACTIVE_OUTPUT, DEFAULT_CONCURRENCY, DEFAULT_DEAD_OUTPUT,
        DEFAULT_DIRECT_URL, DEFAULT_INPUT, DEFAULT_TIMEOUT_SECS, DEFAULT_VERIFY_HOST,
        DEFAULT_VERIFY_URL,
    },
    logging::{self, LogLevel},
    proxy::StageKind,
    runner,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Probe a list of proxies and split it into active and dead sets
#[derive(Parser, Debug)]
#[command(name = "proxy-sweep")]
#[command(about = "Probe a list of proxies and split it into active and dead sets")]
struct Cli {
    /// Input file, one `address,port[,country[,organization]]` per line
    #[arg(short, long, env = "IP_FILE", default_value = DEFAULT_INPUT)]
    input: PathBuf,

    /// Output file for active proxies
    #[arg(short, long, env = "ACTIVE_FILE", default_value = DEFAULT_ACTIVE_OUTPUT)]
    active: PathBuf,

    /// Output file for dead proxies
    #[arg(short, long, env = "DEAD_FILE", default_value = DEFAULT_DEAD_OUTPUT)]
    dead: PathBuf,

    /// Maximum number of probes in flight
    #[arg(short = 'n', long, env = "PROBE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Timeout in seconds for each network attempt
    #[arg(
        long,
        env = "PROBE_TIMEOUT",
        default_value_t = DEFAULT_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout: u64,

    /// URL requested through each proxy by the direct stage
    #[arg(long, env = "DIRECT_URL", default_value = DEFAULT_DIRECT_URL)]
    direct_url: String,

    /// Verification endpoint; `{ip}` and `{port}` are substituted if present
    #[arg(long, env = "API_URL", default_value = DEFAULT_VERIFY_URL)]
    verify_url: String,

    /// Host passed to the verification endpoint
    #[arg(long, env = "VERIFY_HOST", default_value = DEFAULT_VERIFY_HOST)]
    verify_host: String,

    /// Stages to run, in fallback order
    #[arg(
        long,
        env = "PROBE_STAGES",
        value_enum,
        value_delimiter = ',',
        default_value = "direct,verify"
    )]
    stages: Vec<StageKind>,

    /// Flush outputs after this many results (0 = only at the end)
    #[arg(long, env = "CHECKPOINT_EVERY", default_value_t = 0)]
    checkpoint_every: usize,

    /// MaxMind City database used to fill unknown countries
    #[arg(long, env = "MMDB_PATH")]
    mmdb: Option<PathBuf>,

    /// Replace the input file with the active set after a complete run
    #[arg(long)]
    promote_active: bool,

    /// Write a JSON run summary to this file
    #[arg(long)]
    summary: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
}

impl Cli {
    fn run_config(&self) -> RunConfig {
        let probe = ProbeConfig::new()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_direct_url(&self.direct_url)
            .with_verify_url(&self.verify_url)
            .with_verify_host(&self.verify_host)
            .with_stages(self.stages.iter().copied());

        let mut config = RunConfig::new()
            .with_input(&self.input)
            .with_outputs(&self.active, &self.dead)
            .with_concurrency(self.concurrency)
            .with_checkpoint_every(self.checkpoint_every)
            .with_promote_active(self.promote_active)
            .with_probe(probe);

        if let Some(path) = &self.mmdb {
            config = config.with_mmdb_path(path);
        }
        if let Some(path) = &self.summary {
            config = config.with_summary_path(path);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level)?;

    let config = cli.run_config();
    info!(
        concurrency = config.concurrency,
        timeout_secs = cli.timeout,
        stages = ?config.probe.stages,
        "configuration loaded"
    );

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping probes");
            cancel_ctrlc.cancel();
        }
    });

    match runner::run(&config, cancel).await {
        Ok(summary) => {
            println!(
                "Results: {} active, {} dead ({} skipped, {} duplicates)",
                summary.active, summary.dead, summary.skipped, summary.duplicates
            );
            println!("Saved active proxies to {:?}", summary.active_output);
            println!("Saved dead proxies to {:?}", summary.dead_output);
            Ok(())
        }
        Err(e) if e.is_source_missing() => {
            error!("{}", e);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
