mod input;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use vigil_client::{Backend, BackendKind, HttpLivenessProbe, PageBackend, ReqwestFetcher, RemoteBackend};
use vigil_core::models::Target;
use vigil_core::traits::{LivenessProbe, NullSink, VerificationSink};
use vigil_core::{
    BatchOrchestrator, CategoryTable, CircuitConfig, CircuitRegistry, EscalationPolicy,
    HybridCoordinator, PipelineConfig, RetryPolicy, ShutdownSupervisor, TraceContext,
};
use vigil_db::{Database, DatabaseConfig, VerificationRepository};

#[derive(Parser)]
#[command(name = "vigil", version, about = "Business website verification pipeline")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "VIGIL_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify every site listed in a CSV file
    Verify(VerifyArgs),

    /// Run the extraction backends on one site and print the merged result
    Extract {
        #[arg(short, long)]
        url: String,

        /// Business name, used for context only
        #[arg(short, long, default_value = "")]
        name: String,

        #[arg(long, env = "VIGIL_POLICY", default_value = "auto")]
        policy: EscalationPolicy,

        #[arg(long, env = "VIGIL_REQUIRE_STAFF")]
        require_staff: bool,

        #[command(flatten)]
        backends: BackendArgs,
    },

    /// Check whether a site is live
    Check {
        #[arg(short, long)]
        url: String,

        #[arg(long, env = "VIGIL_LIVENESS_TIMEOUT", default_value_t = 15)]
        timeout_secs: u64,
    },

    /// Show a persisted job and its most recent errors (requires DATABASE_URL)
    Status {
        #[arg(short, long)]
        job_id: String,

        /// Number of error-log entries to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Args)]
struct VerifyArgs {
    /// CSV file with a header row
    #[arg(short, long, env = "VIGIL_INPUT")]
    input: PathBuf,

    #[arg(long, env = "VIGIL_NAME_COLUMN", default_value = "name")]
    name_column: String,

    #[arg(long, env = "VIGIL_URL_COLUMN", default_value = "url")]
    url_column: String,

    /// Resume this job if the checkpoint belongs to it (generated when omitted)
    #[arg(long, env = "VIGIL_JOB_ID")]
    job_id: Option<String>,

    #[arg(long, env = "VIGIL_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    #[arg(long, env = "VIGIL_CHECKPOINT", default_value = "progress.json")]
    checkpoint: PathBuf,

    /// JSON file mapping categories to keywords, replacing the built-in table
    #[arg(long, env = "VIGIL_CATEGORIES")]
    categories: Option<PathBuf>,

    /// Also write results to PostgreSQL (requires DATABASE_URL)
    #[arg(long, default_value_t = false)]
    save: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    backends: BackendArgs,
}

#[derive(Args)]
struct PipelineArgs {
    #[arg(long, env = "VIGIL_BATCH_SIZE", default_value_t = 20)]
    batch_size: usize,

    #[arg(long, env = "VIGIL_MAX_WORKERS", default_value_t = 3)]
    max_workers: usize,

    /// Records between checkpoint writes
    #[arg(long, env = "VIGIL_SAVE_INTERVAL", default_value_t = 25)]
    save_interval: usize,

    #[arg(long, env = "VIGIL_POLICY", default_value = "auto")]
    policy: EscalationPolicy,

    /// Treat results without staff as incomplete
    #[arg(long, env = "VIGIL_REQUIRE_STAFF")]
    require_staff: bool,

    #[arg(long, env = "VIGIL_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    #[arg(long, env = "VIGIL_INITIAL_BACKOFF", default_value_t = 1.0)]
    initial_backoff_secs: f64,

    #[arg(long, env = "VIGIL_BACKOFF_FACTOR", default_value_t = 2.0)]
    backoff_factor: f64,

    #[arg(long, env = "VIGIL_MAX_BACKOFF", default_value_t = 30.0)]
    max_backoff_secs: f64,

    /// Errors before a resource's circuit opens
    #[arg(long, env = "VIGIL_CIRCUIT_THRESHOLD", default_value_t = 5)]
    circuit_threshold: u32,

    #[arg(long, env = "VIGIL_CIRCUIT_RESET", default_value_t = 300)]
    circuit_reset_secs: u64,

    #[arg(long, env = "VIGIL_LIVENESS_TIMEOUT", default_value_t = 15)]
    liveness_timeout_secs: u64,

    #[arg(long, env = "VIGIL_GRACE_PERIOD", default_value_t = 30)]
    grace_period_secs: u64,

    #[arg(long, env = "VIGIL_MONITOR_INTERVAL", default_value_t = 30)]
    monitor_interval_secs: u64,

    /// Pause between batch submissions
    #[arg(long, env = "VIGIL_SUBMIT_GAP_MS", default_value_t = 500)]
    submit_gap_ms: u64,
}

impl PipelineArgs {
    fn to_config(&self, max_staff: usize) -> Result<PipelineConfig> {
        let retry = RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_initial_backoff(seconds("initial-backoff-secs", self.initial_backoff_secs)?)
            .with_backoff_factor(self.backoff_factor)
            .with_max_backoff(seconds("max-backoff-secs", self.max_backoff_secs)?);
        let circuit = CircuitConfig {
            failure_threshold: self.circuit_threshold,
            reset_interval: Duration::from_secs(self.circuit_reset_secs),
        };

        let config = PipelineConfig::default()
            .with_batch_size(self.batch_size)
            .with_max_workers(self.max_workers)
            .with_save_interval(self.save_interval)
            .with_policy(self.policy)
            .with_require_staff(self.require_staff)
            .with_retry(retry)
            .with_circuit(circuit)
            .with_liveness_timeout(Duration::from_secs(self.liveness_timeout_secs))
            .with_grace_period(Duration::from_secs(self.grace_period_secs))
            .with_monitor_interval(Duration::from_secs(self.monitor_interval_secs))
            .with_submit_gap(Duration::from_millis(self.submit_gap_ms))
            .with_max_staff(max_staff);
        config.validate().context("Invalid pipeline configuration")?;
        Ok(config)
    }
}

/// Seconds flag as a `Duration`; negative, NaN and overflowing values are
/// rejected.
fn seconds(flag: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| {
        format!("--{flag} must be a finite, non-negative number of seconds, got {value}")
    })
}

#[derive(Args)]
struct BackendArgs {
    /// Local backend: page (plain HTTP) or browser (headless Chromium)
    #[arg(long, env = "VIGIL_PRIMARY", default_value = "page")]
    primary: BackendKind,

    /// API key of the remote scrape service; enables the remote backend
    #[arg(long, env = "VIGIL_REMOTE_API_KEY")]
    remote_api_key: Option<String>,

    #[arg(long, env = "VIGIL_REMOTE_BASE_URL", default_value = vigil_client::remote::DEFAULT_BASE_URL)]
    remote_base_url: String,

    /// Pages requested from the remote service per site, start page included
    #[arg(long, env = "VIGIL_REMOTE_MAX_PAGES", default_value_t = vigil_client::remote::DEFAULT_MAX_PAGES)]
    remote_max_pages: usize,

    /// Timeout of one page fetch
    #[arg(long, env = "VIGIL_FETCH_TIMEOUT", default_value_t = 30)]
    fetch_timeout_secs: u64,

    #[arg(long, env = "VIGIL_MAX_STAFF", default_value_t = 20)]
    max_staff: usize,
}

impl BackendArgs {
    async fn build_primary(&self) -> Result<Backend> {
        let timeout = Duration::from_secs(self.fetch_timeout_secs);
        let backend = match self.primary {
            BackendKind::Page => {
                let fetcher = ReqwestFetcher::with_timeout(timeout)
                    .context("Failed to create HTTP client")?;
                Backend::Page(PageBackend::new("page", fetcher).with_max_staff(self.max_staff))
            }
            #[cfg(feature = "browser")]
            BackendKind::Browser => {
                let fetcher = vigil_client::BrowserFetcher::with_timeout(timeout)
                    .await
                    .context("Failed to launch headless browser")?;
                Backend::Browser(PageBackend::new("browser", fetcher).with_max_staff(self.max_staff))
            }
            #[cfg(not(feature = "browser"))]
            BackendKind::Browser => {
                bail!("vigil was built without the `browser` feature")
            }
            BackendKind::Remote => Backend::Remote(self.build_remote_with(self.api_key()?)?),
        };
        Ok(backend)
    }

    /// The secondary backend, if a remote API key was given and the remote
    /// service is not already the primary.
    fn build_remote(&self) -> Result<Option<Backend>> {
        if self.primary == BackendKind::Remote {
            return Ok(None);
        }
        match self.remote_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {
                Ok(Some(Backend::Remote(self.build_remote_with(key)?)))
            }
            _ => Ok(None),
        }
    }

    fn build_remote_with(&self, key: &str) -> Result<RemoteBackend> {
        Ok(RemoteBackend::with_base_url(key, &self.remote_base_url)
            .context("Failed to create remote backend")?
            .with_max_pages(self.remote_max_pages)
            .with_max_staff(self.max_staff))
    }

    fn api_key(&self) -> Result<&str> {
        self.remote_api_key
            .as_deref()
            .context("--primary remote requires --remote-api-key (or VIGIL_REMOTE_API_KEY)")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    match cli.command {
        Commands::Verify(args) => cmd_verify(args).await,
        Commands::Extract {
            url,
            name,
            policy,
            require_staff,
            backends,
        } => cmd_extract(&url, &name, policy, require_staff, &backends).await,
        Commands::Check { url, timeout_secs } => cmd_check(&url, timeout_secs).await,
        Commands::Status { job_id, limit } => cmd_status(&job_id, limit).await,
    }
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("vigil=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and bring the schema up to date.
async fn connect_db() -> Result<VerificationRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.verification_repo())
}

async fn cmd_verify(args: VerifyArgs) -> Result<()> {
    let config = args.pipeline.to_config(args.backends.max_staff)?;
    let targets = input::load_targets(&args.input, &args.name_column, &args.url_column)?;
    if targets.is_empty() {
        bail!("No targets found in {}", args.input.display());
    }
    tracing::info!(count = targets.len(), input = %args.input.display(), "Loaded targets");

    std::fs::create_dir_all(&args.output_dir).with_context(|| {
        format!("Failed to create output directory: {}", args.output_dir.display())
    })?;

    let categories = match &args.categories {
        Some(path) => CategoryTable::from_json_file(path)
            .with_context(|| format!("Failed to load categories from {}", path.display()))?,
        None => CategoryTable::default(),
    };

    if args.save {
        let repo = connect_db().await?;
        run_verify(&args, config, targets, categories, repo).await
    } else {
        run_verify(&args, config, targets, categories, NullSink).await
    }
}

async fn run_verify<S: VerificationSink + 'static>(
    args: &VerifyArgs,
    config: PipelineConfig,
    targets: Vec<Target>,
    categories: CategoryTable,
    sink: S,
) -> Result<()> {
    let probe = HttpLivenessProbe::new(config.liveness_timeout)
        .context("Failed to create liveness probe")?
        .with_cache(10_000, Duration::from_secs(3600));
    let coordinator = build_coordinator(
        &args.backends,
        config.policy,
        config.require_staff,
        config.retry.clone(),
        CircuitRegistry::new(config.circuit.clone()),
    )
    .await?;

    let supervisor = ShutdownSupervisor::new(config.grace_period);
    let signals = supervisor.install_signal_handlers();

    let orchestrator = BatchOrchestrator::new(probe, coordinator, sink, config, supervisor)
        .with_categories(categories)
        .with_checkpoint_path(&args.checkpoint)
        .with_output_dir(&args.output_dir);

    let outcome = orchestrator.run(targets, args.job_id.as_deref()).await;
    signals.abort();
    let stats = outcome.context("Verification run failed")?;

    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

async fn build_coordinator(
    backends: &BackendArgs,
    policy: EscalationPolicy,
    require_staff: bool,
    retry: RetryPolicy,
    circuits: CircuitRegistry,
) -> Result<HybridCoordinator<Backend, Backend>> {
    let primary = backends.build_primary().await?;
    let remote = backends.build_remote()?;
    tracing::info!(
        primary = %primary.kind(),
        remote = remote.is_some(),
        %policy,
        "Extraction backends ready"
    );

    Ok(HybridCoordinator::new(primary, remote, circuits)
        .with_retry(retry)
        .with_policy(policy)
        .with_require_staff(require_staff)
        .with_max_staff(backends.max_staff))
}

async fn cmd_extract(
    url: &str,
    name: &str,
    policy: EscalationPolicy,
    require_staff: bool,
    backends: &BackendArgs,
) -> Result<()> {
    let config = PipelineConfig::default();
    let coordinator = build_coordinator(
        backends,
        policy,
        require_staff,
        config.retry,
        CircuitRegistry::new(config.circuit),
    )
    .await?;

    let target = Target::new(name, url);
    let ctx = TraceContext::detached(url);
    let merged = coordinator
        .extract(&target, &ctx)
        .instrument(ctx.span())
        .await;
    coordinator.cleanup().await;

    println!("{}", serde_json::to_string_pretty(&merged)?);
    if !merged.succeeded {
        bail!("Extraction failed for {url}");
    }
    Ok(())
}

async fn cmd_check(url: &str, timeout_secs: u64) -> Result<()> {
    let url = vigil_core::util::normalize_url(url)?;
    let probe = HttpLivenessProbe::new(Duration::from_secs(timeout_secs))
        .context("Failed to create liveness probe")?;

    let result = probe.probe(&url).await?;
    tracing::info!(%url, live = result.is_reachable, "Liveness check complete");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn cmd_status(job_id: &str, limit: usize) -> Result<()> {
    let repo = connect_db().await?;

    let Some(job) = repo.get_job(job_id).await? else {
        println!("No job found with id {job_id}");
        return Ok(());
    };

    println!("Job {} [{}]", job.job_id, job.status);
    println!("  updated:   {}", job.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("  processed: {}", job.total_processed);
    println!("  active:    {}", job.active_count);
    println!("  failed:    {}", job.failed_count);
    if let Some(rate) = job.stats.get("success_rate").and_then(|v| v.as_f64()) {
        println!("  success:   {rate:.2}%");
    }

    let errors = repo.recent_errors(job_id, limit).await?;
    if errors.is_empty() {
        println!("\nNo errors logged.");
        return Ok(());
    }

    println!("\nRecent errors:");
    for entry in &errors {
        let url = entry
            .context
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!(
            "  {} [{}] {} ({})",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.error_type,
            url,
            entry.message,
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_accepts_fractions() {
        assert_eq!(seconds("max-backoff-secs", 1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(seconds("max-backoff-secs", 0.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_seconds_rejects_unrepresentable_values() {
        for value in [f64::NAN, f64::INFINITY, -1.0, 1e300] {
            let err = seconds("initial-backoff-secs", value).unwrap_err();
            assert!(err.to_string().contains("--initial-backoff-secs"));
        }
    }

    #[test]
    fn test_nan_backoff_factor_is_a_config_error() {
        let cli = Cli::try_parse_from([
            "vigil",
            "verify",
            "--input",
            "targets.csv",
            "--backoff-factor",
            "NaN",
        ])
        .unwrap();
        let Commands::Verify(args) = cli.command else {
            panic!("expected the verify command");
        };
        assert!(args.pipeline.to_config(5).is_err());
    }
}
