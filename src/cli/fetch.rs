//! `fetch` command implementation

use crate::downloader::{FetchConfig, FetchSession, Harvester, RunSummary, WindowThrottle};
use crate::fetcher::http::ReqwestTransport;
use crate::fetcher::{BatchGenerator, BatchResult};
use crate::metrics::{self, MetricsSink, RecorderMetrics};
use crate::output::{BatchSink, JsonLinesWriter, OutputResult};
use crate::query::AppSearchQuery;
use crate::resume::ResumeState;
use crate::shutdown::SharedShutdown;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::CliError;

/// Upper bound on `--concurrency`
const MAX_CONCURRENCY: usize = 1000;

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

fn parse_positive(s: &str) -> Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) => Err("value must be at least 1".to_string()),
        Ok(value) => Ok(value),
        Err(_) => Err(format!("'{s}' is not a valid number")),
    }
}

/// Arguments for the `fetch` command
#[derive(Parser, Debug, Clone)]
pub struct FetchArgs {
    /// Category (genre) id to harvest
    #[arg(long)]
    pub category_id: u32,

    /// First page to request (ignored when resuming from saved state)
    #[arg(long)]
    pub start_page: Option<u64>,

    /// Total request budget (default: unbounded)
    #[arg(long)]
    pub max_requests: Option<u64>,

    /// Requests per batch (default: 100)
    #[arg(long, value_parser = parse_positive)]
    pub batch_size: Option<usize>,

    /// Session-wide concurrency ceiling (default: 100, max: 1000)
    #[arg(long, value_parser = parse_concurrency)]
    pub concurrency: Option<usize>,

    /// Attempts per request, including the first (default: 3, range: 1-20)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub retries: Option<u32>,

    /// Per-attempt timeout in seconds (default: 30)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// TOML configuration file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory for resume state; enables resuming
    #[arg(long)]
    pub resume_dir: Option<PathBuf>,

    /// Output file (JSON lines, appended)
    #[arg(long, default_value = "pages.jsonl")]
    pub output: PathBuf,

    /// Expose Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Override the upstream base URL (scheme://host[:port])
    #[arg(long)]
    pub base_url: Option<String>,
}

impl FetchArgs {
    /// Build the effective configuration: file (or defaults), then flags.
    pub fn resolve_config(&self) -> Result<FetchConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => FetchConfig::load(path)?,
            None => FetchConfig::default(),
        };

        if let Some(max_requests) = self.max_requests {
            config.max_requests = max_requests;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build the query, honouring `--base-url`.
    pub fn query(&self) -> Result<AppSearchQuery, CliError> {
        let query = AppSearchQuery::new(self.category_id);
        match &self.base_url {
            None => Ok(query),
            Some(url) => {
                let (scheme, host) = url.split_once("://").ok_or_else(|| {
                    CliError::InvalidArgument(format!("base URL '{url}' must look like scheme://host"))
                })?;
                Ok(query.with_base_url(scheme, host.trim_end_matches('/')))
            }
        }
    }

    /// Execute the harvest until it completes, is cancelled, or terminates.
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<RunSummary, CliError> {
        let config = self.resolve_config()?;
        let query = self.query()?;

        if let Some(addr) = self.metrics_addr {
            metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::MetricsError(e.to_string()))?;
        }
        let metrics: Arc<dyn MetricsSink> = Arc::new(RecorderMetrics);

        let resume_path = self
            .resume_dir
            .as_ref()
            .map(|dir| ResumeState::path_for(dir, &query.key()));
        let saved = match &resume_path {
            Some(path) => ResumeState::load_if_exists(path)?,
            None => None,
        };

        if let (None, Some(start_page)) = (&saved, self.start_page) {
            if start_page > query.last_page() {
                return Err(CliError::InvalidArgument(format!(
                    "--start-page {start_page} is beyond the last addressable page {}",
                    query.last_page()
                )));
            }
        }

        let mut generator = match &saved {
            Some(state) => {
                state.ensure_query(&query.key())?;
                if self.start_page.is_some() {
                    warn!("Ignoring --start-page, resuming from saved bookmark");
                }
                info!(
                    next_page = state.bookmark().next_page,
                    issued = state.bookmark().issued,
                    failed_pages = state.failed_page_count(),
                    "Resuming harvest"
                );
                BatchGenerator::from_bookmark(query, state.bookmark(), config.batch_size, config.max_requests)
            }
            None => BatchGenerator::new(
                query,
                self.start_page.unwrap_or(0),
                config.batch_size,
                config.max_requests,
            ),
        };

        let transport = Arc::new(ReqwestTransport::new(&config)?);
        let throttle = Arc::new(WindowThrottle::from_config(&config));
        let session = FetchSession::new(transport, throttle, &config)
            .with_metrics(metrics)
            .with_shutdown(shutdown);

        let mut harvester = Harvester::new(session, &config);
        if let Some(path) = resume_path {
            harvester = harvester.with_resume_file(path);
        }
        if let Some(state) = saved {
            harvester = harvester.with_resume_state(state);
        }

        let mut sink = ProgressSink::new(JsonLinesWriter::new(&self.output)?, generator.remaining_budget());
        let summary = harvester.run(&mut generator, &mut sink).await?;
        sink.bar.finish_and_clear();

        println!(
            "{:?}: {} pages ok, {} failed, {} retries, next page {}",
            summary.status,
            summary.progress.successes,
            summary.progress.failures,
            summary.progress.retries(),
            summary.bookmark.next_page
        );
        Ok(summary)
    }
}

/// Sink wrapper that advances a progress bar per batch
struct ProgressSink<S> {
    inner: S,
    bar: ProgressBar,
    failures: u64,
}

impl<S: BatchSink> ProgressSink<S> {
    fn new(inner: S, budget: Option<u64>) -> Self {
        let bar = match budget {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self {
            inner,
            bar,
            failures: 0,
        }
    }
}

impl<S: BatchSink> BatchSink for ProgressSink<S> {
    fn accept(&mut self, result: &BatchResult) -> OutputResult<()> {
        self.inner.accept(result)?;
        self.failures += result.failures() as u64;
        self.bar.inc(result.len() as u64);
        self.bar.set_message(format!("{} failed", self.failures));
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        self.inner.finish()
    }
}
