//! Edge repository publishing daemon
//!
//! Wires the content service client, the build-result store and the job
//! engine together, registers the publish handlers and runs until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use clap::Parser;
use edge_content::config::{DEFAULT_LIST_LIMIT, DEFAULT_STORAGE_CLASS};
use edge_content::{ContentConfig, GuardMode, HttpContentApi};
use edge_jobs::{AtomicMetrics, Context, Identity, MemoryWorker, Worker, WorkerConfig};
use edge_repo::config::DEFAULT_STAGING_REPO;
use edge_repo::{
    enqueue_publish, init_tracing, register_publish_handlers, BuildConfig, LogFormat,
    RepoBuilder, RepoJobArgs,
};
use edge_state::fakes::MemoryBuildResultStore;
use edge_state::BuildResultStore;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "edge-repod")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publishes OSTree repositories for edge fleets", long_about = None)]
struct Args {
    /// Content service base URL
    #[arg(long, env = "CONTENT_URL")]
    content_url: String,

    #[arg(long, env = "CONTENT_USERNAME")]
    content_username: Option<String>,

    #[arg(long, env = "CONTENT_PASSWORD", hide_env_values = true)]
    content_password: Option<String>,

    /// OAuth2 token endpoint; with a client id and secret it replaces basic auth
    #[arg(long, env = "CONTENT_TOKEN_URL")]
    token_url: Option<String>,

    #[arg(long, env = "CONTENT_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "CONTENT_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Storage class of newly provisioned domains
    #[arg(long, env = "CONTENT_STORAGE_CLASS", default_value = DEFAULT_STORAGE_CLASS)]
    storage_class: String,

    #[arg(long, env = "CONTENT_LIST_LIMIT", default_value_t = DEFAULT_LIST_LIMIT)]
    list_limit: u64,

    #[arg(long, env = "CONTENT_REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    request_timeout_secs: u64,

    /// Concurrent publish workers
    #[arg(long, env = "EDGE_WORKERS", default_value_t = 5)]
    workers: usize,

    #[arg(long, env = "EDGE_QUEUE_SIZE", default_value_t = 100)]
    queue_size: usize,

    /// Per-job timeout
    #[arg(long, env = "EDGE_JOB_TIMEOUT_SECS", default_value_t = 1800)]
    job_timeout_secs: u64,

    /// composite (header + rbac per org) or turnpike (shared x509 guard)
    #[arg(long, env = "EDGE_GUARD_MODE", default_value_t = GuardMode::Composite)]
    guard_mode: GuardMode,

    #[arg(long, env = "EDGE_TURNPIKE_SUBJECT", default_value = "")]
    turnpike_subject: String,

    #[arg(long, env = "EDGE_STAGING_REPO", default_value = DEFAULT_STAGING_REPO)]
    staging_repo: String,

    /// Embed these credentials in published distribution URLs
    #[arg(long, env = "EDGE_DISTRIBUTION_USERNAME", requires = "distribution_password")]
    distribution_username: Option<String>,

    #[arg(long, env = "EDGE_DISTRIBUTION_PASSWORD", hide_env_values = true)]
    distribution_password: Option<String>,

    /// Delete a newly created distribution when its first import fails
    #[arg(long, env = "EDGE_ROLLBACK_DISTRIBUTION")]
    rollback_distribution: bool,

    /// How often engine metrics are logged
    #[arg(long, env = "EDGE_METRICS_INTERVAL_SECS", default_value_t = 60)]
    metrics_interval_secs: u64,

    /// text or json
    #[arg(long, env = "EDGE_LOG_FORMAT", default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Queue a publish at startup, as ORG/REPO=TARBALL (repeatable)
    #[arg(long = "publish", value_parser = parse_publish)]
    publish: Vec<StartupPublish>,
}

#[derive(Debug, Clone, PartialEq)]
struct StartupPublish {
    org_id: String,
    repo_id: String,
    tarball: PathBuf,
}

fn parse_publish(raw: &str) -> std::result::Result<StartupPublish, String> {
    let (target, tarball) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ORG/REPO=TARBALL, got '{raw}'"))?;
    let (org_id, repo_id) = target
        .split_once('/')
        .filter(|(org, repo)| !org.is_empty() && !repo.is_empty())
        .ok_or_else(|| format!("expected ORG/REPO before '=', got '{target}'"))?;
    if tarball.is_empty() {
        return Err("tarball path is empty".into());
    }
    Ok(StartupPublish {
        org_id: org_id.to_string(),
        repo_id: repo_id.to_string(),
        tarball: PathBuf::from(tarball),
    })
}

impl Args {
    fn content_config(&self) -> Result<ContentConfig> {
        let mut config = ContentConfig::new(&self.content_url)
            .with_storage_class(&self.storage_class)
            .with_list_limit(self.list_limit)
            .with_request_timeout(Duration::from_secs(self.request_timeout_secs));

        match (&self.token_url, &self.client_id, &self.client_secret) {
            (Some(token_url), Some(id), Some(secret)) => {
                config = config.with_client_credentials(token_url, id, secret);
            }
            (None, None, None) => {
                if let Some(username) = &self.content_username {
                    let password = self.content_password.as_deref().unwrap_or_default();
                    config = config.with_basic_auth(username, password);
                }
            }
            _ => bail!("--token-url, --client-id and --client-secret must be given together"),
        }
        Ok(config)
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_workers(self.workers)
            .with_queue_size(self.queue_size)
            .with_timeout(Duration::from_secs(self.job_timeout_secs))
            .with_interrupt_handling(true)
    }

    fn build_config(&self) -> BuildConfig {
        let mut config = BuildConfig::default()
            .with_guard_mode(self.guard_mode)
            .with_storage_class(&self.storage_class)
            .with_staging_repo_name(&self.staging_repo)
            .with_turnpike_subject(&self.turnpike_subject)
            .with_rollback_distribution(self.rollback_distribution);
        if let (Some(user), Some(password)) =
            (&self.distribution_username, &self.distribution_password)
        {
            config = config.with_distribution_credentials(user, password);
        }
        config
    }
}

/// Log engine metrics every `every` until the worker stops.
async fn flush_metrics(
    worker: MemoryWorker<RepoJobArgs>,
    metrics: Arc<AtomicMetrics>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = worker.wait_stopped() => return,
            _ = ticker.tick() => metrics.flush(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(args.log_format, level);

    let metrics = Arc::new(AtomicMetrics::new());
    let api = HttpContentApi::new(args.content_config()?)
        .context("Failed to build content service client")?
        .with_metrics(metrics.clone());
    // Build records live in memory until a database-backed store is wired in.
    let store: Arc<dyn BuildResultStore> = Arc::new(MemoryBuildResultStore::new());
    let builder = Arc::new(
        RepoBuilder::new(Arc::new(api), Arc::clone(&store), args.build_config())
            .context("Invalid publishing configuration")?,
    );

    let worker = MemoryWorker::<RepoJobArgs>::with_metrics(args.worker_config(), metrics.clone())
        .context("Invalid worker configuration")?;
    register_publish_handlers(&worker, builder)?;

    let ctx = Context::background();
    worker.start(&ctx)?;
    info!(
        workers = args.workers,
        queue_size = args.queue_size,
        guard_mode = %args.guard_mode,
        content_url = %args.content_url,
        "edge-repod started"
    );

    for publish in &args.publish {
        let (record, job_id) = enqueue_publish(
            &ctx,
            &worker,
            store.as_ref(),
            &publish.org_id,
            &publish.repo_id,
            publish.tarball.clone(),
            Identity::default(),
        )
        .await?;
        info!(build_id = %record.id, job_id = %job_id, "startup publish queued");
    }

    let flusher = tokio::spawn(flush_metrics(
        worker.clone(),
        metrics.clone(),
        Duration::from_secs(args.metrics_interval_secs),
    ));
    worker.wait_stopped().await;
    flusher.await.ok();

    metrics.flush();
    info!("edge-repod stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["edge-repod", "--content-url", "https://content.example.com/"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_startup_publish() {
        let parsed = parse_publish("42/fleet=/var/lib/commits/a.tar").unwrap();
        assert_eq!(parsed.org_id, "42");
        assert_eq!(parsed.repo_id, "fleet");
        assert_eq!(parsed.tarball, PathBuf::from("/var/lib/commits/a.tar"));
        assert!(parse_publish("42=/a.tar").is_err());
        assert!(parse_publish("42/fleet").is_err());
        assert!(parse_publish("/fleet=/a.tar").is_err());
    }

    #[test]
    fn maps_flags_to_build_config() {
        let args = args(&[
            "--guard-mode",
            "turnpike",
            "--turnpike-subject",
            "CN=gateway",
            "--distribution-username",
            "fleet",
            "--distribution-password",
            "pw",
            "--rollback-distribution",
        ]);
        let config = args.build_config();
        assert_eq!(config.guard_mode, GuardMode::Turnpike);
        assert_eq!(config.turnpike_subject, "CN=gateway");
        assert!(config.rollback_distribution);
        assert_eq!(config.distribution_credentials.unwrap().username, "fleet");
    }

    #[test]
    fn partial_client_credentials_are_rejected() {
        let args = args(&["--token-url", "https://sso.example.com/token"]);
        assert!(args.content_config().is_err());
    }

    #[test]
    fn worker_defaults() {
        let config = args(&[]).worker_config();
        assert_eq!(config.workers, 5);
        assert_eq!(config.queue_size, 100);
        assert_eq!(config.timeout, Duration::from_secs(1800));
    }
}
