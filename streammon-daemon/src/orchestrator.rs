//! Daemon orchestration -- assembly, signal wiring, and lifecycle management.
//!
//! The [`Orchestrator`] loads configuration, checks credentials, builds the
//! concrete stream pipeline (source, classifier, exporter), and drives it
//! until the stream ends or a shutdown signal arrives.
//!
//! # Signals
//!
//! - `SIGHUP` -> re-read the rule file and swap the active rules
//! - `SIGINT` / `SIGTERM` -> graceful shutdown (stop ingest, finish popped
//!   items, flush telemetry)

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::sync::broadcast;

use streammon_core::config::StreamMonConfig;
use streammon_core::pipeline::{HealthStatus, Pipeline};
use streammon_pipeline::{
    BatchingExporter, ConfiguredSink, ConfiguredSource, LexiconClassifier, PipelineConfig,
    ReloadHandle, RuleLoader, ShutdownReason, StreamPipeline, StreamPipelineBuilder,
};

use crate::metrics_server;

/// Pipeline type assembled by the daemon.
pub type DaemonPipeline =
    StreamPipeline<ConfiguredSource, LexiconClassifier, BatchingExporter<ConfiguredSink>>;

/// Interval of the uptime metric updater.
const UPTIME_UPDATE_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Loaded and validated configuration.
    config: StreamMonConfig,
    /// The stream pipeline.
    pipeline: DaemonPipeline,
    /// Stops background tasks (reload listener, uptime updater).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load configuration from `config_path` and build the orchestrator.
    ///
    /// A missing file means defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read, is invalid,
    /// lacks credentials, or the pipeline cannot be assembled.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = load_config(config_path).await?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    ///
    /// Nothing is started here; credentials are checked before any component exists.
    pub fn build_from_config(config: StreamMonConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;
        config
            .validate_credentials()
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
        }

        let pipeline = build_pipeline(&config)?;
        let (shutdown_tx, _) = broadcast::channel(4);

        tracing::info!(
            source = %config.stream.source,
            sink = %config.telemetry.sink,
            workers = config.pipeline.worker_count,
            sentiment = config.sentiment.enabled,
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            pipeline,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start the pipeline and block until the stream ends or SIGINT/SIGTERM arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if startup fails, the subscription fails fatally,
    /// or the final telemetry flush fails.
    pub async fn run(&mut self) -> Result<ShutdownReason> {
        // 시그널 핸들러는 시작 전에 설치해 초기 시그널도 놓치지 않는다
        let mut terminate = ShutdownSignals::install()?;
        let hangup = signal(SignalKind::hangup())
            .map_err(|e| anyhow::anyhow!("failed to install SIGHUP handler: {e}"))?;

        self.pipeline
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start stream pipeline: {e}"))?;

        let reload_task = spawn_reload_listener(
            hangup,
            self.pipeline.reload_handle(),
            self.shutdown_tx.subscribe(),
        );
        let uptime_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        tracing::info!("streammon-daemon running");
        let result = self
            .pipeline
            .run_until(async {
                let name = terminate.recv().await;
                tracing::info!(signal = name, "shutdown signal received");
            })
            .await;

        let _ = self.shutdown_tx.send(());
        let _ = reload_task.await;
        if let Some(task) = uptime_task {
            let _ = task.await;
        }

        let reason = result.map_err(|e| anyhow::anyhow!("stream pipeline failed: {e}"))?;
        let ingest = self.pipeline.ingest_stats();
        let workers = self.pipeline.worker_stats();
        tracing::info!(
            reason = %reason,
            deliveries = ingest.deliveries,
            accepted = ingest.accepted,
            filtered = ingest.filtered,
            records = workers.records,
            "stream pipeline stopped"
        );
        Ok(reason)
    }

    /// Current pipeline health.
    pub async fn health(&self) -> HealthStatus {
        self.pipeline.health_check().await
    }

    /// Seconds since the orchestrator was built.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Handle for requesting a rule reload.
    pub fn reload_handle(&self) -> ReloadHandle {
        self.pipeline.reload_handle()
    }

    /// Loaded configuration.
    pub fn config(&self) -> &StreamMonConfig {
        &self.config
    }

    /// The assembled pipeline.
    pub fn pipeline(&self) -> &DaemonPipeline {
        &self.pipeline
    }
}

/// Read `config_path` (defaults if absent) and apply environment overrides.
///
/// Validation is left to the caller so CLI overrides can be applied first.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub async fn load_config(config_path: &Path) -> Result<StreamMonConfig> {
    let mut config = StreamMonConfig::from_file_or_default(config_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    config.apply_env_overrides();
    Ok(config)
}

/// Assemble source, classifier and exporter from configuration.
fn build_pipeline(config: &StreamMonConfig) -> Result<DaemonPipeline> {
    let pipeline_config = PipelineConfig::from_core(config)
        .map_err(|e| anyhow::anyhow!("invalid pipeline config: {e}"))?;

    let source = ConfiguredSource::from_config(&config.stream)
        .map_err(|e| anyhow::anyhow!("failed to build stream source: {e}"))?;
    let sink = ConfiguredSink::from_config(&config.telemetry)
        .map_err(|e| anyhow::anyhow!("failed to build telemetry sink: {e}"))?;
    let exporter = BatchingExporter::new(sink, pipeline_config.harvest_interval);

    StreamPipelineBuilder::new()
        .config(pipeline_config)
        .source(Arc::new(source))
        .classifier(Arc::new(LexiconClassifier::new()))
        .exporter(Arc::new(exporter))
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build stream pipeline: {e}"))
}

/// Check configuration and rule file without starting anything (`--validate`).
///
/// # Errors
///
/// Returns the first configuration, credential or rule-file problem found.
pub async fn validate_only(config: &StreamMonConfig) -> Result<usize> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;
    config
        .validate_credentials()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    PipelineConfig::from_core(config)
        .map_err(|e| anyhow::anyhow!("invalid pipeline config: {e}"))?;

    let rules = RuleLoader::load_file(&config.stream.rules_file)
        .await
        .map_err(|e| anyhow::anyhow!("invalid rule file: {e}"))?;
    Ok(rules.len())
}

/// SIGTERM / SIGINT listeners.
struct ShutdownSignals {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownSignals {
    fn install() -> Result<Self> {
        let sigterm = signal(SignalKind::terminate())
            .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {e}"))?;
        let sigint = signal(SignalKind::interrupt())
            .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {e}"))?;
        Ok(Self { sigterm, sigint })
    }

    /// Wait for the next shutdown signal and return its name.
    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

/// Forward every SIGHUP to the pipeline's reload controller.
fn spawn_reload_listener(
    mut hangup: Signal,
    reload: ReloadHandle,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("SIGHUP received, requesting rule reload");
                    if !reload.request() {
                        tracing::warn!("reload controller is gone, ignoring SIGHUP");
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("reload listener shutting down");
                    break;
                }
            }
        }
    })
}

/// Spawn a background task that periodically updates the uptime metric.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use streammon_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(UPTIME_UPDATE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS)
                        .set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay_config(dir: &tempfile::TempDir) -> StreamMonConfig {
        let rules = dir.path().join("rules.yaml");
        std::fs::write(&rules, "- brand: acme\n- competitor: globex\n").unwrap();
        let replay = dir.path().join("stream.jsonl");
        std::fs::write(&replay, "").unwrap();

        let mut config = StreamMonConfig::default();
        config.stream.source = "replay".to_owned();
        config.stream.replay_path = replay.display().to_string();
        config.stream.rules_file = rules.display().to_string();
        config.telemetry.sink = "stdout".to_owned();
        config
    }

    #[tokio::test]
    async fn validate_only_counts_rules() {
        let dir = tempfile::tempdir().unwrap();
        let config = replay_config(&dir);
        assert_eq!(validate_only(&config).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn validate_only_rejects_bad_rule_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = replay_config(&dir);
        std::fs::write(&config.stream.rules_file, "brand: not-a-list\n").unwrap();

        let err = validate_only(&config).await.unwrap_err();
        assert!(err.to_string().contains("invalid rule file"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_build() {
        let config = StreamMonConfig::default();
        let err = Orchestrator::build_from_config(config).err().unwrap();
        assert!(err.to_string().contains("STREAMMON_STREAM_BEARER_TOKEN"));
    }

    #[tokio::test]
    async fn builds_replay_pipeline_without_starting() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::build_from_config(replay_config(&dir)).unwrap();

        assert_eq!(orchestrator.pipeline().state_name(), "initialized");
        assert!(orchestrator.health().await.is_unhealthy());
        assert!(orchestrator.reload_handle().request());
        assert_eq!(orchestrator.config().stream.source, "replay");
    }

    #[tokio::test]
    async fn reload_listener_exits_on_shutdown() {
        let (tx, rx) = broadcast::channel(1);
        let (handle, _rx) = streammon_pipeline::reload::reload_channel();
        let hangup = signal(SignalKind::hangup()).unwrap();

        let task = spawn_reload_listener(hangup, handle, rx);
        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
