//! Orchestrator integration tests.
//!
//! Tests the full flow: config loading -> pipeline build -> run -> shutdown.

use std::io::Write;
use std::path::Path;

use streammon_core::config::StreamMonConfig;
use streammon_daemon::orchestrator::{Orchestrator, validate_only};
use streammon_pipeline::ShutdownReason;

const REPLAY_LINES: &[&str] = &[
    r#"{"data":{"id":"1","text":"acme support was great today"},"matching_rules":[{"tag":"brand"}]}"#,
    r#"{"data":{"id":"2","text":"nothing to see"}}"#,
];

/// Write a replay-backed config (plus rule and replay files) into `dir`.
fn write_replay_setup(dir: &Path) -> std::path::PathBuf {
    let rules = dir.join("rules.yaml");
    std::fs::write(&rules, "- brand: acme\n").unwrap();
    let replay = dir.join("stream.jsonl");
    std::fs::write(&replay, REPLAY_LINES.join("\n")).unwrap();

    let config_path = dir.join("streammon.toml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(
        file,
        r#"
[general]
log_level = "debug"

[stream]
source = "replay"
replay_path = "{}"
rules_file = "{}"

[telemetry]
sink = "stdout"
harvest_interval_secs = 1
"#,
        replay.display(),
        rules.display()
    )
    .unwrap();
    config_path
}

#[tokio::test]
#[serial_test::serial]
async fn test_replay_run_ends_with_stream() {
    // Given: A replay source with a finite file
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_replay_setup(dir.path());

    // When: Building and running the orchestrator
    let mut orchestrator = Orchestrator::build(&config_path)
        .await
        .expect("replay config should build");
    let reason = orchestrator.run().await.expect("run should succeed");

    // Then: The stream ends on its own and everything accepted was processed
    assert_eq!(reason, ShutdownReason::StreamEnded);
    let ingest = orchestrator.pipeline().ingest_stats();
    assert_eq!(ingest.accepted, 1);
    assert_eq!(orchestrator.pipeline().worker_stats().records, 1);
    assert_eq!(orchestrator.pipeline().queue_depth(), 0);
    assert!(orchestrator.health().await.is_unhealthy());
}

#[tokio::test]
#[serial_test::serial]
async fn test_missing_rule_file_fails_startup() {
    // Given: A config whose rule file was removed
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_replay_setup(dir.path());
    std::fs::remove_file(dir.path().join("rules.yaml")).unwrap();

    // When: Running
    let mut orchestrator = Orchestrator::build(&config_path).await.unwrap();
    let result = orchestrator.run().await;

    // Then: Startup fails and the pipeline is left stopped
    assert!(result.is_err());
    assert_eq!(orchestrator.pipeline().state_name(), "stopped");
}

/// Set environment variables for the duration of a test, restoring them on drop.
struct EnvGuard {
    saved: Vec<(&'static str, Option<String>)>,
}

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        let saved = vars
            .iter()
            .map(|(key, value)| {
                let original = std::env::var(key).ok();
                // SAFETY: Test isolation - serialized with serial_test
                unsafe {
                    std::env::set_var(key, value);
                }
                (*key, original)
            })
            .collect();
        Self { saved }
    }

    fn unset(keys: &[&'static str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| {
                let original = std::env::var(key).ok();
                // SAFETY: Test isolation - serialized with serial_test
                unsafe {
                    std::env::remove_var(key);
                }
                (*key, original)
            })
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in &self.saved {
            // SAFETY: Test cleanup
            unsafe {
                match original {
                    Some(val) => std::env::set_var(key, val),
                    None => std::env::remove_var(key),
                }
            }
        }
    }
}

#[tokio::test]
#[serial_test::serial]
async fn test_runs_from_env_without_config_file() {
    // Given: No config file, everything supplied through the environment
    let dir = tempfile::tempdir().unwrap();
    let rules = dir.path().join("rules.yaml");
    std::fs::write(&rules, "- brand: acme\n").unwrap();
    let replay = dir.path().join("stream.jsonl");
    std::fs::write(&replay, REPLAY_LINES.join("\n")).unwrap();
    let rules = rules.display().to_string();
    let replay = replay.display().to_string();
    let _env = EnvGuard::set(&[
        ("STREAMMON_STREAM_SOURCE", "replay"),
        ("STREAMMON_STREAM_REPLAY_PATH", replay.as_str()),
        ("STREAMMON_STREAM_RULES_FILE", rules.as_str()),
        ("STREAMMON_TELEMETRY_SINK", "stdout"),
    ]);

    // When: Building from a path that does not exist
    let mut orchestrator = Orchestrator::build(&dir.path().join("streammon.toml"))
        .await
        .expect("defaults plus env should build");
    let reason = orchestrator.run().await.expect("run should succeed");

    // Then: The env-configured replay runs to completion
    assert_eq!(reason, ShutdownReason::StreamEnded);
    assert_eq!(orchestrator.pipeline().worker_stats().records, 1);
}

#[tokio::test]
#[serial_test::serial]
async fn test_missing_config_file_still_requires_credentials() {
    let _env = EnvGuard::unset(&[
        "STREAMMON_STREAM_SOURCE",
        "STREAMMON_STREAM_BEARER_TOKEN",
        "TWITTER_BEARER_TOKEN",
    ]);

    let result = Orchestrator::build(Path::new("/nonexistent/streammon.toml")).await;
    let err = result.err().expect("defaults have no bearer token");
    assert!(err.to_string().contains("STREAMMON_STREAM_BEARER_TOKEN"));
}

#[tokio::test]
async fn test_malformed_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("streammon.toml");
    std::fs::write(&path, "[stream\nsource =").unwrap();

    let err = Orchestrator::build(&path).await.err().unwrap();
    assert!(err.to_string().contains("failed to load config"));
}

#[tokio::test]
#[serial_test::serial]
async fn test_validate_only_on_loaded_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = write_replay_setup(dir.path());
    let config = StreamMonConfig::load(&config_path).await.unwrap();

    assert_eq!(validate_only(&config).await.unwrap(), 1);
}

#[test]
fn test_newrelic_sink_requires_insert_key() {
    let toml_str = r#"
[stream]
bearer_token = "token"

[telemetry]
sink = "newrelic"
"#;
    let config: StreamMonConfig = toml::from_str(toml_str).unwrap();
    let err = Orchestrator::build_from_config(config).err().unwrap();
    assert!(err.to_string().contains("telemetry.insert_key"));
}
