use anyhow::Result;
use clap::Parser;

use streammon_daemon::cli::DaemonCli;
use streammon_daemon::logging;
use streammon_daemon::orchestrator::{self, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 파일(없으면 기본값) -> 환경변수 -> CLI 순으로 덮어쓴다
    let mut config = match orchestrator::load_config(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("streammon-daemon: {e}");
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        eprintln!("streammon-daemon: invalid configuration: {e}");
        std::process::exit(1);
    }

    logging::init_tracing(&config.general)?;

    if cli.validate {
        match orchestrator::validate_only(&config).await {
            Ok(rules) => {
                tracing::info!(rules, path = %cli.config.display(), "configuration is valid");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "configuration check failed");
                std::process::exit(1);
            }
        }
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "streammon-daemon starting");

    let mut orchestrator = match Orchestrator::build_from_config(config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize");
            std::process::exit(1);
        }
    };

    match orchestrator.run().await {
        Ok(reason) => {
            tracing::info!(reason = %reason, "streammon-daemon shut down");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "streammon-daemon terminated with error");
            std::process::exit(1);
        }
    }
}
