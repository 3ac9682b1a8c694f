use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use judge::artifact::ArtifactStore;
use judge::checker::SolutionChecker;
use judge::config::CliArgs;
use judge::problem::Catalog;
use judge::sandbox::{Toolchains, install_filter};
use judge::worker::worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let config = cli.to_config().context("Failed to load configuration")?;

    let store = ArtifactStore::new(&config.temp_dir).context("Failed to open temp directory")?;
    let filter = install_filter(&store).context("Failed to install syscall filter")?;
    let toolchains = Toolchains::standard(&store, &filter);
    log::info!("Supported languages: {:?}", toolchains.supported());

    let catalog = Catalog::load(config.problems_dir()).context("Failed to load problems")?;

    let checker = Arc::new(SolutionChecker::new(toolchains, catalog).with_pacing(config.pacing));
    let config = Arc::new(config);
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut worker_task = tokio::spawn(worker(config, checker, shutdown_token.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res = &mut worker_task => {
            log::error!("Worker terminated unexpectedly: {:?}", res);
            return Ok(());
        }
    }

    shutdown_token.cancel();
    match worker_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Worker finished with error: {e:#}"),
        Err(e) if e.is_panic() => log::error!("Worker panicked: {:?}", e),
        Err(e) => log::error!("Worker handle finished with error: {:?}", e),
    }

    log::info!("Shutdown complete");
    Ok(())
}
