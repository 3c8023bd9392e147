use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};

use liverec::config::Config;
use liverec::encoder::CommandSpawner;
use liverec::recorder::{LeaseProbe, LeaseStore};
use liverec::shutdown::Shutdown;
use liverec::source::SourceTable;
use liverec::{service, Recorder};

#[derive(Parser)]
#[command(version)]
struct Args {
    /// Set config file path
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = Config::parse(args.config)?;

    utils::set_log(format!(
        "liverec={},storage={}",
        cfg.log.level, cfg.log.level
    ));

    warn!("set log level : {}", cfg.log.level);
    debug!("config : {:?}", cfg);

    let cfg = Arc::new(cfg);
    let sources = Arc::new(SourceTable::from_config(&cfg.sources));
    let spawner = Arc::new(CommandSpawner::new(cfg.encoder.stop_timeout()));
    let probe = Arc::new(LeaseProbe::new(LeaseStore::new(cfg.recording.lease_dir())));

    let recorder = Recorder::new(cfg.clone(), sources, spawner, probe);
    let shutdown = Shutdown::new();
    let tasks = recorder.run(shutdown.clone()).await;

    match signal::wait_for_stop_signal().await {
        Ok(sig) => info!("received {}, shutting down", sig),
        Err(e) => error!("cannot wait for stop signal: {}", e),
    }

    shutdown.trigger();
    service::join_all(tasks).await;
    recorder.shutdown().await;
    info!("liverec shutdown");
    Ok(())
}
