use std::{path::PathBuf, time::Duration};

use gumdrop::Options;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Options)]
struct Args {
    /// prints the help message
    help: bool,

    /// path to the configuration file
    #[options(default = "lurk.toml", meta = "<PATH>")]
    config: PathBuf,

    /// enables debug logging, unless RUST_LOG is set
    debug: bool,
}

async fn watch_for_ctrl_c(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        log::warn!("cannot listen for ctrl-c");
        return;
    }

    log::info!("shutting down. press ctrl-c again to stop immediately");
    shutdown.cancel();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::warn!("stopping immediately"),
        _ = tokio::time::sleep(Duration::from_secs(10)) => log::warn!("shutdown is taking too long"),
    }
    std::process::exit(1)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    simple_env_load::load_env_from([".dev.env"]);

    let args = Args::parse_args_default_or_exit();
    if args.debug && std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "debug");
    }

    alto_logger::TermLogger::new(
        alto_logger::Options::default()
            .with_time(alto_logger::TimeConfig::relative_now())
            .with_style(alto_logger::StyleConfig::SingleLine),
    )?
    .init()?;

    log::info!("loading configuration from {}", args.config.display());
    let config = lurk::config::Config::load(&args.config)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_for_ctrl_c(shutdown.clone()));

    lurk::run(config, shutdown).await
}
