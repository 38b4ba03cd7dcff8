use anyhow::Result;
use callgen::app::AppBuilder;
use callgen::config::{Cli, Config};
use clap::Parser;
use std::fs::File;
use tokio::select;
use tracing::{info, level_filters::LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    let mut _log_guard = None;
    if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        _log_guard = Some(guard);
        log_fmt.with_writer(non_blocking).try_init().ok();
    } else {
        log_fmt.try_init().ok();
    }

    info!("S1 call generator starting");
    let app = AppBuilder::new()
        .config(config)
        .csv(cli.csv)
        .web_only(cli.web)
        .build()?;

    select! {
        result = app.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl+c, shutting down");
            app.engine.stop().await;
        }
    }
    Ok(())
}
