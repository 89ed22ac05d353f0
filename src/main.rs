use anyhow::Result;
use clap::Parser;
use std::fs::File;
use tokio::select;
use tracing::{info, level_filters::LevelFilter};
use voip_client::app::AppBuilder;
use voip_client::config::{Cli, Config};

/// Audio file shipped with baresip, played instead of synthesized speech
const LOCAL_TESTING_FILE: &str = "/usr/share/baresip/test-message.wav";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut config = match cli.conf {
        Some(conf) => Config::load(&conf)?,
        None => Config::default(),
    };

    let mut log_fmt = tracing_subscriber::fmt();
    if let Some(ref level) = config.log_level {
        if let Ok(lv) = level.as_str().parse::<LevelFilter>() {
            log_fmt = log_fmt.with_max_level(lv);
        }
    }

    // the guard flushes the log file when main returns
    let _guard = if let Some(ref log_file) = config.log_file {
        let file = File::create(log_file)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        log_fmt.with_writer(non_blocking).try_init().ok();
        Some(guard)
    } else {
        log_fmt.try_init().ok();
        None
    };

    if std::env::var("LOCAL_TESTING").is_ok() && config.tts.local_testing_file.is_none() {
        info!("LOCAL_TESTING is set, text to speech is disabled");
        config.tts.local_testing_file = Some(LOCAL_TESTING_FILE.to_string());
    }

    info!(
        version = voip_client::version::get_short_version(),
        account = config.voip_provider.account,
        "Starting voip-client on {}",
        config.http_addr
    );
    let app = AppBuilder::new().config(config).build()?;

    select! {
        result = app.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received CTRL+C, shutting down");
        }
    }
    Ok(())
}
