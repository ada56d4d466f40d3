use std::process::ExitCode;

use rss2imap::{poll, Config, HttpFeedSource, ImapStore};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> rss2imap::Result<()> {
    let config = Config::load()?;
    log::info!(
        "Connecting to {}:{} as {}",
        config.imap_server,
        config.imap_port,
        config.username
    );
    let store = ImapStore::connect(&config).await?;
    let source = HttpFeedSource::new()?;
    poll::run(&store, &source, &config.sync_settings(), config.poll_settings()).await
}
