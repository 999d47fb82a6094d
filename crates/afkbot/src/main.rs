use std::sync::Arc;

use afkbot_core::{
    config::Config,
    dispatch::Dispatcher,
    ports::SystemClock,
    rank::RankConfigSource,
    store::JsonFileStore,
    tracker::AfkTracker,
};

#[tokio::main]
async fn main() -> Result<(), afkbot_core::Error> {
    afkbot_core::logging::init("afkbot")?;

    let cfg = Arc::new(Config::load()?);

    let store = Arc::new(JsonFileStore::new(cfg.data_file.clone()));
    let ranks = Arc::new(RankConfigSource::new(
        cfg.rank_config_file.clone(),
        cfg.rank_config_reload,
    ));
    let tiers = ranks.current().tiers().len();
    tracing::info!(tiers, reload = ?cfg.rank_config_reload, "rank config ready");

    let tracker = Arc::new(AfkTracker::open(store, ranks, Arc::new(SystemClock))?);
    let dispatcher = Arc::new(Dispatcher::new(tracker, cfg.leaderboard_default_limit));

    afkbot_telegram::router::run_polling(cfg, dispatcher)
        .await
        .map_err(|e| afkbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
