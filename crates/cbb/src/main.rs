use std::sync::Arc;

use cbb_core::config::BotConfig;
use cbb_process::TokioProcessRunner;

#[tokio::main]
async fn main() -> Result<(), cbb_core::Error> {
    cbb_core::logging::init("cbb")?;

    let cfg = Arc::new(BotConfig::load()?);
    let runner = Arc::new(TokioProcessRunner::new());

    cbb_telegram::router::run_polling(cfg, runner)
        .await
        .map_err(|e| cbb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
