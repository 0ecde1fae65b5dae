use std::sync::Arc;

use anyhow::Context;
use authgate::{
    app::App, config::Config, logger, mail::SmtpMailer, store::MemoryStore,
};

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    logger::init();

    let config = Config::from_env().context("Bad configuration")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    rt.block_on(async move {
        let store = Arc::new(MemoryStore::new());
        let mailer =
            Arc::new(SmtpMailer::new(&config).context("Bad SMTP config")?);
        let app = App::init(config, store, mailer).await?;

        let spawn_ctrlc_handler = true;
        app.run(spawn_ctrlc_handler).await
    })
}
