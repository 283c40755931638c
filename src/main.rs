#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::sync::Arc;

use wildstar_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(Config::load()?);
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.auth.static_credentials.is_empty() {
        log::warn!(
            "No static credentials are configured; every login will be denied until an account store is wired up."
        );
    }

    wildstar_server::startup(config).await
}
