pub mod config;
pub mod observer;
pub mod router;
pub mod server;

use std::sync::Arc;

use self::{config::Config, observer::Observer, router::Router, server::Bound};

use service::{RealmInfo, Service, ServiceOptions};

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "wildstar-rs.",
    env!("CARGO_PKG_VERSION")
);

/// Build the service core from configuration and bind the three front
/// doors. Opened up so integration tests can start a whole server and
/// read back the bound addresses.
pub async fn bind(config: Arc<Config>) -> anyhow::Result<(Bound, Arc<Router>)> {
    let observer = Observer::new(&config);

    let service = Service::new(ServiceOptions {
        expected_build: config.limits.expected_build,
        realm: RealmInfo {
            id: config.realm.id,
            name: config.realm.name.clone(),
            realm_type: config.realm.realm_type.as_realm_type(),
            flags: config.realm.flags,
            note_text_id: config.realm.note_text_id,
            public_address: config.realm.public_address,
            public_port: config.realm.public_port,
            messages: config.realm.messages.clone(),
        },
        auth_limit: config.auth.rate_limit.as_limit(),
        max_speed: config.world.max_speed,
        max_character_level: config.world.max_character_level,
        stores: observer,
    });

    let router = Arc::new(Router::default());
    let bound = server::start(config, service, router.clone()).await?;

    log::info!("{SOFTWARE} up: auth={}, realm={}, world={}", bound.auth, bound.realm, bound.world);

    Ok((bound, router))
}

/// In order to let the integration tests use this crate and start the
/// server directly, a function is opened to replace the main function.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    bind(config).await?;

    // The listeners run on their own tasks; keep the process alive.
    std::future::pending::<()>().await;
    Ok(())
}
