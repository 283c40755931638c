use std::{collections::HashMap, fs::read_to_string, net::Ipv4Addr, net::SocketAddr, time::Duration};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

use codec::packet::realm::RealmType;
use service::limiter::RateLimit;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    ///
    /// Sliding window length for auth attempts, per peer IP.
    ///
    #[serde(default = "RateLimitConfig::window_secs")]
    pub window_secs: u64,
    #[serde(default = "RateLimitConfig::count")]
    pub count: usize,
}

impl RateLimitConfig {
    fn window_secs() -> u64 {
        60
    }

    fn count() -> usize {
        5
    }

    pub fn as_limit(&self) -> RateLimit {
        RateLimit {
            window: Duration::from_secs(self.window_secs),
            count: self.count,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: Self::window_secs(),
            count: Self::count(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    ///
    /// The auth service listen address; clients always speak to this
    /// port first.
    ///
    #[serde(default = "AuthConfig::listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    ///
    /// Static dev accounts, email to password. Salts and SRP-6
    /// verifiers are derived at startup; passwords never leave this
    /// process.
    ///
    #[serde(default)]
    pub static_credentials: HashMap<String, String>,
    ///
    /// Emails from `static-credentials` granted the signature tier
    /// (12 character slots instead of 2).
    ///
    #[serde(default)]
    pub signature_accounts: Vec<String>,
}

impl AuthConfig {
    fn listen() -> SocketAddr {
        "0.0.0.0:23115".parse().unwrap()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            rate_limit: RateLimitConfig::default(),
            static_credentials: HashMap::new(),
            signature_accounts: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RealmTypeConfig {
    Pve,
    Pvp,
    RpPve,
    RpPvp,
}

impl RealmTypeConfig {
    pub fn as_realm_type(self) -> RealmType {
        match self {
            Self::Pve => RealmType::Pve,
            Self::Pvp => RealmType::Pvp,
            Self::RpPve => RealmType::RpPve,
            Self::RpPvp => RealmType::RpPvp,
        }
    }
}

impl Default for RealmTypeConfig {
    fn default() -> Self {
        Self::Pve
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct RealmConfig {
    #[serde(default = "RealmConfig::listen")]
    pub listen: SocketAddr,
    #[serde(default = "RealmConfig::id")]
    pub id: u32,
    #[serde(default = "RealmConfig::name")]
    pub name: String,
    #[serde(default)]
    pub realm_type: RealmTypeConfig,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub note_text_id: u32,
    ///
    /// Where `ServerRealmInfo` sends clients next: the public address
    /// and port of the world service.
    ///
    #[serde(default = "RealmConfig::public_address")]
    pub public_address: Ipv4Addr,
    #[serde(default = "RealmConfig::public_port")]
    pub public_port: u16,
    ///
    /// Message-of-the-day lines for the realm list screen.
    ///
    #[serde(default)]
    pub messages: Vec<String>,
}

impl RealmConfig {
    fn listen() -> SocketAddr {
        "0.0.0.0:23600".parse().unwrap()
    }

    fn id() -> u32 {
        1
    }

    fn name() -> String {
        "Nexus".to_string()
    }

    fn public_address() -> Ipv4Addr {
        Ipv4Addr::LOCALHOST
    }

    fn public_port() -> u16 {
        24000
    }
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            id: Self::id(),
            name: Self::name(),
            realm_type: RealmTypeConfig::default(),
            flags: 0,
            note_text_id: 0,
            public_address: Self::public_address(),
            public_port: Self::public_port(),
            messages: Vec::new(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct WorldConfig {
    #[serde(default = "WorldConfig::listen")]
    pub listen: SocketAddr,
    ///
    /// Anti-cheat movement ceiling, world units per second.
    ///
    #[serde(default = "WorldConfig::max_speed")]
    pub max_speed: f32,
    #[serde(default = "WorldConfig::max_character_level")]
    pub max_character_level: u32,
}

impl WorldConfig {
    fn listen() -> SocketAddr {
        "0.0.0.0:24000".parse().unwrap()
    }

    fn max_speed() -> f32 {
        30.0
    }

    fn max_character_level() -> u32 {
        50
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            listen: Self::listen(),
            max_speed: Self::max_speed(),
            max_character_level: Self::max_character_level(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct LimitsConfig {
    ///
    /// The only client protocol revision this core speaks.
    ///
    #[serde(default = "LimitsConfig::expected_build")]
    pub expected_build: u32,
    ///
    /// Idle budget before the peer has authenticated.
    ///
    #[serde(default = "LimitsConfig::idle_timeout_pre_auth_secs")]
    pub idle_timeout_pre_auth_secs: u64,
    #[serde(default = "LimitsConfig::idle_timeout_post_auth_secs")]
    pub idle_timeout_post_auth_secs: u64,
    ///
    /// How long a partial frame may sit in the reassembly buffer.
    ///
    #[serde(default = "LimitsConfig::frame_timeout_secs")]
    pub frame_timeout_secs: u64,
    ///
    /// Whole-frame cap, size field included.
    ///
    #[serde(default = "LimitsConfig::max_frame_bytes")]
    pub max_frame_bytes: usize,
    ///
    /// Pending-write ceiling per connection; a slower client is
    /// disconnected rather than buffered without bound.
    ///
    #[serde(default = "LimitsConfig::max_write_queue_bytes")]
    pub max_write_queue_bytes: usize,
}

impl LimitsConfig {
    fn expected_build() -> u32 {
        16042
    }

    fn idle_timeout_pre_auth_secs() -> u64 {
        120
    }

    fn idle_timeout_post_auth_secs() -> u64 {
        300
    }

    fn frame_timeout_secs() -> u64 {
        30
    }

    fn max_frame_bytes() -> usize {
        65_536
    }

    fn max_write_queue_bytes() -> usize {
        1024 * 1024
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            expected_build: Self::expected_build(),
            idle_timeout_pre_auth_secs: Self::idle_timeout_pre_auth_secs(),
            idle_timeout_post_auth_secs: Self::idle_timeout_post_auth_secs(),
            frame_timeout_secs: Self::frame_timeout_secs(),
            max_frame_bytes: Self::max_frame_bytes(),
            max_write_queue_bytes: Self::max_write_queue_bytes(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// An enum representing the available verbosity levels of the
    /// logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub realm: RealmConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: wildstar-server --config /etc/wildstar/config.toml
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load command line parameters; if a configuration file path is
    /// specified the configuration is read from it, otherwise the
    /// defaults apply.
    ///
    pub fn load() -> Result<Self> {
        Ok(match Cli::parse().config {
            Some(path) => toml::from_str(&read_to_string(path)?)?,
            None => Self::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_contract() {
        let config = Config::default();
        assert_eq!(config.limits.expected_build, 16042);
        assert_eq!(config.limits.max_frame_bytes, 65_536);
        assert_eq!(config.auth.rate_limit.count, 5);
        assert_eq!(config.auth.rate_limit.window_secs, 60);
    }

    #[test]
    fn file_values_override_defaults() {
        let config: Config = toml::from_str(
            r#"
            [auth]
            listen = "127.0.0.1:7000"

            [auth.static-credentials]
            "alice@example.com" = "hunter2"

            [realm]
            name = "Stormtalon"
            realm-type = "rp-pvp"

            [limits]
            idle-timeout-pre-auth-secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.auth.listen.port(), 7000);
        assert_eq!(config.realm.name, "Stormtalon");
        assert_eq!(config.realm.realm_type, RealmTypeConfig::RpPvp);
        assert_eq!(config.limits.idle_timeout_pre_auth_secs, 30);
        assert_eq!(
            config.auth.static_credentials.get("alice@example.com"),
            Some(&"hunter2".to_string())
        );
        // Untouched sections keep their defaults.
        assert_eq!(config.world.max_speed, 30.0);
    }
}
