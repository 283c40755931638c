//! ## Session and dispatch core
//!
//! The stateful half of the server: per-connection sessions and their
//! three-stage machines, the process-wide session registry, the rate
//! limiter, and the handler registry that turns inbound frames into
//! reply directives.
//!
//! The persistent world lives elsewhere. This crate only talks to it
//! through the [`AccountStore`], [`CharacterStore`] and [`StaticData`]
//! contracts, so everything here is testable against in-memory stores.

pub mod limiter;
pub mod routing;
pub mod session;

use std::{net::IpAddr, net::Ipv4Addr, sync::Arc};

use async_trait::async_trait;

use codec::{
    crypto::{SESSION_KEY_SIZE, TICKET_SIZE},
    packet::{Position, character::GearVisual, realm::RealmType},
};

pub use codec::opcode::ServiceKind;

use crate::{
    limiter::{AUTH_CLASS, RateLimit, RateLimiter},
    routing::Dispatcher,
    session::{Session, entity::HandleAllocator, registry::SessionRegistry},
};

/// A store or downstream dependency failed or timed out. Handlers map
/// this to the most specific denial packet they have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    Unavailable,
    Timeout,
}

impl std::error::Error for StoreError {}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Account record as the auth and realm services see it. The verifier
/// and salt come from SRP-6 registration; the password itself is never
/// stored anywhere.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: u64,
    pub email: String,
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
    /// Hex-encoded handoff ticket, last-writer-wins.
    pub ticket: Option<String>,
    pub signature: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Suspension {
    Clear,
    Banned,
    Suspended { days: f32 },
}

/// World-service ticket validation verdict. Expired and not-found carry
/// different log levels but the same denial to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionValidity {
    Valid,
    Expired,
    NotFound,
    AccountMismatch,
}

#[derive(Debug, Clone)]
pub struct Character {
    pub id: u64,
    pub account_id: u64,
    pub realm_id: u32,
    pub name: String,
    pub sex: u8,
    pub race: u32,
    pub class: u32,
    pub faction: u32,
    pub path: u32,
    pub level: u32,
    pub world_id: u32,
    pub position: Position,
    pub yaw: f32,
    pub gear: Vec<GearVisual>,
    pub bones: Vec<f32>,
    pub days_since_last_online: f32,
}

/// Everything the create handler resolved before persisting.
#[derive(Debug, Clone)]
pub struct CharacterAttrs {
    pub name: String,
    pub sex: u8,
    pub race: u32,
    pub class: u32,
    pub faction: u32,
    pub path: u32,
    pub world_id: u32,
    pub position: Position,
    pub yaw: f32,
    pub gear: Vec<GearVisual>,
    pub bones: Vec<f32>,
    pub starting_items: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterCreateError {
    /// Name uniqueness is case-insensitive.
    NameTaken,
    SlotsFull,
    Store(StoreError),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn get_by_id(&self, id: u64) -> Result<Option<Account>, StoreError>;

    /// Atomically check the `(email, ticket, account_id)` triple the
    /// world hello presents.
    async fn validate_session(
        &self,
        email: &str,
        ticket: &[u8; TICKET_SIZE],
        account_id: u64,
    ) -> Result<SessionValidity, StoreError>;

    /// Persist a fresh ticket, invalidating any prior one.
    async fn update_ticket(
        &self,
        account_id: u64,
        ticket: &[u8; TICKET_SIZE],
    ) -> Result<(), StoreError>;

    async fn check_suspension(&self, account_id: u64) -> Result<Suspension, StoreError>;
}

#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn list_for(&self, account_id: u64, realm_id: u32) -> Result<Vec<Character>, StoreError>;

    /// Enforces case-insensitive name uniqueness and the per-account
    /// slot cap.
    async fn create(
        &self,
        account_id: u64,
        attrs: CharacterAttrs,
    ) -> Result<Character, CharacterCreateError>;

    async fn get_owned(
        &self,
        account_id: u64,
        character_id: u64,
    ) -> Result<Option<Character>, StoreError>;

    async fn update_last_online(&self, character_id: u64) -> Result<(), StoreError>;

    async fn update_position(
        &self,
        character_id: u64,
        position: Position,
        yaw: f32,
    ) -> Result<(), StoreError>;

    /// Soft delete.
    async fn delete(&self, account_id: u64, character_id: u64) -> Result<bool, StoreError>;
}

/// Template resolved by `ClientCharacterCreate`: the canonical race,
/// class, sex, faction, creation start location and starting items for
/// one creation id.
#[derive(Debug, Clone)]
pub struct CreationTemplate {
    pub id: u32,
    pub race: u32,
    pub class: u32,
    pub sex: u8,
    pub faction: u32,
    pub path: u32,
    pub world_id: u32,
    pub position: Position,
    pub yaw: f32,
    pub starting_items: Vec<u32>,
}

#[derive(Debug, Clone, Copy)]
pub struct Item {
    pub id: u32,
    pub slot: u32,
    pub display_id: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct WorldLocation {
    pub id: u32,
    pub world_id: u32,
    pub position: Position,
    pub yaw: f32,
}

/// The static game data catalog. Read-only, so unlike the stores these
/// lookups are synchronous.
pub trait StaticData: Send + Sync {
    fn character_creation_template(&self, id: u32) -> Option<CreationTemplate>;

    fn item(&self, id: u32) -> Option<Item>;

    fn world_location(&self, id: u32) -> Option<WorldLocation>;

    fn compute_visuals(&self, race: u32, sex: u8, labels: &[u32], values: &[u32])
    -> Vec<GearVisual>;
}

/// The full suite of external collaborators a handler can reach.
pub trait Stores: AccountStore + CharacterStore + StaticData + 'static {}

impl<T: AccountStore + CharacterStore + StaticData + 'static> Stores for T {}

/// Identity and advertised endpoint of the realm this process serves.
#[derive(Debug, Clone)]
pub struct RealmInfo {
    pub id: u32,
    pub name: String,
    pub realm_type: RealmType,
    pub flags: u32,
    pub note_text_id: u32,
    /// Where `ServerRealmInfo` points clients: the world service.
    pub public_address: Ipv4Addr,
    pub public_port: u16,
    pub messages: Vec<String>,
}

pub struct ServiceOptions<T> {
    pub expected_build: u32,
    pub realm: RealmInfo,
    pub auth_limit: RateLimit,
    /// Anti-cheat movement speed ceiling, units per second.
    pub max_speed: f32,
    pub max_character_level: u32,
    pub stores: T,
}

pub(crate) struct Inner<T> {
    pub expected_build: u32,
    pub realm: RealmInfo,
    pub max_speed: f32,
    pub max_character_level: u32,
    pub registry: SessionRegistry,
    pub limiter: RateLimiter,
    pub handles: HandleAllocator,
    pub srp_seed: [u8; SESSION_KEY_SIZE],
    pub stores: T,
}

/// Shared core handed to every connection task. Cheap to clone.
pub struct Service<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> Clone for Service<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Stores> Service<T> {
    pub fn new(options: ServiceOptions<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                expected_build: options.expected_build,
                realm: options.realm,
                max_speed: options.max_speed,
                max_character_level: options.max_character_level,
                registry: SessionRegistry::default(),
                limiter: RateLimiter::new(&[(AUTH_CLASS, options.auth_limit)]),
                handles: HandleAllocator::default(),
                srp_seed: codec::crypto::random_bytes(),
                stores: options.stores,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn stores(&self) -> &T {
        &self.inner.stores
    }

    /// The per-process seed the SRP-6 ephemerals derive from. Exposed
    /// so tests can play the client side of the exchange.
    pub fn srp_seed(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.inner.srp_seed
    }

    /// Create the dispatcher owning one connection's session state.
    pub fn get_dispatcher(
        &self,
        kind: ServiceKind,
        peer_ip: IpAddr,
        connection_id: u64,
    ) -> Dispatcher<T> {
        Dispatcher::new(
            self.clone(),
            Session::new(kind, peer_ip.to_canonical(), connection_id),
        )
    }
}
