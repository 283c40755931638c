//! Per-connection session state and the three stage machines.

pub mod entity;
pub mod registry;

use std::net::IpAddr;

use codec::{
    crypto::{SESSION_KEY_SIZE, TICKET_SIZE},
    opcode::ServiceKind,
    packet::Position,
};

use crate::{Character, session::entity::EntityHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthStage {
    New,
    Greeted,
    Credentialed,
    Ticketed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RealmStage {
    New,
    Greeted,
    Validated,
    RealmListed,
    Transferring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorldStage {
    New,
    SessionKeyed,
    CharacterListed,
    InWorld,
}

/// A session's progress through its service's machine. Stages only move
/// forward; an attempted regression is a programming error surfaced as
/// a typed failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Auth(AuthStage),
    Realm(RealmStage),
    World(WorldStage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageError {
    pub from: Stage,
    pub to: Stage,
}

impl std::error::Error for StageError {}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage regression: {:?} -> {:?}", self.from, self.to)
    }
}

impl Stage {
    pub fn initial(kind: ServiceKind) -> Self {
        match kind {
            ServiceKind::Auth => Self::Auth(AuthStage::New),
            ServiceKind::Realm => Self::Realm(RealmStage::New),
            ServiceKind::World => Self::World(WorldStage::New),
        }
    }

    /// Move forward within the same machine.
    ///
    /// # Test
    ///
    /// ```
    /// use wildstar_server_service::session::{AuthStage, Stage};
    ///
    /// let mut stage = Stage::Auth(AuthStage::New);
    /// stage.advance_to(Stage::Auth(AuthStage::Greeted)).unwrap();
    /// stage.advance_to(Stage::Auth(AuthStage::Ticketed)).unwrap();
    ///
    /// // Never backwards.
    /// assert!(stage.advance_to(Stage::Auth(AuthStage::Greeted)).is_err());
    /// ```
    pub fn advance_to(&mut self, next: Stage) -> Result<(), StageError> {
        let forward = match (*self, next) {
            (Stage::Auth(from), Stage::Auth(to)) => from < to,
            (Stage::Realm(from), Stage::Realm(to)) => from < to,
            (Stage::World(from), Stage::World(to)) => from < to,
            _ => false,
        };

        if !forward {
            return Err(StageError {
                from: *self,
                to: next,
            });
        }

        *self = next;
        Ok(())
    }
}

/// Zone plus instance; all cross-session zone queries key on this pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneKey {
    pub world_id: u32,
    pub instance_id: u32,
}

/// Mutable per-connection record. Created on accept, destroyed on
/// close; handlers mutate a proposed clone that is adopted only when
/// they succeed.
#[derive(Clone)]
pub struct Session {
    pub service: ServiceKind,
    pub peer_ip: IpAddr,
    pub connection_id: u64,
    pub stage: Stage,
    account_id: Option<u64>,
    pub email: Option<String>,
    pub session_key: Option<[u8; SESSION_KEY_SIZE]>,
    pub ticket: Option<[u8; TICKET_SIZE]>,
    pub character: Option<Character>,
    pub entity_handle: Option<EntityHandle>,
    pub zone: Option<ZoneKey>,
    pub position: Option<Position>,
    pub yaw: f32,
    pub movement_time: u32,
}

impl Session {
    pub fn new(service: ServiceKind, peer_ip: IpAddr, connection_id: u64) -> Self {
        Self {
            service,
            peer_ip,
            connection_id,
            stage: Stage::initial(service),
            account_id: None,
            email: None,
            session_key: None,
            ticket: None,
            character: None,
            entity_handle: None,
            zone: None,
            position: None,
            yaw: 0.0,
            movement_time: 0,
        }
    }

    pub fn account_id(&self) -> Option<u64> {
        self.account_id
    }

    /// Bind the validated account. Immutable once set.
    pub fn bind_account(&mut self, account_id: u64) {
        debug_assert!(
            self.account_id.is_none() || self.account_id == Some(account_id),
            "account id rebound on live session"
        );
        self.account_id.get_or_insert(account_id);
    }

    /// Drop the world-entry slots on logout; the account binding and
    /// cipher survive.
    pub fn clear_world_state(&mut self) {
        self.character = None;
        self.entity_handle = None;
        self.zone = None;
        self.position = None;
        self.yaw = 0.0;
        self.movement_time = 0;
    }
}
