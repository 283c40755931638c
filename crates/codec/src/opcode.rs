//! The build 16042 opcode table.
//!
//! One `u16` space shared by the three services; every entry records its
//! logical direction and which services dispatch it. The table is fixed
//! at build time. Numeric ids that fail to map produce a typed
//! [`Error::UnknownOpcode`] so the dispatcher can log and drop without
//! tearing the connection down.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::Error;

/// Which front door a connection came through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Auth,
    Realm,
    World,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Opcode {
    // Handshake, shared by auth and realm.
    ServerHello = 0x0076,
    ClientHelloAuth = 0x0582,
    ServerAuthAccepted = 0x0277,
    ServerAuthDenied = 0x0271,

    // Realm directory.
    ServerRealmMessages = 0x0287,
    ServerRealmInfo = 0x028a,
    ClientRealmSelect = 0x05ab,
    ServerNewRealm = 0x0290,

    // World handshake and envelopes.
    ClientHelloRealm = 0x058f,
    ClientEncrypted = 0x0600,
    ServerEncrypted = 0x0601,
    ClientPacked = 0x0602,
    ClientPackedWorld = 0x0603,

    // Character screen.
    ClientCharacterList = 0x05c9,
    ServerCharacterList = 0x0363,
    ServerAccountCurrencies = 0x0301,
    ServerAccountUnlocks = 0x0304,
    ServerAccountEntitlements = 0x0308,
    ServerAccountTier = 0x030b,
    ServerRewardProperties = 0x030e,
    ServerMaxCharacterLevel = 0x0312,
    ClientCharacterCreate = 0x05cd,
    ServerCharacterCreate = 0x036a,
    ClientCharacterDelete = 0x05cf,
    ServerCharacterDelete = 0x036c,
    ClientCharacterSelect = 0x05d1,

    // World entry sequence.
    ServerWorldEnter = 0x0371,
    ServerCharacterFlagsUpdated = 0x0373,
    ServerEntityCreate = 0x0262,
    ServerSetUnitPathType = 0x0376,
    ServerPlayerChanged = 0x0379,
    ServerPathInitialise = 0x037c,
    ServerTimeOfDay = 0x037f,
    ServerHousingNeighbors = 0x0382,
    ServerInstanceSettings = 0x0385,
    ServerMovementControl = 0x0388,
    ServerPlayerCreate = 0x038b,
    ClientEnteredWorld = 0x05d6,
    ServerPlayerEnteredWorld = 0x038e,

    // In-world traffic.
    ClientEntityCommand = 0x05dc,
    ServerEntityCommand = 0x0266,
    ServerEntityDestroy = 0x0269,
    ClientPregameKeepAlive = 0x05e1,
    ClientLogoutRequest = 0x05e4,
    ServerLogout = 0x0394,
    ClientChat = 0x05ee,
    ServerChat = 0x039a,
    ClientEmote = 0x05f1,
    ServerEmote = 0x039d,
    ClientPing = 0x05f4,
    ServerPing = 0x03a0,
}

impl Opcode {
    pub fn lookup(raw: u16) -> Result<Opcode, Error> {
        Opcode::try_from(raw).map_err(|_| Error::UnknownOpcode(raw))
    }

    pub fn direction(self) -> Direction {
        use Opcode::*;

        match self {
            ClientHelloAuth | ClientRealmSelect | ClientHelloRealm | ClientCharacterList
            | ClientCharacterCreate | ClientCharacterDelete | ClientCharacterSelect
            | ClientEnteredWorld | ClientEntityCommand | ClientPregameKeepAlive
            | ClientLogoutRequest | ClientChat | ClientEmote | ClientPing | ClientEncrypted
            | ClientPacked | ClientPackedWorld => Direction::ClientToServer,
            ServerEntityCommand => Direction::Bidirectional,
            _ => Direction::ServerToClient,
        }
    }

    /// Whether `service` dispatches or emits this opcode.
    pub fn served_by(self, service: ServiceKind) -> bool {
        use Opcode::*;

        match self {
            ServerHello | ServerAuthAccepted | ServerAuthDenied => service != ServiceKind::World,
            ClientHelloAuth => service != ServiceKind::World,
            ServerRealmMessages | ServerRealmInfo => service == ServiceKind::Realm,
            _ => service == ServiceKind::World,
        }
    }
}
