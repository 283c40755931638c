//! World-service session and world-entry messages.

use crate::{
    Error,
    bits::{BitReader, BitWriter},
    crypto::TICKET_SIZE,
    opcode::Opcode,
    packet::{Packet, Position},
};

/// World hello: the email/account/ticket triple the realm handed out.
/// Validated atomically; on success the session cipher is installed and
/// no reply is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloRealm {
    pub email: String,
    pub account_id: u64,
    pub session_key: [u8; TICKET_SIZE],
}

impl Packet for ClientHelloRealm {
    const OPCODE: Opcode = Opcode::ClientHelloRealm;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            email: reader.read_wide_string()?,
            account_id: reader.read_u64()?,
            session_key: reader.read_array()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_wide_string(&self.email);
        writer.write_u64(self.account_id);
        writer.write_bytes(&self.session_key);
    }
}

/// Refreshes the idle timer; never answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientPregameKeepAlive;

impl Packet for ClientPregameKeepAlive {
    const OPCODE: Opcode = Opcode::ClientPregameKeepAlive;

    fn read(_reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self)
    }

    fn write(&self, _writer: &mut BitWriter) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientLogoutRequest {
    pub initiated: bool,
    pub cancel: bool,
}

impl Packet for ClientLogoutRequest {
    const OPCODE: Opcode = Opcode::ClientLogoutRequest;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            initiated: reader.read_bool()?,
            cancel: reader.read_bool()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_bool(self.initiated);
        writer.write_bool(self.cancel);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLogout {
    pub requested: bool,
    pub reason: u32,
}

impl Packet for ServerLogout {
    const OPCODE: Opcode = Opcode::ServerLogout;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            requested: reader.read_bool()?,
            reason: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_bool(self.requested);
        writer.write_u32(self.reason);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientEnteredWorld;

impl Packet for ClientEnteredWorld {
    const OPCODE: Opcode = Opcode::ClientEnteredWorld;

    fn read(_reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self)
    }

    fn write(&self, _writer: &mut BitWriter) {}
}

/// Dismisses the client loading screen; the last packet of world entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerPlayerEnteredWorld;

impl Packet for ServerPlayerEnteredWorld {
    const OPCODE: Opcode = Opcode::ServerPlayerEnteredWorld;

    fn read(_reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self)
    }

    fn write(&self, _writer: &mut BitWriter) {}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerWorldEnter {
    pub world_id: u32,
    pub position: Position,
    pub yaw: f32,
}

impl Packet for ServerWorldEnter {
    const OPCODE: Opcode = Opcode::ServerWorldEnter;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            world_id: reader.read_u32()?,
            position: Position::read_packed(reader)?,
            yaw: reader.read_f32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.world_id);
        self.position.write_packed(writer);
        writer.write_f32(self.yaw);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCharacterFlagsUpdated {
    pub flags: u32,
}

impl Packet for ServerCharacterFlagsUpdated {
    const OPCODE: Opcode = Opcode::ServerCharacterFlagsUpdated;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            flags: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.flags);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSetUnitPathType {
    pub guid: u32,
    pub path: u32,
}

impl Packet for ServerSetUnitPathType {
    const OPCODE: Opcode = Opcode::ServerSetUnitPathType;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            guid: reader.read_u32()?,
            path: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_u32(self.path);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPlayerChanged {
    pub guid: u32,
    pub character_id: u64,
}

impl Packet for ServerPlayerChanged {
    const OPCODE: Opcode = Opcode::ServerPlayerChanged;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            guid: reader.read_u32()?,
            character_id: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_u64(self.character_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPathInitialise {
    pub path: u32,
    pub level: u32,
    pub xp: u32,
}

impl Packet for ServerPathInitialise {
    const OPCODE: Opcode = Opcode::ServerPathInitialise;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            path: reader.read_u32()?,
            level: reader.read_u32()?,
            xp: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.path);
        writer.write_u32(self.level);
        writer.write_u32(self.xp);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimeOfDay {
    pub time_of_day: u32,
    pub length_of_day: u32,
}

impl Packet for ServerTimeOfDay {
    const OPCODE: Opcode = Opcode::ServerTimeOfDay;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            time_of_day: reader.read_u32()?,
            length_of_day: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.time_of_day);
        writer.write_u32(self.length_of_day);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerHousingNeighbors {
    pub neighbors: Vec<u64>,
}

impl Packet for ServerHousingNeighbors {
    const OPCODE: Opcode = Opcode::ServerHousingNeighbors;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let count = reader.read_u32()? as usize;
        let mut neighbors = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            neighbors.push(reader.read_u64()?);
        }
        Ok(Self { neighbors })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.neighbors.len() as u32);
        for neighbor in &self.neighbors {
            writer.write_u64(*neighbor);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInstanceSettings {
    pub max_players: u32,
    pub difficulty: u32,
}

impl Packet for ServerInstanceSettings {
    const OPCODE: Opcode = Opcode::ServerInstanceSettings;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            max_players: reader.read_u32()?,
            difficulty: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.max_players);
        writer.write_u32(self.difficulty);
    }
}

/// Hands movement authority for `unit_id` to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMovementControl {
    pub ticket: u32,
    pub immediate: bool,
    pub unit_id: u32,
}

impl Packet for ServerMovementControl {
    const OPCODE: Opcode = Opcode::ServerMovementControl;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            ticket: reader.read_u32()?,
            immediate: reader.read_bool()?,
            unit_id: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.ticket);
        writer.write_bool(self.immediate);
        writer.write_u32(self.unit_id);
    }
}
