//! Realm-directory messages.
//!
//! The realm service validates the auth ticket, mints the session ticket
//! the world service will expect, and points the client at the world
//! endpoint.

use std::net::Ipv4Addr;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    Error,
    bits::{BitReader, BitWriter},
    crypto::TICKET_SIZE,
    opcode::Opcode,
    packet::Packet,
};

/// Pack an IPv4 address so a little-endian `u32` write emits the octets
/// in network order.
pub fn pack_ipv4(address: Ipv4Addr) -> u32 {
    u32::from_le_bytes(address.octets())
}

pub fn unpack_ipv4(raw: u32) -> Ipv4Addr {
    Ipv4Addr::from(raw.to_le_bytes())
}

/// Ticket hello on the realm service; shares the `ClientHelloAuth`
/// opcode with the credential variant the auth service parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloRealmTicket {
    pub build: u32,
    pub email: String,
    pub ticket: [u8; TICKET_SIZE],
}

impl Packet for ClientHelloRealmTicket {
    const OPCODE: Opcode = Opcode::ClientHelloAuth;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            build: reader.read_u32()?,
            email: reader.read_wide_string()?,
            ticket: reader.read_array()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.build);
        writer.write_wide_string(&self.email);
        writer.write_bytes(&self.ticket);
    }
}

/// Realm message-of-the-day lines shown on the realm list screen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerRealmMessages {
    pub messages: Vec<String>,
}

impl Packet for ServerRealmMessages {
    const OPCODE: Opcode = Opcode::ServerRealmMessages;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let count = reader.read_u32()? as usize;
        let mut messages = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            messages.push(reader.read_wide_string()?);
        }
        Ok(Self { messages })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.messages.len() as u32);
        for message in &self.messages {
            writer.write_wide_string(message);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum RealmType {
    Pve = 0,
    Pvp = 1,
    RpPve = 2,
    RpPvp = 3,
}

/// Where and how to reach the world service, plus the fresh session
/// ticket it will validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRealmInfo {
    pub address: u32,
    pub port: u16,
    pub session_key: [u8; TICKET_SIZE],
    pub account_id: u64,
    pub realm_name: String,
    pub flags: u32,
    pub realm_type: RealmType,
    pub note_text_id: u32,
}

impl Packet for ServerRealmInfo {
    const OPCODE: Opcode = Opcode::ServerRealmInfo;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            address: reader.read_u32()?,
            port: reader.read_u16()?,
            session_key: reader.read_array()?,
            account_id: reader.read_u64()?,
            realm_name: reader.read_wide_string()?,
            flags: reader.read_u32()?,
            realm_type: {
                let raw = reader.read_u32()?;
                RealmType::try_from(raw).map_err(|_| Error::InvalidEnum(u64::from(raw)))?
            },
            note_text_id: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.address);
        writer.write_u16(self.port);
        writer.write_bytes(&self.session_key);
        writer.write_u64(self.account_id);
        writer.write_wide_string(&self.realm_name);
        writer.write_u32(self.flags);
        writer.write_u32(self.realm_type.into());
        writer.write_u32(self.note_text_id);
    }
}

/// The realm list back-button sends this; targeting the current realm is
/// deliberately a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRealmSelect {
    pub realm_id: u32,
}

impl Packet for ClientRealmSelect {
    const OPCODE: Opcode = Opcode::ClientRealmSelect;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            realm_id: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.realm_id);
    }
}

/// Transfer directive for an actual realm change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerNewRealm {
    pub address: u32,
    pub port: u16,
    pub session_key: [u8; TICKET_SIZE],
    pub realm_name: String,
}

impl Packet for ServerNewRealm {
    const OPCODE: Opcode = Opcode::ServerNewRealm;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            address: reader.read_u32()?,
            port: reader.read_u16()?,
            session_key: reader.read_array()?,
            realm_name: reader.read_wide_string()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.address);
        writer.write_u16(self.port);
        writer.write_bytes(&self.session_key);
        writer.write_wide_string(&self.realm_name);
    }
}
