//! Chat, emotes and the ping round trip.

use crate::{
    Error,
    bits::{BitReader, BitWriter},
    opcode::Opcode,
    packet::Packet,
};

/// Longest chat line the client can submit.
pub const MAX_CHAT_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChat {
    pub channel: u32,
    pub text: String,
}

impl Packet for ClientChat {
    const OPCODE: Opcode = Opcode::ClientChat;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            channel: reader.read_u32()?,
            text: reader.read_wide_string()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.channel);
        writer.write_wide_string(&self.text);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerChat {
    pub guid: u32,
    pub name: String,
    pub channel: u32,
    pub text: String,
}

impl Packet for ServerChat {
    const OPCODE: Opcode = Opcode::ServerChat;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            guid: reader.read_u32()?,
            name: reader.read_wide_string()?,
            channel: reader.read_u32()?,
            text: reader.read_wide_string()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_wide_string(&self.name);
        writer.write_u32(self.channel);
        writer.write_wide_string(&self.text);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientEmote {
    pub emote_id: u32,
}

impl Packet for ClientEmote {
    const OPCODE: Opcode = Opcode::ClientEmote;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            emote_id: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.emote_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEmote {
    pub guid: u32,
    pub emote_id: u32,
}

impl Packet for ServerEmote {
    const OPCODE: Opcode = Opcode::ServerEmote;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            guid: reader.read_u32()?,
            emote_id: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_u32(self.emote_id);
    }
}

/// Latency probe; unlike the keepalive this one is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPing {
    pub client_time: u32,
}

impl Packet for ClientPing {
    const OPCODE: Opcode = Opcode::ClientPing;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            client_time: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.client_time);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPing {
    pub client_time: u32,
    pub server_time: u32,
}

impl Packet for ServerPing {
    const OPCODE: Opcode = Opcode::ServerPing;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            client_time: reader.read_u32()?,
            server_time: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.client_time);
        writer.write_u32(self.server_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode, encode};

    #[test]
    fn chat_round_trip() {
        let chat = ServerChat {
            guid: 7,
            name: "Vara Nightsong".into(),
            channel: 1,
            text: "anyone seen the Caretaker?".into(),
        };

        assert_eq!(decode::<ServerChat>(&encode(&chat)).unwrap(), chat);
    }

    #[test]
    fn ping_round_trip() {
        let ping = ServerPing {
            client_time: 123,
            server_time: 456,
        };

        assert_eq!(decode::<ServerPing>(&encode(&ping)).unwrap(), ping);
    }
}
