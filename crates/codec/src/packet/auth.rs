//! Auth-service handshake messages.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    Error,
    bits::{BitReader, BitWriter},
    crypto::{CLIENT_PROOF_SIZE, PUBLIC_KEY_SIZE, SERVER_PROOF_SIZE, TICKET_SIZE},
    opcode::Opcode,
    packet::Packet,
};

/// Unencrypted greeting pushed on accept by the auth and realm services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub expected_build: u32,
    pub connection_type: u8,
}

impl Packet for ServerHello {
    const OPCODE: Opcode = Opcode::ServerHello;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            expected_build: reader.read_u32()?,
            connection_type: reader.read_u8()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.expected_build);
        writer.write_u8(self.connection_type);
    }
}

/// Credential hello on the auth service: build, account email, the SRP-6
/// public `A` and the client proof `M1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHelloAuth {
    pub build: u32,
    pub email: String,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    pub client_proof: [u8; CLIENT_PROOF_SIZE],
}

impl Packet for ClientHelloAuth {
    const OPCODE: Opcode = Opcode::ClientHelloAuth;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            build: reader.read_u32()?,
            email: reader.read_wide_string()?,
            public_key: reader.read_array()?,
            client_proof: reader.read_array()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.build);
        writer.write_wide_string(&self.email);
        writer.write_bytes(&self.public_key);
        writer.write_bytes(&self.client_proof);
    }
}

/// Successful auth: the server proof `M2` and the handoff ticket the
/// client presents to the realm service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAuthAccepted {
    pub server_proof: [u8; SERVER_PROOF_SIZE],
    pub ticket: [u8; TICKET_SIZE],
}

impl Packet for ServerAuthAccepted {
    const OPCODE: Opcode = Opcode::ServerAuthAccepted;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            server_proof: reader.read_array()?,
            ticket: reader.read_array()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_bytes(&self.server_proof);
        writer.write_bytes(&self.ticket);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum AuthResult {
    Unknown = 0,
    InvalidToken = 16,
    VersionMismatch = 19,
    AccountBanned = 20,
    AccountSuspended = 21,
    DatabaseError = 22,
    NoRealmsAvailable = 23,
}

/// Typed denial for any credential or ticket failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerAuthDenied {
    pub result: AuthResult,
    pub error_value: u32,
    pub suspended_days: f32,
}

impl ServerAuthDenied {
    pub fn new(result: AuthResult) -> Self {
        Self {
            result,
            error_value: 0,
            suspended_days: 0.0,
        }
    }

    pub fn suspended(days: f32) -> Self {
        Self {
            result: AuthResult::AccountSuspended,
            error_value: 0,
            suspended_days: days,
        }
    }
}

impl Packet for ServerAuthDenied {
    const OPCODE: Opcode = Opcode::ServerAuthDenied;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let raw = reader.read_u32()?;
        Ok(Self {
            result: AuthResult::try_from(raw).map_err(|_| Error::InvalidEnum(u64::from(raw)))?,
            error_value: reader.read_u32()?,
            suspended_days: reader.read_f32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.result.into());
        writer.write_u32(self.error_value);
        writer.write_f32(self.suspended_days);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode, encode};

    #[test]
    fn hello_auth_round_trip() {
        let hello = ClientHelloAuth {
            build: 16042,
            email: "alice@example.com".into(),
            public_key: [0xaa; PUBLIC_KEY_SIZE],
            client_proof: [0xbb; CLIENT_PROOF_SIZE],
        };

        assert_eq!(decode::<ClientHelloAuth>(&encode(&hello)).unwrap(), hello);
    }

    #[test]
    fn denied_round_trip() {
        let denied = ServerAuthDenied::suspended(3.5);
        let parsed = decode::<ServerAuthDenied>(&encode(&denied)).unwrap();
        assert_eq!(parsed, denied);
        assert_eq!(parsed.result, AuthResult::AccountSuspended);
    }

    #[test]
    fn denied_unknown_code_is_typed() {
        let mut writer = crate::bits::BitWriter::new();
        writer.write_u32(99);
        writer.write_u32(0);
        writer.write_f32(0.0);

        assert_eq!(
            decode::<ServerAuthDenied>(&writer.into_bytes()),
            Err(Error::InvalidEnum(99))
        );
    }
}
