//! Entity lifecycle and the bit-packed movement command stream.

use crate::{
    Error,
    bits::{BitReader, BitWriter},
    opcode::Opcode,
    packet::{Packet, Position, character::GearVisual},
};

/// Command count is a 5-bit field on the wire.
pub const MAX_COMMANDS: usize = 31;

const COMMAND_KEY_BITS: u32 = 6;

/// One movement command. Keys and bodies are bit-packed with no byte
/// realignment between commands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityCommand {
    SetPosition { position: Position, blend: bool },
    SetRotation { yaw: f32 },
    SetVelocity { velocity: Position },
    SetState { state: u32 },
    SetMode { mode: u32 },
}

impl EntityCommand {
    fn key(&self) -> u64 {
        match self {
            Self::SetPosition { .. } => 1,
            Self::SetRotation { .. } => 2,
            Self::SetVelocity { .. } => 3,
            Self::SetState { .. } => 4,
            Self::SetMode { .. } => 5,
        }
    }

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let key = reader.read_bits(COMMAND_KEY_BITS)?;
        Ok(match key {
            1 => Self::SetPosition {
                position: Position::read_packed(reader)?,
                blend: reader.read_bool()?,
            },
            2 => Self::SetRotation {
                yaw: f32::from_bits(reader.read_bits(32)? as u32),
            },
            3 => Self::SetVelocity {
                velocity: Position::read_packed(reader)?,
            },
            4 => Self::SetState {
                state: reader.read_bits(32)? as u32,
            },
            5 => Self::SetMode {
                mode: reader.read_bits(32)? as u32,
            },
            other => return Err(Error::InvalidEnum(other)),
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_bits(COMMAND_KEY_BITS, self.key());
        match self {
            Self::SetPosition { position, blend } => {
                position.write_packed(writer);
                writer.write_bool(*blend);
            }
            Self::SetRotation { yaw } => {
                writer.write_bits(32, u64::from(yaw.to_bits()));
            }
            Self::SetVelocity { velocity } => {
                velocity.write_packed(writer);
            }
            Self::SetState { state } => {
                writer.write_bits(32, u64::from(*state));
            }
            Self::SetMode { mode } => {
                writer.write_bits(32, u64::from(*mode));
            }
        }
    }
}

fn read_commands(reader: &mut BitReader<'_>) -> Result<Vec<EntityCommand>, Error> {
    let count = reader.read_bits(5)? as usize;
    let mut commands = Vec::with_capacity(count);
    for _ in 0..count {
        commands.push(EntityCommand::read(reader)?);
    }
    Ok(commands)
}

fn write_commands(commands: &[EntityCommand], writer: &mut BitWriter) {
    debug_assert!(commands.len() <= MAX_COMMANDS);
    writer.write_bits(5, commands.len() as u64);
    for command in commands {
        command.write(writer);
    }
}

/// Client movement report for the unit it controls.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEntityCommand {
    pub time: u32,
    pub commands: Vec<EntityCommand>,
}

impl Packet for ClientEntityCommand {
    const OPCODE: Opcode = Opcode::ClientEntityCommand;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            time: reader.read_u32()?,
            commands: read_commands(reader)?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.time);
        write_commands(&self.commands, writer);
    }
}

/// Server echo of a unit's movement to everyone who can see it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEntityCommand {
    pub guid: u32,
    pub time: u32,
    pub time_reset: bool,
    pub server_controlled: bool,
    pub commands: Vec<EntityCommand>,
}

impl Packet for ServerEntityCommand {
    const OPCODE: Opcode = Opcode::ServerEntityCommand;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            guid: reader.read_u32()?,
            time: reader.read_u32()?,
            time_reset: reader.read_bool()?,
            server_controlled: reader.read_bool()?,
            commands: read_commands(reader)?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_u32(self.time);
        writer.write_bool(self.time_reset);
        writer.write_bool(self.server_controlled);
        write_commands(&self.commands, writer);
    }
}

/// Spawn directive for any visible entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEntityCreate {
    pub guid: u32,
    pub entity_type: u8,
    pub name: String,
    pub race: u32,
    pub sex: u8,
    pub class: u32,
    pub faction: u32,
    pub position: Position,
    pub yaw: f32,
    pub gear: Vec<GearVisual>,
    pub bones: Vec<f32>,
}

impl Packet for ServerEntityCreate {
    const OPCODE: Opcode = Opcode::ServerEntityCreate;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let guid = reader.read_u32()?;
        let entity_type = reader.read_u8()?;
        let name = reader.read_wide_string()?;
        let race = reader.read_u32()?;
        let sex = reader.read_u8()?;
        let class = reader.read_u32()?;
        let faction = reader.read_u32()?;
        reader.align();
        let position = Position::read_packed(reader)?;
        let yaw = reader.read_f32()?;

        let gear_count = reader.read_u32()? as usize;
        let mut gear = Vec::with_capacity(gear_count.min(32));
        for _ in 0..gear_count {
            gear.push(GearVisual {
                slot: reader.read_u32()?,
                display_id: reader.read_u32()?,
            });
        }

        let bone_count = reader.read_u32()? as usize;
        let mut bones = Vec::with_capacity(bone_count.min(200));
        for _ in 0..bone_count {
            bones.push(reader.read_f32()?);
        }

        Ok(Self {
            guid,
            entity_type,
            name,
            race,
            sex,
            class,
            faction,
            position,
            yaw,
            gear,
            bones,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_u8(self.entity_type);
        writer.write_wide_string(&self.name);
        writer.write_u32(self.race);
        writer.write_u8(self.sex);
        writer.write_u32(self.class);
        writer.write_u32(self.faction);
        writer.align();
        self.position.write_packed(writer);
        writer.write_f32(self.yaw);

        writer.write_u32(self.gear.len() as u32);
        for visual in &self.gear {
            writer.write_u32(visual.slot);
            writer.write_u32(visual.display_id);
        }

        writer.write_u32(self.bones.len() as u32);
        for bone in &self.bones {
            writer.write_f32(*bone);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerEntityDestroy {
    pub guid: u32,
    pub reason: u8,
}

impl Packet for ServerEntityDestroy {
    const OPCODE: Opcode = Opcode::ServerEntityDestroy;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            guid: reader.read_u32()?,
            reason: reader.read_u8()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_u8(self.reason);
    }
}

/// The controlled player's own stat block, last in the entry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerPlayerCreate {
    pub guid: u32,
    pub character_id: u64,
    pub level: u32,
    pub health: u32,
    pub max_health: u32,
}

impl Packet for ServerPlayerCreate {
    const OPCODE: Opcode = Opcode::ServerPlayerCreate;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            guid: reader.read_u32()?,
            character_id: reader.read_u64()?,
            level: reader.read_u32()?,
            health: reader.read_u32()?,
            max_health: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.guid);
        writer.write_u64(self.character_id);
        writer.write_u32(self.level);
        writer.write_u32(self.health);
        writer.write_u32(self.max_health);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode, encode};

    #[test]
    fn command_stream_round_trip() {
        let command = ServerEntityCommand {
            guid: 88,
            time: 123_456,
            time_reset: false,
            server_controlled: true,
            commands: vec![
                EntityCommand::SetPosition {
                    position: Position {
                        x: 1.0,
                        y: -2.0,
                        z: 3.5,
                    },
                    blend: true,
                },
                EntityCommand::SetRotation { yaw: 1.57 },
                EntityCommand::SetState { state: 4 },
            ],
        };

        assert_eq!(
            decode::<ServerEntityCommand>(&encode(&command)).unwrap(),
            command
        );
    }

    #[test]
    fn unknown_command_key_is_typed() {
        let mut writer = BitWriter::new();
        writer.write_u32(7);
        writer.write_bits(5, 1);
        writer.write_bits(COMMAND_KEY_BITS, 60);

        assert_eq!(
            decode::<ClientEntityCommand>(&writer.into_bytes()),
            Err(Error::InvalidEnum(60))
        );
    }

    #[test]
    fn entity_create_round_trip() {
        let create = ServerEntityCreate {
            guid: 12,
            entity_type: 1,
            name: "Kara".into(),
            race: 3,
            sex: 1,
            class: 2,
            faction: 167,
            position: Position {
                x: 0.0,
                y: 10.0,
                z: 0.0,
            },
            yaw: 0.5,
            gear: vec![GearVisual {
                slot: 2,
                display_id: 900,
            }],
            bones: vec![1.0],
        };

        assert_eq!(decode::<ServerEntityCreate>(&encode(&create)).unwrap(), create);
    }
}
