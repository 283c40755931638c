//! Character screen messages: list, create, delete, select.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    Error,
    bits::{BitReader, BitWriter},
    opcode::Opcode,
    packet::{Packet, Position},
};

/// Customization caps the create handler validates against.
pub const MAX_CUSTOMIZATION_LABELS: usize = 100;
pub const MAX_BONES: usize = 200;
pub const BONE_RANGE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientCharacterList;

impl Packet for ClientCharacterList {
    const OPCODE: Opcode = Opcode::ClientCharacterList;

    fn read(_reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self)
    }

    fn write(&self, _writer: &mut BitWriter) {}
}

/// An equipped visual the character list renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GearVisual {
    pub slot: u32,
    pub display_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharacterSummary {
    pub character_id: u64,
    pub name: String,
    pub sex: u8,
    pub race: u32,
    pub class: u32,
    pub faction: u32,
    pub path: u32,
    pub level: u32,
    pub world_id: u32,
    pub position: Position,
    pub days_since_last_online: f32,
    pub gear: Vec<GearVisual>,
    pub bones: Vec<f32>,
}

impl CharacterSummary {
    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let character_id = reader.read_u64()?;
        let name = reader.read_wide_string()?;
        let sex = reader.read_u8()?;
        let race = reader.read_u32()?;
        let class = reader.read_u32()?;
        let faction = reader.read_u32()?;
        let path = reader.read_u32()?;
        let level = reader.read_u32()?;
        let world_id = reader.read_u32()?;
        reader.align();
        let position = Position::read_packed(reader)?;
        let days_since_last_online = reader.read_f32()?;

        let gear_count = reader.read_u32()? as usize;
        let mut gear = Vec::with_capacity(gear_count.min(32));
        for _ in 0..gear_count {
            gear.push(GearVisual {
                slot: reader.read_u32()?,
                display_id: reader.read_u32()?,
            });
        }

        let bone_count = reader.read_u32()? as usize;
        let mut bones = Vec::with_capacity(bone_count.min(MAX_BONES));
        for _ in 0..bone_count {
            bones.push(reader.read_f32()?);
        }

        Ok(Self {
            character_id,
            name,
            sex,
            race,
            class,
            faction,
            path,
            level,
            world_id,
            position,
            days_since_last_online,
            gear,
            bones,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u64(self.character_id);
        writer.write_wide_string(&self.name);
        writer.write_u8(self.sex);
        writer.write_u32(self.race);
        writer.write_u32(self.class);
        writer.write_u32(self.faction);
        writer.write_u32(self.path);
        writer.write_u32(self.level);
        writer.write_u32(self.world_id);
        writer.align();
        self.position.write_packed(writer);
        writer.write_f32(self.days_since_last_online);

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

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServerCharacterList {
    pub realm_id: u32,
    pub characters: Vec<CharacterSummary>,
}

impl Packet for ServerCharacterList {
    const OPCODE: Opcode = Opcode::ServerCharacterList;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let realm_id = reader.read_u32()?;
        let count = reader.read_u32()? as usize;
        let mut characters = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            characters.push(CharacterSummary::read(reader)?);
        }
        Ok(Self {
            realm_id,
            characters,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.realm_id);
        writer.write_u32(self.characters.len() as u32);
        for character in &self.characters {
            character.write(writer);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientCharacterCreate {
    pub name: String,
    pub sex: u8,
    pub race: u32,
    pub class: u32,
    pub path: u32,
    pub creation_id: u32,
    pub labels: Vec<u32>,
    pub values: Vec<u32>,
    pub bones: Vec<f32>,
}

impl Packet for ClientCharacterCreate {
    const OPCODE: Opcode = Opcode::ClientCharacterCreate;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let name = reader.read_wide_string()?;
        let sex = reader.read_u8()?;
        let race = reader.read_u32()?;
        let class = reader.read_u32()?;
        let path = reader.read_u32()?;
        let creation_id = reader.read_u32()?;

        let label_count = reader.read_u32()? as usize;
        let mut labels = Vec::with_capacity(label_count.min(MAX_CUSTOMIZATION_LABELS));
        for _ in 0..label_count {
            labels.push(reader.read_u32()?);
        }

        let value_count = reader.read_u32()? as usize;
        let mut values = Vec::with_capacity(value_count.min(MAX_CUSTOMIZATION_LABELS));
        for _ in 0..value_count {
            values.push(reader.read_u32()?);
        }

        let bone_count = reader.read_u32()? as usize;
        let mut bones = Vec::with_capacity(bone_count.min(MAX_BONES));
        for _ in 0..bone_count {
            bones.push(reader.read_f32()?);
        }

        Ok(Self {
            name,
            sex,
            race,
            class,
            path,
            creation_id,
            labels,
            values,
            bones,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_wide_string(&self.name);
        writer.write_u8(self.sex);
        writer.write_u32(self.race);
        writer.write_u32(self.class);
        writer.write_u32(self.path);
        writer.write_u32(self.creation_id);

        writer.write_u32(self.labels.len() as u32);
        for label in &self.labels {
            writer.write_u32(*label);
        }

        writer.write_u32(self.values.len() as u32);
        for value in &self.values {
            writer.write_u32(*value);
        }

        writer.write_u32(self.bones.len() as u32);
        for bone in &self.bones {
            writer.write_f32(*bone);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum CharacterCreateResult {
    Failed = 0,
    Success = 1,
    InvalidName = 2,
    NameNotUnique = 3,
    SlotsFull = 4,
    InvalidTemplate = 5,
    DatabaseError = 6,
    InvalidCustomization = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCharacterCreate {
    pub result: CharacterCreateResult,
    pub character_id: u64,
    pub world_id: u32,
}

impl ServerCharacterCreate {
    pub fn failure(result: CharacterCreateResult) -> Self {
        Self {
            result,
            character_id: 0,
            world_id: 0,
        }
    }
}

impl Packet for ServerCharacterCreate {
    const OPCODE: Opcode = Opcode::ServerCharacterCreate;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let raw = reader.read_u32()?;
        Ok(Self {
            result: CharacterCreateResult::try_from(raw)
                .map_err(|_| Error::InvalidEnum(u64::from(raw)))?,
            character_id: reader.read_u64()?,
            world_id: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.result.into());
        writer.write_u64(self.character_id);
        writer.write_u32(self.world_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientCharacterDelete {
    pub character_id: u64,
}

impl Packet for ClientCharacterDelete {
    const OPCODE: Opcode = Opcode::ClientCharacterDelete;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            character_id: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u64(self.character_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerCharacterDelete {
    pub success: bool,
    pub character_id: u64,
}

impl Packet for ServerCharacterDelete {
    const OPCODE: Opcode = Opcode::ServerCharacterDelete;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            success: reader.read_bool()?,
            character_id: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_bool(self.success);
        writer.write_u64(self.character_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientCharacterSelect {
    pub character_id: u64,
}

impl Packet for ClientCharacterSelect {
    const OPCODE: Opcode = Opcode::ClientCharacterSelect;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            character_id: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u64(self.character_id);
    }
}
