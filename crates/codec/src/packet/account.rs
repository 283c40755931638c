//! Account-scope packets pushed ahead of the character list.
//!
//! The client expects this family in a fixed sequence when it requests
//! the character list; the entitlements packet carries the character
//! slot delta above the 2 base slots.

use crate::{
    Error,
    bits::{BitReader, BitWriter},
    opcode::Opcode,
    packet::Packet,
};

/// Character slots granted by the free tier.
pub const BASE_CHARACTER_SLOTS: u32 = 2;
/// Character slots granted by the signature tier.
pub const SIGNATURE_CHARACTER_SLOTS: u32 = 12;

/// Entitlement ids the character screen cares about.
pub const ENTITLEMENT_CHARACTER_SLOTS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountCurrency {
    pub currency_type: u32,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerAccountCurrencies {
    pub currencies: Vec<AccountCurrency>,
}

impl Packet for ServerAccountCurrencies {
    const OPCODE: Opcode = Opcode::ServerAccountCurrencies;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let count = reader.read_u32()? as usize;
        let mut currencies = Vec::with_capacity(count.min(32));
        for _ in 0..count {
            currencies.push(AccountCurrency {
                currency_type: reader.read_u32()?,
                amount: reader.read_u64()?,
            });
        }
        Ok(Self { currencies })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.currencies.len() as u32);
        for currency in &self.currencies {
            writer.write_u32(currency.currency_type);
            writer.write_u64(currency.amount);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerAccountUnlocks {
    pub unlock_ids: Vec<u32>,
}

impl Packet for ServerAccountUnlocks {
    const OPCODE: Opcode = Opcode::ServerAccountUnlocks;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let count = reader.read_u32()? as usize;
        let mut unlock_ids = Vec::with_capacity(count.min(128));
        for _ in 0..count {
            unlock_ids.push(reader.read_u32()?);
        }
        Ok(Self { unlock_ids })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.unlock_ids.len() as u32);
        for id in &self.unlock_ids {
            writer.write_u32(*id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlement {
    pub entitlement_id: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerAccountEntitlements {
    pub entitlements: Vec<Entitlement>,
}

impl ServerAccountEntitlements {
    /// The slot entitlement delivers only the delta above the base
    /// slots: 0 for free accounts, 10 for signature.
    pub fn character_slots(signature: bool) -> Self {
        let total = if signature {
            SIGNATURE_CHARACTER_SLOTS
        } else {
            BASE_CHARACTER_SLOTS
        };

        Self {
            entitlements: vec![Entitlement {
                entitlement_id: ENTITLEMENT_CHARACTER_SLOTS,
                count: total - BASE_CHARACTER_SLOTS,
            }],
        }
    }
}

impl Packet for ServerAccountEntitlements {
    const OPCODE: Opcode = Opcode::ServerAccountEntitlements;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let count = reader.read_u32()? as usize;
        let mut entitlements = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            entitlements.push(Entitlement {
                entitlement_id: reader.read_u32()?,
                count: reader.read_u32()?,
            });
        }
        Ok(Self { entitlements })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.entitlements.len() as u32);
        for entitlement in &self.entitlements {
            writer.write_u32(entitlement.entitlement_id);
            writer.write_u32(entitlement.count);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerAccountTier {
    pub signature: bool,
}

impl Packet for ServerAccountTier {
    const OPCODE: Opcode = Opcode::ServerAccountTier;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            signature: reader.read_bool()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_bool(self.signature);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardProperty {
    pub property_id: u32,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerRewardProperties {
    pub properties: Vec<RewardProperty>,
}

impl Packet for ServerRewardProperties {
    const OPCODE: Opcode = Opcode::ServerRewardProperties;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        let count = reader.read_u32()? as usize;
        let mut properties = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            properties.push(RewardProperty {
                property_id: reader.read_u32()?,
                value: reader.read_u32()?,
            });
        }
        Ok(Self { properties })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.properties.len() as u32);
        for property in &self.properties {
            writer.write_u32(property.property_id);
            writer.write_u32(property.value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerMaxCharacterLevel {
    pub level: u32,
}

impl Packet for ServerMaxCharacterLevel {
    const OPCODE: Opcode = Opcode::ServerMaxCharacterLevel;

    fn read(reader: &mut BitReader<'_>) -> Result<Self, Error> {
        Ok(Self {
            level: reader.read_u32()?,
        })
    }

    fn write(&self, writer: &mut BitWriter) {
        writer.write_u32(self.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{decode, encode};

    #[test]
    fn entitlement_slot_arithmetic() {
        let free = ServerAccountEntitlements::character_slots(false);
        assert_eq!(free.entitlements[0].count, 0);

        let signature = ServerAccountEntitlements::character_slots(true);
        assert_eq!(signature.entitlements[0].count, 10);
    }

    #[test]
    fn currencies_round_trip() {
        let currencies = ServerAccountCurrencies {
            currencies: vec![
                AccountCurrency {
                    currency_type: 1,
                    amount: 5_000,
                },
                AccountCurrency {
                    currency_type: 6,
                    amount: 12,
                },
            ],
        };

        assert_eq!(
            decode::<ServerAccountCurrencies>(&encode(&currencies)).unwrap(),
            currencies
        );
    }
}
