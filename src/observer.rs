//! In-memory implementations of the store contracts, seeded from the
//! static credentials in the configuration. A deployment swaps these
//! for database-backed stores; the protocol core never knows the
//! difference.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use codec::{crypto, packet::Position, packet::character::GearVisual};
use service::{
    Account, AccountStore, Character, CharacterAttrs, CharacterCreateError, CharacterStore,
    CreationTemplate, Item, SessionValidity, StaticData, StoreError, Suspension, WorldLocation,
};

use crate::config::Config;

/// Character slots per account tier.
const FREE_SLOTS: usize = 2;
const SIGNATURE_SLOTS: usize = 12;

pub struct Observer {
    accounts: RwLock<Vec<Account>>,
    characters: RwLock<Vec<Character>>,
    next_character_id: AtomicU64,
    templates: Vec<CreationTemplate>,
    items: Vec<Item>,
    locations: Vec<WorldLocation>,
}

impl Observer {
    pub fn new(config: &Config) -> Self {
        let mut accounts = Vec::with_capacity(config.auth.static_credentials.len());
        for (index, (email, password)) in config.auth.static_credentials.iter().enumerate() {
            let salt = crypto::random_bytes::<{ crypto::SALT_SIZE }>();
            let verifier = crypto::compute_verifier(email, password, &salt);

            accounts.push(Account {
                id: index as u64 + 1,
                email: email.clone(),
                salt: salt.to_vec(),
                verifier: verifier.to_vec(),
                ticket: None,
                signature: config.auth.signature_accounts.contains(email),
            });

            log::info!("static account seeded: email={}", email);
        }

        Self {
            accounts: RwLock::new(accounts),
            characters: RwLock::new(Vec::new()),
            next_character_id: AtomicU64::new(1000),
            templates: builtin_templates(),
            items: builtin_items(),
            locations: builtin_locations(),
        }
    }
}

/// The handful of creation starts the character screen offers. In a
/// full deployment this table comes from the game data catalog.
fn builtin_templates() -> Vec<CreationTemplate> {
    let northern_wilds = Position {
        x: 4074.0,
        y: -797.0,
        z: -2399.0,
    };
    let crimson_isle = Position {
        x: -8261.0,
        y: -995.0,
        z: -280.0,
    };

    vec![
        CreationTemplate {
            id: 1,
            race: 1,
            class: 1,
            sex: 0,
            faction: 167,
            path: 0,
            world_id: 870,
            position: northern_wilds,
            yaw: 0.0,
            starting_items: vec![1101, 1201],
        },
        CreationTemplate {
            id: 2,
            race: 1,
            class: 2,
            sex: 1,
            faction: 167,
            path: 1,
            world_id: 870,
            position: northern_wilds,
            yaw: 0.0,
            starting_items: vec![1102, 1201],
        },
        CreationTemplate {
            id: 3,
            race: 5,
            class: 5,
            sex: 0,
            faction: 166,
            path: 2,
            world_id: 1387,
            position: crimson_isle,
            yaw: 3.14,
            starting_items: vec![1103, 1202],
        },
    ]
}

fn builtin_items() -> Vec<Item> {
    vec![
        Item {
            id: 1101,
            slot: 2,
            display_id: 7723,
        },
        Item {
            id: 1102,
            slot: 2,
            display_id: 7801,
        },
        Item {
            id: 1103,
            slot: 2,
            display_id: 7950,
        },
        Item {
            id: 1201,
            slot: 3,
            display_id: 1301,
        },
        Item {
            id: 1202,
            slot: 3,
            display_id: 1340,
        },
    ]
}

fn builtin_locations() -> Vec<WorldLocation> {
    vec![
        WorldLocation {
            id: 870,
            world_id: 870,
            position: Position {
                x: 4074.0,
                y: -797.0,
                z: -2399.0,
            },
            yaw: 0.0,
        },
        WorldLocation {
            id: 1387,
            world_id: 1387,
            position: Position {
                x: -8261.0,
                y: -995.0,
                z: -280.0,
            },
            yaw: 3.14,
        },
    ]
}

#[async_trait]
impl AccountStore for Observer {
    async fn get_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .read()
            .iter()
            .find(|account| account.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn get_by_id(&self, id: u64) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .read()
            .iter()
            .find(|account| account.id == id)
            .cloned())
    }

    async fn validate_session(
        &self,
        email: &str,
        ticket: &[u8; crypto::TICKET_SIZE],
        account_id: u64,
    ) -> Result<SessionValidity, StoreError> {
        let accounts = self.accounts.read();
        let Some(account) = accounts
            .iter()
            .find(|account| account.email.eq_ignore_ascii_case(email))
        else {
            return Ok(SessionValidity::NotFound);
        };

        if account.id != account_id {
            return Ok(SessionValidity::AccountMismatch);
        }

        match &account.ticket {
            Some(stored) if crypto::ct_eq(stored.as_bytes(), hex::encode(ticket).as_bytes()) => {
                Ok(SessionValidity::Valid)
            }
            // A ticket exists but a newer one replaced the presented
            // value: the old session expired.
            Some(_) => Ok(SessionValidity::Expired),
            None => Ok(SessionValidity::NotFound),
        }
    }

    async fn update_ticket(
        &self,
        account_id: u64,
        ticket: &[u8; crypto::TICKET_SIZE],
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write();
        let account = accounts
            .iter_mut()
            .find(|account| account.id == account_id)
            .ok_or(StoreError::Unavailable)?;

        account.ticket = Some(hex::encode(ticket));
        Ok(())
    }

    async fn check_suspension(&self, _account_id: u64) -> Result<Suspension, StoreError> {
        // Static dev accounts carry no suspensions.
        Ok(Suspension::Clear)
    }
}

#[async_trait]
impl CharacterStore for Observer {
    async fn list_for(&self, account_id: u64, realm_id: u32) -> Result<Vec<Character>, StoreError> {
        Ok(self
            .characters
            .read()
            .iter()
            .filter(|character| {
                character.account_id == account_id && character.realm_id == realm_id
            })
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        account_id: u64,
        attrs: CharacterAttrs,
    ) -> Result<Character, CharacterCreateError> {
        let signature = self
            .accounts
            .read()
            .iter()
            .find(|account| account.id == account_id)
            .map(|account| account.signature)
            .ok_or(CharacterCreateError::Store(StoreError::Unavailable))?;

        let mut characters = self.characters.write();

        let lowered = attrs.name.to_lowercase();
        if characters
            .iter()
            .any(|character| character.name.to_lowercase() == lowered)
        {
            return Err(CharacterCreateError::NameTaken);
        }

        let cap = if signature { SIGNATURE_SLOTS } else { FREE_SLOTS };
        let owned = characters
            .iter()
            .filter(|character| character.account_id == account_id)
            .count();
        if owned >= cap {
            return Err(CharacterCreateError::SlotsFull);
        }

        let character = Character {
            id: self.next_character_id.fetch_add(1, Ordering::Relaxed),
            account_id,
            realm_id: 1,
            name: attrs.name,
            sex: attrs.sex,
            race: attrs.race,
            class: attrs.class,
            faction: attrs.faction,
            path: attrs.path,
            level: 1,
            world_id: attrs.world_id,
            position: attrs.position,
            yaw: attrs.yaw,
            gear: attrs.gear,
            bones: attrs.bones,
            days_since_last_online: 0.0,
        };

        characters.push(character.clone());
        Ok(character)
    }

    async fn get_owned(
        &self,
        account_id: u64,
        character_id: u64,
    ) -> Result<Option<Character>, StoreError> {
        Ok(self
            .characters
            .read()
            .iter()
            .find(|character| character.id == character_id && character.account_id == account_id)
            .cloned())
    }

    async fn update_last_online(&self, character_id: u64) -> Result<(), StoreError> {
        let mut characters = self.characters.write();
        if let Some(character) = characters
            .iter_mut()
            .find(|character| character.id == character_id)
        {
            character.days_since_last_online = 0.0;
        }
        Ok(())
    }

    async fn update_position(
        &self,
        character_id: u64,
        position: Position,
        yaw: f32,
    ) -> Result<(), StoreError> {
        let mut characters = self.characters.write();
        if let Some(character) = characters
            .iter_mut()
            .find(|character| character.id == character_id)
        {
            character.position = position;
            character.yaw = yaw;
        }
        Ok(())
    }

    async fn delete(&self, account_id: u64, character_id: u64) -> Result<bool, StoreError> {
        let mut characters = self.characters.write();
        let before = characters.len();
        characters.retain(|character| {
            !(character.id == character_id && character.account_id == account_id)
        });
        Ok(characters.len() < before)
    }
}

impl StaticData for Observer {
    fn character_creation_template(&self, id: u32) -> Option<CreationTemplate> {
        self.templates
            .iter()
            .find(|template| template.id == id)
            .cloned()
    }

    fn item(&self, id: u32) -> Option<Item> {
        self.items.iter().find(|item| item.id == id).copied()
    }

    fn world_location(&self, id: u32) -> Option<WorldLocation> {
        self.locations
            .iter()
            .find(|location| location.id == id)
            .copied()
    }

    fn compute_visuals(
        &self,
        race: u32,
        _sex: u8,
        labels: &[u32],
        values: &[u32],
    ) -> Vec<GearVisual> {
        // Body visuals derive from the customization pairs; the racial
        // base mesh contributes the offset.
        labels
            .iter()
            .zip(values.iter())
            .map(|(label, value)| GearVisual {
                slot: *label,
                display_id: race * 10_000 + value,
            })
            .collect()
    }
}
