//! Process-wide index of live sessions.
//!
//! Three views over one lock: by account id, by entity handle, and by
//! `(zone, instance)`. All operations take the write lock as a unit, so
//! readers always observe a consistent snapshot. At most one live entry
//! exists per account; a second registration wins and hands back the
//! evicted connection id so the caller can close it.

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use parking_lot::RwLock;

use codec::packet::Position;

use crate::session::{ZoneKey, entity::EntityHandle};

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub account_id: u64,
    pub connection_id: u64,
    pub character_id: Option<u64>,
    pub entity: Option<EntityHandle>,
    pub zone: Option<ZoneKey>,
    pub position: Option<Position>,
}

#[derive(Default)]
struct Tables {
    by_account: HashMap<u64, RegistryEntry>,
    by_entity: HashMap<EntityHandle, u64>,
    by_zone: HashMap<ZoneKey, HashSet<u64>>,
}

impl Tables {
    fn detach_views(&mut self, entry: &RegistryEntry) {
        if let Some(entity) = entry.entity {
            self.by_entity.remove(&entity);
        }
        if let Some(zone) = entry.zone {
            if let Some(members) = self.by_zone.get_mut(&zone) {
                members.remove(&entry.account_id);
                if members.is_empty() {
                    self.by_zone.remove(&zone);
                }
            }
        }
    }
}

/// # Test
///
/// ```
/// use wildstar_server_service::session::registry::SessionRegistry;
///
/// let registry = SessionRegistry::default();
///
/// assert_eq!(registry.register(7, 100, None, None), None);
/// // A second registration for the same account evicts the first.
/// assert_eq!(registry.register(7, 200, None, None), Some(100));
///
/// let entry = registry.lookup_by_account(7).unwrap();
/// assert_eq!(entry.connection_id, 200);
/// ```
#[derive(Default)]
pub struct SessionRegistry {
    tables: RwLock<Tables>,
}

impl SessionRegistry {
    /// Insert or replace the entry for an account. Returns the evicted
    /// connection id when a different live connection held the account.
    pub fn register(
        &self,
        account_id: u64,
        connection_id: u64,
        character_id: Option<u64>,
        entity: Option<EntityHandle>,
    ) -> Option<u64> {
        let mut tables = self.tables.write();

        let evicted = match tables.by_account.remove(&account_id) {
            Some(old) => {
                tables.detach_views(&old);
                (old.connection_id != connection_id).then_some(old.connection_id)
            }
            None => None,
        };

        if let Some(entity) = entity {
            tables.by_entity.insert(entity, account_id);
        }

        tables.by_account.insert(
            account_id,
            RegistryEntry {
                account_id,
                connection_id,
                character_id,
                entity,
                zone: None,
                position: None,
            },
        );

        evicted
    }

    pub fn update_zone(&self, account_id: u64, zone: ZoneKey) {
        let mut tables = self.tables.write();
        let Some(mut entry) = tables.by_account.get(&account_id).cloned() else {
            return;
        };

        if let Some(old) = entry.zone {
            if let Some(members) = tables.by_zone.get_mut(&old) {
                members.remove(&account_id);
                if members.is_empty() {
                    tables.by_zone.remove(&old);
                }
            }
        }

        tables
            .by_zone
            .entry(zone)
            .or_insert_with(HashSet::new)
            .insert(account_id);

        entry.zone = Some(zone);
        tables.by_account.insert(account_id, entry);
    }

    pub fn set_entity_handle(&self, account_id: u64, handle: EntityHandle) {
        let mut tables = self.tables.write();
        let Some(mut entry) = tables.by_account.get(&account_id).cloned() else {
            return;
        };

        if let Some(old) = entry.entity {
            tables.by_entity.remove(&old);
        }
        tables.by_entity.insert(handle, account_id);

        entry.entity = Some(handle);
        tables.by_account.insert(account_id, entry);
    }

    pub fn update_position(&self, account_id: u64, position: Position) {
        let mut tables = self.tables.write();
        if let Some(entry) = tables.by_account.get_mut(&account_id) {
            entry.position = Some(position);
        }
    }

    pub fn lookup_by_account(&self, account_id: u64) -> Option<RegistryEntry> {
        self.tables.read().by_account.get(&account_id).cloned()
    }

    pub fn lookup_by_entity(&self, handle: EntityHandle) -> Option<RegistryEntry> {
        let tables = self.tables.read();
        let account_id = tables.by_entity.get(&handle)?;
        tables.by_account.get(account_id).cloned()
    }

    pub fn list_in_zone(&self, zone: ZoneKey) -> Vec<RegistryEntry> {
        let tables = self.tables.read();
        let Some(members) = tables.by_zone.get(&zone) else {
            return Vec::new();
        };

        members
            .iter()
            .filter_map(|account| tables.by_account.get(account).cloned())
            .collect()
    }

    /// Zone members within `radius` of `position`. Members with no
    /// recorded position are skipped.
    pub fn nearby_in_zone(
        &self,
        zone: ZoneKey,
        position: Position,
        radius: f32,
    ) -> Vec<RegistryEntry> {
        self.list_in_zone(zone)
            .into_iter()
            .filter(|entry| {
                entry
                    .position
                    .is_some_and(|at| at.distance(&position) <= radius)
            })
            .collect()
    }

    /// Remove the account's entry and every view of it. The entry is
    /// gone before this returns, so callers can fire external
    /// notifications afterwards without racing the views.
    pub fn unregister(&self, account_id: u64) -> Option<RegistryEntry> {
        let mut tables = self.tables.write();
        let entry = tables.by_account.remove(&account_id)?;
        tables.detach_views(&entry);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.tables.read().by_account.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
