//! Lock-guarded registry of known servers and groups.
//!
//! The registry is the single piece of shared mutable state in the client:
//! the handshake thread inserts and updates records, directory
//! reconciliation merges and prunes, the demultiplexer updates status flags
//! and the dispatcher performs read-only lookups. All mutation is serialized
//! under one coarse lock ([`SharedRegistry::with`]); callers never hold
//! record references across concurrency boundaries, only identities (names
//! or ordinal indices) resolved through the service.
//!
//! Records are keyed by their unique name: the logical name, or the
//! synthesized `name(domain)` identity when two same-named servers from
//! different domains are known at once. The central invariant — no two live
//! records share the same `(name, domain, port)` identity — is enforced
//! inside the critical section of every upsert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::models::{qualified_name, GroupRecord, ServerRecord};

/// In-memory registry of server and group records
///
/// All methods take `&mut self`; concurrent access goes through
/// [`SharedRegistry`], which owns the coarse lock.
#[derive(Debug, Default)]
pub struct Registry {
    /// Server records keyed by unique name
    servers: HashMap<String, ServerRecord>,
    /// Ordinal index table; a slot is cleared, never reused, on prune
    slots: Vec<Option<String>>,
    /// Group records keyed by name
    groups: HashMap<String, GroupRecord>,
}

impl Registry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Server operations ==========

    /// Inserts or updates a record under its identity
    ///
    /// Matches an existing record by plain name first, then by the
    /// domain-qualified `name(domain)` identity. When the name matches but
    /// the domains differ, the record is stored under its qualified
    /// identity so both servers stay distinct. Returns the unique key the
    /// record now lives under.
    pub fn upsert_server(&mut self, record: ServerRecord) -> String {
        let key = self.resolve_key(&record.name, &record.domain);
        if let Some(existing) = self.servers.get_mut(&key) {
            let index = existing.index;
            let mut record = record;
            record.index = index;
            *existing = record;
            key
        } else {
            self.insert_new(key.clone(), record);
            key
        }
    }

    /// Resolves the unique key a `(name, domain)` identity belongs to
    ///
    /// Returns the plain name when it is unclaimed or claimed by the same
    /// domain, otherwise the qualified `name(domain)` form.
    #[must_use]
    pub fn resolve_key(&self, name: &str, domain: &str) -> String {
        match self.servers.get(name) {
            Some(existing) if existing.domain != domain && !domain.is_empty() => {
                qualified_name(name, domain)
            }
            _ => name.to_string(),
        }
    }

    fn insert_new(&mut self, key: String, mut record: ServerRecord) {
        record.index = self.slots.len();
        debug!(server = %key, index = record.index, "registering server");
        self.slots.push(Some(key.clone()));
        self.servers.insert(key, record);
    }

    /// Looks up a record by unique key, cloned out of the registry
    #[must_use]
    pub fn server(&self, key: &str) -> Option<ServerRecord> {
        self.servers.get(key).cloned()
    }

    /// Looks up a record by ordinal index, cloned out of the registry
    #[must_use]
    pub fn server_by_index(&self, index: usize) -> Option<ServerRecord> {
        let key = self.slots.get(index)?.as_ref()?;
        self.servers.get(key).cloned()
    }

    /// Mutates a record in place; returns false if the key is unknown
    pub fn update_server(&mut self, key: &str, f: impl FnOnce(&mut ServerRecord)) -> bool {
        match self.servers.get_mut(key) {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Mutates a record by index; returns false if the slot is empty
    pub fn update_server_by_index(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut ServerRecord),
    ) -> bool {
        let Some(Some(key)) = self.slots.get(index).cloned() else {
            return false;
        };
        self.update_server(&key, f)
    }

    /// Moves a record to a new unique key, preserving its index slot
    ///
    /// Used by reconciliation when a directory batch renames a server.
    pub fn rekey_server(&mut self, old_key: &str, new_key: &str) -> bool {
        if old_key == new_key || self.servers.contains_key(new_key) {
            return old_key == new_key;
        }
        let Some(record) = self.servers.remove(old_key) else {
            return false;
        };
        if let Some(slot) = self.slots.get_mut(record.index) {
            *slot = Some(new_key.to_string());
        }
        self.servers.insert(new_key.to_string(), record);
        true
    }

    /// Removes an inactive record; live records are never removed
    ///
    /// The index slot is cleared, not reused, so stale indices held by the
    /// application can never resolve to a different server.
    pub fn prune_server(&mut self, key: &str) -> bool {
        let Some(record) = self.servers.get(key) else {
            return false;
        };
        if record.active {
            return false;
        }
        let index = record.index;
        self.servers.remove(key);
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = None;
        }
        debug!(server = %key, "pruned server record");
        true
    }

    /// Returns all records, cloned
    #[must_use]
    pub fn servers(&self) -> Vec<ServerRecord> {
        let mut all: Vec<ServerRecord> = self.servers.values().cloned().collect();
        all.sort_by_key(|r| r.index);
        all
    }

    /// Returns all records with the unique key each lives under
    #[must_use]
    pub fn server_entries(&self) -> Vec<(String, ServerRecord)> {
        let mut all: Vec<(String, ServerRecord)> = self
            .servers
            .iter()
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        all.sort_by_key(|(_, r)| r.index);
        all
    }

    /// Returns every unique key currently registered
    #[must_use]
    pub fn server_keys(&self) -> Vec<String> {
        let mut keys: Vec<(usize, String)> = self
            .servers
            .iter()
            .map(|(k, r)| (r.index, k.clone()))
            .collect();
        keys.sort_unstable();
        keys.into_iter().map(|(_, k)| k).collect()
    }

    /// Counts records with a live session
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.servers.values().filter(|r| r.active).count()
    }

    // ========== Group operations ==========

    /// Inserts or replaces a group record
    pub fn upsert_group(&mut self, group: GroupRecord) {
        self.groups.insert(group.name.clone(), group);
    }

    /// Looks up a group, cloned
    #[must_use]
    pub fn group(&self, name: &str) -> Option<GroupRecord> {
        self.groups.get(name).cloned()
    }

    /// Removes a group record
    pub fn remove_group(&mut self, name: &str) -> bool {
        self.groups.remove(name).is_some()
    }

    /// Resolves a group for dispatch, consuming it if temporary
    ///
    /// Temporary groups are single-use: the record is removed from the
    /// registry the moment its members have been resolved.
    pub fn take_group_for_dispatch(&mut self, name: &str) -> Option<GroupRecord> {
        let group = self.groups.get(name)?.clone();
        if group.is_temporary() {
            self.groups.remove(name);
            debug!(group = %name, "consumed temporary group");
        }
        Some(group)
    }

    /// Returns all group names
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

/// Thread-safe handle to the registry
///
/// Clones share one underlying registry behind a single coarse mutex; every
/// operation runs as one atomic critical section.
#[derive(Clone, Debug, Default)]
pub struct SharedRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl SharedRegistry {
    /// Creates a handle around an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the registry
    pub fn with<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Looks up a record by unique key
    #[must_use]
    pub fn server(&self, key: &str) -> Option<ServerRecord> {
        self.with(|r| r.server(key))
    }

    /// Looks up a record by ordinal index
    #[must_use]
    pub fn server_by_index(&self, index: usize) -> Option<ServerRecord> {
        self.with(|r| r.server_by_index(index))
    }

    /// Looks up a group by name
    #[must_use]
    pub fn group(&self, name: &str) -> Option<GroupRecord> {
        self.with(|r| r.group(name))
    }

    /// Counts records with a live session
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.with(|r| r.active_count())
    }

    /// Returns every unique key currently registered
    #[must_use]
    pub fn server_keys(&self) -> Vec<String> {
        self.with(|r| r.server_keys())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_assigns_stable_index() {
        let mut registry = Registry::new();
        let key_a = registry.upsert_server(ServerRecord::new("app1", "app1.example.test", 2050));
        let key_b = registry.upsert_server(ServerRecord::new("app2", "app2.example.test", 2050));
        assert_eq!(registry.server(&key_a).unwrap().index, 0);
        assert_eq!(registry.server(&key_b).unwrap().index, 1);

        // Re-upserting keeps the index.
        registry.upsert_server(ServerRecord::new("app1", "app1.other.test", 2050));
        assert_eq!(registry.server("app1").unwrap().index, 0);
    }

    #[test]
    fn test_same_name_different_domain_kept_apart() {
        let mut registry = Registry::new();
        let mut east = ServerRecord::new("hub", "hub.east.test", 2050);
        east.domain = "East".to_string();
        let mut west = ServerRecord::new("hub", "hub.west.test", 2050);
        west.domain = "West".to_string();

        let key_east = registry.upsert_server(east);
        let key_west = registry.upsert_server(west);
        assert_eq!(key_east, "hub");
        assert_eq!(key_west, "hub(West)");
        assert_eq!(registry.servers().len(), 2);
    }

    #[test]
    fn test_prune_refuses_active_record() {
        let mut registry = Registry::new();
        let key = registry.upsert_server(ServerRecord::new("app1", "app1.example.test", 2050));
        registry.update_server(&key, |r| r.active = true);
        assert!(!registry.prune_server(&key));
        registry.update_server(&key, |r| r.active = false);
        assert!(registry.prune_server(&key));
    }

    #[test]
    fn test_pruned_slot_not_reused() {
        let mut registry = Registry::new();
        let key = registry.upsert_server(ServerRecord::new("app1", "h1", 2050));
        registry.prune_server(&key);
        let key2 = registry.upsert_server(ServerRecord::new("app2", "h2", 2050));
        assert_eq!(registry.server(&key2).unwrap().index, 1);
        assert!(registry.server_by_index(0).is_none());
    }

    #[test]
    fn test_temporary_group_consumed() {
        let mut registry = Registry::new();
        registry.upsert_group(GroupRecord::temporary("batch", vec!["s1".into()]));
        assert!(registry.take_group_for_dispatch("batch").is_some());
        assert!(registry.group("batch").is_none());
    }

    #[test]
    fn test_durable_group_survives_dispatch() {
        let mut registry = Registry::new();
        registry.upsert_group(GroupRecord::new("all", vec!["s1".into()]));
        assert!(registry.take_group_for_dispatch("all").is_some());
        assert!(registry.group("all").is_some());
    }

    #[test]
    fn test_rekey_preserves_slot() {
        let mut registry = Registry::new();
        let key = registry.upsert_server(ServerRecord::new("old", "h", 2050));
        assert!(registry.rekey_server(&key, "new"));
        assert_eq!(registry.server_by_index(0).unwrap().name, "old");
        assert!(registry.server("new").is_some());
        assert!(registry.server("old").is_none());
    }
}
