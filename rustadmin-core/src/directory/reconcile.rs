//! Reconciliation of a parsed directory batch into the live registry.
//!
//! Each incoming server entry is matched against the registry by a cascade
//! of identities: exact logical name, then the domain-qualified
//! `name(domain)` form, then `(resolved address, port)`, then plain address
//! equality against records named after their own host. A match merges
//! field-by-field; no match creates a new inactive record. On a full
//! refresh, previously known same-domain records absent from the batch are
//! pruned.
//!
//! The caller runs this inside the registry's critical section so the whole
//! batch lands atomically with respect to handshakes and dispatch lookups.

use std::collections::HashSet;
use std::net::{IpAddr, ToSocketAddrs};

use tracing::debug;

use crate::models::{qualified_name, GroupKind, GroupRecord, ServerOs, ServerRecord};
use crate::registry::Registry;

use super::parser::{DirectoryBatch, DirectoryServer};

/// Merges a freshly parsed directory batch into the registry
pub fn reconcile(registry: &mut Registry, batch: &DirectoryBatch) {
    // Scratch set of same-domain records; whatever the batch does not
    // mention again gets pruned on a full refresh.
    let mut stale: HashSet<String> = if batch.full_refresh {
        registry
            .server_entries()
            .into_iter()
            .filter(|(_, r)| r.domain == batch.domain)
            .map(|(k, _)| k)
            .collect()
    } else {
        HashSet::new()
    };

    for incoming in &batch.servers {
        let key = apply_server(registry, incoming);
        stale.remove(&key);
    }

    for group in &batch.groups {
        registry.upsert_group(GroupRecord {
            name: group.name.clone(),
            domain: batch.domain.clone(),
            kind: GroupKind::Server,
            members: group.members.clone(),
        });
    }

    for key in stale {
        registry.prune_server(&key);
    }
}

/// Matches one incoming entry and merges it; returns the key it landed under
fn apply_server(registry: &mut Registry, incoming: &DirectoryServer) -> String {
    match find_match(registry, incoming) {
        Some(key) => {
            let renamed = registry
                .server(&key)
                .is_some_and(|r| r.name != incoming.name);
            registry.update_server(&key, |record| merge(record, incoming));
            if renamed {
                let new_key = registry.resolve_key(&incoming.name, &incoming.domain);
                debug!(old = %key, new = %new_key, "directory renamed server");
                if registry.rekey_server(&key, &new_key) {
                    return new_key;
                }
            }
            key
        }
        None => {
            debug!(server = %incoming.name, domain = %incoming.domain, "directory added server");
            registry.upsert_server(record_from(incoming))
        }
    }
}

/// The cascading identity match: name, qualified name, address+port, address
fn find_match(registry: &Registry, incoming: &DirectoryServer) -> Option<String> {
    // Stage 1: exact logical name.
    if let Some(existing) = registry.server(&incoming.name) {
        if domains_compatible(&existing.domain, &incoming.domain) {
            return Some(incoming.name.clone());
        }
        // Stage 2: domain conflict; retry under the qualified identity.
        let qualified = qualified_name(&incoming.name, &incoming.domain);
        if registry.server(&qualified).is_some() {
            return Some(qualified);
        }
    }

    let address = resolve_address(&incoming.hostname);

    // Stage 3: (address, port) when the incoming record carries a port.
    if let (Some(addr), Some(port)) = (address, incoming.port) {
        let candidates: Vec<(String, ServerRecord)> = registry
            .server_entries()
            .into_iter()
            .filter(|(_, r)| r.address == Some(addr) && r.port == port)
            .collect();
        if let Some((key, _)) = candidates
            .iter()
            .find(|(_, r)| r.hostname == r.name)
            .or_else(|| {
                candidates
                    .iter()
                    .find(|(_, r)| r.domain.is_empty() && r.name == incoming.name)
            })
        {
            return Some(key.clone());
        }
    }

    // Stage 4: plain address equality against records named after their host.
    if let Some(addr) = address {
        if let Some((key, _)) = registry
            .server_entries()
            .into_iter()
            .find(|(_, r)| r.address == Some(addr) && r.name == r.hostname)
        {
            return Some(key);
        }
    }

    None
}

fn domains_compatible(known: &str, incoming: &str) -> bool {
    known == incoming || known.is_empty() || incoming.is_empty()
}

/// Field-level merge of an incoming entry into a matched record
///
/// Hostname and port are protected from change while the connection is
/// active; the domain is only filled in when previously unset.
fn merge(record: &mut ServerRecord, incoming: &DirectoryServer) {
    if !incoming.version.is_empty() {
        record.version = incoming.version.clone();
    }
    if !incoming.os.is_empty() {
        record.os = ServerOs::from_label(&incoming.os);
    }
    if !incoming.cluster.is_empty() {
        record.cluster = incoming.cluster.clone();
    }
    if !incoming.title.is_empty() {
        record.title = incoming.title.clone();
    }
    if !record.active {
        if !incoming.hostname.is_empty() {
            record.hostname = incoming.hostname.clone();
            record.address = resolve_address(&incoming.hostname);
        }
        if let Some(port) = incoming.port {
            record.port = port;
        }
    }
    record.name = incoming.name.clone();
    record.admin_server = incoming.admin_server;
    record.secondary_admin = incoming.secondary_admin;
    if record.domain.is_empty() {
        record.domain = incoming.domain.clone();
    }
    record.deleted = false;
}

fn record_from(incoming: &DirectoryServer) -> ServerRecord {
    let mut record = ServerRecord::new(
        incoming.name.clone(),
        incoming.hostname.clone(),
        incoming.port.unwrap_or(0),
    );
    record.address = resolve_address(&incoming.hostname);
    record.domain = incoming.domain.clone();
    record.cluster = incoming.cluster.clone();
    record.title = incoming.title.clone();
    record.version = incoming.version.clone();
    record.os = ServerOs::from_label(&incoming.os);
    record.admin_server = incoming.admin_server;
    record.secondary_admin = incoming.secondary_admin;
    record
}

/// Resolves a host name to an address, trying a literal first
///
/// Resolution failures yield `None`; the address-based match stages are
/// simply skipped for unresolvable hosts.
fn resolve_address(hostname: &str) -> Option<IpAddr> {
    if hostname.is_empty() {
        return None;
    }
    if let Ok(addr) = hostname.parse::<IpAddr>() {
        return Some(addr);
    }
    (hostname, 0u16)
        .to_socket_addrs()
        .ok()?
        .next()
        .map(|sa| sa.ip())
}
