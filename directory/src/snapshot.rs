//! Immutable point-in-time views of a dataset and the builders that make them.
//!
//! A [`Snapshot`] is built completely from one fetch and only then handed to
//! the [`SnapshotStore`](crate::store::SnapshotStore). Nothing mutates it
//! afterwards, so the forward and inverse maps always agree.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{
    store::SnapshotStore,
    types::{Alias, Channel, ChannelKind, DirectoryEntry, User},
};

#[derive(Debug, Clone)]
pub struct Snapshot<E> {
    by_id: HashMap<String, E>,
    by_alias: HashMap<Alias, String>,
    generation: u64,
    refreshed_at: DateTime<Utc>,
}

impl<E: DirectoryEntry> Snapshot<E> {
    pub fn empty() -> Self {
        Self {
            by_id: HashMap::new(),
            by_alias: HashMap::new(),
            generation: 0,
            refreshed_at: DateTime::<Utc>::default(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&E> {
        self.by_id.get(id)
    }

    /// Id registered for an alias, after normalizing the token.
    pub fn id_for_alias(&self, alias: &str) -> Option<&str> {
        self.by_alias.get(&Alias::parse(alias)).map(String::as_str)
    }

    /// Raw id match first, then alias lookup.
    pub fn lookup(&self, token: &str) -> Option<&E> {
        self.get(token)
            .or_else(|| self.id_for_alias(token).and_then(|id| self.get(id)))
    }

    /// Canonical id for a token; unknown tokens come back unchanged so the
    /// upstream call that uses them reports the authoritative "not found".
    pub fn resolve<'a>(&'a self, token: &'a str) -> &'a str {
        if self.by_id.contains_key(token) {
            return token;
        }
        self.id_for_alias(token).unwrap_or(token)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &E> {
        self.by_id.values()
    }

    pub fn by_id(&self) -> &HashMap<String, E> {
        &self.by_id
    }

    pub fn by_alias(&self) -> &HashMap<Alias, String> {
        &self.by_alias
    }

    /// Publish sequence number; 0 for a snapshot that was never published.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.refreshed_at
    }

    /// Only called by the store, before the snapshot is shared.
    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }
}

impl<E: DirectoryEntry> Default for Snapshot<E> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Turns one fetch result into one snapshot. Pure: no I/O, no shared writes.
pub trait SnapshotBuilder<E>: Send + Sync {
    fn build(&self, entries: Vec<E>) -> Snapshot<E>;
}

/// Indexes entries by id and by every alias they declare.
///
/// A duplicate id keeps the last entry. A duplicate alias keeps the entry
/// that appears last in upstream order.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexBuilder;

impl<E: DirectoryEntry> SnapshotBuilder<E> for IndexBuilder {
    fn build(&self, entries: Vec<E>) -> Snapshot<E> {
        let mut by_id: HashMap<String, E> = HashMap::with_capacity(entries.len());
        let mut order: Vec<String> = Vec::with_capacity(entries.len());
        let mut duplicate_ids = 0usize;

        for entry in entries {
            let id = entry.id().to_string();
            if by_id.insert(id.clone(), entry).is_some() {
                duplicate_ids += 1;
            } else {
                order.push(id);
            }
        }

        // Aliases come from the surviving entries only, so every alias
        // resolves to an entry that still declares it.
        let mut by_alias: HashMap<Alias, String> = HashMap::with_capacity(order.len());
        let mut alias_collisions = 0usize;
        for id in order {
            let Some(entry) = by_id.get(&id) else {
                continue;
            };
            for alias in entry.aliases().iter() {
                if let Some(previous) = by_alias.insert(alias.clone(), id.clone()) {
                    if previous != id {
                        alias_collisions += 1;
                        debug!(alias = %alias, previous = %previous, id = %id, "Alias reassigned");
                    }
                }
            }
        }

        if duplicate_ids > 0 || alias_collisions > 0 {
            warn!(
                dataset = %E::DATASET,
                duplicate_ids,
                alias_collisions,
                "Upstream listing contained duplicates"
            );
        }

        Snapshot {
            by_id,
            by_alias,
            generation: 0,
            refreshed_at: Utc::now(),
        }
    }
}

/// Channels builder that names direct messages after the peer user.
///
/// The peer's handle comes from the users snapshot that is current when the
/// channels snapshot is built.
pub struct ChannelIndexBuilder {
    users: Arc<SnapshotStore<User>>,
}

impl ChannelIndexBuilder {
    pub fn new(users: Arc<SnapshotStore<User>>) -> Self {
        Self { users }
    }
}

impl SnapshotBuilder<Channel> for ChannelIndexBuilder {
    fn build(&self, mut entries: Vec<Channel>) -> Snapshot<Channel> {
        let users = self.users.load();
        let mut unnamed = 0usize;

        for channel in entries.iter_mut().filter(|c| c.kind == ChannelKind::Im) {
            match channel.user.as_deref().and_then(|id| users.get(id)) {
                Some(user) => channel.name = user.name.clone(),
                None => unnamed += 1,
            }
        }
        if unnamed > 0 {
            debug!(unnamed, "Direct messages without a known peer user");
        }

        IndexBuilder.build(entries)
    }
}
