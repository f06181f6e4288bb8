//! Change tracking shared by every session.
//!
//! The tracker owns one [`Entries`] list per entity type. Sessions stage
//! mutations here and flush the pending entries on commit.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use datakit_core::error::DataError;
use datakit_core::result::DataResult;
use datakit_core::traits::{Entity, EntryTicket, Staged};

/// Lifecycle state of a tracked entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchanged => "Unchanged",
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked entity.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub ticket: EntryTicket,
    pub state: EntryState,
    pub current: T,
}

/// Tracked entries of one entity type, in tracking order.
///
/// Lookups by key and by ticket go through hash indexes into `entries`.
/// Staged inserts whose key is not yet generated stay out of the key index.
#[derive(Debug)]
pub struct Entries<T: Entity> {
    entries: Vec<Entry<T>>,
    by_key: HashMap<T::Key, usize>,
    by_ticket: HashMap<EntryTicket, usize>,
}

impl<T: Entity> Default for Entries<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            by_key: HashMap::new(),
            by_ticket: HashMap::new(),
        }
    }
}

impl<T: Entity> Entries<T> {
    fn keyed(entry: &Entry<T>) -> bool {
        !(entry.state == EntryState::Added && entry.current.has_transient_key())
    }

    fn push(&mut self, entry: Entry<T>) {
        let index = self.entries.len();
        if Self::keyed(&entry) {
            self.by_key.insert(entry.current.key(), index);
        }
        self.by_ticket.insert(entry.ticket, index);
        self.entries.push(entry);
    }

    /// Rebuild both indexes after entries moved or keys changed.
    ///
    /// A key staged for deletion and then added again resolves to the later
    /// entry.
    fn reindex(&mut self) {
        self.by_key.clear();
        self.by_ticket.clear();
        for (index, entry) in self.entries.iter().enumerate() {
            if Self::keyed(entry) {
                self.by_key.insert(entry.current.key(), index);
            }
            self.by_ticket.insert(entry.ticket, index);
        }
    }

    fn discard(&mut self, index: usize) {
        self.entries.remove(index);
        self.reindex();
    }

    fn position(&self, key: &T::Key) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    /// A staged insert without a key is only identifiable by value.
    fn transient_position(&self, entity: &T) -> Option<usize> {
        let wanted = serde_json::to_value(entity).ok()?;
        self.entries.iter().position(|e| {
            !Self::keyed(e) && serde_json::to_value(&e.current).ok().as_ref() == Some(&wanted)
        })
    }

    /// Entry whose entity has the given key. Transient-key inserts never match.
    pub fn lookup(&self, key: &T::Key) -> Option<&Entry<T>> {
        self.position(key).map(|i| &self.entries[i])
    }

    /// Entry behind a ticket.
    pub fn get(&self, ticket: EntryTicket) -> Option<&Entry<T>> {
        self.by_ticket.get(&ticket).map(|&i| &self.entries[i])
    }

    /// Entries with staged changes, in staging order.
    pub fn pending(&self) -> Vec<Entry<T>> {
        self.entries
            .iter()
            .filter(|e| e.state != EntryState::Unchanged)
            .cloned()
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state != EntryState::Unchanged)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

trait AnyEntries: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn pending_count(&self) -> usize;
}

impl<T: Entity> AnyEntries for Entries<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn pending_count(&self) -> usize {
        Entries::pending_count(self)
    }
}

/// Identity map plus staged changes for every entity type of one session.
#[derive(Default)]
pub struct ChangeTracker {
    sets: HashMap<TypeId, Box<dyn AnyEntries>>,
    next_ticket: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> EntryTicket {
        self.next_ticket += 1;
        EntryTicket(self.next_ticket)
    }

    /// Entries of `T`, if any were ever tracked.
    pub fn entries<T: Entity>(&self) -> Option<&Entries<T>> {
        self.sets
            .get(&TypeId::of::<T>())
            .and_then(|set| set.as_any().downcast_ref::<Entries<T>>())
    }

    fn entries_mut<T: Entity>(&mut self) -> &mut Entries<T> {
        let set = self
            .sets
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Entries::<T>::default()));
        match set.as_any_mut().downcast_mut::<Entries<T>>() {
            Some(entries) => entries,
            None => unreachable!("entry sets are keyed by their TypeId"),
        }
    }

    /// Resolve a row loaded by a tracked query.
    ///
    /// Returns the tracked value when the key is already tracked, otherwise
    /// starts tracking the row as `Unchanged`.
    pub fn attach<T: Entity>(&mut self, row: T) -> T {
        if let Some(entry) = self.entries::<T>().and_then(|e| e.lookup(&row.key())) {
            return entry.current.clone();
        }
        let ticket = self.allocate();
        self.entries_mut::<T>().push(Entry {
            ticket,
            state: EntryState::Unchanged,
            current: row.clone(),
        });
        row
    }

    /// Tracked lookup by key: `Some(Some(_))` for a live entry,
    /// `Some(None)` for a staged deletion, `None` when untracked.
    pub fn find<T: Entity>(&self, key: &T::Key) -> Option<Option<T>> {
        self.entries::<T>()
            .and_then(|e| e.lookup(key))
            .map(|entry| match entry.state {
                EntryState::Deleted => None,
                _ => Some(entry.current.clone()),
            })
    }

    /// Stage an insertion.
    pub fn add<T: Entity>(&mut self, entity: T) -> DataResult<Staged<T>> {
        if !entity.has_transient_key() {
            let key = entity.key();
            if let Some(existing) = self.entries::<T>().and_then(|e| e.lookup(&key)) {
                if existing.state != EntryState::Deleted {
                    return Err(DataError::invalid_operation(format!(
                        "{} with key {key:?} is already tracked",
                        T::NAME
                    )));
                }
            }
        }
        let ticket = self.allocate();
        self.entries_mut::<T>().push(Entry {
            ticket,
            state: EntryState::Added,
            current: entity.clone(),
        });
        Ok(Staged { ticket, entity })
    }

    /// Stage a modification of a tracked entity.
    ///
    /// A staged insert whose key is not yet generated is matched by value,
    /// the same way [`ChangeTracker::remove`] finds it, and stays `Added`.
    pub fn update<T: Entity>(&mut self, entity: T) -> DataResult<()> {
        let entries = self.entries_mut::<T>();
        let position = if entity.has_transient_key() {
            entries.transient_position(&entity)
        } else {
            entries.position(&entity.key())
        };
        let Some(index) = position else {
            return Err(if entity.has_transient_key() {
                DataError::invalid_operation(format!(
                    "{} without a generated key does not match any staged insert",
                    T::NAME
                ))
            } else {
                DataError::invalid_operation(format!(
                    "{} with key {:?} is not tracked; read it with tracking enabled before updating",
                    T::NAME,
                    entity.key()
                ))
            });
        };
        let entry = &mut entries.entries[index];
        if entry.state != EntryState::Added {
            entry.state = EntryState::Modified;
        }
        entry.current = entity;
        Ok(())
    }

    /// Stage a deletion. Removing a staged insertion discards it.
    pub fn remove<T: Entity>(&mut self, entity: T) {
        let entries = self.entries_mut::<T>();
        if entity.has_transient_key() {
            if let Some(index) = entries.transient_position(&entity) {
                entries.discard(index);
            }
            return;
        }
        match entries.position(&entity.key()) {
            Some(index) if entries.entries[index].state == EntryState::Added => {
                entries.discard(index);
            }
            Some(index) => {
                let entry = &mut entries.entries[index];
                entry.state = EntryState::Deleted;
                entry.current = entity;
            }
            None => {
                let ticket = self.allocate();
                self.entries_mut::<T>().push(Entry {
                    ticket,
                    state: EntryState::Deleted,
                    current: entity,
                });
            }
        }
    }

    /// Current value behind a ticket.
    pub fn tracked<T: Entity>(&self, ticket: EntryTicket) -> Option<T> {
        self.entries::<T>()
            .and_then(|e| e.get(ticket))
            .map(|e| e.current.clone())
    }

    /// Pending entries of `T`.
    pub fn pending<T: Entity>(&self) -> Vec<Entry<T>> {
        self.entries::<T>().map(Entries::pending).unwrap_or_default()
    }

    /// Number of staged changes across all entity types.
    pub fn pending_changes(&self) -> usize {
        self.sets.values().map(|s| s.pending_count()).sum()
    }

    /// Mark the changes of `T` as persisted.
    ///
    /// Store-generated keys are written back first. Deleted entries are
    /// detached and every remaining entry becomes `Unchanged`.
    pub fn accept<T: Entity>(&mut self, generated: &[(EntryTicket, i64)]) {
        let entries = self.entries_mut::<T>();
        for (ticket, id) in generated {
            if let Some(&index) = entries.by_ticket.get(ticket) {
                entries.entries[index].current.assign_key(*id);
            }
        }
        entries.entries.retain(|e| e.state != EntryState::Deleted);
        for entry in &mut entries.entries {
            entry.state = EntryState::Unchanged;
        }
        entries.reindex();
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.sets.clear();
    }
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("entity_types", &self.sets.len())
            .field("pending", &self.pending_changes())
            .finish()
    }
}
