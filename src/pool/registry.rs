//! Registry of tracked connections, one slot per database
//!
//! Every method here runs with the pool lock held and only touches metadata.
//! Connections that leave the registry are handed back to the caller so they
//! can be closed after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::connection::Connection;

/// Metadata for one open connection.
pub(crate) struct ConnectionRecord<C> {
    pub(crate) connection: Arc<C>,
    pub(crate) expires_at: Instant,
    pub(crate) busy: bool,
    pub(crate) last_used_at: Instant,
    pub(crate) persistent: bool,
    pub(crate) generation: u64,
}

impl<C> ConnectionRecord<C> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn is_reclaimable(&self) -> bool {
        !self.busy && !self.persistent
    }

    fn touch(&mut self, ttl: Duration, now: Instant) {
        self.expires_at = now + ttl;
        self.last_used_at = now;
        self.busy = true;
    }
}

pub(crate) enum Slot<C> {
    /// A connection for this key is being opened outside the lock.
    Opening,
    Open(ConnectionRecord<C>),
}

/// Result of looking up a key for a new lease.
pub(crate) enum Lookup<C> {
    /// An idle, healthy record was marked busy and handed out.
    Granted { connection: Arc<C>, generation: u64 },
    /// Another caller holds the record, or is opening it.
    Busy,
    /// Nothing usable is tracked. A dead record, if any, was removed and is
    /// returned for closing.
    Vacant { stale: Option<Arc<C>> },
}

pub(crate) struct Registry<C> {
    slots: HashMap<String, Slot<C>>,
    next_generation: u64,
}

impl<C: Connection> Registry<C> {
    pub(crate) fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Number of tracked keys, including ones still being opened.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn contains(&self, dbname: &str) -> bool {
        self.slots.contains_key(dbname)
    }

    pub(crate) fn record(&self, dbname: &str) -> Option<&ConnectionRecord<C>> {
        match self.slots.get(dbname) {
            Some(Slot::Open(record)) => Some(record),
            _ => None,
        }
    }

    /// Reuse the existing record for `dbname` if it is idle and healthy.
    ///
    /// The persistent flag of a reused record is kept as it was at creation.
    pub(crate) fn lease_existing(
        &mut self,
        dbname: &str,
        ttl: Duration,
        now: Instant,
    ) -> Lookup<C> {
        let record = match self.slots.get_mut(dbname) {
            None => return Lookup::Vacant { stale: None },
            Some(Slot::Opening) => return Lookup::Busy,
            Some(Slot::Open(record)) => record,
        };

        if record.busy {
            return Lookup::Busy;
        }

        if record.connection.is_closed() || record.connection.is_broken() {
            let stale = self.remove(dbname);
            return Lookup::Vacant { stale };
        }

        record.touch(ttl, now);
        Lookup::Granted {
            connection: Arc::clone(&record.connection),
            generation: record.generation,
        }
    }

    /// Claim `dbname` for a new open so no other caller opens it concurrently.
    pub(crate) fn reserve(&mut self, dbname: &str) {
        self.slots.insert(dbname.to_string(), Slot::Opening);
    }

    /// Drop a reservation that never turned into a connection.
    pub(crate) fn cancel_reservation(&mut self, dbname: &str) {
        if matches!(self.slots.get(dbname), Some(Slot::Opening)) {
            self.slots.remove(dbname);
        }
    }

    /// Store a freshly opened connection as a busy record.
    ///
    /// Returns the generation of the new record and any connection it
    /// displaced.
    pub(crate) fn fill(
        &mut self,
        dbname: &str,
        connection: Arc<C>,
        ttl: Duration,
        persistent: bool,
        now: Instant,
    ) -> (u64, Option<Arc<C>>) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let record = ConnectionRecord {
            connection,
            expires_at: now + ttl,
            busy: true,
            last_used_at: now,
            persistent,
            generation,
        };

        let displaced = match self.slots.insert(dbname.to_string(), Slot::Open(record)) {
            Some(Slot::Open(old)) => Some(old.connection),
            _ => None,
        };

        (generation, displaced)
    }

    /// Remove every idle, non-persistent record whose deadline has passed.
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<(String, Arc<C>)> {
        let expired: Vec<String> = self
            .slots
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Open(record) if record.is_reclaimable() && record.is_expired(now) => {
                    Some(name.clone())
                }
                _ => None,
            })
            .collect();

        expired
            .into_iter()
            .filter_map(|name| self.remove(&name).map(|conn| (name, conn)))
            .collect()
    }

    /// Remove the idle, non-persistent record with the oldest `last_used_at`.
    pub(crate) fn take_lru(&mut self) -> Option<(String, Arc<C>)> {
        let victim = self
            .slots
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Open(record) if record.is_reclaimable() => {
                    Some((name, record.last_used_at))
                }
                _ => None,
            })
            .min_by_key(|(_, last_used_at)| *last_used_at)
            .map(|(name, _)| name.clone())?;

        let connection = self.remove(&victim)?;
        Some((victim, connection))
    }

    /// Mark the record idle if it is still the one that was leased.
    pub(crate) fn mark_idle(&mut self, dbname: &str, generation: u64) -> bool {
        match self.slots.get_mut(dbname) {
            Some(Slot::Open(record)) if record.generation == generation => {
                record.busy = false;
                true
            }
            _ => false,
        }
    }

    /// Remove the record if it is still the one that was leased.
    pub(crate) fn remove_generation(&mut self, dbname: &str, generation: u64) -> Option<Arc<C>> {
        let current = matches!(
            self.slots.get(dbname),
            Some(Slot::Open(record)) if record.generation == generation
        );
        if current {
            self.remove(dbname)
        } else {
            None
        }
    }

    /// Remove every open record regardless of busy or persistent state.
    ///
    /// Keys that are still being opened are left to their opener.
    pub(crate) fn drain_open(&mut self) -> Vec<(String, Arc<C>)> {
        let names: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Open(_)))
            .map(|(name, _)| name.clone())
            .collect();

        names
            .into_iter()
            .filter_map(|name| self.remove(&name).map(|conn| (name, conn)))
            .collect()
    }

    /// Remove an open record. Reservations are never removed through here.
    fn remove(&mut self, dbname: &str) -> Option<Arc<C>> {
        if !matches!(self.slots.get(dbname), Some(Slot::Open(_))) {
            return None;
        }
        match self.slots.remove(dbname) {
            Some(Slot::Open(record)) => Some(record.connection),
            _ => None,
        }
    }
}
